//! # backhaul-collector: metric collection for the backhaul agent
//!
//! Collectors gather one category of host metrics each. The [`Registry`]
//! owns them, runs them on the scheduler's cadence and publishes the result
//! as an immutable [`Snapshot`]. Readers (the reverse connection's command
//! processor) only ever see a flushed snapshot; they never trigger a
//! collection themselves.
//!
//! ```text
//!   scheduler ──collect()──► Registry ──publishes──► Arc<Snapshot>
//!                              │                          ▲
//!                 cpu / load / memory collectors          │ flush()
//!                                                  command processor
//! ```

pub mod builtin;
mod error;
mod metrics;
mod options;
mod registry;


pub use error::{CollectError, CollectorError};
pub use metrics::{METRIC_NAME_SEPARATOR, Metrics, Sample, SampleType, SampleValue};
pub use options::{CollectorOptions, MetricStatus};
pub use registry::{Registry, Snapshot};

/// A source of host metrics.
///
/// Implementations are owned by the [`Registry`] and called from the
/// collection scheduler, possibly on a blocking worker thread, hence `Send`.
pub trait Collector: Send {
    /// Stable identifier, used as the metric namespace (e.g. `"cpu"`).
    fn id(&self) -> &str;

    /// Gathers current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API fails.
    fn collect(&mut self) -> Result<Metrics, CollectError>;
}

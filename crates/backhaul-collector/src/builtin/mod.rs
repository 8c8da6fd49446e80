//! Host collectors backed by `sysinfo`.

mod cpu;
mod load;
mod memory;

pub use cpu::CpuCollector;
pub use load::LoadCollector;
pub use memory::MemoryCollector;

use crate::Collector;
use crate::error::CollectorError;
use crate::options::CollectorOptions;

/// Names accepted by [`builtin`].
pub const BUILTIN_NAMES: &[&str] = &["cpu", "load", "memory"];

/// Builds the builtin collector registered under `name`.
///
/// # Errors
///
/// Returns [`CollectorError::UnknownBuiltin`] if no builtin has that name.
pub fn builtin(
    name: &str,
    options: &CollectorOptions,
) -> Result<Box<dyn Collector>, CollectorError> {
    match name {
        "cpu" => Ok(Box::new(CpuCollector::new(options.report_all_cpus))),
        "load" => Ok(Box::new(LoadCollector::new())),
        "memory" => Ok(Box::new(MemoryCollector::new())),
        other => Err(CollectorError::UnknownBuiltin(other.to_string())),
    }
}

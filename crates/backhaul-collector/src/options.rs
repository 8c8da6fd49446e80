//! Per-collector options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether metrics not named explicitly are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    #[default]
    Enabled,
    Disabled,
}

/// Settings a collector section in the configuration may override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorOptions {
    /// Replaces the collector's default id (and so its metric namespace).
    pub id: Option<String>,
    /// Metric names always reported.
    pub metrics_enabled: Vec<String>,
    /// Metric names never reported. Wins over `metrics_enabled`.
    pub metrics_disabled: Vec<String>,
    /// Status of metrics named in neither list.
    pub metrics_default_status: MetricStatus,
    /// Minimum time between two runs of the collector.
    pub run_ttl_secs: Option<u64>,
    /// Report every CPU instead of only the total (cpu collector only).
    pub report_all_cpus: bool,
}

impl CollectorOptions {
    /// Returns true if the metric should be reported.
    pub fn is_metric_enabled(&self, name: &str) -> bool {
        if self.metrics_disabled.iter().any(|m| m == name) {
            return false;
        }
        if self.metrics_enabled.iter().any(|m| m == name) {
            return true;
        }
        self.metrics_default_status == MetricStatus::Enabled
    }

    pub fn run_ttl(&self) -> Option<Duration> {
        self.run_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

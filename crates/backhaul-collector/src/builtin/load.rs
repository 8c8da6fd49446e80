use sysinfo::System;

use crate::Collector;
use crate::error::CollectError;
use crate::metrics::Metrics;

/// Load averages and uptime.
#[derive(Debug, Default)]
pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Collector for LoadCollector {
    fn id(&self) -> &str {
        "load"
    }

    fn collect(&mut self) -> Result<Metrics, CollectError> {
        let load = System::load_average();

        let mut metrics = Metrics::new();
        metrics.add_double("1min", load.one);
        metrics.add_double("5min", load.five);
        metrics.add_double("15min", load.fifteen);
        metrics.add_uint("uptime_secs", System::uptime());
        Ok(metrics)
    }
}

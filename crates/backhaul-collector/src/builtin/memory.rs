use sysinfo::System;

use crate::Collector;
use crate::error::CollectError;
use crate::metrics::Metrics;

/// Physical memory and swap, in bytes and percent used.
pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

impl Collector for MemoryCollector {
    fn id(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Metrics, CollectError> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectError::new(self.id(), "total memory reported as zero"));
        }
        let used = self.system.used_memory();
        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap();

        let mut metrics = Metrics::new();
        metrics.add_uint("total", total);
        metrics.add_uint("used", used);
        metrics.add_uint("available", self.system.available_memory());
        metrics.add_double("used_pct", percent(used, total));
        metrics.add_uint("swap_total", swap_total);
        metrics.add_uint("swap_used", swap_used);
        metrics.add_double("swap_used_pct", percent(swap_used, swap_total));
        Ok(metrics)
    }
}

use sysinfo::System;

use crate::Collector;
use crate::error::CollectError;
use crate::metrics::{METRIC_NAME_SEPARATOR, Metrics};

/// CPU utilization in percent, either overall or per core.
///
/// Per-core metrics are named `` <index>`used_pct `` and replace the overall
/// `used_pct`.
pub struct CpuCollector {
    system: System,
    report_all_cpus: bool,
}

impl CpuCollector {
    pub fn new(report_all_cpus: bool) -> Self {
        let mut system = System::new();
        // Usage is a delta between refreshes; prime the first sample.
        system.refresh_cpu_all();
        Self {
            system,
            report_all_cpus,
        }
    }
}

impl Collector for CpuCollector {
    fn id(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Metrics, CollectError> {
        self.system.refresh_cpu_all();

        let per_cpu: Vec<f32> = self.system.cpus().iter().map(sysinfo::Cpu::cpu_usage).collect();
        if per_cpu.is_empty() {
            return Err(CollectError::new(self.id(), "no cpus reported"));
        }

        let overall = (!self.report_all_cpus).then(|| self.system.global_cpu_usage());
        Ok(usage_metrics(overall, &per_cpu))
    }
}

/// Overall usage when given, otherwise one metric per core.
fn usage_metrics(overall: Option<f32>, per_cpu: &[f32]) -> Metrics {
    let mut metrics = Metrics::new();
    metrics.add_uint("num_cpu", per_cpu.len() as u64);

    match overall {
        Some(pct) => metrics.add_double("used_pct", f64::from(pct)),
        None => {
            for (idx, pct) in per_cpu.iter().enumerate() {
                metrics.add_double(
                    format!("{idx}{METRIC_NAME_SEPARATOR}used_pct"),
                    f64::from(*pct),
                );
            }
        }
    }
    metrics
}

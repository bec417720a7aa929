use super::{Probe, ProbeError, ProbeKind, Sample};
use crate::state::CpuSample;
use std::thread;
use std::time::Duration;
use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};

pub trait CpuSource: Send {
    /// Per-core utilization measured over `window`. Blocks for the window.
    fn per_core_usage(&mut self, window: Duration) -> Vec<f32>;
}

pub struct SysinfoCpu {
    system: System,
}

impl SysinfoCpu {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::new().with_cpu_usage()),
        );
        Self { system }
    }
}

impl CpuSource for SysinfoCpu {
    fn per_core_usage(&mut self, window: Duration) -> Vec<f32> {
        self.system.refresh_cpu();
        thread::sleep(window);
        self.system.refresh_cpu();
        self.system.cpus().iter().map(|c| c.cpu_usage()).collect()
    }
}

pub struct CpuProbe<S> {
    source: S,
    window: Duration,
    core_count: Option<usize>,
}

impl<S: CpuSource> CpuProbe<S> {
    pub fn new(source: S, window: Duration) -> Self {
        Self {
            source,
            window,
            core_count: None,
        }
    }
}

impl<S: CpuSource> Probe for CpuProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Cpu
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let per_core: Vec<f32> = self
            .source
            .per_core_usage(self.window)
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 })
            .collect();
        if per_core.is_empty() {
            return Err(ProbeError::Unavailable("no cpu counters".to_string()));
        }

        let expected = *self.core_count.get_or_insert(per_core.len());
        if per_core.len() != expected {
            return Err(ProbeError::Transient(format!(
                "core count changed from {expected} to {}",
                per_core.len()
            )));
        }

        Ok(Sample::Cpu(CpuSample {
            per_core_percent: per_core,
        }))
    }
}

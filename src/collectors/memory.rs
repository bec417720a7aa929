use super::{round_to, Probe, ProbeError, ProbeKind, Sample, BYTES_PER_GIB};
use crate::state::MemorySample;
use sysinfo::{RefreshKind, System, SystemExt};

pub trait MemorySource: Send {
    /// `(used, total)` in bytes.
    fn read(&mut self) -> (u64, u64);
}

pub struct SysinfoMemory {
    system: System,
}

impl SysinfoMemory {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(RefreshKind::new().with_memory()),
        }
    }
}

impl MemorySource for SysinfoMemory {
    fn read(&mut self) -> (u64, u64) {
        self.system.refresh_memory();
        (self.system.used_memory(), self.system.total_memory())
    }
}

pub struct MemoryProbe<S> {
    source: S,
}

impl<S: MemorySource> MemoryProbe<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: MemorySource> Probe for MemoryProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Memory
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let (used, total) = self.source.read();
        if total == 0 {
            return Err(ProbeError::Unavailable("total memory reported as 0".to_string()));
        }
        let used = used.min(total);

        Ok(Sample::Memory(MemorySample {
            used_gib: round_to(used as f64 / BYTES_PER_GIB, 2),
            total_gib: round_to(total as f64 / BYTES_PER_GIB, 2),
            percent: round_to(used as f64 / total as f64 * 100.0, 1),
        }))
    }
}

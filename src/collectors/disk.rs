use super::{round_to, Probe, ProbeError, ProbeKind, Sample};
use crate::state::{DiskStat, DiskUsage};
use std::path::Path;
use sysinfo::{DiskExt, System, SystemExt};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
}

pub trait DiskSource: Send {
    fn partitions(&mut self) -> Result<Vec<Partition>, ProbeError>;
    /// `(total, available)` in bytes for one mountpoint.
    fn usage(&mut self, mountpoint: &str) -> Result<(u64, u64), ProbeError>;
}

pub struct SysinfoDisks {
    system: System,
}

impl SysinfoDisks {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl DiskSource for SysinfoDisks {
    fn partitions(&mut self) -> Result<Vec<Partition>, ProbeError> {
        self.system.refresh_disks_list();
        Ok(self
            .system
            .disks()
            .iter()
            .map(|d| Partition {
                device: d.name().to_string_lossy().to_string(),
                mountpoint: d.mount_point().to_string_lossy().to_string(),
                fs_type: String::from_utf8_lossy(d.file_system()).to_string(),
            })
            .collect())
    }

    fn usage(&mut self, mountpoint: &str) -> Result<(u64, u64), ProbeError> {
        let target = Path::new(mountpoint);
        let disk = self
            .system
            .disks_mut()
            .iter_mut()
            .find(|d| d.mount_point() == target)
            .ok_or_else(|| ProbeError::Transient(format!("{mountpoint} no longer mounted")))?;
        if !disk.refresh() {
            return Err(ProbeError::Transient(format!(
                "{mountpoint} vanished before usage query"
            )));
        }
        Ok((disk.total_space(), disk.available_space()))
    }
}

pub struct DiskProbe<S> {
    source: S,
}

impl<S: DiskSource> DiskProbe<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: DiskSource> Probe for DiskProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Disks
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let partitions = self.source.partitions()?;
        let mut disks = Vec::with_capacity(partitions.len());

        for partition in partitions {
            let (total, available) = match self.source.usage(&partition.mountpoint) {
                Ok(v) => v,
                Err(err) => {
                    debug!(mount = %partition.mountpoint, error = %err, "partition skipped");
                    continue;
                }
            };
            let available = available.min(total);
            let used = total - available;
            let percent = if total > 0 {
                round_to(used as f64 / total as f64 * 100.0, 1)
            } else {
                0.0
            };
            disks.push(DiskStat {
                device: partition.device,
                mountpoint: partition.mountpoint,
                fs_type: partition.fs_type,
                usage: DiskUsage {
                    total_bytes: total,
                    used_bytes: used,
                    free_bytes: available,
                    percent,
                },
            });
        }

        Ok(Sample::Disks(disks))
    }
}

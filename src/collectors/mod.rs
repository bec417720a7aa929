//! Platform probes. Each probe queries one OS subsystem and reports either a
//! typed sample or a [`ProbeError`]; the scheduler never sees anything else.

pub mod clipboard;
pub mod command;
pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod identity;
pub mod memory;
pub mod ports;
pub mod processes;
pub mod temperature;

use crate::config::Config;
use crate::state::{
    ClipboardSample, CpuSample, DiskSample, GpuSample, MemorySample, PortSample, ProcessSample,
    SystemIdentity, TemperatureSample,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Identity,
    Cpu,
    Memory,
    Gpu,
    Disks,
    Ports,
    Processes,
    Temperatures,
    Clipboard,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 9] = [
        ProbeKind::Identity,
        ProbeKind::Cpu,
        ProbeKind::Memory,
        ProbeKind::Gpu,
        ProbeKind::Disks,
        ProbeKind::Ports,
        ProbeKind::Processes,
        ProbeKind::Temperatures,
        ProbeKind::Clipboard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Identity => "identity",
            ProbeKind::Cpu => "cpu",
            ProbeKind::Memory => "memory",
            ProbeKind::Gpu => "gpu",
            ProbeKind::Disks => "disks",
            ProbeKind::Ports => "ports",
            ProbeKind::Processes => "processes",
            ProbeKind::Temperatures => "temperatures",
            ProbeKind::Clipboard => "clipboard",
        }
    }

    /// Interval used when the config does not name one. Partition and
    /// connection enumeration are the expensive kernel walks.
    pub fn default_interval(self, base: Duration) -> Duration {
        match self {
            ProbeKind::Disks | ProbeKind::Ports => base.max(Duration::from_secs(5)),
            _ => base,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("name resolution failed: {0}")]
    Resolution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Unavailable,
    PermissionDenied,
    Transient,
    Resolution,
}

impl ProbeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeErrorKind::Unavailable => "unavailable",
            ProbeErrorKind::PermissionDenied => "permission_denied",
            ProbeErrorKind::Transient => "transient",
            ProbeErrorKind::Resolution => "resolution",
        }
    }
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Unavailable(_) => ProbeErrorKind::Unavailable,
            ProbeError::PermissionDenied(_) => ProbeErrorKind::PermissionDenied,
            ProbeError::Transient(_) => ProbeErrorKind::Transient,
            ProbeError::Resolution(_) => ProbeErrorKind::Resolution,
        }
    }

    /// Maps an I/O failure onto the probe taxonomy. Only a permission error
    /// is reported as such; everything else is worth retrying next tick.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                ProbeError::PermissionDenied(format!("{context}: {err}"))
            }
            std::io::ErrorKind::NotFound => ProbeError::Unavailable(format!("{context}: {err}")),
            _ => ProbeError::Transient(format!("{context}: {err}")),
        }
    }
}

/// One successful probe result, tagged by metric family.
#[derive(Debug, Clone)]
pub enum Sample {
    Identity(SystemIdentity),
    Cpu(CpuSample),
    Memory(MemorySample),
    Gpu(GpuSample),
    Disks(DiskSample),
    Ports(PortSample),
    Processes(ProcessSample),
    Temperatures(TemperatureSample),
    Clipboard(ClipboardSample),
}

pub trait Probe: Send {
    fn kind(&self) -> ProbeKind;

    /// Blocking read of the underlying subsystem.
    fn sample(&mut self) -> Result<Sample, ProbeError>;

    /// Drops anything cached between samples.
    fn invalidate(&mut self) {}
}

/// Builds the production probe set for every enabled kind.
pub fn build_probes(cfg: &Config) -> Vec<Box<dyn Probe>> {
    let window = Duration::from_millis(cfg.cpu_sample_window_ms);
    let mut probes: Vec<Box<dyn Probe>> = Vec::new();
    for kind in ProbeKind::ALL {
        if !cfg.probes.get(kind).enabled {
            continue;
        }
        let probe: Box<dyn Probe> = match kind {
            ProbeKind::Identity => Box::new(identity::IdentityProbe::new(
                identity::SysinfoHost::new(),
            )),
            ProbeKind::Cpu => Box::new(cpu::CpuProbe::new(cpu::SysinfoCpu::new(), window)),
            ProbeKind::Memory => Box::new(memory::MemoryProbe::new(memory::SysinfoMemory::new())),
            ProbeKind::Gpu => Box::new(gpu::GpuProbe::new(gpu::NvidiaSmi)),
            ProbeKind::Disks => Box::new(disk::DiskProbe::new(disk::SysinfoDisks::new())),
            ProbeKind::Ports => Box::new(ports::PortProbe::new(ports::ProcNet::default())),
            ProbeKind::Processes => Box::new(processes::ProcessProbe::new(
                processes::SysinfoProcesses::new(window),
                cfg.process_limit,
            )),
            ProbeKind::Temperatures => Box::new(temperature::TemperatureProbe::new(
                temperature::PlatformSensors::new(),
            )),
            ProbeKind::Clipboard => Box::new(clipboard::ClipboardProbe::new(
                clipboard::ClipboardCommand,
            )),
        };
        probes.push(probe);
    }
    probes
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

pub(crate) const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_probe_taxonomy() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        let other = std::io::Error::from(std::io::ErrorKind::Interrupted);

        assert_eq!(
            ProbeError::from_io("x", &denied).kind(),
            ProbeErrorKind::PermissionDenied
        );
        assert_eq!(
            ProbeError::from_io("x", &missing).kind(),
            ProbeErrorKind::Unavailable
        );
        assert_eq!(
            ProbeError::from_io("x", &other).kind(),
            ProbeErrorKind::Transient
        );
    }

    #[test]
    fn heavy_probes_default_to_slower_cadence() {
        let base = Duration::from_secs(2);
        assert_eq!(ProbeKind::Disks.default_interval(base), Duration::from_secs(5));
        assert_eq!(ProbeKind::Ports.default_interval(base), Duration::from_secs(5));
        assert_eq!(ProbeKind::Memory.default_interval(base), base);
        assert_eq!(
            ProbeKind::Disks.default_interval(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn rounding_matches_dashboard_precision() {
        assert_eq!(round_to(15.5549, 2), 15.55);
        assert_eq!(round_to(42.06, 1), 42.1);
    }
}

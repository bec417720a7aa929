use super::command::{parse_f64_loose, run_first_available};
use super::{Probe, ProbeError, ProbeKind, Sample};
use crate::state::GpuStat;

const NVIDIA_SMI_ARGS: [&str; 2] = [
    "--query-gpu=index,name,utilization.gpu,memory.total,memory.used,temperature.gpu",
    "--format=csv,noheader,nounits",
];

#[cfg(target_os = "windows")]
const NVIDIA_SMI_CANDIDATES: [&str; 2] = ["nvidia-smi", r"C:\Windows\System32\nvidia-smi.exe"];
#[cfg(not(target_os = "windows"))]
const NVIDIA_SMI_CANDIDATES: [&str; 1] = ["nvidia-smi"];

pub trait GpuSource: Send {
    /// Raw CSV rows from the driver tool, `None` when no driver is installed.
    fn query(&mut self) -> Result<Option<String>, ProbeError>;
}

pub struct NvidiaSmi;

impl GpuSource for NvidiaSmi {
    fn query(&mut self) -> Result<Option<String>, ProbeError> {
        let Some(output) = run_first_available(&NVIDIA_SMI_CANDIDATES, &NVIDIA_SMI_ARGS)? else {
            return Ok(None);
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Unavailable(format!(
                "nvidia-smi exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
    }
}

pub struct GpuProbe<S> {
    source: S,
}

impl<S: GpuSource> GpuProbe<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: GpuSource> Probe for GpuProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Gpu
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let gpus = match self.source.query()? {
            Some(text) => parse_nvidia_smi(&text),
            None => Vec::new(),
        };
        Ok(Sample::Gpu(gpus))
    }
}

fn parse_nvidia_smi(text: &str) -> Vec<GpuStat> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 6 || parts[1].is_empty() {
                return None;
            }

            Some(GpuStat {
                name: parts[1].to_string(),
                load_percent: parse_f64_loose(parts[2]).unwrap_or(0.0).clamp(0.0, 100.0),
                memory_total_mib: parse_f64_loose(parts[3]).unwrap_or(0.0).max(0.0),
                memory_used_mib: parse_f64_loose(parts[4]).unwrap_or(0.0).max(0.0),
                temperature_celsius: parse_f64_loose(parts[5]),
            })
        })
        .collect()
}

use crate::collectors::ProbeKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_cpu_sample_window_ms")]
    pub cpu_sample_window_ms: u64,
    /// How many processes the top-by-CPU list keeps.
    #[serde(default = "default_process_limit")]
    pub process_limit: usize,
    #[serde(default)]
    pub probes: ProbesConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProbesConfig {
    #[serde(default)]
    pub identity: ProbeConfig,
    #[serde(default)]
    pub cpu: ProbeConfig,
    #[serde(default)]
    pub memory: ProbeConfig,
    #[serde(default)]
    pub gpu: ProbeConfig,
    #[serde(default)]
    pub disks: ProbeConfig,
    #[serde(default)]
    pub ports: ProbeConfig,
    #[serde(default)]
    pub processes: ProbeConfig,
    #[serde(default)]
    pub temperatures: ProbeConfig,
    #[serde(default)]
    pub clipboard: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Falls back to the kind's default cadence when unset.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: None,
        }
    }
}

impl ProbesConfig {
    pub fn get(&self, kind: ProbeKind) -> &ProbeConfig {
        match kind {
            ProbeKind::Identity => &self.identity,
            ProbeKind::Cpu => &self.cpu,
            ProbeKind::Memory => &self.memory,
            ProbeKind::Gpu => &self.gpu,
            ProbeKind::Disks => &self.disks,
            ProbeKind::Ports => &self.ports,
            ProbeKind::Processes => &self.processes,
            ProbeKind::Temperatures => &self.temperatures,
            ProbeKind::Clipboard => &self.clipboard,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            cpu_sample_window_ms: default_cpu_sample_window_ms(),
            process_limit: default_process_limit(),
            probes: ProbesConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a host:port socket address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.process_limit < 1 {
            return Err(ConfigError::Validation(
                "process_limit must be >= 1".to_string(),
            ));
        }
        if self.cpu_sample_window_ms < 100 {
            return Err(ConfigError::Validation(
                "cpu_sample_window_ms must be >= 100".to_string(),
            ));
        }
        if self.cpu_sample_window() >= self.interval() {
            return Err(ConfigError::Validation(
                "cpu_sample_window_ms must be shorter than interval_secs".to_string(),
            ));
        }
        if self.probe_timeout_ms <= self.cpu_sample_window_ms {
            return Err(ConfigError::Validation(
                "probe_timeout_ms must be greater than cpu_sample_window_ms".to_string(),
            ));
        }

        // adapters only run on ticks, so a shorter cadence cannot be honoured
        for kind in ProbeKind::ALL {
            if let Some(secs) = self.probes.get(kind).interval_secs {
                if secs < self.interval_secs {
                    return Err(ConfigError::Validation(format!(
                        "probes.{kind}.interval_secs must be >= interval_secs ({})",
                        self.interval_secs
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_window_ms)
    }

    pub fn probe_interval(&self, kind: ProbeKind) -> Duration {
        match self.probes.get(kind).interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => kind.default_interval(self.interval()),
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn default_listen() -> String {
    "127.0.0.1:9108".to_string()
}

const fn default_interval_secs() -> u64 {
    2
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

const fn default_cpu_sample_window_ms() -> u64 {
    500
}

const fn default_process_limit() -> usize {
    10
}

const fn default_enabled() -> bool {
    true
}

use super::{round_to, Probe, ProbeError, ProbeKind, Sample, BYTES_PER_GIB};
use crate::state::SystemIdentity;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};
use tracing::warn;

pub trait HostSource: Send {
    fn host_name(&mut self) -> Option<String>;
    fn resolve_ip(&mut self, host: &str) -> Result<IpAddr, ProbeError>;
    fn os_description(&mut self) -> Option<String>;
    fn cpu_brand(&mut self) -> Option<String>;
    fn boot_time(&mut self) -> SystemTime;
    fn total_memory_bytes(&mut self) -> u64;
    fn now(&mut self) -> SystemTime {
        SystemTime::now()
    }
}

pub struct SysinfoHost {
    system: System,
}

impl SysinfoHost {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(),
        );
        Self { system }
    }
}

impl HostSource for SysinfoHost {
    fn host_name(&mut self) -> Option<String> {
        self.system.host_name()
    }

    fn resolve_ip(&mut self, host: &str) -> Result<IpAddr, ProbeError> {
        let addrs: Vec<IpAddr> = (host, 0)
            .to_socket_addrs()
            .map_err(|err| ProbeError::Resolution(format!("{host}: {err}")))?
            .map(|addr| addr.ip())
            .collect();
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ProbeError::Resolution(format!("{host}: no addresses")))
    }

    fn os_description(&mut self) -> Option<String> {
        let name = self.system.name()?;
        let version = self
            .system
            .os_version()
            .or_else(|| self.system.kernel_version());
        Some(match version {
            Some(v) => format!("{name} {v}"),
            None => name,
        })
    }

    fn cpu_brand(&mut self) -> Option<String> {
        self.system
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty())
    }

    fn boot_time(&mut self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.system.boot_time())
    }

    fn total_memory_bytes(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.total_memory()
    }
}

pub struct IdentityProbe<S> {
    source: S,
    cached: Option<SystemIdentity>,
    boot_time: Option<SystemTime>,
}

impl<S: HostSource> IdentityProbe<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: None,
            boot_time: None,
        }
    }

    fn resolve_static(&mut self) -> SystemIdentity {
        let host_name = self
            .source
            .host_name()
            .unwrap_or_else(|| "unknown".to_string());
        let (ip_address, ip_resolution_error) = match self.source.resolve_ip(&host_name) {
            Ok(ip) => (ip.to_string(), None),
            Err(err) => {
                warn!(host = %host_name, error = %err, "host name did not resolve");
                (String::new(), Some(err.to_string()))
            }
        };
        let ram_total_gib = round_to(
            self.source.total_memory_bytes() as f64 / BYTES_PER_GIB,
            2,
        );

        SystemIdentity {
            host_name,
            ip_address,
            ip_resolution_error,
            os: self
                .source
                .os_description()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            cpu_model: self
                .source
                .cpu_brand()
                .unwrap_or_else(|| "unknown".to_string()),
            uptime: Duration::ZERO,
            ram_total_gib,
        }
    }
}

impl<S: HostSource> Probe for IdentityProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Identity
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let mut identity = match self.cached.take() {
            Some(identity) => identity,
            None => self.resolve_static(),
        };
        let boot_time = match self.boot_time {
            Some(t) => t,
            None => {
                let t = self.source.boot_time();
                self.boot_time = Some(t);
                t
            }
        };
        identity.uptime = self
            .source
            .now()
            .duration_since(boot_time)
            .unwrap_or_default();

        self.cached = Some(identity.clone());
        Ok(Sample::Identity(identity))
    }

    fn invalidate(&mut self) {
        self.cached = None;
        self.boot_time = None;
    }
}

use crate::collectors::{ProbeError, ProbeErrorKind, ProbeKind, Sample};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

pub const TEMPERATURE_UNAVAILABLE_KEY: &str = "N/A";
pub const TEMPERATURE_UNAVAILABLE_TEXT: &str = "Temperature data not available";
pub const CLIPBOARD_FAILURE_TEXT: &str = "Clipboard access failed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemIdentity {
    pub host_name: String,
    /// Empty when the host name does not resolve.
    pub ip_address: String,
    /// Why `ip_address` is empty, if the lookup failed.
    pub ip_resolution_error: Option<String>,
    pub os: String,
    pub cpu_model: String,
    #[serde(rename = "uptime_seconds", serialize_with = "serialize_secs")]
    pub uptime: Duration,
    pub ram_total_gib: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuSample {
    pub per_core_percent: Vec<f32>,
}

impl CpuSample {
    pub fn average_percent(&self) -> f32 {
        if self.per_core_percent.is_empty() {
            return 0.0;
        }
        self.per_core_percent.iter().sum::<f32>() / self.per_core_percent.len() as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub used_gib: f64,
    pub total_gib: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuStat {
    pub name: String,
    pub load_percent: f64,
    pub memory_total_mib: f64,
    pub memory_used_mib: f64,
    pub temperature_celsius: Option<f64>,
}

/// Empty when no GPU or driver is present.
pub type GpuSample = Vec<GpuStat>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskStat {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub usage: DiskUsage,
}

pub type DiskSample = Vec<DiskStat>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    /// Connectionless sockets report no state at all.
    None,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynRecv => "SYN_RECV",
            ConnectionState::FinWait1 => "FIN_WAIT1",
            ConnectionState::FinWait2 => "FIN_WAIT2",
            ConnectionState::TimeWait => "TIME_WAIT",
            ConnectionState::Close => "CLOSE",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::LastAck => "LAST_ACK",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortStat {
    pub pid: Option<u32>,
    pub local_address: String,
    /// Empty for sockets without a peer.
    pub remote_address: String,
    pub state: ConnectionState,
}

pub type PortSample = Vec<PortStat>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

pub type ProcessSample = Vec<ProcessStat>;

/// Flattened sensor readings, or the sentinel when the platform reports no
/// sensor groups at all.
#[derive(Debug, Clone, PartialEq)]
pub enum TemperatureSample {
    Readings(BTreeMap<String, f64>),
    Unavailable,
}

impl Serialize for TemperatureSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TemperatureSample::Readings(readings) => readings.serialize(serializer),
            TemperatureSample::Unavailable => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(TEMPERATURE_UNAVAILABLE_KEY, TEMPERATURE_UNAVAILABLE_TEXT)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClipboardSample {
    Text(String),
    Unavailable,
}

impl ClipboardSample {
    pub fn as_str(&self) -> &str {
        match self {
            ClipboardSample::Text(text) => text,
            ClipboardSample::Unavailable => CLIPBOARD_FAILURE_TEXT,
        }
    }
}

impl Serialize for ClipboardSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeFailure {
    pub kind: ProbeErrorKind,
    pub message: String,
    pub at_unix: i64,
}

/// An immutable bundle of every metric family as of one tick. Fields stay
/// `None` until their probe first succeeds and keep their last good value
/// when a later run fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub collected_at_unix: i64,
    pub identity: Option<SystemIdentity>,
    pub cpu: Option<CpuSample>,
    pub memory: Option<MemorySample>,
    pub gpus: Option<GpuSample>,
    pub disks: Option<DiskSample>,
    pub ports: Option<PortSample>,
    pub processes: Option<ProcessSample>,
    pub temperatures: Option<TemperatureSample>,
    pub clipboard: Option<ClipboardSample>,
    pub failures: BTreeMap<ProbeKind, ProbeFailure>,
}

impl Snapshot {
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.sequence == 0
    }

    /// Builds the successor of `self` from one tick's probe outcomes.
    pub fn next(
        &self,
        now_unix: i64,
        outcomes: impl IntoIterator<Item = (ProbeKind, Result<Sample, ProbeError>)>,
    ) -> Snapshot {
        let mut next = self.clone();
        next.sequence = self.sequence.saturating_add(1);
        next.collected_at_unix = now_unix;

        for (kind, outcome) in outcomes {
            match outcome {
                Ok(sample) => {
                    next.failures.remove(&kind);
                    next.apply(sample);
                }
                Err(err) => {
                    next.failures.insert(
                        kind,
                        ProbeFailure {
                            kind: err.kind(),
                            message: err.to_string(),
                            at_unix: now_unix,
                        },
                    );
                }
            }
        }

        next
    }

    fn apply(&mut self, sample: Sample) {
        match sample {
            Sample::Identity(v) => self.identity = Some(v),
            Sample::Cpu(v) => self.cpu = Some(v),
            Sample::Memory(v) => self.memory = Some(v),
            Sample::Gpu(v) => self.gpus = Some(v),
            Sample::Disks(v) => self.disks = Some(v),
            Sample::Ports(v) => self.ports = Some(v),
            Sample::Processes(v) => self.processes = Some(v),
            Sample::Temperatures(v) => self.temperatures = Some(v),
            Sample::Clipboard(v) => self.clipboard = Some(v),
        }
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(percent: f64) -> Sample {
        Sample::Memory(MemorySample {
            used_gib: 4.0,
            total_gib: 16.0,
            percent,
        })
    }

    #[test]
    fn placeholder_is_well_formed() {
        let snap = Snapshot::placeholder();
        assert!(snap.is_placeholder());
        assert_eq!(snap.collected_at_unix, 0);
        assert!(snap.cpu.is_none());
        assert!(snap.failures.is_empty());

        let json = serde_json::to_value(&snap).expect("serialize placeholder");
        assert!(json["memory"].is_null());
    }

    #[test]
    fn failed_probe_keeps_stale_value_and_records_failure() {
        let first = Snapshot::placeholder().next(10, [(ProbeKind::Memory, Ok(memory(25.0)))]);
        assert_eq!(first.sequence, 1);
        assert_eq!(first.memory.as_ref().map(|m| m.percent), Some(25.0));

        let second = first.next(
            12,
            [(
                ProbeKind::Memory,
                Err(ProbeError::Transient("busy".to_string())),
            )],
        );
        assert_eq!(second.sequence, 2);
        assert_eq!(second.collected_at_unix, 12);
        assert_eq!(second.memory, first.memory);
        let failure = second.failures.get(&ProbeKind::Memory).expect("failure recorded");
        assert_eq!(failure.kind, ProbeErrorKind::Transient);
        assert_eq!(failure.at_unix, 12);

        let third = second.next(14, [(ProbeKind::Memory, Ok(memory(30.0)))]);
        assert!(third.failures.is_empty());
        assert_eq!(third.memory.as_ref().map(|m| m.percent), Some(30.0));
    }

    #[test]
    fn next_leaves_previous_snapshot_untouched() {
        let first = Snapshot::placeholder().next(1, [(ProbeKind::Memory, Ok(memory(10.0)))]);
        let copy = first.clone();
        let _ = first.next(2, [(ProbeKind::Memory, Ok(memory(90.0)))]);
        assert_eq!(first, copy);
    }

    #[test]
    fn never_sampled_field_stays_empty_on_failure() {
        let snap = Snapshot::placeholder().next(
            5,
            [(
                ProbeKind::Ports,
                Err(ProbeError::PermissionDenied("/proc/net/tcp".to_string())),
            )],
        );
        assert!(snap.ports.is_none());
        assert_eq!(
            snap.failures.get(&ProbeKind::Ports).map(|f| f.kind),
            Some(ProbeErrorKind::PermissionDenied)
        );
    }

    #[test]
    fn temperature_sentinel_serializes_as_marker_map() {
        let json = serde_json::to_value(TemperatureSample::Unavailable).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({ "N/A": "Temperature data not available" })
        );

        let mut readings = BTreeMap::new();
        readings.insert("coretemp Core 0".to_string(), 48.0);
        let json = serde_json::to_value(TemperatureSample::Readings(readings)).expect("serialize");
        assert_eq!(json, serde_json::json!({ "coretemp Core 0": 48.0 }));
    }

    #[test]
    fn clipboard_sentinel_serializes_as_plain_string() {
        let json = serde_json::to_value(ClipboardSample::Unavailable).expect("serialize");
        assert_eq!(json, serde_json::json!("Clipboard access failed"));
        let json = serde_json::to_value(ClipboardSample::Text("hi".into())).expect("serialize");
        assert_eq!(json, serde_json::json!("hi"));
    }

    #[test]
    fn failures_serialize_by_probe_name() {
        let snap = Snapshot::placeholder().next(
            3,
            [(
                ProbeKind::Gpu,
                Err(ProbeError::Unavailable("nvidia-smi exited with 9".to_string())),
            )],
        );
        let json = serde_json::to_value(&snap).expect("serialize");
        assert_eq!(json["failures"]["gpu"]["kind"], "unavailable");
        assert_eq!(json["identity"], serde_json::Value::Null);
    }
}

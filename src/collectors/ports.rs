use super::{Probe, ProbeError, ProbeKind, Sample};
use crate::state::{ConnectionState, PortStat};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConnection {
    pub pid: Option<u32>,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub state: ConnectionState,
}

pub trait ConnectionSource: Send {
    fn connections(&mut self) -> Result<Vec<RawConnection>, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Tcp,
    Udp,
}

const TABLES: [(&str, Transport, bool); 4] = [
    ("tcp", Transport::Tcp, false),
    ("tcp6", Transport::Tcp, true),
    ("udp", Transport::Udp, false),
    ("udp6", Transport::Udp, true),
];

/// Reads the kernel socket tables under procfs.
pub struct ProcNet {
    root: PathBuf,
}

impl Default for ProcNet {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcNet {
    /// Socket inode to owning pid. Processes whose descriptors cannot be
    /// read are left out, so their sockets report no pid.
    fn socket_owners(&self) -> HashMap<u64, u32> {
        let mut owners = HashMap::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return owners;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(target) = fs::read_link(fd.path()) else {
                    continue;
                };
                if let Some(inode) = parse_socket_link(&target.to_string_lossy()) {
                    owners.entry(inode).or_insert(pid);
                }
            }
        }
        owners
    }
}

impl ConnectionSource for ProcNet {
    #[cfg(target_os = "linux")]
    fn connections(&mut self) -> Result<Vec<RawConnection>, ProbeError> {
        let mut rows = Vec::new();
        let mut tables_found = 0;
        for (file, transport, v6) in TABLES {
            let path = self.root.join("net").join(file);
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(ProbeError::from_io(&path.display().to_string(), &err)),
            };
            tables_found += 1;
            rows.extend(
                text.lines()
                    .skip(1)
                    .filter_map(|line| parse_socket_row(line, transport, v6)),
            );
        }
        if tables_found == 0 {
            return Err(ProbeError::Unavailable(format!(
                "no socket tables under {}",
                self.root.join("net").display()
            )));
        }

        let owners = self.socket_owners();
        Ok(rows
            .into_iter()
            .map(|row| RawConnection {
                pid: (row.inode != 0)
                    .then(|| owners.get(&row.inode).copied())
                    .flatten(),
                local: row.local,
                remote: row.remote,
                state: row.state,
            })
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    fn connections(&mut self) -> Result<Vec<RawConnection>, ProbeError> {
        Err(ProbeError::Unavailable(
            "connection table is only read from procfs".to_string(),
        ))
    }
}

pub struct PortProbe<S> {
    source: S,
}

impl<S: ConnectionSource> PortProbe<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: ConnectionSource> Probe for PortProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ports
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let ports = self
            .source
            .connections()?
            .into_iter()
            .filter(|c| c.state != ConnectionState::None)
            .map(|c| PortStat {
                pid: c.pid,
                local_address: format_endpoint(&c.local),
                remote_address: c.remote.as_ref().map(format_endpoint).unwrap_or_default(),
                state: c.state,
            })
            .collect();
        Ok(Sample::Ports(ports))
    }
}

fn format_endpoint(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SocketRow {
    local: SocketAddr,
    remote: Option<SocketAddr>,
    state: ConnectionState,
    inode: u64,
}

fn parse_socket_row(line: &str, transport: Transport, v6: bool) -> Option<SocketRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }

    let local = parse_endpoint(fields[1], v6)?;
    let remote = parse_endpoint(fields[2], v6)?;
    let remote = (!(remote.ip().is_unspecified() && remote.port() == 0)).then_some(remote);
    let state = match transport {
        Transport::Tcp => tcp_state(u8::from_str_radix(fields[3], 16).ok()?),
        Transport::Udp => ConnectionState::None,
    };
    let inode = fields[9].parse::<u64>().ok()?;

    Some(SocketRow {
        local,
        remote,
        state,
        inode,
    })
}

/// `ADDR:PORT` where the address is the raw in-kernel words printed in hex.
fn parse_endpoint(raw: &str, v6: bool) -> Option<SocketAddr> {
    let (addr, port) = raw.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = if v6 {
        if addr.len() != 32 || !addr.is_ascii() {
            return None;
        }
        let mut octets = [0_u8; 16];
        for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
            let word = u32::from_str_radix(&addr[i * 8..i * 8 + 8], 16).ok()?;
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        if addr.len() != 8 {
            return None;
        }
        let word = u32::from_str_radix(addr, 16).ok()?;
        IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
    };
    Some(SocketAddr::new(ip, port))
}

fn tcp_state(code: u8) -> ConnectionState {
    match code {
        0x01 => ConnectionState::Established,
        0x02 => ConnectionState::SynSent,
        0x03 | 0x0C => ConnectionState::SynRecv,
        0x04 => ConnectionState::FinWait1,
        0x05 => ConnectionState::FinWait2,
        0x06 => ConnectionState::TimeWait,
        0x07 => ConnectionState::Close,
        0x08 => ConnectionState::CloseWait,
        0x09 => ConnectionState::LastAck,
        0x0A => ConnectionState::Listen,
        0x0B => ConnectionState::Closing,
        _ => ConnectionState::None,
    }
}

fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

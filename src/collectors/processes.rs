use super::{Probe, ProbeError, ProbeKind, Sample};
use crate::state::ProcessStat;
use std::thread;
use std::time::Duration;
use sysinfo::{PidExt, ProcessExt, ProcessRefreshKind, RefreshKind, System, SystemExt};
use tracing::trace;

pub trait ProcessSource: Send {
    /// One entry per process in enumeration order. A process that exits
    /// while being read shows up as an error entry.
    fn processes(&mut self) -> Vec<Result<ProcessStat, ProbeError>>;
}

pub struct SysinfoProcesses {
    system: System,
    window: Duration,
    primed: bool,
}

impl SysinfoProcesses {
    pub fn new(window: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_memory()
                .with_processes(ProcessRefreshKind::new().with_cpu()),
        );
        Self {
            system,
            window,
            primed: false,
        }
    }
}

impl ProcessSource for SysinfoProcesses {
    fn processes(&mut self) -> Vec<Result<ProcessStat, ProbeError>> {
        // cpu usage is a delta between two refreshes
        if !self.primed {
            self.system
                .refresh_processes_specifics(ProcessRefreshKind::new().with_cpu());
            thread::sleep(self.window);
            self.primed = true;
        }
        self.system.refresh_memory();
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new().with_cpu());

        let total_memory = self.system.total_memory().max(1) as f64;
        let mut entries: Vec<ProcessStat> = self
            .system
            .processes()
            .values()
            .map(|p| ProcessStat {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                cpu_percent: p.cpu_usage(),
                memory_percent: (p.memory() as f64 / total_memory * 100.0) as f32,
            })
            .collect();
        entries.sort_by_key(|p| p.pid);
        entries.into_iter().map(Ok).collect()
    }
}

pub struct ProcessProbe<S> {
    source: S,
    limit: usize,
}

impl<S: ProcessSource> ProcessProbe<S> {
    pub fn new(source: S, limit: usize) -> Self {
        Self { source, limit }
    }
}

impl<S: ProcessSource> Probe for ProcessProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Processes
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let mut procs: Vec<ProcessStat> = self
            .source
            .processes()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(err) => {
                    trace!(error = %err, "process vanished during enumeration");
                    None
                }
            })
            .collect();

        // stable: equal cpu keeps enumeration order
        procs.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        procs.truncate(self.limit);
        Ok(Sample::Processes(procs))
    }
}

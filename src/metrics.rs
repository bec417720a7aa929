use crate::collectors::{ProbeErrorKind, ProbeKind};
use crate::state::{Snapshot, TemperatureSample};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started: Instant,
    pub hostpulse_cpu_usage_percent: Gauge,
    pub hostpulse_cpu_core_usage_percent: GaugeVec,
    pub hostpulse_cpu_core_count: Gauge,
    pub hostpulse_memory_used_gib: Gauge,
    pub hostpulse_memory_total_gib: Gauge,
    pub hostpulse_memory_usage_percent: Gauge,
    pub hostpulse_host_uptime_seconds: Gauge,
    pub hostpulse_disk_used_bytes: GaugeVec,
    pub hostpulse_disk_total_bytes: GaugeVec,
    pub hostpulse_disk_usage_percent: GaugeVec,
    pub hostpulse_disk_count: Gauge,
    pub hostpulse_gpu_load_percent: GaugeVec,
    pub hostpulse_gpu_memory_used_mib: GaugeVec,
    pub hostpulse_gpu_memory_total_mib: GaugeVec,
    pub hostpulse_gpu_temperature_celsius: GaugeVec,
    pub hostpulse_gpu_count: Gauge,
    pub hostpulse_temperature_celsius: GaugeVec,
    pub hostpulse_temperature_sensor_count: Gauge,
    pub hostpulse_connections: GaugeVec,
    pub hostpulse_top_process_cpu_percent: GaugeVec,
    pub hostpulse_top_process_memory_percent: GaugeVec,
    pub hostpulse_probe_up: GaugeVec,
    pub hostpulse_probe_failures_total: CounterVec,
    pub hostpulse_ticks_total: CounterVec,
    pub hostpulse_tick_duration_seconds: Gauge,
    pub hostpulse_last_collect_timestamp_seconds: Gauge,
    pub hostpulse_uptime_seconds: Gauge,
    pub hostpulse_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let hostpulse_cpu_usage_percent = Gauge::with_opts(opts!(
            "hostpulse_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let hostpulse_cpu_core_usage_percent = GaugeVec::new(
            opts!(
                "hostpulse_cpu_core_usage_percent",
                "CPU usage by logical core in percent (0..100)"
            ),
            &["core"],
        )?;
        let hostpulse_cpu_core_count = Gauge::with_opts(opts!(
            "hostpulse_cpu_core_count",
            "Number of logical cores"
        ))?;
        let hostpulse_memory_used_gib =
            Gauge::with_opts(opts!("hostpulse_memory_used_gib", "Used RAM in GiB"))?;
        let hostpulse_memory_total_gib =
            Gauge::with_opts(opts!("hostpulse_memory_total_gib", "Total RAM in GiB"))?;
        let hostpulse_memory_usage_percent = Gauge::with_opts(opts!(
            "hostpulse_memory_usage_percent",
            "RAM usage in percent"
        ))?;
        let hostpulse_host_uptime_seconds = Gauge::with_opts(opts!(
            "hostpulse_host_uptime_seconds",
            "Seconds since the host booted"
        ))?;
        let hostpulse_disk_used_bytes = GaugeVec::new(
            opts!("hostpulse_disk_used_bytes", "Disk used bytes by mount"),
            &["mount", "device"],
        )?;
        let hostpulse_disk_total_bytes = GaugeVec::new(
            opts!("hostpulse_disk_total_bytes", "Disk total bytes by mount"),
            &["mount", "device"],
        )?;
        let hostpulse_disk_usage_percent = GaugeVec::new(
            opts!(
                "hostpulse_disk_usage_percent",
                "Disk usage in percent by mount"
            ),
            &["mount", "device"],
        )?;
        let hostpulse_disk_count = Gauge::with_opts(opts!(
            "hostpulse_disk_count",
            "Number of partitions with readable usage"
        ))?;
        let hostpulse_gpu_load_percent = GaugeVec::new(
            opts!("hostpulse_gpu_load_percent", "GPU load in percent"),
            &["index", "name"],
        )?;
        let hostpulse_gpu_memory_used_mib = GaugeVec::new(
            opts!("hostpulse_gpu_memory_used_mib", "GPU memory used in MiB"),
            &["index", "name"],
        )?;
        let hostpulse_gpu_memory_total_mib = GaugeVec::new(
            opts!("hostpulse_gpu_memory_total_mib", "GPU memory total in MiB"),
            &["index", "name"],
        )?;
        let hostpulse_gpu_temperature_celsius = GaugeVec::new(
            opts!(
                "hostpulse_gpu_temperature_celsius",
                "GPU temperature in Celsius (if reported)"
            ),
            &["index", "name"],
        )?;
        let hostpulse_gpu_count =
            Gauge::with_opts(opts!("hostpulse_gpu_count", "Number of detected GPUs"))?;
        let hostpulse_temperature_celsius = GaugeVec::new(
            opts!(
                "hostpulse_temperature_celsius",
                "Temperature by sensor in Celsius"
            ),
            &["sensor"],
        )?;
        let hostpulse_temperature_sensor_count = Gauge::with_opts(opts!(
            "hostpulse_temperature_sensor_count",
            "Number of temperature readings"
        ))?;
        let hostpulse_connections = GaugeVec::new(
            opts!(
                "hostpulse_connections",
                "Open connections grouped by state"
            ),
            &["state"],
        )?;
        let hostpulse_top_process_cpu_percent = GaugeVec::new(
            opts!(
                "hostpulse_top_process_cpu_percent",
                "CPU usage of the busiest processes"
            ),
            &["pid", "name"],
        )?;
        let hostpulse_top_process_memory_percent = GaugeVec::new(
            opts!(
                "hostpulse_top_process_memory_percent",
                "Memory share of the busiest processes"
            ),
            &["pid", "name"],
        )?;
        let hostpulse_probe_up = GaugeVec::new(
            opts!(
                "hostpulse_probe_up",
                "1 if the probe's last run succeeded, 0 otherwise"
            ),
            &["probe"],
        )?;
        let hostpulse_probe_failures_total = CounterVec::new(
            opts!(
                "hostpulse_probe_failures_total",
                "Probe failures total by probe and error kind"
            ),
            &["probe", "kind"],
        )?;
        let hostpulse_ticks_total = CounterVec::new(
            opts!(
                "hostpulse_ticks_total",
                "Collection ticks total by trigger"
            ),
            &["trigger"],
        )?;
        let hostpulse_tick_duration_seconds = Gauge::with_opts(opts!(
            "hostpulse_tick_duration_seconds",
            "Wall time of the last collection tick"
        ))?;
        let hostpulse_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "hostpulse_last_collect_timestamp_seconds",
            "Unix timestamp of the last published snapshot"
        ))?;
        let hostpulse_uptime_seconds = Gauge::with_opts(opts!(
            "hostpulse_uptime_seconds",
            "Exporter uptime in seconds"
        ))?;
        let hostpulse_scrape_count_total = Counter::with_opts(opts!(
            "hostpulse_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &hostpulse_cpu_usage_percent)?;
        register(&registry, &hostpulse_cpu_core_usage_percent)?;
        register(&registry, &hostpulse_cpu_core_count)?;
        register(&registry, &hostpulse_memory_used_gib)?;
        register(&registry, &hostpulse_memory_total_gib)?;
        register(&registry, &hostpulse_memory_usage_percent)?;
        register(&registry, &hostpulse_host_uptime_seconds)?;
        register(&registry, &hostpulse_disk_used_bytes)?;
        register(&registry, &hostpulse_disk_total_bytes)?;
        register(&registry, &hostpulse_disk_usage_percent)?;
        register(&registry, &hostpulse_disk_count)?;
        register(&registry, &hostpulse_gpu_load_percent)?;
        register(&registry, &hostpulse_gpu_memory_used_mib)?;
        register(&registry, &hostpulse_gpu_memory_total_mib)?;
        register(&registry, &hostpulse_gpu_temperature_celsius)?;
        register(&registry, &hostpulse_gpu_count)?;
        register(&registry, &hostpulse_temperature_celsius)?;
        register(&registry, &hostpulse_temperature_sensor_count)?;
        register(&registry, &hostpulse_connections)?;
        register(&registry, &hostpulse_top_process_cpu_percent)?;
        register(&registry, &hostpulse_top_process_memory_percent)?;
        register(&registry, &hostpulse_probe_up)?;
        register(&registry, &hostpulse_probe_failures_total)?;
        register(&registry, &hostpulse_ticks_total)?;
        register(&registry, &hostpulse_tick_duration_seconds)?;
        register(&registry, &hostpulse_last_collect_timestamp_seconds)?;
        register(&registry, &hostpulse_uptime_seconds)?;
        register(&registry, &hostpulse_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started: Instant::now(),
            hostpulse_cpu_usage_percent,
            hostpulse_cpu_core_usage_percent,
            hostpulse_cpu_core_count,
            hostpulse_memory_used_gib,
            hostpulse_memory_total_gib,
            hostpulse_memory_usage_percent,
            hostpulse_host_uptime_seconds,
            hostpulse_disk_used_bytes,
            hostpulse_disk_total_bytes,
            hostpulse_disk_usage_percent,
            hostpulse_disk_count,
            hostpulse_gpu_load_percent,
            hostpulse_gpu_memory_used_mib,
            hostpulse_gpu_memory_total_mib,
            hostpulse_gpu_temperature_celsius,
            hostpulse_gpu_count,
            hostpulse_temperature_celsius,
            hostpulse_temperature_sensor_count,
            hostpulse_connections,
            hostpulse_top_process_cpu_percent,
            hostpulse_top_process_memory_percent,
            hostpulse_probe_up,
            hostpulse_probe_failures_total,
            hostpulse_ticks_total,
            hostpulse_tick_duration_seconds,
            hostpulse_last_collect_timestamp_seconds,
            hostpulse_uptime_seconds,
            hostpulse_scrape_count_total,
        }))
    }

    /// Mirrors one published snapshot into the gauges. Families that have
    /// never been sampled are left unset.
    pub fn update_from_snapshot(&self, snap: &Snapshot) {
        self.hostpulse_last_collect_timestamp_seconds
            .set(snap.collected_at_unix as f64);
        self.refresh_uptime();

        self.hostpulse_cpu_core_usage_percent.reset();
        self.hostpulse_disk_used_bytes.reset();
        self.hostpulse_disk_total_bytes.reset();
        self.hostpulse_disk_usage_percent.reset();
        self.hostpulse_gpu_load_percent.reset();
        self.hostpulse_gpu_memory_used_mib.reset();
        self.hostpulse_gpu_memory_total_mib.reset();
        self.hostpulse_gpu_temperature_celsius.reset();
        self.hostpulse_temperature_celsius.reset();
        self.hostpulse_connections.reset();
        self.hostpulse_top_process_cpu_percent.reset();
        self.hostpulse_top_process_memory_percent.reset();

        if let Some(identity) = &snap.identity {
            self.hostpulse_host_uptime_seconds
                .set(identity.uptime.as_secs() as f64);
        }

        if let Some(cpu) = &snap.cpu {
            self.hostpulse_cpu_usage_percent
                .set(cpu.average_percent() as f64);
            self.hostpulse_cpu_core_count
                .set(cpu.per_core_percent.len() as f64);
            for (core, usage) in cpu.per_core_percent.iter().enumerate() {
                self.hostpulse_cpu_core_usage_percent
                    .with_label_values(&[&core.to_string()])
                    .set(*usage as f64);
            }
        }

        if let Some(memory) = &snap.memory {
            self.hostpulse_memory_used_gib.set(memory.used_gib);
            self.hostpulse_memory_total_gib.set(memory.total_gib);
            self.hostpulse_memory_usage_percent.set(memory.percent);
        }

        if let Some(disks) = &snap.disks {
            for d in disks {
                let labels = [d.mountpoint.as_str(), d.device.as_str()];
                self.hostpulse_disk_used_bytes
                    .with_label_values(&labels)
                    .set(d.usage.used_bytes as f64);
                self.hostpulse_disk_total_bytes
                    .with_label_values(&labels)
                    .set(d.usage.total_bytes as f64);
                self.hostpulse_disk_usage_percent
                    .with_label_values(&labels)
                    .set(d.usage.percent);
            }
            self.hostpulse_disk_count.set(disks.len() as f64);
        }

        if let Some(gpus) = &snap.gpus {
            for (index, g) in gpus.iter().enumerate() {
                let index = index.to_string();
                let labels = [index.as_str(), g.name.as_str()];
                self.hostpulse_gpu_load_percent
                    .with_label_values(&labels)
                    .set(g.load_percent);
                self.hostpulse_gpu_memory_used_mib
                    .with_label_values(&labels)
                    .set(g.memory_used_mib);
                self.hostpulse_gpu_memory_total_mib
                    .with_label_values(&labels)
                    .set(g.memory_total_mib);
                if let Some(temp) = g.temperature_celsius {
                    self.hostpulse_gpu_temperature_celsius
                        .with_label_values(&labels)
                        .set(temp);
                }
            }
            self.hostpulse_gpu_count.set(gpus.len() as f64);
        }

        match &snap.temperatures {
            Some(TemperatureSample::Readings(readings)) => {
                for (sensor, celsius) in readings {
                    self.hostpulse_temperature_celsius
                        .with_label_values(&[sensor])
                        .set(*celsius);
                }
                self.hostpulse_temperature_sensor_count
                    .set(readings.len() as f64);
            }
            Some(TemperatureSample::Unavailable) => {
                self.hostpulse_temperature_sensor_count.set(0.0);
            }
            None => {}
        }

        if let Some(ports) = &snap.ports {
            let mut by_state: BTreeMap<&'static str, usize> = BTreeMap::new();
            for p in ports {
                *by_state.entry(p.state.as_str()).or_default() += 1;
            }
            for (state, count) in by_state {
                self.hostpulse_connections
                    .with_label_values(&[state])
                    .set(count as f64);
            }
        }

        if let Some(processes) = &snap.processes {
            for p in processes {
                let pid = p.pid.to_string();
                let labels = [pid.as_str(), p.name.as_str()];
                self.hostpulse_top_process_cpu_percent
                    .with_label_values(&labels)
                    .set(p.cpu_percent as f64);
                self.hostpulse_top_process_memory_percent
                    .with_label_values(&labels)
                    .set(p.memory_percent as f64);
            }
        }
    }

    /// Records which probes ran this tick and how they ended.
    pub fn observe_probe(&self, probe: ProbeKind, failure: Option<ProbeErrorKind>) {
        match failure {
            None => {
                self.hostpulse_probe_up
                    .with_label_values(&[probe.as_str()])
                    .set(1.0);
            }
            Some(kind) => {
                self.hostpulse_probe_up
                    .with_label_values(&[probe.as_str()])
                    .set(0.0);
                self.hostpulse_probe_failures_total
                    .with_label_values(&[probe.as_str(), kind.as_str()])
                    .inc();
            }
        }
    }

    pub fn observe_tick(&self, forced: bool, elapsed: Duration) {
        let trigger = if forced { "refresh" } else { "interval" };
        self.hostpulse_ticks_total
            .with_label_values(&[trigger])
            .inc();
        self.hostpulse_tick_duration_seconds
            .set(elapsed.as_secs_f64());
    }

    pub fn refresh_uptime(&self) {
        self.hostpulse_uptime_seconds
            .set(self.started.elapsed().as_secs_f64());
    }

    pub fn inc_scrape_count(&self) {
        self.hostpulse_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

//! The collection loop. Runs every due probe on the blocking pool, folds the
//! outcomes into the next snapshot and publishes it.

use crate::collectors::{Probe, ProbeError, ProbeKind, Sample};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::state::Snapshot;
use crate::store::SnapshotStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Read side handed to presentation code. Cheap to clone.
#[derive(Clone)]
pub struct SnapshotHandle {
    store: Arc<SnapshotStore>,
    refresh: Arc<Notify>,
}

impl SnapshotHandle {
    /// Never blocks. Returns the placeholder until the first tick publishes.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.store.current()
    }

    /// Asks for an out-of-band tick. Requests made while a tick is running
    /// collapse into one.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.store.subscribe()
    }
}

struct ProbeSlot {
    kind: ProbeKind,
    interval: Duration,
    last_run: Option<Instant>,
    probe: Arc<Mutex<Box<dyn Probe>>>,
    in_flight: Arc<AtomicBool>,
}

impl ProbeSlot {
    fn is_due(&self, at: Instant) -> bool {
        match self.last_run {
            None => true,
            Some(last) => at.saturating_duration_since(last) >= self.interval,
        }
    }
}

/// Clears the in-flight flag when the blocking call returns or unwinds.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    slots: Vec<ProbeSlot>,
    store: Arc<SnapshotStore>,
    metrics: Arc<Metrics>,
    refresh: Arc<Notify>,
    interval: Duration,
    probe_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        cfg: &Config,
        probes: Vec<Box<dyn Probe>>,
        store: Arc<SnapshotStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let slots = probes
            .into_iter()
            .map(|probe| {
                let kind = probe.kind();
                ProbeSlot {
                    kind,
                    interval: cfg.probe_interval(kind),
                    last_run: None,
                    probe: Arc::new(Mutex::new(probe)),
                    in_flight: Arc::new(AtomicBool::new(false)),
                }
            })
            .collect();

        Self {
            slots,
            store,
            metrics,
            refresh: Arc::new(Notify::new()),
            interval: cfg.interval(),
            probe_timeout: cfg.probe_timeout(),
        }
    }

    pub fn handle(&self) -> SnapshotHandle {
        SnapshotHandle {
            store: self.store.clone(),
            refresh: self.refresh.clone(),
        }
    }

    /// Runs one tick now. A forced tick runs every probe regardless of its
    /// interval and drops probe caches first.
    pub async fn tick(&mut self, forced: bool) -> Arc<Snapshot> {
        self.collect(Instant::now(), forced).await
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            probes = self.slots.len(),
            interval_secs = self.interval.as_secs(),
            timeout_ms = self.probe_timeout.as_millis() as u64,
            "collection scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let refresh = self.refresh.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping collection");
                    break;
                }
                at = ticker.tick() => {
                    self.collect(at.into_std(), false).await;
                }
                _ = refresh.notified() => {
                    debug!("refresh requested");
                    self.collect(Instant::now(), true).await;
                    ticker.reset();
                }
            }
        }
    }

    async fn collect(&mut self, at: Instant, forced: bool) -> Arc<Snapshot> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.probe_timeout;

        let mut outcomes: Vec<(ProbeKind, Result<Sample, ProbeError>)> = Vec::new();
        let mut running: Vec<(ProbeKind, JoinHandle<Result<Sample, ProbeError>>)> = Vec::new();

        for slot in &mut self.slots {
            if !forced && !slot.is_due(at) {
                continue;
            }
            slot.last_run = Some(at);

            if slot.in_flight.swap(true, Ordering::AcqRel) {
                outcomes.push((
                    slot.kind,
                    Err(ProbeError::Transient(
                        "previous sample still running".to_string(),
                    )),
                ));
                continue;
            }

            let probe = slot.probe.clone();
            let guard = InFlight(slot.in_flight.clone());
            let handle = tokio::task::spawn_blocking(move || {
                let _guard = guard;
                // poisoned by an earlier panic; the probe is reused as is
                let mut probe = probe.lock().unwrap_or_else(|e| e.into_inner());
                if forced {
                    probe.invalidate();
                }
                probe.sample()
            });
            running.push((slot.kind, handle));
        }

        if running.is_empty() && outcomes.is_empty() {
            return self.store.current();
        }

        for (kind, handle) in running {
            let outcome = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    warn!(probe = %kind, error = %err, "probe task failed");
                    Err(ProbeError::Transient("probe panicked".to_string()))
                }
                Err(_) => Err(ProbeError::Transient(format!(
                    "timed out after {} ms",
                    self.probe_timeout.as_millis()
                ))),
            };
            outcomes.push((kind, outcome));
        }
        outcomes.sort_by_key(|(kind, _)| *kind);

        let previous = self.store.current();
        for (kind, outcome) in &outcomes {
            match outcome {
                Ok(_) => self.metrics.observe_probe(*kind, None),
                Err(err) => {
                    self.metrics.observe_probe(*kind, Some(err.kind()));
                    if previous.failures.contains_key(kind) {
                        debug!(probe = %kind, error = %err, "probe still failing");
                    } else {
                        warn!(probe = %kind, error = %err, "probe failed, keeping last value");
                    }
                }
            }
        }

        let ran = outcomes.len();
        let next = previous.next(now_unix(), outcomes);
        let published = self.store.publish(next);

        self.metrics.update_from_snapshot(&published);
        self.metrics.observe_tick(forced, started.elapsed());
        debug!(
            sequence = published.sequence,
            probes = ran,
            forced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "snapshot published"
        );

        published
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::cpu::{CpuProbe, CpuSource};
    use crate::collectors::ProbeErrorKind;
    use crate::state::MemorySample;
    use std::sync::atomic::AtomicUsize;

    struct MemoryStub {
        calls: Arc<AtomicUsize>,
        invalidations: Arc<AtomicUsize>,
    }

    impl Probe for MemoryStub {
        fn kind(&self) -> ProbeKind {
            ProbeKind::Memory
        }

        fn sample(&mut self) -> Result<Sample, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Sample::Memory(MemorySample {
                used_gib: n as f64,
                total_gib: 16.0,
                percent: 10.0,
            }))
        }

        fn invalidate(&mut self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Failing(ProbeKind, ProbeError);

    impl Probe for Failing {
        fn kind(&self) -> ProbeKind {
            self.0
        }

        fn sample(&mut self) -> Result<Sample, ProbeError> {
            Err(self.1.clone())
        }
    }

    struct Panicking;

    impl Probe for Panicking {
        fn kind(&self) -> ProbeKind {
            ProbeKind::Gpu
        }

        fn sample(&mut self) -> Result<Sample, ProbeError> {
            panic!("driver exploded");
        }
    }

    /// Hangs on its first call only.
    struct SlowOnce(Option<Duration>);

    impl Probe for SlowOnce {
        fn kind(&self) -> ProbeKind {
            ProbeKind::Disks
        }

        fn sample(&mut self) -> Result<Sample, ProbeError> {
            if let Some(delay) = self.0.take() {
                std::thread::sleep(delay);
            }
            Ok(Sample::Disks(Vec::new()))
        }
    }

    struct FourCores;

    impl CpuSource for FourCores {
        fn per_core_usage(&mut self, _window: Duration) -> Vec<f32> {
            vec![12.5, 3.0, 99.0, 40.0]
        }
    }

    fn memory_stub() -> (Box<dyn Probe>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let invalidations = Arc::new(AtomicUsize::new(0));
        let probe = MemoryStub {
            calls: calls.clone(),
            invalidations: invalidations.clone(),
        };
        (Box::new(probe), calls, invalidations)
    }

    fn scheduler_with(cfg: &Config, probes: Vec<Box<dyn Probe>>) -> Scheduler {
        let metrics = Metrics::new().expect("metrics");
        Scheduler::new(cfg, probes, Arc::new(SnapshotStore::new()), metrics)
    }

    #[tokio::test]
    async fn placeholder_before_first_tick() {
        let (memory, _, _) = memory_stub();
        let scheduler = scheduler_with(&Config::default(), vec![memory]);
        let snap = scheduler.handle().latest();
        assert!(snap.is_placeholder());
        assert!(snap.memory.is_none());
    }

    #[tokio::test]
    async fn failing_probes_do_not_block_others() {
        let (memory, _, _) = memory_stub();
        let mut scheduler = scheduler_with(
            &Config::default(),
            vec![
                memory,
                Box::new(Failing(
                    ProbeKind::Ports,
                    ProbeError::PermissionDenied("/proc/net/tcp".to_string()),
                )),
                Box::new(Failing(
                    ProbeKind::Identity,
                    ProbeError::Resolution("no such host".to_string()),
                )),
                Box::new(Panicking),
            ],
        );

        let snap = scheduler.tick(false).await;
        assert_eq!(snap.sequence, 1);
        assert!(snap.memory.is_some());
        assert!(snap.ports.is_none());
        assert_eq!(
            snap.failures.get(&ProbeKind::Ports).map(|f| f.kind),
            Some(ProbeErrorKind::PermissionDenied)
        );
        assert_eq!(
            snap.failures.get(&ProbeKind::Identity).map(|f| f.kind),
            Some(ProbeErrorKind::Resolution)
        );
        let gpu = snap.failures.get(&ProbeKind::Gpu).expect("panic recorded");
        assert!(gpu.message.contains("probe panicked"));

        // the panicked probe's slot is usable again
        let snap = scheduler.tick(true).await;
        assert_eq!(snap.sequence, 2);
        assert!(snap.failures[&ProbeKind::Gpu].message.contains("probe panicked"));
        assert_eq!(snap.memory.as_ref().map(|m| m.used_gib), Some(2.0));
    }

    #[tokio::test]
    async fn wedged_probe_is_abandoned_and_skipped_while_running() {
        let cfg = Config {
            probe_timeout_ms: 100,
            ..Config::default()
        };
        let (memory, _, _) = memory_stub();
        let mut scheduler = scheduler_with(
            &cfg,
            vec![memory, Box::new(SlowOnce(Some(Duration::from_millis(600))))],
        );

        let started = Instant::now();
        let snap = scheduler.tick(false).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(snap.memory.is_some());
        assert!(snap.failures[&ProbeKind::Disks].message.contains("timed out"));

        let snap = scheduler.tick(true).await;
        assert!(snap.failures[&ProbeKind::Disks]
            .message
            .contains("previous sample still running"));

        tokio::time::sleep(Duration::from_millis(700)).await;
        let snap = scheduler.tick(true).await;
        assert!(!snap.failures.contains_key(&ProbeKind::Disks));
        assert_eq!(snap.disks.as_ref().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn stale_value_survives_later_failure() {
        struct FlakyMemory(usize);

        impl Probe for FlakyMemory {
            fn kind(&self) -> ProbeKind {
                ProbeKind::Memory
            }

            fn sample(&mut self) -> Result<Sample, ProbeError> {
                self.0 += 1;
                if self.0 > 1 {
                    return Err(ProbeError::Transient("meminfo busy".to_string()));
                }
                Ok(Sample::Memory(MemorySample {
                    used_gib: 1.0,
                    total_gib: 2.0,
                    percent: 50.0,
                }))
            }
        }

        let mut scheduler = scheduler_with(&Config::default(), vec![Box::new(FlakyMemory(0))]);
        let first = scheduler.tick(true).await;
        let second = scheduler.tick(true).await;
        assert_eq!(second.memory, first.memory);
        assert!(second.failures.contains_key(&ProbeKind::Memory));
        assert!(second.collected_at_unix >= first.collected_at_unix);
    }

    #[tokio::test]
    async fn cpu_length_is_stable_across_ticks() {
        let probe = CpuProbe::new(FourCores, Duration::from_millis(100));
        let mut scheduler = scheduler_with(&Config::default(), vec![Box::new(probe)]);
        for _ in 0..3 {
            let snap = scheduler.tick(true).await;
            let cpu = snap.cpu.as_ref().expect("cpu sampled");
            assert_eq!(cpu.per_core_percent.len(), 4);
        }
    }

    #[tokio::test]
    async fn probes_wait_for_their_interval() {
        let mut cfg = Config::default();
        cfg.probes.memory.interval_secs = Some(60);
        let (memory, calls, _) = memory_stub();
        let mut scheduler = scheduler_with(&cfg, vec![memory]);

        scheduler.tick(false).await;
        let snap = scheduler.tick(false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // nothing was due, so nothing new was published
        assert_eq!(snap.sequence, 1);

        scheduler.tick(true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_request_forces_a_tick() {
        let cfg = Config {
            interval_secs: 3600,
            ..Config::default()
        };
        let (memory, calls, invalidations) = memory_stub();
        let scheduler = scheduler_with(&cfg, vec![memory]);
        let handle = scheduler.handle();
        let mut updates = handle.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(shutdown_rx));

        updates.changed().await.expect("first tick");
        assert_eq!(updates.borrow_and_update().sequence, 1);
        assert_eq!(invalidations.load(Ordering::SeqCst), 0);

        handle.request_refresh();
        updates.changed().await.expect("refresh tick");
        assert_eq!(updates.borrow_and_update().sequence, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(handle.latest().sequence, 2);

        shutdown_tx.send(true).expect("scheduler listening");
        task.await.expect("scheduler stops cleanly");
    }
}

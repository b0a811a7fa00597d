// tests/coordinator_tests.rs
//
// Coordinator scenarios against recording fakes. Every fake appends to one
// shared timeline so ordering across collaborators can be asserted.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rbdfio_bench::cluster::{AutoscalerStatus, ClusterController, ImageSpec};
use rbdfio_bench::config::{BenchConfig, RecoveryMode};
use rbdfio_bench::executor::{ClientHandle, DispatchHandle, DispatchStatus, HostGroup, RemoteExecutor};
use rbdfio_bench::monitoring::MonitoringController;
use rbdfio_bench::tracker::{RecoveryEvent, RecoverySignal, TrackerEvent};
use rbdfio_bench::{BenchError, Collaborators, RunCoordinator, RunState};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::Instant;

type Timeline = Arc<Mutex<Vec<String>>>;

const FIO_SECS: u64 = 100;
const RAMP_SECS: u64 = 10;
const FIO_OUTPUT: &[u8] = b"fio-3.35\nStarting 1 process\n{\n  \"jobs\": []\n}\n\nRun status group 0\n";

// -----------------------------------------------------------------------------
// Fakes
// -----------------------------------------------------------------------------

struct FakeExecutor {
    timeline: Timeline,
    /// Dispatched commands containing this finish with exit 1
    fail_matching: Option<String>,
    volumes: u32,
    killed: watch::Sender<bool>,
    /// Contents of every collected `output.<volume>.<host>`
    raw_output: Vec<u8>,
    fail_collect: AtomicBool,
}

impl FakeExecutor {
    fn new(timeline: &Timeline, volumes: u32) -> Self {
        let (killed, _) = watch::channel(false);
        Self {
            timeline: Arc::clone(timeline),
            fail_matching: None,
            volumes,
            killed,
            raw_output: FIO_OUTPUT.to_vec(),
            fail_collect: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn dispatch(&self, hosts: &HostGroup, command: &str) -> Result<DispatchHandle> {
        self.timeline.lock().push(format!("dispatch:{}", command));
        let status = match &self.fail_matching {
            Some(pattern) if command.contains(pattern.as_str()) => DispatchStatus::Failed { code: Some(1) },
            _ => DispatchStatus::Success,
        };
        let mut killed = self.killed.subscribe();
        Ok(DispatchHandle::spawn(hosts, command, async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(FIO_SECS)) => {}
                _ = killed.wait_for(|k| *k) => {}
            }
            Ok(status)
        }))
    }

    async fn execute(&self, _hosts: &HostGroup, command: &str) -> Result<DispatchStatus> {
        self.timeline.lock().push(format!("execute:{}", command));
        if command.contains("killall") {
            self.killed.send_replace(true);
        }
        Ok(DispatchStatus::Success)
    }

    async fn capture(&self, host: &ClientHandle, command: &str) -> Result<String> {
        self.timeline.lock().push(format!("capture:{}", command));
        Ok(format!("{}.lab", host.host()))
    }

    async fn collect(&self, hosts: &HostGroup, remote_dir: &Path, local_dir: &Path) -> Result<()> {
        self.timeline
            .lock()
            .push(format!("collect:{}", remote_dir.display()));
        std::fs::create_dir_all(local_dir)?;
        for host in hosts.iter() {
            for volume in 0..self.volumes {
                std::fs::write(
                    local_dir.join(format!("output.{}.{}", volume, host.host())),
                    &self.raw_output,
                )?;
            }
        }
        if self.fail_collect.load(Ordering::SeqCst) {
            anyhow::bail!("rpdcp: connection reset");
        }
        Ok(())
    }
}

struct FakeMonitor {
    timeline: Timeline,
    started: Instant,
    /// Seconds since test start of every monitoring start
    starts: Mutex<Vec<u64>>,
    fail_start: AtomicBool,
}

impl FakeMonitor {
    fn new(timeline: &Timeline) -> Self {
        Self {
            timeline: Arc::clone(timeline),
            started: Instant::now(),
            starts: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MonitoringController for FakeMonitor {
    async fn start(&self, dir: &Path) -> Result<()> {
        self.starts.lock().push(self.started.elapsed().as_secs());
        self.timeline.lock().push(format!("monitor.start:{}", dir.display()));
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("collectl not installed");
        }
        Ok(())
    }

    async fn stop(&self, dir: Option<&Path>) -> Result<()> {
        let dir = dir.map(|d| d.display().to_string()).unwrap_or_else(|| "<latest>".into());
        self.timeline.lock().push(format!("monitor.stop:{}", dir));
        Ok(())
    }
}

struct FakeCluster {
    timeline: Timeline,
    autoscaler: AutoscalerStatus,
    /// wait_start_io never resolves
    block_start_io: bool,
    recovery_secs: u64,
    recovery: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FakeCluster {
    fn new(timeline: &Timeline) -> Self {
        Self {
            timeline: Arc::clone(timeline),
            autoscaler: AutoscalerStatus::Settled,
            block_start_io: false,
            recovery_secs: 30,
            recovery: Mutex::new(None),
        }
    }

    fn log(&self, entry: impl Into<String>) {
        self.timeline.lock().push(entry.into());
    }
}

#[async_trait]
impl ClusterController for FakeCluster {
    async fn drop_caches(&self) -> Result<()> {
        self.log("cluster.drop_caches");
        Ok(())
    }

    async fn check_autoscaler(&self, _timeout: Option<Duration>, log_path: &Path) -> Result<AutoscalerStatus> {
        self.log(format!("cluster.check_autoscaler:{}", log_path.display()));
        Ok(self.autoscaler)
    }

    async fn create_recovery_test(&self, _run_dir: &Path, mode: RecoveryMode, signal: RecoverySignal) -> Result<()> {
        self.log(format!("cluster.create_recovery_test:{:?}", mode));
        let secs = self.recovery_secs;
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let event = match mode {
                RecoveryMode::Blocking => RecoveryEvent::Interrupt,
                _ => RecoveryEvent::Finished,
            };
            signal.notify(event);
        });
        *self.recovery.lock() = Some(task);
        Ok(())
    }

    async fn wait_start_io(&self) -> Result<()> {
        self.log("cluster.wait_start_io");
        if self.block_start_io {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn wait_recovery_done(&self) -> Result<()> {
        self.log("cluster.wait_recovery_done");
        let task = self.recovery.lock().take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }

    async fn abort_recovery_test(&self) -> Result<()> {
        self.log("cluster.abort_recovery_test");
        if let Some(task) = self.recovery.lock().take() {
            task.abort();
        }
        Ok(())
    }

    async fn dump_config(&self, dir: &Path) -> Result<()> {
        self.log(format!("cluster.dump_config:{}", dir.display()));
        Ok(())
    }

    async fn dump_historic_ops(&self, dir: &Path) -> Result<()> {
        self.log(format!("cluster.dump_historic_ops:{}", dir.display()));
        Ok(())
    }

    async fn remove_pool(&self, name: &str) -> Result<()> {
        self.log(format!("cluster.remove_pool:{}", name));
        Ok(())
    }

    async fn make_pool(&self, name: &str, profile: &str, _application: &str) -> Result<()> {
        self.log(format!("cluster.make_pool:{}:{}", name, profile));
        Ok(())
    }

    async fn make_image(&self, image: &ImageSpec) -> Result<()> {
        let data_pool = image
            .data_pool
            .as_ref()
            .map(|d| format!("@{}", d))
            .unwrap_or_default();
        self.log(format!("cluster.make_image:{}/{}{}", image.pool, image.name, data_pool));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

const BASE: &str = "/tmp/cbt/00000000/LibrbdFio";

fn config(extra_cluster: &str, extra_fio: &str) -> BenchConfig {
    let yaml = format!(
        "cluster:\n  clients: [c1, c2]\n{}librbdfio:\n  time: {}\n  ramp: {}\n  volumes_per_client: 2\n  idle_monitor_sleep: 1\n{}",
        extra_cluster, FIO_SECS, RAMP_SECS, extra_fio
    );
    BenchConfig::from_yaml(&yaml).unwrap()
}

struct Harness {
    timeline: Timeline,
    executor: Arc<FakeExecutor>,
    monitor: Arc<FakeMonitor>,
    cluster: Arc<FakeCluster>,
    archive: TempDir,
}

impl Harness {
    fn new(executor: FakeExecutor, cluster: FakeCluster, timeline: Timeline) -> Self {
        Self {
            monitor: Arc::new(FakeMonitor::new(&timeline)),
            executor: Arc::new(executor),
            cluster: Arc::new(cluster),
            timeline,
            archive: TempDir::new().unwrap(),
        }
    }

    fn coordinator(&self, config: BenchConfig) -> RunCoordinator {
        let collaborators = Collaborators {
            executor: self.executor.clone(),
            monitor: self.monitor.clone(),
            cluster: self.cluster.clone(),
        };
        RunCoordinator::new(config, collaborators, BASE, self.archive.path().join("out"))
            .with_settle_delay(Duration::ZERO)
    }

    fn entries(&self) -> Vec<String> {
        self.timeline.lock().clone()
    }

    fn position(&self, prefix: &str) -> Vec<usize> {
        self.entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    fn dispatches(&self) -> usize {
        self.position("dispatch:").len()
    }
}

fn harness() -> Harness {
    let timeline = Timeline::default();
    Harness::new(FakeExecutor::new(&timeline, 2), FakeCluster::new(&timeline), timeline)
}

// -----------------------------------------------------------------------------
// Scenarios
// -----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_existing_archive_skips_everything() {
    let h = harness();
    std::fs::create_dir_all(h.archive.path().join("out")).unwrap();

    let mut coordinator = h.coordinator(config("", ""));
    assert!(coordinator.exists());
    let report = coordinator.run().await.unwrap();

    assert!(report.skipped);
    assert_eq!(coordinator.state(), RunState::Skipped);
    assert_eq!(coordinator.transitions(), &[RunState::Idle, RunState::Skipped]);
    assert_eq!(h.dispatches(), 0);
    assert!(h.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_top_level_run_fans_out_before_monitoring_and_waits() {
    let h = harness();
    let mut coordinator = h.coordinator(config("", ""));
    let report = coordinator.run().await.unwrap();

    assert!(!report.skipped);
    assert_eq!(
        report.transitions,
        vec![
            RunState::Idle,
            RunState::Provisioning,
            RunState::Dispatching,
            RunState::Ramping,
            RunState::Monitoring,
            RunState::Waiting,
            RunState::Collecting,
            RunState::Done,
        ]
    );

    // every volume dispatched before monitoring starts
    let dispatches = h.position("dispatch:");
    let monitor_start = h.position("monitor.start:");
    assert_eq!(dispatches.len(), 2);
    assert_eq!(monitor_start.len(), 1);
    assert!(dispatches.iter().all(|&d| d < monitor_start[0]));

    // monitoring starts after the ramp, while fio is still running
    let starts = h.monitor.starts.lock().clone();
    assert!(starts[0] >= RAMP_SECS && starts[0] < FIO_SECS, "{:?}", starts);

    // every dispatch is waited on only after both were issued
    let events = &report.events;
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], TrackerEvent::Dispatched { .. }));
    assert!(matches!(events[1], TrackerEvent::Dispatched { .. }));
    assert!(matches!(events[2], TrackerEvent::Completed { status: DispatchStatus::Success, .. }));
    assert!(matches!(events[3], TrackerEvent::Completed { status: DispatchStatus::Success, .. }));

    // provisioning order
    let entries = h.entries();
    let caches = entries.iter().position(|e| e == "cluster.drop_caches").unwrap();
    let dump = entries.iter().position(|e| e.starts_with("cluster.dump_config:")).unwrap();
    let autoscaler = entries
        .iter()
        .position(|e| e.starts_with("cluster.check_autoscaler:"))
        .unwrap();
    assert!(caches < dump && dump < autoscaler && autoscaler < dispatches[0]);
    assert!(entries[autoscaler].ends_with("/pgautoscaler.log"));

    // results pulled into the archive and extracted
    assert_eq!(report.outcomes.len(), 4);
    assert!(!report.is_partial());
    let run_dir = h
        .archive
        .path()
        .join("out/op_size-04194304/concurrent_procs-004/iodepth-016/write");
    assert_eq!(
        std::fs::read_to_string(run_dir.join("json_output.1.c2")).unwrap(),
        "{\n  \"jobs\": []\n}\n"
    );
    assert!(h.archive.path().join("out/metadata.json").exists());
}

#[tokio::test(start_paused = true)]
async fn test_autoscaler_timeout_is_not_fatal() {
    let timeline = Timeline::default();
    let mut cluster = FakeCluster::new(&timeline);
    cluster.autoscaler = AutoscalerStatus::TimedOut;
    let h = Harness::new(FakeExecutor::new(&timeline, 2), cluster, timeline);

    let mut coordinator = h.coordinator(config("", "  wait_pgautoscaler_timeout: 30\n"));
    let report = coordinator.run().await.unwrap();
    assert_eq!(report.autoscaler, Some(AutoscalerStatus::TimedOut));
    assert_eq!(coordinator.state(), RunState::Done);
    assert_eq!(h.dispatches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_swept_runs_are_strictly_sequential() {
    let h = harness();
    let fio = r#"  workloads:
    seq:
      mode: write
      iodepth: [1, 8]
      numjobs: [1, 1]
    quiet:
      mode: randread
      monitor: false
"#;
    let mut coordinator = h.coordinator(config("", fio));
    let report = coordinator.run().await.unwrap();
    assert_eq!(report.runs.len(), 3);

    let dirs: Vec<String> = report
        .runs
        .iter()
        .map(|r| r.run_dir.path().display().to_string())
        .collect();
    assert_eq!(
        dirs,
        vec![
            format!("{}/seq_write_4194304/iodepth-001/numjobs-001", BASE),
            format!("{}/seq_write_4194304/iodepth-008/numjobs-001", BASE),
            format!("{}/quiet_randread_4194304/iodepth-016/numjobs-001", BASE),
        ]
    );

    // each run's dispatches come after the previous run fully completed
    let events = &report.events;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            TrackerEvent::Dispatched { .. } => "D",
            TrackerEvent::Completed { .. } => "C",
            _ => "?",
        })
        .collect();
    assert_eq!(kinds.concat(), "DDCCDDCCDDCC");

    // the unmonitored workload has no monitoring bracket
    let entries = h.entries();
    assert!(entries.iter().any(|e| e == &format!("monitor.stop:{}", dirs[1])));
    assert!(!entries.iter().any(|e| e.contains(&dirs[2]) && e.starts_with("monitor.")));
    assert_eq!(h.monitor.starts.lock().len(), 2);

    // outcomes for every run, cluster dumps still in the top-level dir
    assert_eq!(report.outcomes.len(), 12);
    assert!(entries
        .iter()
        .any(|e| e.starts_with("cluster.dump_historic_ops:") && e.ends_with("/write")));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failure_is_recorded_and_run_continues() {
    let timeline = Timeline::default();
    let mut executor = FakeExecutor::new(&timeline, 2);
    executor.fail_matching = Some("output.1".to_string());
    let h = Harness::new(executor, FakeCluster::new(&timeline), timeline);

    let mut coordinator = h.coordinator(config("", ""));
    let report = coordinator.run().await.unwrap();

    assert_eq!(coordinator.state(), RunState::Done);
    assert!(report.is_partial());
    let failures: Vec<&BenchError> = report.dispatch_failures().collect();
    assert_eq!(failures.len(), 1);
    match failures[0] {
        BenchError::Dispatch { command, code, hosts } => {
            assert!(command.ends_with("output.1"));
            assert_eq!(*code, Some(1));
            assert_eq!(hosts, "c1,c2");
        }
        other => panic!("unexpected failure {:?}", other),
    }
    // no retry
    assert_eq!(h.dispatches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_background_recovery_blocks_dispatch_until_io_may_start() {
    let timeline = Timeline::default();
    let mut cluster = FakeCluster::new(&timeline);
    cluster.block_start_io = true;
    let h = Harness::new(FakeExecutor::new(&timeline, 2), cluster, timeline);

    let recovery = "  recovery_test:\n    osds: [3]\n";
    let mut coordinator = h.coordinator(config(recovery, "  recov_test_type: background\n"));
    let outcome = tokio::time::timeout(Duration::from_secs(3600), coordinator.run()).await;

    assert!(outcome.is_err(), "run should still be waiting for the cluster");
    assert_eq!(h.dispatches(), 0);
    assert_eq!(coordinator.state(), RunState::RecoveryArmed);
    let entries = h.entries();
    assert!(entries.contains(&"cluster.create_recovery_test:Background".to_string()));
    assert_eq!(entries.last().unwrap(), "cluster.wait_start_io");
}

#[tokio::test(start_paused = true)]
async fn test_blocking_recovery_interrupts_running_load() {
    let h = harness();
    let recovery = "  recovery_test:\n    osds: [3, 4]\n";
    let mut coordinator = h.coordinator(config(recovery, ""));

    let started = Instant::now();
    let report = coordinator.run().await.unwrap();

    // fio was cut short by the interrupt at the 30s mark
    assert!(started.elapsed() < Duration::from_secs(FIO_SECS));
    assert!(report.transitions.contains(&RunState::RecoveryArmed));
    assert!(h
        .entries()
        .contains(&"execute:sudo killall -2 fio".to_string()));

    let events = &report.events;
    let delivered = events
        .iter()
        .position(|e| matches!(e, TrackerEvent::InterruptDelivered { status: DispatchStatus::Success }))
        .expect("interrupt delivered");
    let dispatched: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, TrackerEvent::Dispatched { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched.iter().all(|&d| d < delivered));

    // recovery runs always use time_based fio
    let entries = h.entries();
    assert!(entries
        .iter()
        .filter(|e| e.starts_with("dispatch:"))
        .all(|e| e.contains(" --time_based")));

    // the top-level run waits for recovery before stopping monitoring
    let done = entries.iter().position(|e| e == "cluster.wait_recovery_done").unwrap();
    let stop = entries.iter().position(|e| e.starts_with("monitor.stop:")).unwrap();
    assert!(done < stop);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_provisions_pools_and_images() {
    let h = harness();
    let fio = "  data_pool_profile: ec42\n";
    let mut coordinator = h.coordinator(config("", fio));
    coordinator.initialize().await.unwrap();

    let entries = h.entries();
    assert_eq!(entries[0], format!("execute:rm -rf {}", BASE));
    assert!(entries.contains(&format!("monitor.start:{}/idle_monitoring", BASE)));
    assert!(entries.contains(&format!("monitor.start:{}/pool_monitoring", BASE)));
    assert!(entries.contains(&"cluster.make_pool:cbt-librbdfio:default".to_string()));
    assert!(entries.contains(&"cluster.make_pool:cbt-librbdfio-data:ec42".to_string()));

    let images: Vec<&String> = entries
        .iter()
        .filter(|e| e.starts_with("cluster.make_image:"))
        .collect();
    assert_eq!(
        images,
        vec![
            "cluster.make_image:cbt-librbdfio/cbt-librbdfio-c1.lab-0@cbt-librbdfio-data",
            "cluster.make_image:cbt-librbdfio/cbt-librbdfio-c1.lab-1@cbt-librbdfio-data",
            "cluster.make_image:cbt-librbdfio/cbt-librbdfio-c2.lab-0@cbt-librbdfio-data",
            "cluster.make_image:cbt-librbdfio/cbt-librbdfio-c2.lab-1@cbt-librbdfio-data",
        ]
    );
    // no recovery pool without a background recovery test
    assert!(!entries.iter().any(|e| e.contains("recov")));
    // prefill is off by default
    assert_eq!(h.dispatches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_with_existing_volumes_skips_provisioning() {
    let h = harness();
    let mut coordinator = h.coordinator(config("", "  use_existing_volumes: true\n"));
    coordinator.initialize().await.unwrap();
    assert!(!h.entries().iter().any(|e| e.starts_with("cluster.make_")));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_keeps_recovery_images_out_of_the_data_pool() {
    let h = harness();
    let recovery = "  recovery_test:\n    osds: [3]\n";
    let fio = "  recov_test_type: background\n  data_pool_profile: ec42\n";
    let mut coordinator = h.coordinator(config(recovery, fio));
    coordinator.initialize().await.unwrap();

    let entries = h.entries();
    let recov_images: Vec<&String> = entries
        .iter()
        .filter(|e| e.starts_with("cluster.make_image:cbt-librbdfio-recov/"))
        .collect();
    assert_eq!(recov_images.len(), 4);
    assert!(recov_images.iter().all(|e| !e.contains('@')), "{:?}", recov_images);

    // the data pool is created once, for the main images only
    let data_pool_made: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.starts_with("cluster.make_pool:cbt-librbdfio-data:"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(data_pool_made.len(), 1);
    let last_recov = entries
        .iter()
        .rposition(|e| e.starts_with("cluster.make_image:cbt-librbdfio-recov/"))
        .unwrap();
    assert!(last_recov < data_pool_made[0]);
    assert!(entries
        .iter()
        .any(|e| e == "cluster.make_image:cbt-librbdfio/cbt-librbdfio-c2.lab-1@cbt-librbdfio-data"));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_fio_output_does_not_abort_collection() {
    let timeline = Timeline::default();
    let mut executor = FakeExecutor::new(&timeline, 2);
    executor.raw_output = b"fio-3.35 \xff\nStarting 1 process\n{}\n\n".to_vec();
    let h = Harness::new(executor, FakeCluster::new(&timeline), timeline);

    let mut coordinator = h.coordinator(config("", ""));
    let report = coordinator.run().await.unwrap();
    assert_eq!(coordinator.state(), RunState::Done);
    assert_eq!(report.outcomes.len(), 4);
    assert!(report.outcomes.iter().all(|o| o.has_data()));
    assert!(h.archive.path().join("out/metadata.json").exists());
}

#[tokio::test(start_paused = true)]
async fn test_failed_collection_does_not_mark_benchmark_done() {
    let h = harness();
    h.executor.fail_collect.store(true, Ordering::SeqCst);

    let mut coordinator = h.coordinator(config("", ""));
    assert!(coordinator.run().await.is_err());
    assert!(!h.archive.path().join("out").exists());

    // a rerun is not skipped and produces the archive
    h.executor.fail_collect.store(false, Ordering::SeqCst);
    let mut coordinator = h.coordinator(config("", ""));
    assert!(!coordinator.exists());
    let report = coordinator.run().await.unwrap();
    assert!(!report.skipped);
    assert!(h.archive.path().join("out/metadata.json").exists());
    assert!(!h.archive.path().join("out.partial").exists());
}

#[tokio::test(start_paused = true)]
async fn test_error_after_arming_stops_recovery() {
    let h = harness();
    h.monitor.fail_start.store(true, Ordering::SeqCst);
    let recovery = "  recovery_test:\n    osds: [3]\n";
    let mut coordinator = h.coordinator(config(recovery, ""));

    let err = coordinator.run().await.unwrap_err();
    assert!(format!("{:#}", err).contains("collectl"));
    assert!(!coordinator.tracker().is_armed());

    let entries = h.entries();
    let armed = entries
        .iter()
        .position(|e| e == "cluster.create_recovery_test:Blocking")
        .unwrap();
    let aborted = entries
        .iter()
        .position(|e| e == "cluster.abort_recovery_test")
        .unwrap();
    assert!(armed < aborted);
    assert!(h.cluster.recovery.lock().is_none());
}

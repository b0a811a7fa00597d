// src/coordinator.rs
//
// Orchestration state machine for one benchmark invocation:
//
//   Idle -> Provisioning -> [RecoveryArmed] -> Dispatching -> Ramping
//        -> Monitoring -> Waiting -> Collecting -> Done
//   Idle -> Skipped                  (archive already exists)
//
// With a workload table the Dispatching..Collecting cycle repeats once per
// planned run, strictly one run after another. Inside a run every fio is
// dispatched before monitoring starts and before the first wait.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cluster::{AutoscalerStatus, ClusterController, ImageSpec};
use crate::collector::{CollectOutcome, ResultCollector};
use crate::command::{ClientContext, CommandBuilder, FioSettings};
use crate::config::{BenchConfig, RecoveryMode};
use crate::constants::{
    FQDN_CMD, IDLE_MONITORING_DIR, INTERRUPT_LOAD_CMD, PGAUTOSCALER_LOG, POOL_MONITORING_DIR,
    RECOVERY_POOL_MONITORING_DIR, SETTLE_DELAY, VOLUME_PREFIX,
};
use crate::error::BenchError;
use crate::executor::{ClientHandle, DispatchHandle, DispatchStatus, HostGroup, RemoteExecutor};
use crate::monitoring::MonitoringController;
use crate::planner::{RunSpec, WorkloadPlanner};
use crate::results_dir::{ArchiveDir, RunDirectory, RunMetadata};
use crate::tracker::{DispatchTracker, TrackerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Provisioning,
    RecoveryArmed,
    Dispatching,
    Ramping,
    Monitoring,
    Waiting,
    Collecting,
    Done,
    Skipped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The external collaborators a coordinator drives
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn RemoteExecutor>,
    pub monitor: Arc<dyn MonitoringController>,
    pub cluster: Arc<dyn ClusterController>,
}

/// What happened in one planned run
#[derive(Debug)]
pub struct RunRecord {
    pub spec: RunSpec,
    pub run_dir: RunDirectory,
    pub dispatched: usize,
    /// Non-zero completions, in submission order
    pub failures: Vec<BenchError>,
}

/// Outcome of a whole benchmark invocation
#[derive(Debug, Default)]
pub struct RunReport {
    pub skipped: bool,
    pub autoscaler: Option<AutoscalerStatus>,
    pub runs: Vec<RunRecord>,
    pub outcomes: Vec<CollectOutcome>,
    pub events: Vec<TrackerEvent>,
    pub transitions: Vec<RunState>,
}

impl RunReport {
    pub fn dispatch_failures(&self) -> impl Iterator<Item = &BenchError> {
        self.runs.iter().flat_map(|r| r.failures.iter())
    }

    pub fn empty_results(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.has_data()).count()
    }

    /// Some dispatch failed or some client left no payload
    pub fn is_partial(&self) -> bool {
        self.dispatch_failures().next().is_some() || self.empty_results() > 0
    }
}

/// The workload table expanded, or the single top-level run without one
pub fn plan_runs(config: &BenchConfig) -> Result<Vec<RunSpec>, BenchError> {
    let planner = WorkloadPlanner::new(config.defaults());
    if config.librbdfio.workloads.is_empty() {
        planner.check(&[])?;
        Ok(vec![planner.top_level()])
    } else {
        planner.plan(&config.librbdfio.workloads)
    }
}

/// Remote directory of `spec` under `base`
pub fn run_directory(config: &BenchConfig, base: &Path, spec: &RunSpec) -> RunDirectory {
    RunDirectory::for_spec(base, config.librbdfio.osd_ra, config.total_procs(), spec)
}

pub struct RunCoordinator {
    config: BenchConfig,
    config_path: Option<PathBuf>,
    base_run_dir: PathBuf,
    archive_dir: PathBuf,
    executor: Arc<dyn RemoteExecutor>,
    monitor: Arc<dyn MonitoringController>,
    cluster: Arc<dyn ClusterController>,
    planner: WorkloadPlanner,
    builder: CommandBuilder,
    collector: ResultCollector,
    tracker: DispatchTracker,
    clients: HostGroup,
    settle_delay: Duration,
    state: RunState,
    transitions: Vec<RunState>,
    /// Remote dirs outside the run dirs that are collected with them
    extra_dirs: Vec<&'static str>,
}

impl RunCoordinator {
    /// `base_run_dir` is the remote scratch root, `archive_dir` the local
    /// results directory whose existence skips the invocation.
    pub fn new(
        config: BenchConfig,
        collaborators: Collaborators,
        base_run_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        let planner = WorkloadPlanner::new(config.defaults());
        let builder = CommandBuilder::new(FioSettings::from_config(&config.librbdfio));
        let clients = config.clients();
        Self {
            config,
            config_path: None,
            base_run_dir: base_run_dir.into(),
            archive_dir: archive_dir.into(),
            executor: collaborators.executor,
            monitor: collaborators.monitor,
            cluster: collaborators.cluster,
            planner,
            builder,
            collector: ResultCollector::new(),
            tracker: DispatchTracker::new(),
            clients,
            settle_delay: SETTLE_DELAY,
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
            extra_dirs: Vec::new(),
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Config file copied into the archive
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    pub fn tracker(&self) -> &DispatchTracker {
        &self.tracker
    }

    fn transition(&mut self, next: RunState) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    /// True when this invocation already produced its archive
    pub fn exists(&self) -> bool {
        if ArchiveDir::exists(&self.archive_dir) {
            info!("Skipping existing test in {}.", self.archive_dir.display());
            return true;
        }
        false
    }

    /// Ordered runs this invocation executes
    pub fn plan(&self) -> Result<Vec<RunSpec>, BenchError> {
        plan_runs(&self.config)
    }

    pub fn run_directory(&self, spec: &RunSpec) -> RunDirectory {
        run_directory(&self.config, &self.base_run_dir, spec)
    }

    fn top_level_dir(&self) -> RunDirectory {
        self.run_directory(&self.planner.top_level())
    }

    async fn remote(&self, command: &str) -> Result<()> {
        let status = self.executor.execute(&self.clients, command).await?;
        if !status.is_success() {
            warn!("'{}' returned {:?} on {}", command, status, self.clients);
        }
        Ok(())
    }

    async fn make_remote_dir(&self, dir: &Path) -> Result<()> {
        self.remote(&format!("mkdir -p -m0755 {}", dir.display())).await
    }

    /// Fully-qualified name each client reports, falling back to the
    /// configured host name
    async fn client_fqdns(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.clients.len());
        for client in self.clients.iter() {
            let fqdn = match self.executor.capture(client, FQDN_CMD).await {
                Ok(name) if !name.is_empty() => name,
                Ok(_) => client.host().to_string(),
                Err(e) => {
                    warn!("Could not resolve fqdn of {}: {:#}", client, e);
                    client.host().to_string()
                }
            };
            names.push(fqdn);
        }
        names
    }

    /// Recreate `pool` and one image per client per volume. `data_pool` is
    /// a `(name, profile)` pair recreated alongside it for image data.
    async fn make_images(
        &self,
        pool: &str,
        profile: &str,
        data_pool: Option<(&str, &str)>,
        image_prefix: &str,
    ) -> Result<()> {
        let fio = &self.config.librbdfio;
        self.cluster.remove_pool(pool).await?;
        self.cluster.make_pool(pool, profile, "rbd").await?;

        if let Some((name, data_profile)) = data_pool {
            self.cluster.remove_pool(name).await?;
            self.cluster.make_pool(name, data_profile, "rbd").await?;
        }
        let data_pool = data_pool.map(|(name, _)| name.to_string());

        for fqdn in self.client_fqdns().await {
            for volume in 0..fio.volumes_per_client {
                let image = ImageSpec {
                    name: format!("{}-{}-{}", image_prefix, fqdn, volume),
                    size_mb: fio.vol_size,
                    pool: pool.to_string(),
                    data_pool: data_pool.clone(),
                    object_order: fio.vol_object_size,
                };
                self.cluster
                    .make_image(&image)
                    .await
                    .with_context(|| format!("Failed to create image {}", image.name))?;
            }
        }
        Ok(())
    }

    /// Prepare the remote side: fresh run dir, idle monitoring window,
    /// pools and images, optional prefill.
    pub async fn initialize(&mut self) -> Result<()> {
        let fio = self.config.librbdfio.clone();
        let base = self.base_run_dir.clone();

        self.remote(&format!("rm -rf {}", base.display())).await?;
        self.make_remote_dir(&base).await?;

        info!("Pausing for {:?} for idle monitoring.", fio.idle_monitor_sleep);
        self.monitor.start(&base.join(IDLE_MONITORING_DIR)).await?;
        tokio::time::sleep(fio.idle_monitor_sleep).await;
        self.monitor.stop(None).await?;
        self.extra_dirs.push(IDLE_MONITORING_DIR);

        if self.config.recovery_mode() == RecoveryMode::Background {
            info!("Creating recovery image...");
            self.monitor.start(&base.join(RECOVERY_POOL_MONITORING_DIR)).await?;
            if !fio.use_existing_volumes {
                let prefix = format!("{}-recov", VOLUME_PREFIX);
                // recovery images keep their data in the recovery pool
                self.make_images(&fio.recov_pool_name, &fio.recov_pool_profile, None, &prefix)
                    .await?;
            }
            self.monitor.stop(None).await?;
            self.extra_dirs.push(RECOVERY_POOL_MONITORING_DIR);
        }

        if !fio.workloads.is_empty() {
            info!("{} workloads:", fio.workloads.len());
            for (name, workload) in &fio.workloads {
                info!("    {}: {:?}", name, workload);
            }
        }

        info!("Creating fio images...");
        self.monitor.start(&base.join(POOL_MONITORING_DIR)).await?;
        if !fio.use_existing_volumes {
            let data_pool_name = format!("{}-data", fio.pool_name);
            let data_pool = fio
                .data_pool_profile
                .as_deref()
                .map(|profile| (data_pool_name.as_str(), profile));
            self.make_images(&fio.pool_name, &fio.pool_profile, data_pool, VOLUME_PREFIX)
                .await?;
        }
        self.monitor.stop(None).await?;
        self.extra_dirs.push(POOL_MONITORING_DIR);

        if fio.prefill.enabled {
            self.prefill().await?;
        }
        Ok(())
    }

    async fn prefill(&self) -> Result<()> {
        info!("Prefilling volumes");
        let fio = &self.config.librbdfio;
        let mut handles = Vec::with_capacity(fio.volumes_per_client as usize);
        for volume in 0..fio.volumes_per_client {
            let cmd = self.builder.prefill(volume, fio.vol_size, &fio.prefill);
            handles.push(self.executor.dispatch(&self.clients, &cmd).await?);
        }
        for handle in handles {
            let status = handle.wait().await?;
            if !status.is_success() {
                warn!("Prefill returned {:?}", status);
            }
        }
        Ok(())
    }

    /// Execute the benchmark. Returns a report with `skipped` set, and no
    /// remote calls made, when the archive already exists.
    pub async fn run(&mut self) -> Result<RunReport> {
        if self.exists() {
            self.transition(RunState::Skipped);
            return Ok(RunReport {
                skipped: true,
                transitions: self.transitions.clone(),
                ..Default::default()
            });
        }

        // configuration problems surface before anything remote happens
        let plan = self.plan()?;
        let outcome = self.execute_plan(&plan).await;
        if outcome.is_err() {
            self.abandon_recovery().await;
        }
        outcome
    }

    /// Stop the interrupt relay and the cluster disruption after a failed run
    async fn abandon_recovery(&self) {
        if !self.config.recovery_mode().is_active() {
            return;
        }
        if self.tracker.is_armed() {
            self.tracker.disarm().await;
        }
        if let Err(e) = self.cluster.abort_recovery_test().await {
            warn!("Could not stop the recovery test: {:#}", e);
        }
    }

    async fn execute_plan(&mut self, plan: &[RunSpec]) -> Result<RunReport> {
        let started = Instant::now();
        let recovery = self.config.recovery_mode();
        let top_dir = self.top_level_dir();
        let mut report = RunReport::default();

        self.transition(RunState::Provisioning);
        self.cluster.drop_caches().await?;
        self.make_remote_dir(top_dir.path()).await?;
        self.cluster.dump_config(top_dir.path()).await?;
        tokio::time::sleep(self.settle_delay).await;

        let status = self
            .cluster
            .check_autoscaler(self.config.autoscaler_timeout(), &top_dir.join(PGAUTOSCALER_LOG))
            .await?;
        if status == AutoscalerStatus::TimedOut {
            warn!("PG autoscaler taking longer to complete. Continuing anyway...results may be skewed.");
        }
        report.autoscaler = Some(status);

        if recovery.is_active() {
            self.transition(RunState::RecoveryArmed);
            let signal = self.tracker.arm(
                Arc::clone(&self.executor),
                self.clients.clone(),
                self.interrupt_command(),
            );
            self.cluster
                .create_recovery_test(top_dir.path(), recovery, signal)
                .await?;
            if recovery == RecoveryMode::Background {
                info!("Waiting for the recovery test to start client I/O");
                self.cluster.wait_start_io().await?;
            }
        }

        if self.config.librbdfio.workloads.is_empty() {
            let spec = self.planner.top_level();
            info!("Running rbd fio {} test.", spec.mode);
            let record = self.execute_run(&spec, &top_dir, recovery.is_active()).await?;
            report.runs.push(record);
            self.transition(RunState::Collecting);
            if recovery.is_active() {
                self.cluster.wait_recovery_done().await?;
            }
            if spec.monitor {
                self.monitor.stop(Some(top_dir.path())).await?;
            }
        } else {
            for spec in plan {
                let run_dir = self.run_directory(spec);
                info!("Running rbd fio {}", spec);
                let record = self.execute_run(spec, &run_dir, recovery.is_active()).await?;
                report.runs.push(record);
                self.transition(RunState::Collecting);
                if spec.monitor {
                    self.monitor.stop(Some(run_dir.path())).await?;
                }
            }
            info!("== Workloads completed ==");
            if recovery.is_active() {
                self.cluster.wait_recovery_done().await?;
            }
        }
        self.tracker.disarm().await;

        self.cluster.dump_historic_ops(top_dir.path()).await?;
        report.outcomes = self.collect(&report, &top_dir, recovery, started).await?;

        self.transition(RunState::Done);
        report.events = self.tracker.events();
        report.transitions = self.transitions.clone();
        Ok(report)
    }

    fn interrupt_command(&self) -> String {
        if self.config.librbdfio.no_sudo {
            INTERRUPT_LOAD_CMD.to_string()
        } else {
            format!("sudo {}", INTERRUPT_LOAD_CMD)
        }
    }

    /// One planned run: fan out, ramp, monitor, fan in
    pub async fn execute_run(
        &mut self,
        spec: &RunSpec,
        run_dir: &RunDirectory,
        recovery_active: bool,
    ) -> Result<RunRecord> {
        self.make_remote_dir(run_dir.path()).await?;

        self.transition(RunState::Dispatching);
        let mut handles: Vec<DispatchHandle> = Vec::new();
        let mut failures = Vec::new();
        for volume in 0..self.config.librbdfio.volumes_per_client {
            let ctx = ClientContext {
                volume,
                run_dir: run_dir.path(),
                recovery_active,
            };
            let cmd = self.builder.build(spec, &ctx, None);
            match self.executor.dispatch(&self.clients, &cmd).await {
                Ok(handle) => {
                    self.tracker.record(TrackerEvent::Dispatched {
                        hosts: handle.hosts().to_string(),
                        command: cmd,
                    });
                    handles.push(handle);
                }
                Err(e) => {
                    warn!("Could not dispatch to {}: {:#}", self.clients, e);
                    failures.push(BenchError::Dispatch {
                        hosts: self.clients.joined(),
                        command: cmd,
                        code: None,
                    });
                }
            }
        }
        let dispatched = handles.len();

        if spec.monitor {
            self.transition(RunState::Ramping);
            if let Some(ramp) = spec.ramp {
                tokio::time::sleep(Duration::from_secs(ramp)).await;
            }
            self.transition(RunState::Monitoring);
            self.monitor.start(run_dir.path()).await?;
        }

        self.transition(RunState::Waiting);
        for handle in handles {
            let hosts = handle.hosts().to_string();
            let command = handle.command().to_string();
            let status = match handle.wait().await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Lost track of '{}': {:#}", command, e);
                    DispatchStatus::Failed { code: None }
                }
            };
            self.tracker.record(TrackerEvent::Completed {
                command: command.clone(),
                status,
            });
            if let DispatchStatus::Failed { code } = status {
                warn!("fio on [{}] exited with {:?}; results will be partial", hosts, code);
                failures.push(BenchError::Dispatch { hosts, command, code });
            }
        }

        Ok(RunRecord {
            spec: spec.clone(),
            run_dir: run_dir.clone(),
            dispatched,
            failures,
        })
    }

    /// Pull every run dir into the archive and extract the fio payloads
    async fn collect(
        &self,
        report: &RunReport,
        top_dir: &RunDirectory,
        recovery: RecoveryMode,
        started: Instant,
    ) -> Result<Vec<CollectOutcome>> {
        let clients: Vec<String> = self.clients.iter().map(ClientHandle::to_string).collect();
        let metadata = RunMetadata::new(
            self.config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            clients,
            format!("{:?}", recovery).to_lowercase(),
        );
        let mut archive = ArchiveDir::create(&self.archive_dir, self.config_path.as_deref(), metadata)?;

        let mut outcomes = Vec::new();
        let mut dirs: Vec<&RunDirectory> = report.runs.iter().map(|r| &r.run_dir).collect();
        if !dirs.contains(&top_dir) {
            // cluster dumps live in the top-level dir even when workloads ran
            dirs.push(top_dir);
        }
        for dir in dirs {
            let local = archive.run_path(dir);
            self.executor
                .collect(&self.clients, dir.path(), &local)
                .await
                .with_context(|| format!("Failed to collect {}", dir.path().display()))?;
            if report.runs.iter().any(|r| &r.run_dir == dir) {
                outcomes.extend(self.collector.collect_dir(
                    &local,
                    &self.clients,
                    self.config.librbdfio.volumes_per_client,
                )?);
            }
            archive.metadata_mut().runs.push(dir.relative().display().to_string());
        }
        for extra in &self.extra_dirs {
            self.executor
                .collect(&self.clients, &self.base_run_dir.join(extra), &archive.path().join(extra))
                .await?;
        }

        let meta = archive.metadata_mut();
        meta.dispatch_failures = report.dispatch_failures().count();
        meta.empty_results = outcomes.iter().filter(|o| !o.has_data()).count();
        archive.finalize(started.elapsed().as_secs_f64())?;
        Ok(outcomes)
    }
}

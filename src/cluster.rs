// src/cluster.rs
//
// Cluster-side operations: pool and image lifecycle, the pg autoscaler wait,
// and the recovery test. CephCluster drives the ceph/rbd CLIs on the head
// node through the same RemoteExecutor the clients use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{BenchConfig, RecoveryMode, RecoveryTestConfig};
use crate::constants::{
    AUTOSCALER_POLL_INTERVAL, CLUSTER_CONFIG_SNAPSHOT, HISTORIC_OPS_FILE, RECOVERY_LOG,
};
use crate::error::BenchError;
use crate::executor::{ClientHandle, HostGroup, RemoteExecutor};
use crate::tracker::{RecoveryEvent, RecoverySignal};

/// Outcome of the pg autoscaler wait. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoscalerStatus {
    Settled,
    /// Still busy when the timeout ran out; results may be skewed
    TimedOut,
    /// Waiting disabled in the config
    Skipped,
}

/// One rbd image to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: String,
    pub size_mb: u64,
    pub pool: String,
    pub data_pool: Option<String>,
    pub object_order: u32,
}

#[async_trait]
pub trait ClusterController: Send + Sync {
    async fn drop_caches(&self) -> Result<()>;

    /// Wait up to `timeout` for pg autoscaling to finish, logging progress to
    /// `log_path` on the head node. `None` skips the wait.
    async fn check_autoscaler(&self, timeout: Option<Duration>, log_path: &Path) -> Result<AutoscalerStatus>;

    /// Start the disruption in the background. `signal` receives
    /// `Interrupt` (blocking) or `Finished` (background) at the end of the
    /// recovery cycle.
    async fn create_recovery_test(&self, run_dir: &Path, mode: RecoveryMode, signal: RecoverySignal) -> Result<()>;

    /// Resolves once client I/O may start
    async fn wait_start_io(&self) -> Result<()>;

    /// Resolves once the disruption is fully over. Immediate without a test.
    async fn wait_recovery_done(&self) -> Result<()>;

    /// Stop a recovery test the run no longer waits for, returning any
    /// disrupted OSDs to service. A no-op when no test is running.
    async fn abort_recovery_test(&self) -> Result<()>;

    async fn dump_config(&self, dir: &Path) -> Result<()>;

    async fn dump_historic_ops(&self, dir: &Path) -> Result<()>;

    async fn remove_pool(&self, name: &str) -> Result<()>;

    async fn make_pool(&self, name: &str, profile: &str, application: &str) -> Result<()>;

    async fn make_image(&self, image: &ImageSpec) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecoveryPhase {
    NotStarted,
    /// OSDs are out, I/O may start
    Disrupted,
    Done,
    Failed(String),
}

/// ClusterController over the ceph and rbd command line tools
pub struct CephCluster {
    executor: Arc<dyn RemoteExecutor>,
    sudo: &'static str,
    head: HostGroup,
    nodes: HostGroup,
    ceph: String,
    rbd: String,
    recovery: Option<RecoveryTestConfig>,
    phase: watch::Sender<RecoveryPhase>,
    recovery_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    recovery_log: Mutex<Option<PathBuf>>,
}

impl CephCluster {
    pub fn new(config: &BenchConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        let sudo = if config.cluster.use_sudo { "sudo " } else { "" };
        let head = config.head();
        let mut nodes: Vec<String> = config.cluster.clients.clone();
        for member in head.iter() {
            if !nodes.iter().any(|n| n == member.address()) {
                nodes.push(member.address().to_string());
            }
        }
        let (phase, _) = watch::channel(RecoveryPhase::NotStarted);

        Self {
            executor,
            sudo,
            head,
            nodes: HostGroup::from_addresses(&nodes),
            ceph: format!("{}{}", sudo, config.cluster.ceph_cmd),
            rbd: format!("{}{}", sudo, config.cluster.rbd_cmd),
            recovery: config.cluster.recovery_test.clone(),
            phase,
            recovery_task: Mutex::new(None),
            recovery_log: Mutex::new(None),
        }
    }

    fn head_host(&self) -> Result<&ClientHandle> {
        self.head
            .members()
            .first()
            .ok_or_else(|| BenchError::Cluster("no head node configured".into()).into())
    }

    async fn head_exec(&self, command: &str) -> Result<()> {
        let status = self.executor.execute(&self.head, command).await?;
        if !status.is_success() {
            return Err(BenchError::Cluster(format!("'{}' failed with {:?}", command, status)).into());
        }
        Ok(())
    }

    async fn wait_phase(&self, ready: impl Fn(&RecoveryPhase) -> bool) -> Result<()> {
        let mut rx = self.phase.subscribe();
        let phase = rx
            .wait_for(|p| ready(p) || matches!(p, RecoveryPhase::Failed(_)))
            .await
            .context("Recovery state channel closed")?
            .clone();
        match phase {
            RecoveryPhase::Failed(msg) => Err(BenchError::Cluster(msg).into()),
            _ => Ok(()),
        }
    }
}

/// True while `ceph progress json` still lists autoscaler events
fn autoscaler_busy(progress: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(progress) {
        Ok(value) => value
            .get("events")
            .and_then(|e| e.as_array())
            .map(|events| {
                events.iter().any(|ev| {
                    ev.get("message")
                        .and_then(|m| m.as_str())
                        .is_some_and(|m| m.contains("PG autoscaler"))
                })
            })
            .unwrap_or(false),
        Err(e) => {
            debug!("Unparseable progress output ({}), treating as settled", e);
            false
        }
    }
}

/// An empty reply means nothing was reported (dry run); treat as healthy
fn is_healthy(health: &str) -> bool {
    let health = health.trim();
    health.is_empty() || health.starts_with("HEALTH_OK")
}

/// Body of the recovery test, run on its own task
struct RecoveryRun {
    executor: Arc<dyn RemoteExecutor>,
    head: ClientHandle,
    ceph: String,
    test: RecoveryTestConfig,
    log: PathBuf,
}

/// `ceph osd <verb> <ids>` with output appended to `log`
fn osd_command(ceph: &str, verb: &str, osds: &[u32], log: &Path) -> String {
    let ids = osds.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" ");
    format!("{} osd {} {} >> {} 2>&1", ceph, verb, ids, log.display())
}

impl RecoveryRun {
    async fn osd_cmd(&self, verb: &str) -> Result<()> {
        let cmd = osd_command(&self.ceph, verb, &self.test.osds, &self.log);
        let group = HostGroup::from_addresses(&[self.head.address()]);
        let status = self.executor.execute(&group, &cmd).await?;
        if !status.is_success() {
            return Err(BenchError::Cluster(format!("ceph osd {} failed with {:?}", verb, status)).into());
        }
        Ok(())
    }

    async fn wait_healthy(&self) -> Result<()> {
        let deadline = Instant::now() + self.test.timeout;
        loop {
            let health = self
                .executor
                .capture(&self.head, &format!("{} health", self.ceph))
                .await?;
            if is_healthy(&health) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Cluster still not healthy after {:?}: {}", self.test.timeout, health);
                return Ok(());
            }
            debug!("Waiting for recovery: {}", health);
            tokio::time::sleep(self.test.poll_interval).await;
        }
    }

    async fn run(&self, phase: &watch::Sender<RecoveryPhase>) -> Result<()> {
        info!("Recovery test: marking OSDs {:?} out", self.test.osds);
        self.osd_cmd("out").await?;
        phase.send_replace(RecoveryPhase::Disrupted);
        self.wait_healthy().await?;
        info!("Recovery test: marking OSDs {:?} back in", self.test.osds);
        self.osd_cmd("in").await?;
        self.wait_healthy().await
    }
}

#[async_trait]
impl ClusterController for CephCluster {
    async fn drop_caches(&self) -> Result<()> {
        let status = self
            .executor
            .execute(
                &self.nodes,
                &format!("sync && echo 3 | {}tee /proc/sys/vm/drop_caches > /dev/null", self.sudo),
            )
            .await?;
        if !status.is_success() {
            warn!("drop_caches returned {:?}", status);
        }
        Ok(())
    }

    async fn check_autoscaler(&self, timeout: Option<Duration>, log_path: &Path) -> Result<AutoscalerStatus> {
        let Some(timeout) = timeout else {
            return Ok(AutoscalerStatus::Skipped);
        };
        let head = self.head_host()?;
        let cmd = format!("{} progress json | tee -a {}", self.ceph, log_path.display());
        let deadline = Instant::now() + timeout;

        loop {
            let progress = self.executor.capture(head, &cmd).await?;
            if !autoscaler_busy(&progress) {
                return Ok(AutoscalerStatus::Settled);
            }
            if Instant::now() >= deadline {
                return Ok(AutoscalerStatus::TimedOut);
            }
            tokio::time::sleep(AUTOSCALER_POLL_INTERVAL).await;
        }
    }

    async fn create_recovery_test(&self, run_dir: &Path, mode: RecoveryMode, signal: RecoverySignal) -> Result<()> {
        let Some(test) = self.recovery.clone() else {
            return Err(BenchError::Cluster("no recovery_test configured".into()).into());
        };
        let run = RecoveryRun {
            executor: Arc::clone(&self.executor),
            head: self.head_host()?.clone(),
            ceph: self.ceph.clone(),
            test,
            log: run_dir.join(RECOVERY_LOG),
        };
        *self.recovery_log.lock() = Some(run.log.clone());
        let phase = self.phase.clone();
        phase.send_replace(RecoveryPhase::NotStarted);

        let task = tokio::spawn(async move {
            let outcome = run.run(&phase).await;
            let event = match mode {
                RecoveryMode::Blocking => RecoveryEvent::Interrupt,
                _ => RecoveryEvent::Finished,
            };
            if !signal.notify(event) {
                debug!("recovery signal has no listener");
            }
            match outcome {
                Ok(()) => {
                    phase.send_replace(RecoveryPhase::Done);
                }
                Err(e) => {
                    error!("Recovery test failed: {:#}", e);
                    phase.send_replace(RecoveryPhase::Failed(format!("{:#}", e)));
                }
            }
        });

        if let Some(old) = self.recovery_task.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    async fn wait_start_io(&self) -> Result<()> {
        let armed = self.recovery_task.lock().is_some();
        if !armed {
            return Ok(());
        }
        self.wait_phase(|p| !matches!(p, RecoveryPhase::NotStarted)).await
    }

    async fn wait_recovery_done(&self) -> Result<()> {
        let armed = self.recovery_task.lock().is_some();
        if !armed {
            return Ok(());
        }
        self.wait_phase(|p| matches!(p, RecoveryPhase::Done)).await
    }

    async fn abort_recovery_test(&self) -> Result<()> {
        let task = self.recovery_task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };
        let finished = task.is_finished();
        task.abort();
        if finished {
            return Ok(());
        }
        self.phase
            .send_replace(RecoveryPhase::Failed("recovery test aborted".into()));

        let log = self.recovery_log.lock().take();
        let (Some(test), Some(log)) = (&self.recovery, log) else {
            return Ok(());
        };
        warn!("Recovery test aborted; marking OSDs {:?} back in", test.osds);
        self.head_exec(&osd_command(&self.ceph, "in", &test.osds, &log)).await
    }

    async fn dump_config(&self, dir: &Path) -> Result<()> {
        self.head_exec(&format!(
            "{} config dump > {}",
            self.ceph,
            dir.join(CLUSTER_CONFIG_SNAPSHOT).display()
        ))
        .await
    }

    async fn dump_historic_ops(&self, dir: &Path) -> Result<()> {
        self.head_exec(&format!(
            "{} tell 'osd.*' dump_historic_ops > {}",
            self.ceph,
            dir.join(HISTORIC_OPS_FILE).display()
        ))
        .await
    }

    async fn remove_pool(&self, name: &str) -> Result<()> {
        // deleting a pool that does not exist is fine
        let cmd = format!(
            "{} osd pool delete {} {} --yes-i-really-really-mean-it",
            self.ceph, name, name
        );
        let status = self.executor.execute(&self.head, &cmd).await?;
        if !status.is_success() {
            debug!("pool {} not removed: {:?}", name, status);
        }
        Ok(())
    }

    async fn make_pool(&self, name: &str, profile: &str, application: &str) -> Result<()> {
        if profile == crate::constants::DEFAULT_POOL_PROFILE {
            self.head_exec(&format!("{} osd pool create {}", self.ceph, name)).await?;
        } else {
            self.head_exec(&format!("{} osd pool create {} erasure {}", self.ceph, name, profile))
                .await?;
            self.head_exec(&format!("{} osd pool set {} allow_ec_overwrites true", self.ceph, name))
                .await?;
        }
        self.head_exec(&format!(
            "{} osd pool application enable {} {}",
            self.ceph, name, application
        ))
        .await
    }

    async fn make_image(&self, image: &ImageSpec) -> Result<()> {
        let mut cmd = format!(
            "{} create --size {} --pool {} --order {}",
            self.rbd, image.size_mb, image.pool, image.object_order
        );
        if let Some(data_pool) = &image.data_pool {
            cmd.push_str(&format!(" --data-pool {}", data_pool));
        }
        cmd.push(' ');
        cmd.push_str(&image.name);
        self.head_exec(&cmd).await
    }
}

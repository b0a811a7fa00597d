// src/monitoring.rs
//
// Background telemetry sessions scoped to a directory. Sampling itself is
// external; this only starts and stops it.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MonitoringConfig;
use crate::executor::{HostGroup, RemoteExecutor};

#[async_trait]
pub trait MonitoringController: Send + Sync {
    /// Start a session writing under `dir`
    async fn start(&self, dir: &Path) -> Result<()>;

    /// Stop the session for `dir`, or the most recently started one
    async fn stop(&self, dir: Option<&Path>) -> Result<()>;
}

/// Monitoring disabled
pub struct NullMonitor;

#[async_trait]
impl MonitoringController for NullMonitor {
    async fn start(&self, dir: &Path) -> Result<()> {
        debug!("monitoring disabled, not starting for {}", dir.display());
        Ok(())
    }

    async fn stop(&self, _dir: Option<&Path>) -> Result<()> {
        Ok(())
    }
}

/// Runs the configured start/stop commands on the monitored hosts.
/// `{dir}` in a template is replaced with the session directory.
pub struct CommandMonitor {
    executor: Arc<dyn RemoteExecutor>,
    hosts: HostGroup,
    start_cmd: String,
    stop_cmd: Option<String>,
    active: Mutex<Vec<PathBuf>>,
}

impl CommandMonitor {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        hosts: HostGroup,
        start_cmd: String,
        stop_cmd: Option<String>,
    ) -> Self {
        Self {
            executor,
            hosts,
            start_cmd,
            stop_cmd,
            active: Mutex::new(Vec::new()),
        }
    }

    /// Directories of sessions started and not yet stopped, oldest first
    pub fn active(&self) -> Vec<PathBuf> {
        self.active.lock().clone()
    }

    fn render(template: &str, dir: &Path) -> String {
        template.replace("{dir}", &dir.display().to_string())
    }
}

#[async_trait]
impl MonitoringController for CommandMonitor {
    async fn start(&self, dir: &Path) -> Result<()> {
        info!("Starting monitoring in {}", dir.display());
        let cmd = Self::render(&self.start_cmd, dir);
        let status = self.executor.execute(&self.hosts, &cmd).await?;
        if !status.is_success() {
            warn!("Monitoring start returned {:?} on {}", status, self.hosts);
        }
        self.active.lock().push(dir.to_path_buf());
        Ok(())
    }

    async fn stop(&self, dir: Option<&Path>) -> Result<()> {
        let session = {
            let mut active = self.active.lock();
            match dir {
                Some(dir) => active
                    .iter()
                    .rposition(|d| d == dir)
                    .map(|idx| active.remove(idx))
                    .or_else(|| Some(dir.to_path_buf())),
                None => active.pop(),
            }
        };

        let Some(session) = session else {
            debug!("No monitoring session to stop");
            return Ok(());
        };

        info!("Stopping monitoring in {}", session.display());
        if let Some(template) = &self.stop_cmd {
            let cmd = Self::render(template, &session);
            let status = self.executor.execute(&self.hosts, &cmd).await?;
            if !status.is_success() {
                warn!("Monitoring stop returned {:?} on {}", status, self.hosts);
            }
        }
        Ok(())
    }
}

/// Build the monitor described by the config
pub fn from_config(
    config: &MonitoringConfig,
    executor: Arc<dyn RemoteExecutor>,
    clients: &HostGroup,
) -> Arc<dyn MonitoringController> {
    match &config.start_cmd {
        Some(start) => {
            let hosts = config
                .hosts
                .as_ref()
                .map(|h| HostGroup::from_addresses(h))
                .unwrap_or_else(|| clients.clone());
            Arc::new(CommandMonitor::new(executor, hosts, start.clone(), config.stop_cmd.clone()))
        }
        None => Arc::new(NullMonitor),
    }
}

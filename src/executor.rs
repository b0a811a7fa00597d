// src/executor.rs
//! Remote command fan-out
//!
//! A dispatch starts one shell command on every host of a group and returns
//! a [`DispatchHandle`] immediately; the caller decides when to wait. The
//! concrete executors shell out to `pdsh`/`rpdcp` or plain `ssh`/`scp`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::constants::{DEFAULT_PDSH_PATH, DEFAULT_RPDCP_PATH, DEFAULT_SCP_PATH, DEFAULT_SSH_PATH};

/// One remote node, addressed as `[user@]host`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    address: String,
}

impl ClientHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Host part of the address, without any `user@`
    pub fn host(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map(|(_, host)| host)
            .unwrap_or(&self.address)
    }

    pub fn user(&self) -> Option<&str> {
        self.address.rsplit_once('@').map(|(user, _)| user)
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Ordered set of hosts a command is dispatched to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostGroup {
    members: Vec<ClientHandle>,
}

impl HostGroup {
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Self {
        Self {
            members: addresses
                .iter()
                .map(|a| ClientHandle::new(a.as_ref().trim()))
                .collect(),
        }
    }

    pub fn members(&self) -> &[ClientHandle] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientHandle> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Comma-separated addresses, the form `pdsh -w` takes
    pub fn joined(&self) -> String {
        self.members
            .iter()
            .map(ClientHandle::address)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for HostGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// How a remote command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Success,
    /// Non-zero exit; `None` when the process was killed by a signal
    Failed { code: Option<i32> },
}

impl DispatchStatus {
    pub fn from_exit(status: ExitStatus) -> Self {
        if status.success() {
            DispatchStatus::Success
        } else {
            DispatchStatus::Failed {
                code: status.code(),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchStatus::Success)
    }
}

/// One in-flight remote command. Waiting consumes the handle, so each
/// dispatch is waited on at most once. There is no cancel.
pub struct DispatchHandle {
    hosts: String,
    command: String,
    task: JoinHandle<Result<DispatchStatus>>,
}

impl DispatchHandle {
    /// Track `completion` as the outcome of `command` on `hosts`
    pub fn spawn<F>(hosts: &HostGroup, command: &str, completion: F) -> Self
    where
        F: Future<Output = Result<DispatchStatus>> + Send + 'static,
    {
        Self {
            hosts: hosts.joined(),
            command: command.to_string(),
            task: tokio::spawn(completion),
        }
    }

    /// A handle whose command has already finished
    pub fn completed(hosts: &HostGroup, command: &str, status: DispatchStatus) -> Self {
        Self::spawn(hosts, command, async move { Ok(status) })
    }

    pub fn hosts(&self) -> &str {
        &self.hosts
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub async fn wait(self) -> Result<DispatchStatus> {
        self.task
            .await
            .with_context(|| format!("Dispatch task for '{}' aborted", self.command))?
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("hosts", &self.hosts)
            .field("command", &self.command)
            .finish()
    }
}

/// Parallel remote execution primitive
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Start `command` on every host of the group without waiting for it
    async fn dispatch(&self, hosts: &HostGroup, command: &str) -> Result<DispatchHandle>;

    /// Run a housekeeping command on every host and wait for it
    async fn execute(&self, hosts: &HostGroup, command: &str) -> Result<DispatchStatus>;

    /// Run on a single host and return its stdout
    async fn capture(&self, host: &ClientHandle, command: &str) -> Result<String>;

    /// Copy the files under `remote_dir` from every host into `local_dir`,
    /// appending `.<host>` to each file name
    async fn collect(&self, hosts: &HostGroup, remote_dir: &Path, local_dir: &Path) -> Result<()>;
}

/// Build the executor selected in the config
pub fn from_config(config: &ExecutorConfig) -> Arc<dyn RemoteExecutor> {
    match config.kind {
        ExecutorKind::Pdsh => Arc::new(PdshExecutor::new(config.ssh_user.clone())),
        ExecutorKind::Ssh => Arc::new(SshExecutor::new(config)),
        ExecutorKind::DryRun => Arc::new(DryRunExecutor),
    }
}

async fn wait_child(mut child: Child) -> Result<DispatchStatus> {
    let status = child.wait().await.context("Failed to wait for remote command")?;
    Ok(DispatchStatus::from_exit(status))
}

// -----------------------------------------------------------------------------
// pdsh
// -----------------------------------------------------------------------------

/// Fan-out through `pdsh -R ssh`, collection through `rpdcp`
pub struct PdshExecutor {
    pdsh: String,
    rpdcp: String,
    ssh_user: Option<String>,
}

impl PdshExecutor {
    pub fn new(ssh_user: Option<String>) -> Self {
        Self {
            pdsh: DEFAULT_PDSH_PATH.to_string(),
            rpdcp: DEFAULT_RPDCP_PATH.to_string(),
            ssh_user,
        }
    }

    fn targets(&self, hosts: &HostGroup) -> String {
        match &self.ssh_user {
            Some(user) => hosts
                .iter()
                .map(|h| match h.user() {
                    Some(_) => h.address().to_string(),
                    None => format!("{}@{}", user, h.address()),
                })
                .collect::<Vec<_>>()
                .join(","),
            None => hosts.joined(),
        }
    }

    fn pdsh(&self, targets: &str, flags: &[&str], command: &str) -> Command {
        let mut cmd = Command::new(&self.pdsh);
        cmd.args(flags).arg("-R").arg("ssh").arg("-w").arg(targets).arg(command);
        cmd.stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for PdshExecutor {
    async fn dispatch(&self, hosts: &HostGroup, command: &str) -> Result<DispatchHandle> {
        if hosts.is_empty() {
            bail!("No hosts to dispatch '{}' to", command);
        }
        debug!("pdsh dispatch on {}: {}", hosts, command);
        let child = self
            .pdsh(&self.targets(hosts), &[], command)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.pdsh))?;
        Ok(DispatchHandle::spawn(hosts, command, wait_child(child)))
    }

    async fn execute(&self, hosts: &HostGroup, command: &str) -> Result<DispatchStatus> {
        self.dispatch(hosts, command).await?.wait().await
    }

    async fn capture(&self, host: &ClientHandle, command: &str) -> Result<String> {
        let group = HostGroup::from_addresses(&[host.address()]);
        // -N drops the "host: " prefix pdsh puts on every line
        let output = self
            .pdsh(&self.targets(&group), &["-N"], command)
            .output()
            .await
            .with_context(|| format!("Failed to run {} on {}", self.pdsh, host))?;
        if !output.status.success() {
            bail!(
                "Command failed on {} (exit {:?}): {}\nStderr: {}",
                host,
                output.status.code(),
                command,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn collect(&self, hosts: &HostGroup, remote_dir: &Path, local_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(local_dir)
            .await
            .with_context(|| format!("Failed to create {}", local_dir.display()))?;
        let status = Command::new(&self.rpdcp)
            .arg("-f")
            .arg("-R")
            .arg("ssh")
            .arg("-w")
            .arg(self.targets(hosts))
            .arg("-r")
            .arg(format!("{}/*", remote_dir.display()))
            .arg(local_dir)
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to spawn {}", self.rpdcp))?;
        if !status.success() {
            warn!(
                "rpdcp from {} exited with {:?}; some results may be missing",
                remote_dir.display(),
                status.code()
            );
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ssh
// -----------------------------------------------------------------------------

/// One `ssh` child per host; no pdsh needed on the driver
pub struct SshExecutor {
    ssh: String,
    scp: String,
    user: Option<String>,
    key: Option<PathBuf>,
    connect_timeout: u64,
}

impl SshExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        let key = config
            .ssh_key
            .as_deref()
            .map(|k| PathBuf::from(shellexpand::tilde(k).as_ref()));
        Self {
            ssh: DEFAULT_SSH_PATH.to_string(),
            scp: DEFAULT_SCP_PATH.to_string(),
            user: config.ssh_user.clone(),
            key,
            connect_timeout: config.connect_timeout,
        }
    }

    fn destination(&self, host: &ClientHandle) -> String {
        match (&self.user, host.user()) {
            (Some(user), None) => format!("{}@{}", user, host.address()),
            _ => host.address().to_string(),
        }
    }

    fn with_options(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout));
        if let Some(key) = &self.key {
            cmd.arg("-i").arg(key);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    fn ssh(&self, host: &ClientHandle, command: &str) -> Command {
        let mut cmd = self.with_options(&self.ssh);
        cmd.arg(self.destination(host)).arg(command);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn dispatch(&self, hosts: &HostGroup, command: &str) -> Result<DispatchHandle> {
        if hosts.is_empty() {
            bail!("No hosts to dispatch '{}' to", command);
        }
        // a host that cannot be reached counts as a failed completion, so the
        // children already started on other hosts stay tracked by the handle
        let mut children = Vec::with_capacity(hosts.len());
        let mut spawn_error = None;
        for host in hosts.iter() {
            debug!("ssh dispatch on {}: {}", host, command);
            match self.ssh(host, command).spawn() {
                Ok(child) => children.push((host.clone(), Some(child))),
                Err(e) => {
                    warn!("Failed to spawn ssh to {}: {}", host, e);
                    children.push((host.clone(), None));
                    spawn_error = Some(e);
                }
            }
        }
        if let Some(e) = spawn_error {
            if children.iter().all(|(_, child)| child.is_none()) {
                return Err(e).with_context(|| format!("Failed to spawn ssh to {}", hosts));
            }
        }

        Ok(DispatchHandle::spawn(hosts, command, async move {
            let results = join_all(children.into_iter().map(|(host, child)| async move {
                let status = match child {
                    Some(child) => wait_child(child).await,
                    None => Ok(DispatchStatus::Failed { code: None }),
                };
                (host, status)
            }))
            .await;
            let mut outcome = DispatchStatus::Success;
            for (host, status) in results {
                let status = status?;
                if !status.is_success() {
                    debug!("{} finished with {:?}", host, status);
                    if outcome.is_success() {
                        outcome = status;
                    }
                }
            }
            Ok(outcome)
        }))
    }

    async fn execute(&self, hosts: &HostGroup, command: &str) -> Result<DispatchStatus> {
        self.dispatch(hosts, command).await?.wait().await
    }

    async fn capture(&self, host: &ClientHandle, command: &str) -> Result<String> {
        let output = self
            .ssh(host, command)
            .output()
            .await
            .with_context(|| format!("Failed to run ssh to {}", host))?;
        if !output.status.success() {
            bail!(
                "Command failed on {} (exit {:?}): {}\nStderr: {}",
                host,
                output.status.code(),
                command,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn collect(&self, hosts: &HostGroup, remote_dir: &Path, local_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(local_dir)
            .await
            .with_context(|| format!("Failed to create {}", local_dir.display()))?;

        for host in hosts.iter() {
            let scratch = local_dir.join(format!(".collect-{}", host.host()));
            tokio::fs::create_dir_all(&scratch).await?;

            let mut scp = self.with_options(&self.scp);
            scp.arg("-r")
                .arg(format!("{}:{}/*", self.destination(host), remote_dir.display()))
                .arg(&scratch);
            let status = scp
                .status()
                .await
                .with_context(|| format!("Failed to spawn scp from {}", host))?;
            if !status.success() {
                warn!("scp from {} exited with {:?}", host, status.code());
            }

            let mut entries = tokio::fs::read_dir(&scratch).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let target = local_dir.join(format!("{}.{}", name.to_string_lossy(), host.host()));
                tokio::fs::rename(entry.path(), &target)
                    .await
                    .with_context(|| format!("Failed to move {} into place", target.display()))?;
            }
            tokio::fs::remove_dir_all(&scratch).await?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// dry run
// -----------------------------------------------------------------------------

/// Logs every command and reports success without running anything
pub struct DryRunExecutor;

#[async_trait]
impl RemoteExecutor for DryRunExecutor {
    async fn dispatch(&self, hosts: &HostGroup, command: &str) -> Result<DispatchHandle> {
        info!("[dry-run] dispatch on {}: {}", hosts, command);
        Ok(DispatchHandle::completed(hosts, command, DispatchStatus::Success))
    }

    async fn execute(&self, hosts: &HostGroup, command: &str) -> Result<DispatchStatus> {
        info!("[dry-run] execute on {}: {}", hosts, command);
        Ok(DispatchStatus::Success)
    }

    async fn capture(&self, host: &ClientHandle, command: &str) -> Result<String> {
        info!("[dry-run] capture on {}: {}", host, command);
        Ok(String::new())
    }

    async fn collect(&self, hosts: &HostGroup, remote_dir: &Path, local_dir: &Path) -> Result<()> {
        info!(
            "[dry-run] collect {} from {} into {}",
            remote_dir.display(),
            hosts,
            local_dir.display()
        );
        tokio::fs::create_dir_all(local_dir).await?;
        Ok(())
    }
}

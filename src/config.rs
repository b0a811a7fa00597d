// src/config.rs
//
// Benchmark configuration, loaded once from YAML and validated before any
// remote host is touched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::block_size::{deserialize_block_size, deserialize_opt_block_size};
use crate::constants::*;
use crate::error::BenchError;
use crate::executor::HostGroup;
use crate::serde_helpers::{
    deserialize_duration, deserialize_opt_secs, deserialize_opt_sweep, deserialize_ordered_map,
};

/// fio `--rw` value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FioMode {
    Read,
    Write,
    RandRead,
    RandWrite,
    #[serde(alias = "rw")]
    ReadWrite,
    RandRw,
    Trim,
    RandTrim,
    TrimWrite,
}

impl FioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FioMode::Read => "read",
            FioMode::Write => "write",
            FioMode::RandRead => "randread",
            FioMode::RandWrite => "randwrite",
            FioMode::ReadWrite => "readwrite",
            FioMode::RandRw => "randrw",
            FioMode::Trim => "trim",
            FioMode::RandTrim => "randtrim",
            FioMode::TrimWrite => "trimwrite",
        }
    }

    /// Modes that take `--rwmixread`/`--rwmixwrite`
    pub fn is_mixed(&self) -> bool {
        matches!(self, FioMode::ReadWrite | FioMode::RandRw)
    }
}

impl fmt::Display for FioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which recovery coordination the benchmark asks for when a recovery test
/// is configured on the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryKind {
    #[default]
    Blocking,
    Background,
}

/// Resolved once per benchmark invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    None,
    /// Cluster interrupts client load at the moment it chooses
    Blocking,
    /// Client load starts only after the disruption is underway
    Background,
}

impl RecoveryMode {
    pub fn is_active(&self) -> bool {
        !matches!(self, RecoveryMode::None)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecoveryTestConfig {
    /// OSD ids marked out (and back in) for the disruption
    pub osds: Vec<u32>,

    #[serde(default = "default_recovery_poll", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,

    /// Upper bound for each health wait within the test
    #[serde(default = "default_recovery_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

fn default_recovery_poll() -> Duration {
    DEFAULT_RECOVERY_POLL_INTERVAL
}

fn default_recovery_timeout() -> Duration {
    DEFAULT_RECOVERY_TIMEOUT
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClusterConfig {
    /// Client nodes that run fio, `[user@]host`
    pub clients: Vec<String>,

    /// Node used for ceph/rbd CLI calls. Defaults to the first client.
    #[serde(default)]
    pub head: Option<String>,

    #[serde(default = "default_ceph_cmd")]
    pub ceph_cmd: String,

    #[serde(default = "default_rbd_cmd")]
    pub rbd_cmd: String,

    /// Prefix cluster CLI calls with sudo
    #[serde(default)]
    pub use_sudo: bool,

    #[serde(default)]
    pub recovery_test: Option<RecoveryTestConfig>,
}

fn default_ceph_cmd() -> String {
    DEFAULT_CEPH_CMD.to_string()
}

fn default_rbd_cmd() -> String {
    DEFAULT_RBD_CMD.to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PrefillConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_prefill_blocksize")]
    pub blocksize: String,

    #[serde(default = "default_prefill_numjobs")]
    pub numjobs: u32,
}

impl Default for PrefillConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            blocksize: default_prefill_blocksize(),
            numjobs: default_prefill_numjobs(),
        }
    }
}

fn default_prefill_blocksize() -> String {
    DEFAULT_PREFILL_BLOCKSIZE.to_string()
}

fn default_prefill_numjobs() -> u32 {
    DEFAULT_PREFILL_NUMJOBS
}

/// One named entry of the `workloads` table. Every field left out keeps the
/// global value; `iodepth` and `numjobs` are swept pairwise.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub mode: Option<FioMode>,

    #[serde(default, deserialize_with = "deserialize_opt_block_size")]
    pub op_size: Option<u64>,

    #[serde(default)]
    pub rwmixread: Option<u8>,

    #[serde(default)]
    pub time_based: Option<bool>,

    #[serde(default, deserialize_with = "deserialize_opt_secs")]
    pub ramp: Option<u64>,

    #[serde(default)]
    pub end_fsync: Option<u32>,

    #[serde(default)]
    pub log_avg_msec: Option<u32>,

    #[serde(default, deserialize_with = "deserialize_opt_sweep")]
    pub iodepth: Option<Vec<u32>>,

    #[serde(default, deserialize_with = "deserialize_opt_sweep")]
    pub numjobs: Option<Vec<u32>>,

    /// Per-run monitoring (and the ramp sleep before it). Defaults to on.
    #[serde(default)]
    pub monitor: Option<bool>,

    /// Use `precond_time` instead of `time` for this workload
    #[serde(default)]
    pub precond: bool,
}

/// The librbd fio benchmark section
#[derive(Debug, Deserialize, Clone)]
pub struct LibrbdFioConfig {
    #[serde(default = "default_cmd_path")]
    pub cmd_path: String,

    #[serde(default = "default_pool_name", alias = "poolname")]
    pub pool_name: String,

    #[serde(default = "default_recov_pool_name")]
    pub recov_pool_name: String,

    #[serde(default = "default_pool_profile")]
    pub pool_profile: String,

    #[serde(default = "default_pool_profile")]
    pub recov_pool_profile: String,

    #[serde(default)]
    pub recov_test_type: RecoveryKind,

    /// Erasure-coded data pool profile; creates `<pool_name>-data` when set
    #[serde(default)]
    pub data_pool_profile: Option<String>,

    /// fio runtime in seconds. Unset means fio runs until its I/O is done.
    #[serde(default, deserialize_with = "deserialize_opt_secs")]
    pub time: Option<u64>,

    /// Runtime used by workloads flagged `precond`
    #[serde(default, deserialize_with = "deserialize_opt_secs")]
    pub precond_time: Option<u64>,

    #[serde(default)]
    pub time_based: bool,

    /// fio ramp time, also the pause before per-run monitoring starts
    #[serde(default, deserialize_with = "deserialize_opt_secs")]
    pub ramp: Option<u64>,

    #[serde(default = "default_iodepth")]
    pub iodepth: u32,

    #[serde(default = "default_numjobs")]
    pub numjobs: u32,

    #[serde(default = "default_end_fsync")]
    pub end_fsync: u32,

    #[serde(default = "default_mode")]
    pub mode: FioMode,

    #[serde(default = "default_rwmixread")]
    pub rwmixread: u8,

    #[serde(default)]
    pub log_avg_msec: Option<u32>,

    #[serde(default = "default_op_size", deserialize_with = "deserialize_block_size")]
    pub op_size: u64,

    /// Image size in MiB
    #[serde(default = "default_vol_size")]
    pub vol_size: u64,

    #[serde(default = "default_vol_object_size")]
    pub vol_object_size: u32,

    #[serde(default = "default_volumes_per_client")]
    pub volumes_per_client: u32,

    #[serde(default = "default_procs_per_volume")]
    pub procs_per_volume: u32,

    #[serde(default)]
    pub random_distribution: Option<String>,

    #[serde(default)]
    pub rate_iops: Option<u32>,

    #[serde(default = "default_fio_out_format")]
    pub fio_out_format: String,

    /// Run against images that already exist instead of creating them
    #[serde(default)]
    pub use_existing_volumes: bool,

    #[serde(default)]
    pub no_sudo: bool,

    #[serde(default = "default_idle_monitor_sleep", deserialize_with = "deserialize_duration")]
    pub idle_monitor_sleep: Duration,

    /// Image name used verbatim when `use_existing_volumes` is set
    #[serde(default)]
    pub rbdname: String,

    #[serde(default)]
    pub norandommap: bool,

    /// Seconds to wait for the pg autoscaler; negative means don't wait
    #[serde(default = "default_autoscaler_timeout")]
    pub wait_pgautoscaler_timeout: i64,

    #[serde(default)]
    pub log_iops: bool,

    #[serde(default)]
    pub log_bw: bool,

    #[serde(default)]
    pub log_lat: bool,

    /// OSD read-ahead in KiB, only used to name the run directory
    #[serde(default)]
    pub osd_ra: Option<u64>,

    #[serde(default)]
    pub prefill: PrefillConfig,

    #[serde(default, deserialize_with = "deserialize_ordered_map")]
    pub workloads: Vec<(String, WorkloadSpec)>,
}

fn default_cmd_path() -> String {
    DEFAULT_FIO_PATH.to_string()
}

fn default_pool_name() -> String {
    DEFAULT_POOL_NAME.to_string()
}

fn default_recov_pool_name() -> String {
    DEFAULT_RECOV_POOL_NAME.to_string()
}

fn default_pool_profile() -> String {
    DEFAULT_POOL_PROFILE.to_string()
}

fn default_iodepth() -> u32 {
    DEFAULT_IODEPTH
}

fn default_numjobs() -> u32 {
    DEFAULT_NUMJOBS
}

fn default_end_fsync() -> u32 {
    DEFAULT_END_FSYNC
}

fn default_mode() -> FioMode {
    FioMode::Write
}

fn default_rwmixread() -> u8 {
    DEFAULT_RWMIXREAD
}

fn default_op_size() -> u64 {
    DEFAULT_OP_SIZE
}

fn default_vol_size() -> u64 {
    DEFAULT_VOL_SIZE_MB
}

fn default_vol_object_size() -> u32 {
    DEFAULT_VOL_OBJECT_SIZE
}

fn default_volumes_per_client() -> u32 {
    DEFAULT_VOLUMES_PER_CLIENT
}

fn default_procs_per_volume() -> u32 {
    DEFAULT_PROCS_PER_VOLUME
}

fn default_fio_out_format() -> String {
    DEFAULT_FIO_OUT_FORMAT.to_string()
}

fn default_idle_monitor_sleep() -> Duration {
    DEFAULT_IDLE_MONITOR_SLEEP
}

fn default_autoscaler_timeout() -> i64 {
    NO_AUTOSCALER_WAIT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Pdsh,
    Ssh,
    DryRun,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub kind: ExecutorKind,

    #[serde(default)]
    pub ssh_user: Option<String>,

    /// Private key for the ssh executor, `~` is expanded
    #[serde(default)]
    pub ssh_key: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::default(),
            ssh_user: None,
            ssh_key: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// External telemetry hooks. `{dir}` in either command is replaced with the
/// session directory. With no start command, monitoring is a no-op.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub start_cmd: Option<String>,

    #[serde(default)]
    pub stop_cmd: Option<String>,

    /// Hosts to sample on; defaults to the clients
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
}

/// Complete benchmark configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BenchConfig {
    pub cluster: ClusterConfig,

    #[serde(alias = "benchmark")]
    pub librbdfio: LibrbdFioConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl BenchConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, BenchError> {
        let config: BenchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_yaml(&yaml)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Checks done once at load time
    pub fn validate(&self) -> Result<(), BenchError> {
        let fio = &self.librbdfio;

        if self.cluster.clients.is_empty() {
            return Err(BenchError::config("cluster.clients must list at least one host"));
        }
        if fio.rwmixread > 100 {
            return Err(BenchError::config(format!(
                "rwmixread must be within 0..=100, got {}",
                fio.rwmixread
            )));
        }
        if fio.volumes_per_client == 0 {
            return Err(BenchError::config("volumes_per_client must be at least 1"));
        }
        if fio.procs_per_volume == 0 {
            return Err(BenchError::config("procs_per_volume must be at least 1"));
        }
        if let Some(recovery) = &self.cluster.recovery_test {
            if recovery.osds.is_empty() {
                return Err(BenchError::config("recovery_test.osds must list at least one OSD"));
            }
        }

        for (name, workload) in &fio.workloads {
            if let Some(read) = workload.rwmixread {
                if read > 100 {
                    return Err(BenchError::config(format!(
                        "workload '{}': rwmixread must be within 0..=100, got {}",
                        name, read
                    )));
                }
            }
        }

        // sweep lengths are checked by the planner so the error names the workload
        crate::planner::WorkloadPlanner::new(self.defaults()).check(&fio.workloads)?;

        Ok(())
    }

    pub fn recovery_mode(&self) -> RecoveryMode {
        match (&self.cluster.recovery_test, self.librbdfio.recov_test_type) {
            (None, _) => RecoveryMode::None,
            (Some(_), RecoveryKind::Blocking) => RecoveryMode::Blocking,
            (Some(_), RecoveryKind::Background) => RecoveryMode::Background,
        }
    }

    /// Immutable snapshot of the global fio parameters
    pub fn defaults(&self) -> crate::planner::GlobalDefaults {
        let fio = &self.librbdfio;
        crate::planner::GlobalDefaults {
            time_based: fio.time_based,
            ramp: fio.ramp,
            iodepth: fio.iodepth,
            numjobs: fio.numjobs,
            mode: fio.mode,
            end_fsync: fio.end_fsync,
            rwmixread: fio.rwmixread,
            // an out-of-range read mix leaves the pair unbalanced, which
            // WorkloadPlanner::check rejects
            rwmixwrite: 100u8.saturating_sub(fio.rwmixread),
            log_avg_msec: fio.log_avg_msec,
            op_size: fio.op_size,
            runtime: fio.time,
            precond_runtime: fio.precond_time,
        }
    }

    pub fn clients(&self) -> HostGroup {
        HostGroup::from_addresses(&self.cluster.clients)
    }

    pub fn head(&self) -> HostGroup {
        let head = self.cluster.head.as_ref().or(self.cluster.clients.first());
        HostGroup::from_addresses(head.as_slice())
    }

    /// Total fio processes across the cluster
    pub fn total_procs(&self) -> u32 {
        self.librbdfio.procs_per_volume
            * self.librbdfio.volumes_per_client
            * self.cluster.clients.len() as u32
    }

    pub fn autoscaler_timeout(&self) -> Option<Duration> {
        u64::try_from(self.librbdfio.wait_pgautoscaler_timeout)
            .ok()
            .map(Duration::from_secs)
    }
}

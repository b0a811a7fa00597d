// src/constants.rs
//
// Central location for the defaults and fixed names used by rbdfio-bench.
// Every optional config field falls back to one of these.

use std::time::Duration;

// =============================================================================
// Load generator defaults
// =============================================================================

/// fio binary on the client nodes
/// User can override via config: benchmark.cmd_path
pub const DEFAULT_FIO_PATH: &str = "/usr/bin/fio";

/// Default queue depth for the top-level run
pub const DEFAULT_IODEPTH: u32 = 16;

/// Default number of fio jobs per volume
pub const DEFAULT_NUMJOBS: u32 = 1;

/// Default end_fsync value passed straight through to fio
pub const DEFAULT_END_FSYNC: u32 = 0;

/// Default read share for mixed modes (write share is always 100 minus this)
pub const DEFAULT_RWMIXREAD: u8 = 50;

/// Default block size (4 MiB)
pub const DEFAULT_OP_SIZE: u64 = 4 * 1024 * 1024;

/// Default fio output format; the json block is what ResultCollector extracts
pub const DEFAULT_FIO_OUT_FORMAT: &str = "json,normal";

/// Line that precedes the embedded json block in fio's mixed output
pub const RESULT_START_MARKER: &str = "Starting";

// =============================================================================
// Volume and pool layout
// =============================================================================

pub const DEFAULT_POOL_NAME: &str = "cbt-librbdfio";
pub const DEFAULT_RECOV_POOL_NAME: &str = "cbt-librbdfio-recov";
pub const DEFAULT_POOL_PROFILE: &str = "default";

/// Prefix for synthesized rbd image and fio job names
pub const VOLUME_PREFIX: &str = "cbt-librbdfio";

/// Shell snippet evaluated on the client to get its own fqdn
pub const FQDN_CMD: &str = "hostname -f";

/// Image size in MiB
pub const DEFAULT_VOL_SIZE_MB: u64 = 65_536;

/// rbd object order (2^22 = 4 MiB objects)
pub const DEFAULT_VOL_OBJECT_SIZE: u32 = 22;

pub const DEFAULT_VOLUMES_PER_CLIENT: u32 = 1;
pub const DEFAULT_PROCS_PER_VOLUME: u32 = 1;

pub const DEFAULT_PREFILL_BLOCKSIZE: &str = "4M";
pub const DEFAULT_PREFILL_NUMJOBS: u32 = 1;

// =============================================================================
// Coordination timing
// =============================================================================

/// Pause after dumping the cluster config, before the autoscaler check
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Idle monitoring window taken before images are created
/// User can override via config: benchmark.idle_monitor_sleep
pub const DEFAULT_IDLE_MONITOR_SLEEP: Duration = Duration::from_secs(60);

/// Autoscaler wait timeout meaning "do not wait at all"
pub const NO_AUTOSCALER_WAIT: i64 = -1;

/// Poll interval while waiting on the pg autoscaler
pub const AUTOSCALER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll interval for cluster health during a recovery test
pub const DEFAULT_RECOVERY_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on each health wait of a recovery test
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(3600);

/// SIGINT every fio on the clients; fio flushes its results on SIGINT
pub const INTERRUPT_LOAD_CMD: &str = "killall -2 fio";

// =============================================================================
// Remote execution
// =============================================================================

pub const DEFAULT_PDSH_PATH: &str = "pdsh";
pub const DEFAULT_RPDCP_PATH: &str = "rpdcp";
pub const DEFAULT_SSH_PATH: &str = "ssh";
pub const DEFAULT_SCP_PATH: &str = "scp";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CEPH_CMD: &str = "ceph";
pub const DEFAULT_RBD_CMD: &str = "rbd";

// =============================================================================
// Persisted artifact names
// =============================================================================

/// Raw per-volume fio output, `output.<volume>` (host suffix added on collection)
pub const RAW_OUTPUT_PREFIX: &str = "output";

/// Extracted payload is the raw file name with this prefix
pub const PAYLOAD_PREFIX: &str = "json_";

pub const PGAUTOSCALER_LOG: &str = "pgautoscaler.log";
pub const CLUSTER_CONFIG_SNAPSHOT: &str = "ceph_settings.out";
pub const HISTORIC_OPS_FILE: &str = "historic_ops.out";
pub const RECOVERY_LOG: &str = "recovery.log";
pub const ARCHIVE_CONFIG_COPY: &str = "benchmark_config.yaml";
pub const ARCHIVE_METADATA: &str = "metadata.json";
/// Suffix of the staging directory an archive is built in
pub const ARCHIVE_STAGING_SUFFIX: &str = ".partial";

pub const IDLE_MONITORING_DIR: &str = "idle_monitoring";
pub const POOL_MONITORING_DIR: &str = "pool_monitoring";
pub const RECOVERY_POOL_MONITORING_DIR: &str = "recovery_pool_monitoring";

// tests/config_tests.rs
use rbdfio_bench::config::{BenchConfig, ExecutorKind, FioMode, RecoveryMode};
use std::time::Duration;

const MINIMAL: &str = r#"
cluster:
  clients: [client-01, client-02]
librbdfio: {}
"#;

#[test]
fn test_minimal_config_uses_defaults() {
    let config = BenchConfig::from_yaml(MINIMAL).unwrap();
    let fio = &config.librbdfio;
    assert_eq!(fio.cmd_path, "/usr/bin/fio");
    assert_eq!(fio.pool_name, "cbt-librbdfio");
    assert_eq!(fio.iodepth, 16);
    assert_eq!(fio.numjobs, 1);
    assert_eq!(fio.mode, FioMode::Write);
    assert_eq!(fio.rwmixread, 50);
    assert_eq!(fio.op_size, 4_194_304);
    assert_eq!(fio.vol_size, 65_536);
    assert_eq!(fio.time, None);
    assert_eq!(fio.idle_monitor_sleep, Duration::from_secs(60));
    assert!(fio.workloads.is_empty());
    assert_eq!(config.executor.kind, ExecutorKind::Pdsh);
    assert_eq!(config.recovery_mode(), RecoveryMode::None);
    assert_eq!(config.autoscaler_timeout(), None);
    assert_eq!(config.head().joined(), "client-01");
    assert_eq!(config.total_procs(), 2);

    let defaults = config.defaults();
    assert_eq!(defaults.rwmixread + defaults.rwmixwrite, 100);
}

#[test]
fn test_full_config() {
    let yaml = r#"
cluster:
  clients: [ceph@c1, c2]
  head: mon1
  use_sudo: true
  recovery_test:
    osds: [1, 2]
    poll_interval: 5s
librbdfio:
  time: 5m
  precond_time: 600
  ramp: 30
  op_size: 64K
  mode: randrw
  rwmixread: 70
  volumes_per_client: 2
  procs_per_volume: 2
  recov_test_type: background
  wait_pgautoscaler_timeout: 900
  idle_monitor_sleep: 10s
  workloads:
    zeta:
      mode: randread
      iodepth: [1, 32]
      numjobs: [1, 4]
    alpha:
      op_size: 4M
      iodepth: 8
      numjobs: 1
      precond: true
      monitor: false
executor:
  kind: ssh
  ssh_user: ceph
  ssh_key: ~/.ssh/id_ed25519
monitoring:
  start_cmd: "collectl -f {dir}"
"#;
    let config = BenchConfig::from_yaml(yaml).unwrap();
    let fio = &config.librbdfio;
    assert_eq!(fio.time, Some(300));
    assert_eq!(fio.precond_time, Some(600));
    assert_eq!(fio.op_size, 65_536);
    assert_eq!(config.recovery_mode(), RecoveryMode::Background);
    assert_eq!(config.autoscaler_timeout(), Some(Duration::from_secs(900)));
    assert_eq!(config.head().joined(), "mon1");
    assert_eq!(config.total_procs(), 8);
    assert_eq!(config.executor.kind, ExecutorKind::Ssh);
    assert_eq!(
        config.cluster.recovery_test.as_ref().unwrap().poll_interval,
        Duration::from_secs(5)
    );

    // declaration order, not alphabetical
    let names: Vec<&str> = fio.workloads.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha"]);
    let alpha = &fio.workloads[1].1;
    assert_eq!(alpha.iodepth, Some(vec![8]));
    assert_eq!(alpha.op_size, Some(4_194_304));
    assert_eq!(alpha.monitor, Some(false));
    assert!(alpha.precond);
}

#[test]
fn test_mismatched_sweep_rejected_at_load() {
    let yaml = r#"
cluster:
  clients: [c1]
librbdfio:
  workloads:
    broken:
      iodepth: [1, 2]
      numjobs: [1]
"#;
    let err = BenchConfig::from_yaml(yaml).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("broken"));
}

#[test]
fn test_invalid_values_rejected() {
    let no_clients = "cluster:\n  clients: []\nlibrbdfio: {}\n";
    assert!(BenchConfig::from_yaml(no_clients).unwrap_err().is_config());

    let bad_mix = "cluster:\n  clients: [c1]\nlibrbdfio:\n  rwmixread: 120\n";
    assert!(BenchConfig::from_yaml(bad_mix).unwrap_err().is_config());

    let unknown_key = r#"
cluster:
  clients: [c1]
librbdfio:
  workloads:
    w:
      iodepths: [1]
"#;
    assert!(BenchConfig::from_yaml(unknown_key).is_err());
}

#[test]
fn test_duplicate_workload_rejected() {
    let yaml = r#"
cluster:
  clients: [c1]
librbdfio:
  workloads:
    w: {}
    w: {}
"#;
    assert!(BenchConfig::from_yaml(yaml).is_err());
}

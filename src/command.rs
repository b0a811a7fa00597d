// src/command.rs
//
// fio invocation strings for librbd. Building a command has no side effects;
// the same RunSpec and client context always give the same string.
//
// Image and job names embed `hostname -f` in backticks, so they resolve on
// the client when the shell runs the command, not here.

use std::path::{Path, PathBuf};

use crate::config::{LibrbdFioConfig, PrefillConfig};
use crate::constants::{FQDN_CMD, RAW_OUTPUT_PREFIX, VOLUME_PREFIX};
use crate::planner::RunSpec;

/// Settings that stay fixed for every command of a benchmark invocation
#[derive(Debug, Clone)]
pub struct FioSettings {
    pub cmd_path: String,
    pub pool_name: String,
    pub use_sudo: bool,
    pub out_format: String,
    pub use_existing_volumes: bool,
    pub rbdname: String,
    pub norandommap: bool,
    pub log_iops: bool,
    pub log_bw: bool,
    pub log_lat: bool,
    pub random_distribution: Option<String>,
    pub rate_iops: Option<u32>,
    pub procs_per_volume: u32,
}

impl FioSettings {
    pub fn from_config(fio: &LibrbdFioConfig) -> Self {
        Self {
            cmd_path: fio.cmd_path.clone(),
            pool_name: fio.pool_name.clone(),
            use_sudo: !fio.no_sudo,
            out_format: fio.fio_out_format.clone(),
            use_existing_volumes: fio.use_existing_volumes,
            rbdname: fio.rbdname.clone(),
            norandommap: fio.norandommap,
            log_iops: fio.log_iops,
            log_bw: fio.log_bw,
            log_lat: fio.log_lat,
            random_distribution: fio.random_distribution.clone(),
            rate_iops: fio.rate_iops,
            procs_per_volume: fio.procs_per_volume,
        }
    }
}

/// Where and under which conditions one client volume runs
#[derive(Debug, Clone, Copy)]
pub struct ClientContext<'a> {
    pub volume: u32,
    pub run_dir: &'a Path,
    /// A recovery test is in flight for this run
    pub recovery_active: bool,
}

/// Raw fio output for a volume, before the host suffix is added on collection
pub fn output_file(run_dir: &Path, volume: u32) -> PathBuf {
    run_dir.join(format!("{}.{}", RAW_OUTPUT_PREFIX, volume))
}

pub struct CommandBuilder {
    settings: FioSettings,
    /// `--name=` arguments, one per process on a volume
    job_names: String,
}

impl CommandBuilder {
    pub fn new(settings: FioSettings) -> Self {
        let job_names = (0..settings.procs_per_volume)
            .map(|proc_num| {
                format!("--name={}-`{}`-file-{}", VOLUME_PREFIX, FQDN_CMD, proc_num)
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            settings,
            job_names,
        }
    }

    pub fn settings(&self) -> &FioSettings {
        &self.settings
    }

    /// Image the given volume index maps to on the executing client
    pub fn volume_name(&self, volume: u32) -> String {
        if self.settings.use_existing_volumes && !self.settings.rbdname.is_empty() {
            self.settings.rbdname.clone()
        } else {
            format!("{}-`{}`-{}", VOLUME_PREFIX, FQDN_CMD, volume)
        }
    }

    fn prefix(&self) -> String {
        let sudo = if self.settings.use_sudo { "sudo " } else { "" };
        format!(
            "{}{} --ioengine=rbd --clientname=admin --pool={}",
            sudo, self.settings.cmd_path, self.settings.pool_name
        )
    }

    /// The fio command for one volume of one run.
    ///
    /// `runtime_override` replaces the run's runtime when given. The
    /// `--ramp_time` emitted here is the same value the coordinator sleeps
    /// before starting monitoring.
    pub fn build(&self, spec: &RunSpec, ctx: &ClientContext<'_>, runtime_override: Option<u64>) -> String {
        let s = &self.settings;
        let out_file = output_file(ctx.run_dir, ctx.volume);

        let mut cmd = self.prefix();
        cmd.push_str(&format!(" --rbdname={} --invalidate=0", self.volume_name(ctx.volume)));
        cmd.push_str(&format!(" --rw={}", spec.mode));
        cmd.push_str(&format!(" --output-format={}", s.out_format));
        if spec.mode.is_mixed() {
            cmd.push_str(&format!(
                " --rwmixread={} --rwmixwrite={}",
                spec.rwmixread, spec.rwmixwrite
            ));
        }
        if let Some(runtime) = runtime_override.or(spec.runtime) {
            cmd.push_str(&format!(" --runtime={}", runtime));
        }
        // recovery runs must keep going while the disruption is in flight
        if spec.time_based || ctx.recovery_active {
            cmd.push_str(" --time_based");
        }
        if let Some(ramp) = spec.ramp {
            cmd.push_str(&format!(" --ramp_time={}", ramp));
        }
        cmd.push_str(&format!(" --numjobs={}", spec.numjobs));
        cmd.push_str(" --direct=1");
        cmd.push_str(&format!(" --bs={}B", spec.op_size));
        cmd.push_str(&format!(" --iodepth={}", spec.iodepth));
        cmd.push_str(&format!(" --end_fsync={}", spec.end_fsync));
        if s.norandommap {
            cmd.push_str(" --norandommap");
        }
        if s.log_iops {
            cmd.push_str(&format!(" --write_iops_log={}", out_file.display()));
        }
        if s.log_bw {
            cmd.push_str(&format!(" --write_bw_log={}", out_file.display()));
        }
        if s.log_lat {
            cmd.push_str(&format!(" --write_lat_log={}", out_file.display()));
        }
        if let Some(dist) = &s.random_distribution {
            cmd.push_str(&format!(" --random_distribution={}", dist));
        }
        if let Some(msec) = spec.log_avg_msec {
            cmd.push_str(&format!(" --log_avg_msec={}", msec));
        }
        if let Some(iops) = s.rate_iops {
            cmd.push_str(&format!(" --rate_iops={}", iops));
        }
        cmd.push_str(&format!(" {} > {}", self.job_names, out_file.display()));
        cmd
    }

    /// Sequential write over a whole image so reads hit allocated objects
    pub fn prefill(&self, volume: u32, vol_size_mb: u64, prefill: &PrefillConfig) -> String {
        format!(
            "{} --rbdname={} --invalidate=0 --rw=write --numjobs={} --bs={} --size {}M {} --output-format={} > /dev/null",
            self.prefix(),
            self.volume_name(volume),
            prefill.numjobs,
            prefill.blocksize,
            vol_size_mb,
            self.job_names,
            self.settings.out_format
        )
    }
}

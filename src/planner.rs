// src/planner.rs
//
// Expands the declarative workload table into the ordered list of concrete
// fio runs. Every RunSpec is built from an untouched copy of the global
// defaults, so planning has no state to restore between iterations.

use std::fmt;

use crate::config::{FioMode, WorkloadSpec};
use crate::error::BenchError;

/// Global fio parameters, snapshotted once at config load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDefaults {
    pub time_based: bool,
    pub ramp: Option<u64>,
    pub iodepth: u32,
    pub numjobs: u32,
    pub mode: FioMode,
    pub end_fsync: u32,
    pub rwmixread: u8,
    pub rwmixwrite: u8,
    pub log_avg_msec: Option<u32>,
    pub op_size: u64,
    /// `time`
    pub runtime: Option<u64>,
    /// `precond_time`
    pub precond_runtime: Option<u64>,
}

/// Fully resolved parameters for one fio invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Workload table key; `None` for the top-level run
    pub workload: Option<String>,
    pub mode: FioMode,
    pub op_size: u64,
    pub iodepth: u32,
    pub numjobs: u32,
    pub rwmixread: u8,
    pub rwmixwrite: u8,
    pub time_based: bool,
    pub ramp: Option<u64>,
    pub end_fsync: u32,
    pub log_avg_msec: Option<u32>,
    pub runtime: Option<u64>,
    /// Ramp sleep plus per-run monitoring
    pub monitor: bool,
}

impl RunSpec {
    /// True for runs produced from the workload table
    pub fn is_swept(&self) -> bool {
        self.workload.is_some()
    }
}

impl fmt::Display for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mode={} bs={}B iodepth={} numjobs={}",
            self.workload.as_deref().unwrap_or("<top-level>"),
            self.mode,
            self.op_size,
            self.iodepth,
            self.numjobs
        )?;
        if self.mode.is_mixed() {
            write!(f, " rwmix={}/{}", self.rwmixread, self.rwmixwrite)?;
        }
        match self.runtime {
            Some(secs) => write!(f, " runtime={}s", secs),
            None => write!(f, " runtime=unbounded"),
        }
    }
}

pub struct WorkloadPlanner {
    base: GlobalDefaults,
}

impl WorkloadPlanner {
    pub fn new(base: GlobalDefaults) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &GlobalDefaults {
        &self.base
    }

    /// The single run used when no workload table is configured
    pub fn top_level(&self) -> RunSpec {
        let base = &self.base;
        RunSpec {
            workload: None,
            mode: base.mode,
            op_size: base.op_size,
            iodepth: base.iodepth,
            numjobs: base.numjobs,
            rwmixread: base.rwmixread,
            rwmixwrite: base.rwmixwrite,
            time_based: base.time_based,
            ramp: base.ramp,
            end_fsync: base.end_fsync,
            log_avg_msec: base.log_avg_msec,
            runtime: base.runtime,
            monitor: true,
        }
    }

    /// Validate the base mix and every workload without producing anything
    pub fn check(&self, workloads: &[(String, WorkloadSpec)]) -> Result<(), BenchError> {
        let base = &self.base;
        if base.rwmixread > 100 || u16::from(base.rwmixread) + u16::from(base.rwmixwrite) != 100 {
            return Err(BenchError::config(format!(
                "rwmixread {} and rwmixwrite {} must each be within 0..=100 and sum to 100",
                base.rwmixread, base.rwmixwrite
            )));
        }
        for (name, spec) in workloads {
            if let Some(read) = spec.rwmixread.filter(|r| *r > 100) {
                return Err(BenchError::config(format!(
                    "workload '{}': rwmixread {} is out of range 0..=100",
                    name, read
                )));
            }
            let (iodepths, numjobs) = self.sweep(spec);
            if iodepths.len() != numjobs.len() {
                return Err(BenchError::config(format!(
                    "workload '{}': iodepth has {} entries but numjobs has {}",
                    name,
                    iodepths.len(),
                    numjobs.len()
                )));
            }
        }
        Ok(())
    }

    /// Expand the workload table, keeping declaration order and, within a
    /// workload, the order of the iodepth/numjobs arrays.
    ///
    /// Fails before producing anything if any workload is malformed.
    pub fn plan(&self, workloads: &[(String, WorkloadSpec)]) -> Result<Vec<RunSpec>, BenchError> {
        self.check(workloads)?;

        let mut runs = Vec::new();
        for (name, spec) in workloads {
            let template = self.overlay(name, spec);
            let (iodepths, numjobs) = self.sweep(spec);
            for (&iodepth, &jobs) in iodepths.iter().zip(numjobs.iter()) {
                runs.push(RunSpec {
                    iodepth,
                    numjobs: jobs,
                    ..template.clone()
                });
            }
        }
        Ok(runs)
    }

    /// Global defaults with the workload's explicit keys laid over them.
    /// The sweep pair is applied afterwards by the caller.
    fn overlay(&self, name: &str, spec: &WorkloadSpec) -> RunSpec {
        let mut run = self.top_level();
        run.workload = Some(name.to_string());

        if let Some(mode) = spec.mode {
            run.mode = mode;
        }
        if let Some(op_size) = spec.op_size {
            run.op_size = op_size;
        }
        if let Some(read) = spec.rwmixread {
            run.rwmixread = read;
            run.rwmixwrite = 100 - read;
        }
        if let Some(time_based) = spec.time_based {
            run.time_based = time_based;
        }
        if spec.ramp.is_some() {
            run.ramp = spec.ramp;
        }
        if let Some(end_fsync) = spec.end_fsync {
            run.end_fsync = end_fsync;
        }
        if spec.log_avg_msec.is_some() {
            run.log_avg_msec = spec.log_avg_msec;
        }
        if let Some(monitor) = spec.monitor {
            run.monitor = monitor;
        }
        run.runtime = if spec.precond {
            self.base.precond_runtime
        } else {
            self.base.runtime
        };
        run
    }

    /// A missing array sweeps the single global value
    fn sweep(&self, spec: &WorkloadSpec) -> (Vec<u32>, Vec<u32>) {
        let iodepths = spec.iodepth.clone().unwrap_or_else(|| vec![self.base.iodepth]);
        let numjobs = spec.numjobs.clone().unwrap_or_else(|| vec![self.base.numjobs]);
        (iodepths, numjobs)
    }
}

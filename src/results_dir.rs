//! Run directory naming and the local results archive
//!
//! Remote run directories encode the full parameter tuple of a run, so two
//! different runs never share one:
//! - top-level: `<base>/[osd_ra-XXXXXXXX/]op_size-XXXXXXXX/concurrent_procs-XXX/iodepth-XXX/<mode>`
//! - swept:     `<base>/<workload>_<mode>_<op_size>/iodepth-XXX/numjobs-XXX`
//!
//! The local archive holds collected fio output, the config copy and a
//! `metadata.json`. Its existence marks the benchmark as already done.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::command::output_file;
use crate::constants::{ARCHIVE_CONFIG_COPY, ARCHIVE_METADATA, ARCHIVE_STAGING_SUFFIX};
use crate::planner::RunSpec;

/// Remote directory for exactly one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    base: PathBuf,
    path: PathBuf,
}

impl RunDirectory {
    pub fn top_level(base: &Path, osd_ra: Option<u64>, total_procs: u32, spec: &RunSpec) -> Self {
        let mut path = base.to_path_buf();
        if let Some(ra) = osd_ra {
            path.push(format!("osd_ra-{:08}", ra));
        }
        path.push(format!("op_size-{:08}", spec.op_size));
        path.push(format!("concurrent_procs-{:03}", total_procs));
        path.push(format!("iodepth-{:03}", spec.iodepth));
        path.push(spec.mode.as_str());
        Self {
            base: base.to_path_buf(),
            path,
        }
    }

    pub fn swept(base: &Path, workload: &str, spec: &RunSpec) -> Self {
        let path = base
            .join(format!("{}_{}_{}", workload, spec.mode, spec.op_size))
            .join(format!("iodepth-{:03}", spec.iodepth))
            .join(format!("numjobs-{:03}", spec.numjobs));
        Self {
            base: base.to_path_buf(),
            path,
        }
    }

    /// Directory for `spec`, whichever layout applies
    pub fn for_spec(base: &Path, osd_ra: Option<u64>, total_procs: u32, spec: &RunSpec) -> Self {
        match &spec.workload {
            Some(name) => Self::swept(base, name, spec),
            None => Self::top_level(base, osd_ra, total_procs, spec),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the benchmark base, used to mirror runs in the archive
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn output_file(&self, volume: u32) -> PathBuf {
        output_file(&self.path, volume)
    }
}

/// Metadata about one benchmark invocation
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub config_path: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    pub command_line: Vec<String>,
    pub hostname: String,
    pub clients: Vec<String>,
    pub recovery_mode: String,
    /// Run directories in execution order
    pub runs: Vec<String>,
    pub dispatch_failures: usize,
    pub empty_results: usize,
    /// Set when any dispatch failed or any client produced no payload
    pub partial: bool,
}

impl RunMetadata {
    pub fn new(config_path: String, clients: Vec<String>, recovery_mode: String) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_path,
            start_time: Local::now().to_rfc3339(),
            end_time: None,
            duration_secs: None,
            command_line: std::env::args().collect(),
            hostname,
            clients,
            recovery_mode,
            runs: Vec::new(),
            dispatch_failures: 0,
            empty_results: 0,
            partial: false,
        }
    }

    pub fn finalize(&mut self, duration_secs: f64) {
        self.end_time = Some(Local::now().to_rfc3339());
        self.duration_secs = Some(duration_secs);
        self.partial = self.dispatch_failures > 0 || self.empty_results > 0;
    }
}

/// Local archive directory for one benchmark invocation.
///
/// Everything is written into a `<archive>.partial` staging directory that
/// is renamed into place by `finalize`, so an invocation that fails midway
/// never leaves behind a directory that `exists` would report as done.
pub struct ArchiveDir {
    target: PathBuf,
    path: PathBuf,
    metadata: RunMetadata,
}

/// Staging location used while an archive is being filled
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(ARCHIVE_STAGING_SUFFIX);
    path.with_file_name(name)
}

impl ArchiveDir {
    /// True when a previous invocation already produced this archive
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Create the staging directory and copy the config into it. A stale
    /// staging directory from an earlier failed invocation is discarded.
    pub fn create(path: &Path, config_path: Option<&Path>, metadata: RunMetadata) -> Result<Self> {
        let staging = staging_path(path);
        if staging.exists() {
            tracing::warn!("Discarding incomplete archive at {}", staging.display());
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to remove {}", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create archive directory: {}", staging.display()))?;

        if let Some(config) = config_path {
            fs::copy(config, staging.join(ARCHIVE_CONFIG_COPY))
                .with_context(|| format!("Failed to copy {} into the archive", config.display()))?;
        }

        tracing::info!("Created archive directory: {}", staging.display());

        Ok(Self {
            target: path.to_path_buf(),
            path: staging,
            metadata,
        })
    }

    /// Directory currently being written: the staging dir until finalized
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Local mirror of a remote run directory
    pub fn run_path(&self, run_dir: &RunDirectory) -> PathBuf {
        self.path.join(run_dir.relative())
    }

    pub fn metadata_mut(&mut self) -> &mut RunMetadata {
        &mut self.metadata
    }

    pub fn write_metadata(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.metadata)
            .context("Failed to serialize metadata")?;
        fs::write(self.path.join(ARCHIVE_METADATA), json)
            .context("Failed to write metadata.json")?;
        Ok(())
    }

    /// Write `metadata.json` and move the archive to its final location
    pub fn finalize(&mut self, duration_secs: f64) -> Result<()> {
        self.metadata.finalize(duration_secs);
        self.write_metadata()?;
        if self.path != self.target {
            fs::rename(&self.path, &self.target).with_context(|| {
                format!("Failed to move {} to {}", self.path.display(), self.target.display())
            })?;
            self.path = self.target.clone();
        }
        tracing::info!("Results saved to: {}", self.path.display());
        Ok(())
    }
}

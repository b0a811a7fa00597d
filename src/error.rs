//! Error types for rbdfio-bench

use thiserror::Error;

/// Errors the orchestration layer distinguishes by kind.
///
/// Autoscaler delays and missing result markers are not errors; they show up
/// as [`crate::cluster::AutoscalerStatus::TimedOut`] and
/// [`crate::collector::CollectOutcome::Empty`].
#[derive(Error, Debug)]
pub enum BenchError {
    /// Malformed configuration or workload sweep. Raised at load/plan time,
    /// before anything touches a remote host.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote command completed with a non-zero status
    #[error("dispatch failed on [{hosts}] (exit {code:?}): {command}")]
    Dispatch {
        hosts: String,
        command: String,
        code: Option<i32>,
    },

    /// Cluster controller reported a failure
    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, BenchError::Config(_))
    }
}

// src/lib.rs

pub mod block_size;
pub mod cluster;
pub mod collector; // fio json payload extraction
pub mod command; // fio command construction
pub mod config;
pub mod constants;
pub mod coordinator; // Run state machine
pub mod error;
pub mod executor; // pdsh / ssh fan-out
pub mod monitoring;
pub mod planner; // Workload table expansion
pub mod results_dir; // Run directory layout and local archive
pub mod serde_helpers;
pub mod tracker; // Recovery signal relay

pub use config::BenchConfig;
pub use coordinator::{Collaborators, RunCoordinator, RunReport, RunState};
pub use error::BenchError;

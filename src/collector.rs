// src/collector.rs
//
// fio with `--output-format=json,normal` writes a human-readable preamble and
// a single json block to the same file. The block follows the first line
// containing the start marker and ends at the next blank line.

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::{PAYLOAD_PREFIX, RAW_OUTPUT_PREFIX, RESULT_START_MARKER};
use crate::executor::HostGroup;

/// What extraction found for one raw output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Payload written with this many lines
    Extracted { payload: PathBuf, lines: usize },
    /// Marker never seen; an empty payload file was written
    Empty { payload: PathBuf },
    /// The raw file was never collected (the dispatch likely failed)
    Missing { raw: PathBuf },
}

impl CollectOutcome {
    pub fn has_data(&self) -> bool {
        matches!(self, CollectOutcome::Extracted { lines, .. } if *lines > 0)
    }
}

/// Payload path for a raw output file: same directory, `json_` prefix
pub fn payload_path(raw: &Path) -> PathBuf {
    let name = raw
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    raw.with_file_name(format!("{}{}", PAYLOAD_PREFIX, name))
}

pub struct ResultCollector {
    marker: String,
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::with_marker(RESULT_START_MARKER)
    }

    pub fn with_marker(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }

    /// Copy the lines between the first marker line and the next blank line.
    /// Only the first block is taken.
    /// Bytes that are not valid UTF-8 are replaced rather than rejected.
    pub fn extract_from<R: BufRead, W: Write>(&self, mut reader: R, mut writer: W) -> Result<usize> {
        let mut copying = false;
        let mut lines = 0;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .context("Failed to read raw output")?;
            if n == 0 {
                break;
            }
            let decoded = String::from_utf8_lossy(&buf);
            let line = decoded.trim_end_matches(['\n', '\r']);
            if copying {
                if line.trim().is_empty() {
                    break;
                }
                writeln!(writer, "{}", line)?;
                lines += 1;
            } else if line.contains(&self.marker) {
                copying = true;
            }
        }

        writer.flush()?;
        Ok(lines)
    }

    /// Extract the payload of one raw output file into its `json_` sibling
    pub fn extract(&self, raw: &Path) -> Result<CollectOutcome> {
        if !raw.exists() {
            warn!("No raw output at {}", raw.display());
            return Ok(CollectOutcome::Missing {
                raw: raw.to_path_buf(),
            });
        }

        let payload = payload_path(raw);
        let input = fs::File::open(raw)
            .with_context(|| format!("Failed to open {}", raw.display()))?;
        let output = fs::File::create(&payload)
            .with_context(|| format!("Failed to create {}", payload.display()))?;

        let lines = self.extract_from(BufReader::new(input), output)?;
        if lines == 0 {
            warn!("No '{}' block in {}; payload is empty", self.marker, raw.display());
            return Ok(CollectOutcome::Empty { payload });
        }

        debug!("Extracted {} lines into {}", lines, payload.display());
        Ok(CollectOutcome::Extracted { payload, lines })
    }

    /// Extract every `output.<volume>.<host>` in a collected run directory
    pub fn collect_dir(&self, dir: &Path, clients: &HostGroup, volumes: u32) -> Result<Vec<CollectOutcome>> {
        let mut outcomes = Vec::with_capacity(clients.len() * volumes as usize);
        for client in clients.iter() {
            for volume in 0..volumes {
                let raw = dir.join(format!("{}.{}.{}", RAW_OUTPUT_PREFIX, volume, client.host()));
                outcomes.push(self.extract(&raw)?);
            }
        }
        Ok(outcomes)
    }
}

//! Outcome ledger.
//!
//! Append-only JSON lines, one per terminal request. Every append is a
//! single `write_all` of a complete line under the ledger lock, followed by
//! a sync, so concurrent writers never interleave and a crash loses at most
//! the line being written.

use crate::models::{AnyLlmError, OutcomeRecord, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Shared writer for the outcome file.
#[derive(Debug)]
pub struct OutcomeLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutcomeLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one outcome as a single line.
    pub fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        // The guarded data is (), so a poisoned lock carries no broken state.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AnyLlmError::io("opening outcome ledger", e))?;
        file.write_all(&line)
            .map_err(|e| AnyLlmError::io("appending outcome", e))?;
        file.flush()
            .map_err(|e| AnyLlmError::io("flushing outcome ledger", e))?;
        file.sync_data()
            .map_err(|e| AnyLlmError::io("syncing outcome ledger", e))?;
        Ok(())
    }

    /// Every parsable outcome in the file. A missing file has none.
    ///
    /// Unparsable lines (e.g. a torn final line after a crash) are skipped.
    pub fn read_outcomes(&self) -> Result<Vec<OutcomeRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AnyLlmError::io("opening outcome ledger", e)),
        };

        let mut outcomes = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| AnyLlmError::io("reading outcome ledger", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OutcomeRecord>(&line) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(line = line_num + 1, error = %e, "Skipping unparsable outcome line"),
            }
        }
        Ok(outcomes)
    }

    /// Indices that already have an outcome.
    pub fn completed_indices(&self) -> Result<HashSet<usize>> {
        Ok(self.read_outcomes()?.into_iter().map(|o| o.index).collect())
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! File-based JSON persistence backend.
//!
//! [`FilePersistence`] keeps the engine's two checkpoint documents — the
//! rule-store snapshot and the budget state — in a single JSON file.  Every
//! save flushes the file atomically (write to `<path>.tmp`, then rename) so
//! a crash mid-write never corrupts existing state.
//!
//! ## Layout
//!
//! ```json
//! {
//!   "rules":  RuleStoreSnapshot | null,
//!   "budget": BudgetState       | null
//! }
//! ```
//!
//! ## Caveats
//!
//! * The full state is held in memory and rewritten on every save.  Not
//!   intended for high-frequency checkpoint workloads.
//! * Concurrent access from multiple processes is not supported.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dirigent_core::error::EngineError;
use dirigent_core::persist::Persistence;
use dirigent_core::store::RuleStoreSnapshot;
use dirigent_core::types::BudgetState;

/// On-disk shape of the checkpoint file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileSnapshot {
    rules: Option<RuleStoreSnapshot>,
    budget: Option<BudgetState>,
}

/// A file-backed [`Persistence`] implementation.
///
/// # Examples
///
/// ```rust,no_run
/// use dirigent_std::storage::file::FilePersistence;
/// use dirigent_core::Persistence;
///
/// let persistence = FilePersistence::open("/tmp/dirigent-state.json")
///     .expect("could not open state file");
/// assert!(persistence.load_rules().unwrap().is_none());
/// ```
pub struct FilePersistence {
    path: PathBuf,
    data: FileSnapshot,
}

impl FilePersistence {
    /// Open an existing checkpoint file, or start empty if the path does not
    /// exist.
    ///
    /// # Errors
    ///
    /// * [`EngineError::CorruptSnapshot`] — the file exists but is not valid
    ///   checkpoint JSON.  Governance history is never silently reset; an
    ///   operator must repair or remove the file.
    /// * [`EngineError::Persistence`] — the file cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|error| EngineError::Persistence(error.to_string()))?;
            serde_json::from_str(&raw).map_err(|error| {
                EngineError::CorruptSnapshot(format!(
                    "{}: {}",
                    path.display(),
                    error
                ))
            })?
        } else {
            FileSnapshot::default()
        };

        Ok(Self { path, data })
    }

    /// Flush the in-memory state to disk using an atomic write-rename.
    fn flush(&self) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|error| EngineError::Persistence(error.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .and_then(|_| std::fs::rename(&tmp_path, &self.path))
            .map_err(|error| EngineError::Persistence(error.to_string()))
    }
}

impl Persistence for FilePersistence {
    fn load_rules(&self) -> Result<Option<RuleStoreSnapshot>, EngineError> {
        Ok(self.data.rules.clone())
    }

    fn save_rules(&mut self, snapshot: &RuleStoreSnapshot) -> Result<(), EngineError> {
        self.data.rules = Some(snapshot.clone());
        self.flush()
    }

    fn load_budget(&self) -> Result<Option<BudgetState>, EngineError> {
        Ok(self.data.budget.clone())
    }

    fn save_budget(&mut self, state: &BudgetState) -> Result<(), EngineError> {
        self.data.budget = Some(state.clone());
        self.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

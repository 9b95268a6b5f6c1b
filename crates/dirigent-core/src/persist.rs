// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Persistence abstraction for checkpoint/restore.
//!
//! The engine checkpoints two documents: the rule-store snapshot and the
//! budget state.  Backends store them as opaque JSON; the engine owns the
//! schema.  `load_*` returns `Ok(None)` on first run — an absent document is
//! a fresh start, not an error.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::EngineError;
use crate::store::RuleStoreSnapshot;
use crate::types::BudgetState;

/// Durable storage for engine checkpoints.
///
/// Implementations decide durability and atomicity; the contract is only
/// that a successful `save_*` followed by `load_*` round-trips the document,
/// and that a document that cannot be decoded surfaces as
/// [`EngineError::CorruptSnapshot`] rather than `Ok(None)`.
pub trait Persistence: Send + Sync {
    fn load_rules(&self) -> Result<Option<RuleStoreSnapshot>, EngineError>;
    fn save_rules(&mut self, snapshot: &RuleStoreSnapshot) -> Result<(), EngineError>;
    fn load_budget(&self) -> Result<Option<BudgetState>, EngineError>;
    fn save_budget(&mut self, state: &BudgetState) -> Result<(), EngineError>;
}

/// Volatile in-process [`Persistence`].
///
/// Documents are held as serialised JSON so the backend exercises the same
/// encode/decode path as durable backends.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::persist::{InMemoryPersistence, Persistence};
///
/// let store = InMemoryPersistence::new();
/// assert!(store.load_rules().unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    rules: Option<String>,
    budget: Option<String>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value).map_err(|e| EngineError::Persistence(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, EngineError> {
    serde_json::from_str(raw).map_err(|e| EngineError::CorruptSnapshot(e.to_string()))
}

impl Persistence for InMemoryPersistence {
    fn load_rules(&self) -> Result<Option<RuleStoreSnapshot>, EngineError> {
        self.rules.as_deref().map(decode).transpose()
    }

    fn save_rules(&mut self, snapshot: &RuleStoreSnapshot) -> Result<(), EngineError> {
        self.rules = Some(encode(snapshot)?);
        Ok(())
    }

    fn load_budget(&self) -> Result<Option<BudgetState>, EngineError> {
        self.budget.as_deref().map(decode).transpose()
    }

    fn save_budget(&mut self, state: &BudgetState) -> Result<(), EngineError> {
        self.budget = Some(encode(state)?);
        Ok(())
    }
}

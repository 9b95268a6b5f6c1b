// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error taxonomy for the engine.
//!
//! Failure classes map directly to handling policy:
//!
//! * [`ValidationError`] — rejected synchronously, never retried.
//! * [`EngineError::TransientUnavailable`] — degrade to cached/default data,
//!   log, continue serving.
//! * [`EngineError::BudgetSource`] — fail open to the last known level.
//! * [`EngineError::CorruptSnapshot`] — fail fast at startup rather than
//!   silently resetting governance history.

use thiserror::Error;

use crate::types::RuleTier;

/// Synchronous rejection of a malformed or rule-breaking request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The rule has fewer confirmations than the target tier requires.
    #[error("insufficient evidence: {have} of {need} confirmations required for {}", .tier.display_name())]
    InsufficientEvidence { have: u32, need: u32, tier: RuleTier },

    /// A promotion spanning anything other than exactly one tier upward.
    #[error("invalid transition from {} to {}", .from.display_name(), .to.display_name())]
    InvalidTransition { from: RuleTier, to: RuleTier },

    /// No path may alter a Prime-tier rule, and no promotion may target the
    /// Prime tier.
    #[error("rule '{0}': the Prime tier is immutable")]
    PrimeImmutable(String),

    /// A rejected request was resubmitted with identical evidence before the
    /// cooldown elapsed.
    #[error("identical evidence rejected recently; cooldown active until {until_ms}")]
    CooldownActive { until_ms: u64 },

    /// Inserting this rule would contradict an active rule at the same
    /// tier, scope, and trigger.
    #[error("rule '{0}' conflicts with active rule '{1}' at the same tier/scope/trigger")]
    ConflictingRule(String, String),

    /// The rule id is unknown to the store.
    #[error("rule '{0}' not found")]
    UnknownRule(String),

    /// The promotion request id is unknown to the store.
    #[error("promotion request '{0}' not found")]
    UnknownRequest(String),

    /// The rule is not in a state the operation accepts.
    #[error("rule '{0}' is not active")]
    RuleNotActive(String),

    /// The resolution context fails basic shape checks.
    #[error("malformed context: {0}")]
    MalformedContext(String),
}

/// Errors surfaced by engine operations and collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A collaborator timed out or was unreachable.  Callers degrade to
    /// last-known-good data and continue serving.
    #[error("collaborator '{collaborator}' unavailable: {reason}")]
    TransientUnavailable { collaborator: String, reason: String },

    /// The budget source could not be read.  The monitor holds its previous
    /// level and continues.
    #[error("budget source failure: {0}")]
    BudgetSource(String),

    /// The persisted governance snapshot cannot be trusted.  Startup refuses
    /// to proceed.
    #[error("corrupt governance snapshot: {0}")]
    CorruptSnapshot(String),

    /// Persistence backend I/O failure outside of load-time corruption.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Failure reported by a [`ToolProbe`](crate::collab::ToolProbe) or
/// [`EmbeddingIndex`](crate::collab::EmbeddingIndex) call.
///
/// Collaborator implementations carry their own bounded timeouts; the engine
/// only distinguishes "timed out" from "answered with an error".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0} ms")]
    Timeout(u64),

    #[error("probe failed: {0}")]
    Failed(String),
}

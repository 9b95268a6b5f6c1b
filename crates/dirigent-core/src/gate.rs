// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Human-in-the-loop governance gate.
//!
//! The gate is the only place approval signals and violation reports touch
//! the rule store.  It drains the approval channel, applies each signal
//! idempotently, expires overdue requests, and handles safety-violation
//! reports with an immediate rollback.  Telemetry is emitted exactly once
//! per effective state change — duplicate signals and repeat reports are
//! absorbed silently.

use crate::collab::{ApprovalChannel, TelemetrySink};
use crate::error::ValidationError;
use crate::store::RuleStore;
use crate::types::{RuleTier, TelemetryEvent};

/// What a single gate poll changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    /// Rules that advanced a tier, with their new tier.
    pub promoted: Vec<(String, RuleTier)>,
    /// Signals that resolved a request without advancing a rule (rejections,
    /// duplicates, late signals).
    pub absorbed: usize,
    /// Request ids expired by TTL during this poll.
    pub expired: Vec<String>,
}

impl PollOutcome {
    /// Whether any serving-relevant state changed.
    pub fn changed_serving(&self) -> bool {
        !self.promoted.is_empty()
    }
}

/// Applies approval signals and violation reports to the store.
#[derive(Debug, Default)]
pub struct GovernanceGate;

impl GovernanceGate {
    pub fn new() -> Self {
        Self
    }

    /// Drain the approval channel and expire overdue requests.
    ///
    /// Unknown request ids are logged and skipped — a stale signal must not
    /// abort the rest of the queue.  Emits one
    /// [`TelemetryEvent::PromotionApproved`] per rule that actually
    /// advanced.
    pub fn poll(
        &mut self,
        channel: &mut dyn ApprovalChannel,
        store: &mut RuleStore,
        sink: &mut dyn TelemetrySink,
        now_ms: u64,
    ) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        while let Some(signal) = channel.poll_signal() {
            let target = store
                .request(&signal.request_id)
                .map(|request| (request.rule_id.clone(), request.to_tier));
            match store.apply_approval(&signal.request_id, signal.approved, now_ms) {
                Ok(true) => {
                    if let Some((rule_id, to_tier)) = target {
                        sink.emit(TelemetryEvent::PromotionApproved {
                            rule_id: rule_id.clone(),
                            to_tier,
                        });
                        outcome.promoted.push((rule_id, to_tier));
                    }
                }
                Ok(false) => outcome.absorbed += 1,
                Err(err) => {
                    tracing::warn!(
                        request_id = %signal.request_id,
                        error = %err,
                        "approval signal dropped"
                    );
                }
            }
        }

        outcome.expired = store.expire_requests(now_ms);
        outcome
    }

    /// Roll back a rule after a detected safety violation.
    ///
    /// Exactly one rollback and one [`TelemetryEvent::SafetyViolation`] per
    /// violating rule, however many times the violation is reported.
    /// Returns `true` when this report performed the rollback.
    ///
    /// # Errors
    ///
    /// [`ValidationError::PrimeImmutable`] for a Prime-tier rule; the report
    /// is refused and no event is emitted.
    pub fn report_violation(
        &mut self,
        rule_id: &str,
        reason: &str,
        store: &mut RuleStore,
        sink: &mut dyn TelemetrySink,
        now_ms: u64,
    ) -> Result<bool, ValidationError> {
        let rolled_back = store.rollback(rule_id, reason, now_ms)?;
        if rolled_back {
            sink.emit(TelemetryEvent::SafetyViolation {
                rule_id: rule_id.into(),
                reason: reason.into(),
            });
        }
        Ok(rolled_back)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

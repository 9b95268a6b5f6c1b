// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Per-session snapshot cache with batched learning deltas.
//!
//! Each session holds a resolved [`RuleSet`] and a tool-availability
//! snapshot, served from memory until explicitly invalidated.  Learning
//! observed during the session is buffered as deltas and applied to the
//! rule store in one atomic flush — all staged deltas apply or none do.
//!
//! Invalidation comes in two strengths.  *Immediate* drops the snapshot at
//! once (rollbacks must never keep serving a revoked rule).  *Deferred*
//! keeps serving the snapshot until the next interaction boundary, at which
//! point it hardens into immediate.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::collab::ToolProbe;
use crate::error::{EngineError, ValidationError};
use crate::store::RuleStore;
use crate::types::{ResolveContext, RuleScope, RuleSet, ToolHealth, ToolStatus};

// ---------------------------------------------------------------------------
// Entries and deltas
// ---------------------------------------------------------------------------

/// Snapshot validity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Staleness {
    /// Served as-is.
    Fresh,
    /// Served until the next interaction boundary, then re-resolved.
    Deferred,
    /// Re-resolved on next access.
    Immediate,
}

/// Per-session confirmation/correction counters.
///
/// Corrections are the stronger signal: each one also stales the snapshot
/// immediately, since the user just told us the served rules were wrong.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub confirmations: u32,
    pub corrections: u32,
}

/// A cached session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    /// Context the snapshot was resolved against.
    pub context: ResolveContext,
    pub ruleset: RuleSet,
    /// Availability snapshot for the context's tool ids.  On probe failure
    /// the previous snapshot's status is carried forward when one exists,
    /// otherwise [`ToolHealth::Unavailable`] is recorded.
    pub tool_status: HashMap<String, ToolStatus>,
    /// Confirmation/correction counters, carried across refreshes.
    pub calibration: CalibrationProfile,
    pub refreshed_at_ms: u64,
    pub staleness: Staleness,
    /// Set when any tool probe failed during the last refresh.
    pub degraded: bool,
}

/// A buffered learning observation, applied to the store at flush time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LearningDelta {
    /// A behavioral pattern observed during the session.
    Observation {
        content: String,
        scope: RuleScope,
        trigger: Option<String>,
    },
    /// A repeated confirmation of an existing rule.
    Confirmation { rule_id: String },
    /// A rule the session judged ready for its next tier; the promotion
    /// request is submitted at flush time.
    PromotionCandidate { rule_id: String },
}

/// Result of a successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    /// Deltas applied to the store.
    pub applied: usize,
}

// ---------------------------------------------------------------------------
// SessionCache
// ---------------------------------------------------------------------------

/// In-memory session cache.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::collab::StaticToolProbe;
/// use dirigent_core::config::Config;
/// use dirigent_core::session::SessionCache;
/// use dirigent_core::store::RuleStore;
/// use dirigent_core::types::ResolveContext;
///
/// let mut store = RuleStore::new(&Config::default());
/// let probe = StaticToolProbe::new();
/// let mut cache = SessionCache::new();
///
/// let ctx = ResolveContext { query: "review code".into(), ..ResolveContext::default() };
/// let set = cache.get("s-1", &ctx, &store, &probe, 100).unwrap();
/// assert_eq!(set.rules.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<String, SessionEntry>,
    deltas: HashMap<String, Vec<LearningDelta>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the session's snapshot, resolving one on miss or staleness.
    ///
    /// A `Fresh` or `Deferred` snapshot is returned without touching the
    /// store or probes; `Deferred` hardens at the next interaction boundary,
    /// not here.
    pub fn get(
        &mut self,
        session_id: &str,
        ctx: &ResolveContext,
        store: &RuleStore,
        probe: &dyn ToolProbe,
        now_ms: u64,
    ) -> Result<RuleSet, EngineError> {
        match self.entries.get(session_id) {
            Some(entry) if entry.staleness != Staleness::Immediate => {
                Ok(entry.ruleset.clone())
            }
            _ => self.refresh(session_id, ctx, store, probe, now_ms),
        }
    }

    /// Force a re-resolve for the session, replacing any snapshot.
    ///
    /// Each tool is probed with one retry.  A failing probe never fails the
    /// interaction: the previous snapshot's status is carried forward when
    /// one exists, otherwise the tool is recorded unavailable, and the
    /// session is marked degraded either way.
    pub fn refresh(
        &mut self,
        session_id: &str,
        ctx: &ResolveContext,
        store: &RuleStore,
        probe: &dyn ToolProbe,
        now_ms: u64,
    ) -> Result<RuleSet, EngineError> {
        let ruleset = store.resolve_at(ctx, now_ms)?;
        let previous = self.entries.get(session_id);

        let mut tool_status = HashMap::new();
        let mut degraded = false;
        for tool_id in &ctx.tool_ids {
            let status = match probe
                .test_availability(tool_id)
                .or_else(|_| probe.test_availability(tool_id))
            {
                Ok(status) => status,
                Err(err) => {
                    degraded = true;
                    let carried = previous.and_then(|entry| entry.tool_status.get(tool_id));
                    tracing::warn!(
                        tool_id = %tool_id,
                        error = %err,
                        carried_forward = carried.is_some(),
                        "tool probe failed"
                    );
                    carried.cloned().unwrap_or(ToolStatus {
                        health: ToolHealth::Unavailable,
                        latency_ms: 0,
                        checked_at_ms: now_ms,
                    })
                }
            };
            tool_status.insert(tool_id.clone(), status);
        }

        let calibration = previous.map(|entry| entry.calibration).unwrap_or_default();
        self.entries.insert(
            session_id.into(),
            SessionEntry {
                session_id: session_id.into(),
                context: ctx.clone(),
                ruleset: ruleset.clone(),
                tool_status,
                calibration,
                refreshed_at_ms: now_ms,
                staleness: Staleness::Fresh,
                degraded,
            },
        );
        Ok(ruleset)
    }

    /// The session's cached entry, if present.
    pub fn entry(&self, session_id: &str) -> Option<&SessionEntry> {
        self.entries.get(session_id)
    }

    /// Mark the session's snapshot stale.
    ///
    /// Immediate invalidation forces a re-resolve on next access; deferred
    /// lets the current snapshot serve until the next interaction boundary.
    /// Returns `false` when the session holds no snapshot.
    pub fn invalidate(&mut self, session_id: &str, immediate: bool) -> bool {
        match self.entries.get_mut(session_id) {
            Some(entry) => {
                entry.staleness = if immediate {
                    Staleness::Immediate
                } else if entry.staleness == Staleness::Fresh {
                    Staleness::Deferred
                } else {
                    entry.staleness
                };
                true
            }
            None => false,
        }
    }

    /// Invalidate every cached session.  Returns the affected session ids in
    /// sorted order.
    pub fn invalidate_all(&mut self, immediate: bool) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        for id in &ids {
            self.invalidate(id, immediate);
        }
        ids
    }

    /// Mark an interaction boundary: deferred staleness hardens into
    /// immediate, so the next `get` re-resolves.
    pub fn begin_interaction(&mut self, session_id: &str) {
        if let Some(entry) = self.entries.get_mut(session_id) {
            if entry.staleness == Staleness::Deferred {
                entry.staleness = Staleness::Immediate;
            }
        }
    }

    // ------------------------------------------------------------------
    // Learning deltas
    // ------------------------------------------------------------------

    /// Buffer a learning delta for the session.  Returns the buffer depth.
    ///
    /// Confirmations also bump the session's calibration counter right away;
    /// the evidence itself still lands at flush time.
    pub fn record_delta(&mut self, session_id: &str, delta: LearningDelta) -> usize {
        if matches!(delta, LearningDelta::Confirmation { .. }) {
            if let Some(entry) = self.entries.get_mut(session_id) {
                entry.calibration.confirmations += 1;
            }
        }
        let buffer = self.deltas.entry(session_id.into()).or_default();
        buffer.push(delta);
        buffer.len()
    }

    /// Record a user correction: bump the session's correction counter and
    /// stale its snapshot immediately.  Returns `false` when the session
    /// holds no snapshot.
    pub fn record_correction(&mut self, session_id: &str) -> bool {
        match self.entries.get_mut(session_id) {
            Some(entry) => {
                entry.calibration.corrections += 1;
                entry.staleness = Staleness::Immediate;
                true
            }
            None => false,
        }
    }

    /// Buffered delta count for the session.
    pub fn pending_deltas(&self, session_id: &str) -> usize {
        self.deltas.get(session_id).map(Vec::len).unwrap_or(0)
    }

    /// Apply the session's buffered deltas to the store atomically.
    ///
    /// Deltas are replayed against a clone of the store first; only when
    /// every delta applies cleanly does the clone replace the store and the
    /// buffer clear.  On failure the store is untouched and the buffer is
    /// retained.
    pub fn flush(
        &mut self,
        session_id: &str,
        store: &mut RuleStore,
        now_ms: u64,
    ) -> Result<FlushSummary, EngineError> {
        let buffer = match self.deltas.get(session_id) {
            Some(buffer) if !buffer.is_empty() => buffer.clone(),
            _ => return Ok(FlushSummary { applied: 0 }),
        };

        let mut staged = store.clone();
        for delta in &buffer {
            match delta {
                LearningDelta::Observation { content, scope, trigger } => {
                    staged.observe_pattern(content, scope.clone(), trigger.as_deref(), now_ms)?;
                }
                LearningDelta::Confirmation { rule_id } => {
                    staged.add_evidence(rule_id)?;
                }
                LearningDelta::PromotionCandidate { rule_id } => {
                    let tier = staged
                        .rule(rule_id)
                        .ok_or_else(|| ValidationError::UnknownRule(rule_id.clone()))?
                        .tier;
                    let to = tier
                        .next_up()
                        .ok_or_else(|| ValidationError::PrimeImmutable(rule_id.clone()))?;
                    staged.submit_promotion(rule_id, to, now_ms)?;
                }
            }
        }

        *store = staged;
        let applied = buffer.len();
        self.deltas.remove(session_id);
        Ok(FlushSummary { applied })
    }

    /// End the session normally: flush its deltas, then drop its state.
    pub fn end_session(
        &mut self,
        session_id: &str,
        store: &mut RuleStore,
        now_ms: u64,
    ) -> Result<FlushSummary, EngineError> {
        let summary = self.flush(session_id, store, now_ms)?;
        self.entries.remove(session_id);
        self.deltas.remove(session_id);
        Ok(summary)
    }

    /// Abort the session: discard its snapshot and buffered deltas without
    /// touching the store.
    pub fn abort_session(&mut self, session_id: &str) {
        self.entries.remove(session_id);
        self.deltas.remove(session_id);
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::StaticToolProbe;
    use crate::config::Config;
    use crate::error::{ProbeError, ValidationError};
    use crate::types::RuleTier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
    }

    impl ToolProbe for CountingProbe {
        fn test_availability(&self, _tool_id: &str) -> Result<ToolStatus, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolStatus { health: ToolHealth::Available, latency_ms: 5, checked_at_ms: 0 })
        }
    }

    fn ctx(query: &str) -> ResolveContext {
        ResolveContext { query: query.into(), ..ResolveContext::default() }
    }

    #[test]
    fn test_get_serves_from_cache_without_reprobing() {
        let store = RuleStore::new(&Config::default());
        let probe = CountingProbe { calls: AtomicUsize::new(0) };
        let mut cache = SessionCache::new();

        let context = ResolveContext {
            query: "q".into(),
            tool_ids: vec!["memory-server".into()],
            ..ResolveContext::default()
        };
        let first = cache.get("s-1", &context, &store, &probe, 100).unwrap();
        let second = cache.get("s-1", &context, &store, &probe, 200).unwrap();

        assert_eq!(first, second);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_snapshot_survives_store_mutation_until_invalidated() {
        let mut store = RuleStore::new(&Config::default());
        let probe = StaticToolProbe::new();
        let mut cache = SessionCache::new();

        let before = cache.get("s-1", &ctx("q"), &store, &probe, 100).unwrap();
        store
            .observe_pattern("new pattern", RuleScope::Global, None, 150)
            .unwrap();

        // Still the old snapshot.
        let cached = cache.get("s-1", &ctx("q"), &store, &probe, 200).unwrap();
        assert_eq!(cached, before);

        cache.invalidate("s-1", true);
        let after = cache.get("s-1", &ctx("q"), &store, &probe, 300).unwrap();
        assert_eq!(after.rules.len(), 2);
    }

    #[test]
    fn test_deferred_invalidation_hardens_at_interaction_boundary() {
        let mut store = RuleStore::new(&Config::default());
        let probe = StaticToolProbe::new();
        let mut cache = SessionCache::new();

        let before = cache.get("s-1", &ctx("q"), &store, &probe, 100).unwrap();
        store
            .observe_pattern("late pattern", RuleScope::Global, None, 150)
            .unwrap();
        cache.invalidate("s-1", false);

        // Deferred: current snapshot still serves.
        assert_eq!(cache.get("s-1", &ctx("q"), &store, &probe, 200).unwrap(), before);

        // Next interaction boundary forces the re-resolve.
        cache.begin_interaction("s-1");
        let after = cache.get("s-1", &ctx("q"), &store, &probe, 300).unwrap();
        assert_eq!(after.rules.len(), 2);
    }

    #[test]
    fn test_probe_failure_degrades_to_unavailable() {
        let store = RuleStore::new(&Config::default());
        let mut probe = StaticToolProbe::new();
        probe.set_timeout("flaky-tool");
        let mut cache = SessionCache::new();

        let context = ResolveContext {
            query: "q".into(),
            tool_ids: vec!["flaky-tool".into()],
            ..ResolveContext::default()
        };
        cache.get("s-1", &context, &store, &probe, 100).unwrap();

        let entry = cache.entry("s-1").unwrap();
        assert_eq!(entry.tool_status["flaky-tool"].health, ToolHealth::Unavailable);
    }

    #[test]
    fn test_probe_failure_carries_forward_previous_status() {
        let store = RuleStore::new(&Config::default());
        let mut cache = SessionCache::new();
        let context = ResolveContext {
            query: "q".into(),
            tool_ids: vec!["memory-server".into()],
            ..ResolveContext::default()
        };

        let probe = StaticToolProbe::new();
        cache.refresh("s-1", &context, &store, &probe, 100).unwrap();
        let healthy = cache.entry("s-1").unwrap().tool_status["memory-server"].clone();
        assert!(!cache.entry("s-1").unwrap().degraded);

        let mut failing = StaticToolProbe::new();
        failing.set_timeout("memory-server");
        cache.refresh("s-1", &context, &store, &failing, 200).unwrap();

        let entry = cache.entry("s-1").unwrap();
        assert!(entry.degraded);
        // Last known good status survives the failed probe.
        assert_eq!(entry.tool_status["memory-server"], healthy);
    }

    #[test]
    fn test_correction_stales_snapshot_immediately() {
        let mut store = RuleStore::new(&Config::default());
        let probe = StaticToolProbe::new();
        let mut cache = SessionCache::new();

        cache.get("s-1", &ctx("q"), &store, &probe, 100).unwrap();
        store
            .observe_pattern("corrected pattern", RuleScope::Global, None, 150)
            .unwrap();

        assert!(cache.record_correction("s-1"));
        let after = cache.get("s-1", &ctx("q"), &store, &probe, 200).unwrap();
        assert_eq!(after.rules.len(), 2);
        assert_eq!(cache.entry("s-1").unwrap().calibration.corrections, 1);
    }

    #[test]
    fn test_calibration_survives_refresh() {
        let store = RuleStore::new(&Config::default());
        let probe = StaticToolProbe::new();
        let mut cache = SessionCache::new();

        cache.get("s-1", &ctx("q"), &store, &probe, 100).unwrap();
        cache.record_delta("s-1", LearningDelta::Confirmation { rule_id: "prime".into() });
        cache.record_correction("s-1");

        cache.refresh("s-1", &ctx("q"), &store, &probe, 200).unwrap();
        let calibration = cache.entry("s-1").unwrap().calibration;
        assert_eq!(calibration.confirmations, 1);
        assert_eq!(calibration.corrections, 1);
    }

    #[test]
    fn test_flush_submits_promotion_candidate() {
        let mut store = RuleStore::new(&Config::default());
        let mut cache = SessionCache::new();

        let rule_id = store
            .observe_pattern("promotable pattern", RuleScope::Global, None, 100)
            .unwrap();
        store.add_evidence(&rule_id).unwrap();

        cache.record_delta("s-1", LearningDelta::PromotionCandidate { rule_id: rule_id.clone() });
        let summary = cache.flush("s-1", &mut store, 500).unwrap();

        assert_eq!(summary.applied, 1);
        let request = store.request("preq-000001").unwrap();
        assert_eq!(request.rule_id, rule_id);
        assert_eq!(request.to_tier, RuleTier::Tertiary);
    }

    #[test]
    fn test_flush_applies_all_deltas() {
        let mut store = RuleStore::new(&Config::default());
        let mut cache = SessionCache::new();

        cache.record_delta(
            "s-1",
            LearningDelta::Observation {
                content: "batch memory writes".into(),
                scope: RuleScope::Global,
                trigger: None,
            },
        );
        cache.record_delta(
            "s-1",
            LearningDelta::Observation {
                content: "batch memory writes".into(),
                scope: RuleScope::Global,
                trigger: None,
            },
        );

        let summary = cache.flush("s-1", &mut store, 500).unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(cache.pending_deltas("s-1"), 0);
        // Duplicate observation lands as evidence, not a second rule.
        let rules = store.rules();
        assert_eq!(rules.len(), 2);
        let learned = rules.iter().find(|r| r.tier == RuleTier::Quaternary).unwrap();
        assert_eq!(learned.evidence, 2);
    }

    #[test]
    fn test_flush_is_atomic_on_failure() {
        let mut store = RuleStore::new(&Config::default());
        let mut cache = SessionCache::new();
        let version_before = store.version();

        cache.record_delta(
            "s-1",
            LearningDelta::Observation {
                content: "good delta".into(),
                scope: RuleScope::Global,
                trigger: None,
            },
        );
        cache.record_delta(
            "s-1",
            LearningDelta::Confirmation { rule_id: "no-such-rule".into() },
        );

        let err = cache.flush("s-1", &mut store, 500).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::UnknownRule(_))
        ));

        // Nothing applied, buffer retained for retry.
        assert_eq!(store.version(), version_before);
        assert_eq!(store.rules().len(), 1);
        assert_eq!(cache.pending_deltas("s-1"), 2);
    }

    #[test]
    fn test_end_session_flushes_and_drops_state() {
        let mut store = RuleStore::new(&Config::default());
        let probe = StaticToolProbe::new();
        let mut cache = SessionCache::new();

        cache.get("s-1", &ctx("q"), &store, &probe, 100).unwrap();
        cache.record_delta(
            "s-1",
            LearningDelta::Observation {
                content: "learned pattern".into(),
                scope: RuleScope::Global,
                trigger: None,
            },
        );

        let summary = cache.end_session("s-1", &mut store, 200).unwrap();
        assert_eq!(summary.applied, 1);
        assert!(cache.entry("s-1").is_none());
        assert_eq!(store.rules().len(), 2);
    }

    #[test]
    fn test_abort_session_discards_deltas() {
        let mut store = RuleStore::new(&Config::default());
        let mut cache = SessionCache::new();

        cache.record_delta(
            "s-1",
            LearningDelta::Observation {
                content: "abandoned pattern".into(),
                scope: RuleScope::Global,
                trigger: None,
            },
        );
        cache.abort_session("s-1");

        assert_eq!(cache.pending_deltas("s-1"), 0);
        assert_eq!(store.rules().len(), 1);
        assert!(cache.is_empty());
    }
}

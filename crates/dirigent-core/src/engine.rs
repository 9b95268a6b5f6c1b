// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! The engine facade.
//!
//! [`DirigentEngine`] wires the rule store, session cache, budget monitor,
//! payload selector, and governance gate behind one API.  A typical serving
//! loop is:
//!
//! ```text
//!   interact() ─▶ gate poll ─▶ cached resolve ─▶ level select ─▶ payload
//!       │
//!       ├─ record_learning()   buffered deltas, atomic flush
//!       ├─ record_usage()      budget attribution, level downgrades
//!       ├─ report_violation()  immediate rollback + invalidation
//!       └─ checkpoint()        persist rules + budget
//! ```
//!
//! External collaborators (tool probe, embedding index, approval channel,
//! telemetry sink) are injected; deterministic in-process defaults are used
//! until replaced.

use crate::collab::{
    ApprovalChannel, EmbeddingIndex, KeywordIndex, LogSink, QueuedApprovalChannel, StaticToolProbe,
    TelemetrySink, ToolProbe,
};
use crate::config::Config;
use crate::error::{EngineError, ValidationError};
use crate::gate::GovernanceGate;
use crate::monitor::{BudgetStatus, TokenBudgetMonitor};
use crate::persist::{InMemoryPersistence, Persistence};
use crate::selector::OptimizationSelector;
use crate::session::{FlushSummary, LearningDelta, SessionCache};
use crate::store::RuleStore;
use crate::types::{
    ComponentTag, LevelChange, OptimizationLevel, Payload, PromotionRequest, ResolveContext,
    RuleStatus, TelemetryEvent,
};

/// The directive governance engine.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::config::Config;
/// use dirigent_core::engine::DirigentEngine;
/// use dirigent_core::types::ResolveContext;
///
/// let mut engine = DirigentEngine::in_memory(Config::default()).unwrap();
/// let ctx = ResolveContext { query: "summarize the report".into(), ..ResolveContext::default() };
///
/// let payload = engine.interact("session-1", &ctx).unwrap();
/// assert!(!payload.entries.is_empty());
/// ```
pub struct DirigentEngine<P: Persistence> {
    config: Config,
    persistence: P,
    store: RuleStore,
    cache: SessionCache,
    monitor: TokenBudgetMonitor,
    selector: OptimizationSelector,
    gate: GovernanceGate,
    probe: Box<dyn ToolProbe>,
    /// External similarity index, when one is attached.
    external_index: Option<Box<dyn EmbeddingIndex>>,
    /// Fallback index over active rule content, rebuilt on store changes.
    keyword_index: KeywordIndex,
    keyword_index_version: u64,
    approvals: Box<dyn ApprovalChannel>,
    telemetry: Box<dyn TelemetrySink>,
}

impl DirigentEngine<InMemoryPersistence> {
    /// Open an engine backed by volatile in-process persistence.
    pub fn in_memory(config: Config) -> Result<Self, EngineError> {
        Self::open(config, InMemoryPersistence::new())
    }
}

impl<P: Persistence> DirigentEngine<P> {
    /// Open an engine, restoring any persisted rules and budget state.
    ///
    /// A corrupt rule snapshot fails fast — governance history is never
    /// silently reset.  A failing budget load fails open: the engine starts
    /// from a fresh budget state and logs the degradation.
    pub fn open(config: Config, persistence: P) -> Result<Self, EngineError> {
        let store = match persistence.load_rules()? {
            Some(snapshot) => RuleStore::from_snapshot(snapshot, &config)?,
            None => RuleStore::new(&config),
        };

        let monitor = match persistence.load_budget() {
            Ok(Some(state)) => TokenBudgetMonitor::from_state(state, config.level_thresholds),
            Ok(None) => TokenBudgetMonitor::new(&config),
            Err(err) => {
                tracing::warn!(error = %err, "budget state unreadable; starting from fresh state");
                TokenBudgetMonitor::new(&config)
            }
        };

        Ok(Self {
            selector: OptimizationSelector::new(&config),
            store,
            monitor,
            cache: SessionCache::new(),
            gate: GovernanceGate::new(),
            probe: Box::new(StaticToolProbe::new()),
            external_index: None,
            keyword_index: KeywordIndex::new(),
            keyword_index_version: 0,
            approvals: Box::new(QueuedApprovalChannel::new()),
            telemetry: Box::new(LogSink),
            config,
            persistence,
        })
    }

    // ------------------------------------------------------------------
    // Collaborator injection
    // ------------------------------------------------------------------

    pub fn set_tool_probe(&mut self, probe: Box<dyn ToolProbe>) {
        self.probe = probe;
    }

    /// Attach an external similarity index for Dynamic-level selection.
    /// Without one, a keyword index over active rule content is used.
    pub fn set_embedding_index(&mut self, index: Box<dyn EmbeddingIndex>) {
        self.external_index = Some(index);
    }

    pub fn set_approval_channel(&mut self, channel: Box<dyn ApprovalChannel>) {
        self.approvals = channel;
    }

    pub fn set_telemetry_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.telemetry = sink;
    }

    /// The approval channel, for queueing human decisions.
    pub fn approvals_mut(&mut self) -> &mut dyn ApprovalChannel {
        &mut *self.approvals
    }

    // ------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------

    /// Serve a directive payload for one interaction.
    pub fn interact(
        &mut self,
        session_id: &str,
        ctx: &ResolveContext,
    ) -> Result<Payload, EngineError> {
        self.interact_at(session_id, ctx, current_time_ms())
    }

    /// [`Self::interact`] at an explicit timestamp.
    ///
    /// Order within an interaction: the interaction boundary is marked
    /// first (hardening any deferred staleness), then pending approvals are
    /// applied, then the cached ruleset is served and rendered at the
    /// monitor's current level.  The payload's own token cost is recorded
    /// against the [`ComponentTag::Directive`] bucket.
    pub fn interact_at(
        &mut self,
        session_id: &str,
        ctx: &ResolveContext,
        now_ms: u64,
    ) -> Result<Payload, EngineError> {
        self.cache.begin_interaction(session_id);

        let outcome = self
            .gate
            .poll(&mut *self.approvals, &mut self.store, &mut *self.telemetry, now_ms);
        if outcome.changed_serving() {
            // Promotions reshuffle precedence but revoke nothing: deferred.
            self.invalidate_all_sessions(false, "promotion applied");
        }

        let ruleset = self
            .cache
            .get(session_id, ctx, &self.store, &*self.probe, now_ms)?;

        let level = self.monitor.level();
        self.ensure_keyword_index();
        let index: &dyn EmbeddingIndex = match &self.external_index {
            Some(index) => &**index,
            None => &self.keyword_index,
        };
        let payload = self.selector.select_payload(level, &ruleset, ctx, index);

        if let Some(change) =
            self.monitor
                .record_at(ComponentTag::Directive, payload.token_estimate, now_ms)
        {
            self.note_level_change(change);
        }

        Ok(payload)
    }

    // ------------------------------------------------------------------
    // Learning
    // ------------------------------------------------------------------

    /// Buffer a learning delta for the session, flushing automatically when
    /// the buffer reaches the configured size.
    pub fn record_learning(
        &mut self,
        session_id: &str,
        delta: LearningDelta,
    ) -> Result<(), EngineError> {
        self.record_learning_at(session_id, delta, current_time_ms())
    }

    pub fn record_learning_at(
        &mut self,
        session_id: &str,
        delta: LearningDelta,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let depth = self.cache.record_delta(session_id, delta);
        if depth >= self.config.delta_flush_size {
            self.cache.flush(session_id, &mut self.store, now_ms)?;
        }
        Ok(())
    }

    /// End a session: flush its deltas, then drop its cached state.
    pub fn end_session(&mut self, session_id: &str) -> Result<FlushSummary, EngineError> {
        self.end_session_at(session_id, current_time_ms())
    }

    pub fn end_session_at(
        &mut self,
        session_id: &str,
        now_ms: u64,
    ) -> Result<FlushSummary, EngineError> {
        self.cache.end_session(session_id, &mut self.store, now_ms)
    }

    /// Record a user correction against the session's served rules.
    ///
    /// The session's calibration counter is bumped and its snapshot goes
    /// stale immediately, so the next interaction re-resolves.  Returns
    /// `false` when the session holds no snapshot.
    pub fn record_correction(&mut self, session_id: &str) -> bool {
        let invalidated = self.cache.record_correction(session_id);
        if invalidated {
            self.telemetry.emit(TelemetryEvent::CacheInvalidated {
                session_id: session_id.into(),
                reason: "user correction".into(),
            });
        }
        invalidated
    }

    /// Abort a session, discarding its buffered learning.
    pub fn abort_session(&mut self, session_id: &str) {
        self.cache.abort_session(session_id);
    }

    // ------------------------------------------------------------------
    // Promotion and safety
    // ------------------------------------------------------------------

    /// Submit a promotion request moving `rule_id` one tier up.
    pub fn submit_promotion(&mut self, rule_id: &str) -> Result<PromotionRequest, EngineError> {
        self.submit_promotion_at(rule_id, current_time_ms())
    }

    pub fn submit_promotion_at(
        &mut self,
        rule_id: &str,
        now_ms: u64,
    ) -> Result<PromotionRequest, EngineError> {
        let rule = self
            .store
            .rule(rule_id)
            .ok_or_else(|| ValidationError::UnknownRule(rule_id.into()))?;
        let to_tier = rule
            .tier
            .next_up()
            .ok_or_else(|| ValidationError::PrimeImmutable(rule_id.into()))?;
        Ok(self.store.submit_promotion(rule_id, to_tier, now_ms)?)
    }

    /// Report a safety violation; the rule is rolled back immediately and
    /// every cached session is invalidated at once.
    pub fn report_violation(&mut self, rule_id: &str, reason: &str) -> Result<(), EngineError> {
        self.report_violation_at(rule_id, reason, current_time_ms())
    }

    pub fn report_violation_at(
        &mut self,
        rule_id: &str,
        reason: &str,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let rolled_back = self.gate.report_violation(
            rule_id,
            reason,
            &mut self.store,
            &mut *self.telemetry,
            now_ms,
        )?;
        if rolled_back {
            // A revoked rule must not be served even once more.
            self.invalidate_all_sessions(true, "safety rollback");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Budget
    // ------------------------------------------------------------------

    /// Attribute a token spend to a component.
    pub fn record_usage(&mut self, component: ComponentTag, tokens: u64) {
        self.record_usage_at(component, tokens, current_time_ms());
    }

    pub fn record_usage_at(&mut self, component: ComponentTag, tokens: u64, now_ms: u64) {
        if let Some(change) = self.monitor.record_at(component, tokens, now_ms) {
            self.note_level_change(change);
        }
    }

    /// Pin the optimization level (operator override), or clear with `None`.
    pub fn pin_level(&mut self, level: Option<OptimizationLevel>) {
        if let Some(change) = self.monitor.pin_level(level, current_time_ms()) {
            self.note_level_change(change);
        }
    }

    /// Operator-facing budget summary.
    pub fn budget_status(&mut self) -> BudgetStatus {
        self.monitor.status(current_time_ms())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Persist the rule store and budget state.
    pub fn checkpoint(&mut self) -> Result<(), EngineError> {
        self.persistence.save_rules(&self.store.snapshot())?;
        self.persistence.save_budget(&self.monitor.checkpoint())?;
        Ok(())
    }

    /// Read access to the rule store.
    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Currently served optimization level.
    pub fn level(&self) -> OptimizationLevel {
        self.monitor.level()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Level governs rendering, not resolution, so sessions may finish the
    /// current interaction on their snapshot; the next boundary re-resolves.
    fn note_level_change(&mut self, change: LevelChange) {
        self.telemetry.emit(TelemetryEvent::LevelChanged {
            from: change.from,
            to: change.to,
            utilization: change.utilization,
        });
        self.invalidate_all_sessions(false, "optimization level changed");
    }

    fn invalidate_all_sessions(&mut self, immediate: bool, reason: &str) {
        for session_id in self.cache.invalidate_all(immediate) {
            self.telemetry.emit(TelemetryEvent::CacheInvalidated {
                session_id,
                reason: reason.into(),
            });
        }
    }

    fn ensure_keyword_index(&mut self) {
        if self.external_index.is_some() || self.keyword_index_version == self.store.version() {
            return;
        }
        let mut index = KeywordIndex::new();
        for rule in self.store.rules() {
            if rule.status == RuleStatus::Active {
                index.insert(&rule.id, &rule.content);
            }
        }
        self.keyword_index = index;
        self.keyword_index_version = self.store.version();
    }
}

/// Return current Unix epoch milliseconds.
fn current_time_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MemorySink;
    use crate::session::Staleness;
    use crate::store::RuleStoreSnapshot;
    use crate::types::{BudgetState, RuleScope, RuleTier};
    use std::sync::{Arc, Mutex};

    /// Sink that shares its event log with the test.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<TelemetryEvent>>>);

    impl TelemetrySink for SharedSink {
        fn emit(&mut self, event: TelemetryEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn ctx(query: &str) -> ResolveContext {
        ResolveContext { query: query.into(), ..ResolveContext::default() }
    }

    fn engine() -> DirigentEngine<InMemoryPersistence> {
        DirigentEngine::in_memory(Config::default()).unwrap()
    }

    fn observation(content: &str) -> LearningDelta {
        LearningDelta::Observation {
            content: content.into(),
            scope: RuleScope::Global,
            trigger: None,
        }
    }

    #[test]
    fn test_interact_serves_prime_payload() {
        let mut engine = engine();
        let payload = engine.interact_at("s-1", &ctx("review this diff"), 100).unwrap();

        assert_eq!(payload.level, OptimizationLevel::Standard);
        assert!(payload.contains_verbatim(&Config::default().prime_content));
    }

    #[test]
    fn test_learning_flushes_at_buffer_threshold() {
        let config = Config { delta_flush_size: 2, ..Config::default() };
        let mut engine = DirigentEngine::open(config, InMemoryPersistence::new()).unwrap();

        engine
            .record_learning_at("s-1", observation("prefer concise answers"), 100)
            .unwrap();
        assert_eq!(engine.store().rules().len(), 1);

        engine
            .record_learning_at("s-1", observation("prefer concise answers"), 110)
            .unwrap();
        // Buffer hit the threshold and flushed both deltas as one rule with
        // two confirmations.
        let rules = engine.store().rules();
        assert_eq!(rules.len(), 2);
        let learned = rules.iter().find(|r| r.tier == RuleTier::Quaternary).unwrap();
        assert_eq!(learned.evidence, 2);
    }

    #[test]
    fn test_promotion_becomes_visible_at_next_interaction() {
        let mut engine = engine();
        let context = ctx("q");

        engine.record_learning_at("s-1", observation("learned rule"), 50).unwrap();
        engine.record_learning_at("s-1", observation("learned rule"), 60).unwrap();
        engine.end_session_at("s-1", 70).unwrap();
        let rule_id = engine
            .store()
            .rules()
            .iter()
            .find(|r| r.tier == RuleTier::Quaternary)
            .unwrap()
            .id
            .clone();

        let request = engine.submit_promotion_at(&rule_id, 100).unwrap();

        // Snapshot a session before the approval lands.
        engine.interact_at("s-2", &context, 150).unwrap();

        engine.approvals_mut().approve(&request.id);
        // The approval is applied during this interaction; the promotion is
        // deferred, so this payload may still serve the old snapshot.
        engine.interact_at("s-2", &context, 200).unwrap();
        assert_eq!(engine.store().rule(&rule_id).unwrap().tier, RuleTier::Tertiary);

        // By the following interaction the refreshed snapshot serves it.
        engine.interact_at("s-2", &context, 300).unwrap();
        let entry = engine.cache.entry("s-2").unwrap();
        assert_eq!(
            entry.ruleset.rules.iter().find(|r| r.id == rule_id).unwrap().tier,
            RuleTier::Tertiary
        );
    }

    #[test]
    fn test_violation_invalidates_sessions_immediately() {
        let mut engine = engine();
        let sink = SharedSink::default();
        engine.set_telemetry_sink(Box::new(sink.clone()));

        engine.record_learning_at("s-1", observation("unsafe rule"), 50).unwrap();
        engine.end_session_at("s-1", 60).unwrap();
        let rule_id = engine
            .store()
            .rules()
            .iter()
            .find(|r| r.tier == RuleTier::Quaternary)
            .unwrap()
            .id
            .clone();

        let context = ctx("q");
        let before = engine.interact_at("s-2", &context, 100).unwrap();
        assert!(before.entries.iter().any(|e| e.rule_id == rule_id));

        engine.report_violation_at(&rule_id, "contradicted prime", 150).unwrap();

        // The very next serve no longer contains the rolled-back rule.
        let after = engine.interact_at("s-2", &context, 200).unwrap();
        assert!(after.entries.iter().all(|e| e.rule_id != rule_id));

        let events = sink.0.lock().unwrap();
        let violations = events
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::SafetyViolation { .. }))
            .count();
        assert_eq!(violations, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, TelemetryEvent::CacheInvalidated { .. })));
    }

    #[test]
    fn test_budget_pressure_downgrades_served_payload() {
        let config = Config { daily_budget: 1_000, ..Config::default() };
        let mut engine = DirigentEngine::open(config, InMemoryPersistence::new()).unwrap();

        engine.record_usage_at(ComponentTag::Response, 960, 100);
        assert_eq!(engine.level(), OptimizationLevel::Emergency);

        let payload = engine.interact_at("s-1", &ctx("q"), 200).unwrap();
        assert_eq!(payload.level, OptimizationLevel::Emergency);
    }

    #[test]
    fn test_pinned_dynamic_serves_filtered_payload() {
        let mut engine = engine();
        engine.record_learning_at("s-1", observation("cache tool results"), 50).unwrap();
        engine.record_learning_at("s-1", observation("verify external claims"), 60).unwrap();
        engine.end_session_at("s-1", 70).unwrap();

        engine.pin_level(Some(OptimizationLevel::Dynamic));
        let payload = engine
            .interact_at("s-2", &ctx("cache tool results"), 100)
            .unwrap();

        assert_eq!(payload.level, OptimizationLevel::Dynamic);
        assert!(payload.contains_verbatim("cache tool results"));
        assert!(!payload.contains_verbatim("verify external claims"));
    }

    #[test]
    fn test_checkpoint_and_reopen() {
        let mut persistence = InMemoryPersistence::new();
        {
            let mut engine =
                DirigentEngine::open(Config::default(), InMemoryPersistence::new()).unwrap();
            engine.record_learning_at("s-1", observation("durable rule"), 50).unwrap();
            engine.end_session_at("s-1", 60).unwrap();
            engine.record_usage_at(ComponentTag::Response, 30_000, 70);
            engine.checkpoint().unwrap();

            persistence.save_rules(&engine.store().snapshot()).unwrap();
            persistence.save_budget(&engine.monitor.checkpoint()).unwrap();
        }

        let mut reopened = DirigentEngine::open(Config::default(), persistence).unwrap();
        assert_eq!(reopened.store().rules().len(), 2);
        assert_eq!(reopened.level(), OptimizationLevel::Optimized);
        assert_eq!(reopened.budget_status().consumed_today, 30_000);
    }

    #[test]
    fn test_corrupt_rule_snapshot_fails_fast() {
        let mut persistence = InMemoryPersistence::new();
        let snapshot = RuleStoreSnapshot {
            rules: hashbrown::HashMap::new(),
            requests: hashbrown::HashMap::new(),
            cooldowns: hashbrown::HashMap::new(),
            audit: Vec::new(),
            version: 7,
            next_request_seq: 1,
        };
        persistence.save_rules(&snapshot).unwrap();

        assert!(matches!(
            DirigentEngine::open(Config::default(), persistence),
            Err(EngineError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_budget_load_failure_fails_open() {
        struct FlakyBudget(InMemoryPersistence);

        impl Persistence for FlakyBudget {
            fn load_rules(&self) -> Result<Option<RuleStoreSnapshot>, EngineError> {
                self.0.load_rules()
            }
            fn save_rules(&mut self, snapshot: &RuleStoreSnapshot) -> Result<(), EngineError> {
                self.0.save_rules(snapshot)
            }
            fn load_budget(&self) -> Result<Option<BudgetState>, EngineError> {
                Err(EngineError::BudgetSource("backend offline".into()))
            }
            fn save_budget(&mut self, state: &BudgetState) -> Result<(), EngineError> {
                self.0.save_budget(state)
            }
        }

        let mut engine =
            DirigentEngine::open(Config::default(), FlakyBudget(InMemoryPersistence::new()))
                .unwrap();
        assert_eq!(engine.level(), OptimizationLevel::Standard);
        // Serving continues.
        assert!(engine.interact_at("s-1", &ctx("q"), 100).is_ok());
    }

    #[test]
    fn test_correction_forces_refresh_on_next_interaction() {
        let mut engine = engine();
        let context = ctx("q");

        engine.interact_at("s-1", &context, 100).unwrap();
        engine.record_learning_at("s-2", observation("missed rule"), 110).unwrap();
        engine.end_session_at("s-2", 120).unwrap();

        assert!(engine.record_correction("s-1"));
        engine.interact_at("s-1", &context, 200).unwrap();

        let entry = engine.cache.entry("s-1").unwrap();
        assert_eq!(entry.ruleset.rules.len(), 2);
        assert_eq!(entry.calibration.corrections, 1);
    }

    #[test]
    fn test_level_change_defers_session_invalidation() {
        let config = Config { daily_budget: 1_000, ..Config::default() };
        let mut engine = DirigentEngine::open(config, InMemoryPersistence::new()).unwrap();
        let sink = SharedSink::default();
        engine.set_telemetry_sink(Box::new(sink.clone()));

        engine.interact_at("s-1", &ctx("q"), 100).unwrap();
        engine.record_usage_at(ComponentTag::Response, 600, 150);

        assert_eq!(engine.level(), OptimizationLevel::Optimized);
        assert_eq!(engine.cache.entry("s-1").unwrap().staleness, Staleness::Deferred);
        let events = sink.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            TelemetryEvent::CacheInvalidated { session_id, .. } if session_id == "s-1"
        )));
    }

    #[test]
    fn test_memory_sink_collects_level_changes() {
        let config = Config { daily_budget: 100, ..Config::default() };
        let mut engine = DirigentEngine::open(config, InMemoryPersistence::new()).unwrap();
        engine.set_telemetry_sink(Box::new(MemorySink::new()));

        engine.record_usage_at(ComponentTag::Response, 60, 100);
        assert_eq!(engine.level(), OptimizationLevel::Optimized);
    }
}

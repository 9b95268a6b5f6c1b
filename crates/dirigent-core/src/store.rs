// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Hierarchical rule store with controlled promotion.
//!
//! [`RuleStore`] owns the rule graph and enforces the promotion ordering:
//! strictly Quaternary → Tertiary → Secondary, one tier at a time, never
//! skipping.  The Prime tier holds exactly one rule, seeded at creation; it
//! is immutable and never a promotion target, so the exactly-one-Prime
//! serving invariant holds by construction.
//!
//! Every mutation bumps the store `version`, which resolved rulesets carry
//! so session caches can detect staleness without re-resolving.  Promotions,
//! rejections, expiries, and rollbacks are recorded in an append-only audit
//! log.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::{Config, EvidenceThresholds};
use crate::error::{EngineError, ValidationError};
use crate::types::{
    ApprovalStatus, AuditAction, AuditEntry, PromotionRequest, ResolveContext, Rule, RuleScope,
    RuleSet, RuleStatus, RuleTier,
};

/// Well-known id of the seeded Prime-tier rule.
pub const PRIME_RULE_ID: &str = "prime";

/// The hierarchical rule store.
///
/// `Clone` is part of the contract: session flushes replay their deltas
/// against a clone first so a failing delta leaves the real store untouched.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::config::Config;
/// use dirigent_core::store::RuleStore;
/// use dirigent_core::types::{ResolveContext, RuleScope, RuleTier};
///
/// let mut store = RuleStore::new(&Config::default());
/// store.observe_pattern("batch memory updates", RuleScope::Global, None, 100).unwrap();
///
/// let ctx = ResolveContext { query: "memory".into(), ..ResolveContext::default() };
/// let set = store.resolve_at(&ctx, 200).unwrap();
/// assert_eq!(set.prime().unwrap().tier, RuleTier::Prime);
/// assert_eq!(set.rules.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RuleStore {
    rules: HashMap<String, Rule>,
    requests: HashMap<String, PromotionRequest>,
    /// Key `"{rule_id}:{evidence_digest}"` → cooldown expiry (epoch ms).
    cooldowns: HashMap<String, u64>,
    audit: Vec<AuditEntry>,
    version: u64,
    next_request_seq: u64,
    evidence_thresholds: EvidenceThresholds,
    approval_ttl_ms: u64,
    rejection_cooldown_ms: u64,
}

/// Serialisable snapshot of all durable store state.
///
/// Thresholds and TTLs are configuration, not state — they are re-supplied
/// on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStoreSnapshot {
    pub rules: HashMap<String, Rule>,
    pub requests: HashMap<String, PromotionRequest>,
    pub cooldowns: HashMap<String, u64>,
    pub audit: Vec<AuditEntry>,
    pub version: u64,
    pub next_request_seq: u64,
}

impl RuleStore {
    /// Create a store seeded with the Prime-tier rule from `config`.
    pub fn new(config: &Config) -> Self {
        let now_ms = current_time_ms();
        let prime = Rule {
            id: PRIME_RULE_ID.into(),
            tier: RuleTier::Prime,
            content: config.prime_content.clone(),
            scope: RuleScope::Global,
            trigger: None,
            status: RuleStatus::Active,
            evidence: 0,
            created_at_ms: now_ms,
            promoted_at_ms: None,
        };

        let mut rules = HashMap::new();
        rules.insert(prime.id.clone(), prime);

        Self {
            rules,
            requests: HashMap::new(),
            cooldowns: HashMap::new(),
            audit: Vec::new(),
            version: 1,
            next_request_seq: 1,
            evidence_thresholds: config.evidence_thresholds,
            approval_ttl_ms: config.approval_ttl_ms,
            rejection_cooldown_ms: config.rejection_cooldown_ms,
        }
    }

    /// Rebuild a store from a persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CorruptSnapshot`] when the snapshot is missing
    /// its Prime rule or the Prime rule has been tampered into a mutable
    /// state — governance history is never silently reset.
    pub fn from_snapshot(snapshot: RuleStoreSnapshot, config: &Config) -> Result<Self, EngineError> {
        match snapshot.rules.get(PRIME_RULE_ID) {
            Some(prime) if prime.tier == RuleTier::Prime && prime.status == RuleStatus::Active => {}
            Some(_) => {
                return Err(EngineError::CorruptSnapshot(
                    "prime rule is not an active Prime-tier rule".into(),
                ))
            }
            None => {
                return Err(EngineError::CorruptSnapshot("prime rule missing".into()));
            }
        }

        Ok(Self {
            rules: snapshot.rules,
            requests: snapshot.requests,
            cooldowns: snapshot.cooldowns,
            audit: snapshot.audit,
            version: snapshot.version,
            next_request_seq: snapshot.next_request_seq,
            evidence_thresholds: config.evidence_thresholds,
            approval_ttl_ms: config.approval_ttl_ms,
            rejection_cooldown_ms: config.rejection_cooldown_ms,
        })
    }

    /// Snapshot all durable state for persistence.
    pub fn snapshot(&self) -> RuleStoreSnapshot {
        RuleStoreSnapshot {
            rules: self.rules.clone(),
            requests: self.requests.clone(),
            cooldowns: self.cooldowns.clone(),
            audit: self.audit.clone(),
            version: self.version,
            next_request_seq: self.next_request_seq,
        }
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve the ruleset for `ctx` at the current wall clock.
    pub fn resolve(&self, ctx: &ResolveContext) -> Result<RuleSet, ValidationError> {
        self.resolve_at(ctx, current_time_ms())
    }

    /// Resolve the ruleset for `ctx`.
    ///
    /// Pure over `(store snapshot, ctx, now_ms)`: identical inputs always
    /// yield an identical [`RuleSet`].  Ordering is a total order — tier
    /// precedence, then most recent promotion within a tier, then id — so
    /// the result is reproducible regardless of map iteration order.
    ///
    /// Rejected and rolled-back rules are excluded.  Among active rules that
    /// contradict (same tier, scope, and trigger label) only the most
    /// recently promoted survives.
    pub fn resolve_at(&self, ctx: &ResolveContext, now_ms: u64) -> Result<RuleSet, ValidationError> {
        if ctx.query.trim().is_empty() {
            return Err(ValidationError::MalformedContext("empty query".into()));
        }

        let mut matched: Vec<&Rule> = self
            .rules
            .values()
            .filter(|rule| rule.status == RuleStatus::Active)
            .filter(|rule| rule.id == PRIME_RULE_ID || rule.scope.matches(ctx))
            .collect();

        // Contradiction pruning: for each (tier, scope, trigger) group with a
        // trigger label, only the most recently promoted rule is served.
        let mut winners: HashMap<(RuleTier, RuleScope, String), &Rule> = HashMap::new();
        for rule in &matched {
            if let Some(trigger) = &rule.trigger {
                let key = (rule.tier, rule.scope.clone(), trigger.clone());
                match winners.get(&key) {
                    Some(current)
                        if (current.recency_ms(), &current.id)
                            >= (rule.recency_ms(), &rule.id) => {}
                    _ => {
                        winners.insert(key, *rule);
                    }
                }
            }
        }
        matched.retain(|rule| match &rule.trigger {
            Some(trigger) => {
                let key = (rule.tier, rule.scope.clone(), trigger.clone());
                winners.get(&key).map(|winner| winner.id == rule.id).unwrap_or(true)
            }
            None => true,
        });

        matched.sort_by(|a, b| {
            b.tier
                .cmp(&a.tier)
                .then_with(|| b.recency_ms().cmp(&a.recency_ms()))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(RuleSet {
            version: self.version,
            rules: matched.into_iter().cloned().collect(),
            resolved_at_ms: now_ms,
        })
    }

    // ------------------------------------------------------------------
    // Rule lifecycle
    // ------------------------------------------------------------------

    /// Record a newly observed behavioral pattern.
    ///
    /// Creates an active Quaternary rule with evidence 1.  Observing an
    /// identical pattern again increments the existing rule's evidence
    /// instead of duplicating it.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ConflictingRule`] when a different active rule
    /// already occupies the same (tier, scope, trigger) slot.
    pub fn observe_pattern(
        &mut self,
        content: &str,
        scope: RuleScope,
        trigger: Option<&str>,
        now_ms: u64,
    ) -> Result<String, ValidationError> {
        // Identical pattern: confirmation, not creation.
        if let Some(existing) = self.rules.values_mut().find(|rule| {
            rule.status == RuleStatus::Active
                && rule.content == content
                && rule.scope == scope
                && rule.trigger.as_deref() == trigger
        }) {
            existing.evidence += 1;
            return Ok(existing.id.clone());
        }

        if let Some(trigger) = trigger {
            if let Some(conflict) = self.rules.values().find(|rule| {
                rule.status == RuleStatus::Active
                    && rule.tier == RuleTier::Quaternary
                    && rule.scope == scope
                    && rule.trigger.as_deref() == Some(trigger)
            }) {
                return Err(ValidationError::ConflictingRule(
                    digest_id(content, &scope, Some(trigger)),
                    conflict.id.clone(),
                ));
            }
        }

        let id = digest_id(content, &scope, trigger);
        let rule = Rule {
            id: id.clone(),
            tier: RuleTier::Quaternary,
            content: content.into(),
            scope,
            trigger: trigger.map(Into::into),
            status: RuleStatus::Active,
            evidence: 1,
            created_at_ms: now_ms,
            promoted_at_ms: None,
        };
        self.rules.insert(id.clone(), rule);
        self.version += 1;
        Ok(id)
    }

    /// Increment a rule's evidence count after a repeated confirmation.
    pub fn add_evidence(&mut self, rule_id: &str) -> Result<u32, ValidationError> {
        let rule = self
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| ValidationError::UnknownRule(rule_id.into()))?;
        if rule.status != RuleStatus::Active {
            return Err(ValidationError::RuleNotActive(rule_id.into()));
        }
        rule.evidence += 1;
        Ok(rule.evidence)
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Submit a request to elevate `rule_id` to `to_tier`.
    ///
    /// Validates the one-tier-at-a-time rule and the evidence threshold for
    /// the target tier.  Submitting while an identical request is already
    /// pending returns the pending request unchanged.
    ///
    /// # Errors
    ///
    /// * [`ValidationError::InvalidTransition`] — `to_tier` is not exactly
    ///   one tier above the rule's current tier.
    /// * [`ValidationError::InsufficientEvidence`] — below the configured
    ///   threshold for `to_tier`.
    /// * [`ValidationError::PrimeImmutable`] — the rule is already Prime, or
    ///   already Secondary: the Prime tier holds only the seeded directive
    ///   and is never a promotion target.
    /// * [`ValidationError::CooldownActive`] — identical evidence was
    ///   rejected within the cooldown window.
    pub fn submit_promotion(
        &mut self,
        rule_id: &str,
        to_tier: RuleTier,
        now_ms: u64,
    ) -> Result<PromotionRequest, ValidationError> {
        let rule = self
            .rules
            .get(rule_id)
            .ok_or_else(|| ValidationError::UnknownRule(rule_id.into()))?;
        if rule.status != RuleStatus::Active {
            return Err(ValidationError::RuleNotActive(rule_id.into()));
        }

        let from_tier = rule.tier;
        let expected = match from_tier.next_up() {
            Some(tier) => tier,
            None => return Err(ValidationError::PrimeImmutable(rule_id.into())),
        };
        if to_tier != expected {
            return Err(ValidationError::InvalidTransition { from: from_tier, to: to_tier });
        }

        let need = self.evidence_thresholds.required_for(to_tier);
        if rule.evidence < need {
            return Err(ValidationError::InsufficientEvidence {
                have: rule.evidence,
                need,
                tier: to_tier,
            });
        }

        let digest = evidence_digest(rule);
        let cooldown_key = format!("{}:{}", rule_id, digest);
        if let Some(&until_ms) = self.cooldowns.get(&cooldown_key) {
            if now_ms < until_ms {
                return Err(ValidationError::CooldownActive { until_ms });
            }
        }

        // Idempotent resubmission while a matching request is pending.
        if let Some(pending) = self.requests.values().find(|req| {
            req.rule_id == rule_id
                && req.status == ApprovalStatus::Pending
                && req.evidence_digest == digest
        }) {
            return Ok(pending.clone());
        }

        let request = PromotionRequest {
            id: format!("preq-{:06}", self.next_request_seq),
            rule_id: rule_id.into(),
            from_tier,
            to_tier,
            evidence: rule.evidence,
            evidence_digest: digest,
            status: ApprovalStatus::Pending,
            requested_at_ms: now_ms,
            resolved_at_ms: None,
        };
        self.next_request_seq += 1;
        self.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    /// Apply a human approval or rejection to a pending request.
    ///
    /// Idempotent: a request that is already resolved absorbs duplicate and
    /// late signals without further effect.  On approval the rule advances
    /// by exactly one tier; returns `true` when the rule actually moved.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidTransition`] when the stored request spans
    /// more than a one-tier gap (possible only with a tampered snapshot).
    pub fn apply_approval(
        &mut self,
        request_id: &str,
        approved: bool,
        now_ms: u64,
    ) -> Result<bool, ValidationError> {
        let request = self
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownRequest(request_id.into()))?;

        if request.status != ApprovalStatus::Pending {
            return Ok(false);
        }

        if request.from_tier.next_up() != Some(request.to_tier) {
            return Err(ValidationError::InvalidTransition {
                from: request.from_tier,
                to: request.to_tier,
            });
        }

        if !approved {
            let cooldown_key = format!("{}:{}", request.rule_id, request.evidence_digest);
            self.cooldowns
                .insert(cooldown_key, now_ms + self.rejection_cooldown_ms);
            self.resolve_request(request_id, ApprovalStatus::Rejected, now_ms);
            self.audit.push(AuditEntry {
                timestamp_ms: now_ms,
                rule_id: request.rule_id,
                action: AuditAction::PromotionRejected,
            });
            return Ok(false);
        }

        // The rule may have been rolled back while the request was pending;
        // the approval then lands as a rejection.
        let advanced = match self.rules.get_mut(&request.rule_id) {
            Some(rule) if rule.status == RuleStatus::Active && rule.tier == request.from_tier => {
                rule.tier = request.to_tier;
                rule.promoted_at_ms = Some(now_ms);
                true
            }
            _ => false,
        };

        if advanced {
            self.version += 1;
            self.resolve_request(request_id, ApprovalStatus::Approved, now_ms);
            self.audit.push(AuditEntry {
                timestamp_ms: now_ms,
                rule_id: request.rule_id,
                action: AuditAction::PromotionApplied { to_tier: request.to_tier },
            });
        } else {
            self.resolve_request(request_id, ApprovalStatus::Rejected, now_ms);
            self.audit.push(AuditEntry {
                timestamp_ms: now_ms,
                rule_id: request.rule_id,
                action: AuditAction::PromotionRejected,
            });
        }
        Ok(advanced)
    }

    /// Expire pending requests whose TTL has elapsed.
    ///
    /// Expired requests carry rejection semantics: the evidence digest
    /// enters the cooldown window.  Returns the expired request ids in
    /// deterministic (sorted) order.
    pub fn expire_requests(&mut self, now_ms: u64) -> Vec<String> {
        let mut expired: Vec<String> = self
            .requests
            .values()
            .filter(|req| {
                req.status == ApprovalStatus::Pending
                    && now_ms >= req.requested_at_ms + self.approval_ttl_ms
            })
            .map(|req| req.id.clone())
            .collect();
        expired.sort();

        for request_id in &expired {
            let (rule_id, digest) = {
                let req = &self.requests[request_id];
                (req.rule_id.clone(), req.evidence_digest.clone())
            };
            self.cooldowns
                .insert(format!("{}:{}", rule_id, digest), now_ms + self.rejection_cooldown_ms);
            self.resolve_request(request_id, ApprovalStatus::Expired, now_ms);
            self.audit.push(AuditEntry {
                timestamp_ms: now_ms,
                rule_id,
                action: AuditAction::PromotionExpired,
            });
        }
        expired
    }

    fn resolve_request(&mut self, request_id: &str, status: ApprovalStatus, now_ms: u64) {
        if let Some(request) = self.requests.get_mut(request_id) {
            request.status = status;
            request.resolved_at_ms = Some(now_ms);
        }
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Immediately deactivate a rule after a detected violation.
    ///
    /// Callable regardless of tier except Prime.  Returns `true` when the
    /// rule transitioned to [`RuleStatus::RolledBack`] by this call, `false`
    /// when it was already rolled back.
    pub fn rollback(
        &mut self,
        rule_id: &str,
        reason: &str,
        now_ms: u64,
    ) -> Result<bool, ValidationError> {
        let rule = self
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| ValidationError::UnknownRule(rule_id.into()))?;
        if rule.tier == RuleTier::Prime {
            return Err(ValidationError::PrimeImmutable(rule_id.into()));
        }
        if rule.status == RuleStatus::RolledBack {
            return Ok(false);
        }

        rule.status = RuleStatus::RolledBack;
        self.version += 1;
        self.audit.push(AuditEntry {
            timestamp_ms: now_ms,
            rule_id: rule_id.into(),
            action: AuditAction::Rollback { reason: reason.into() },
        });
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Retrieve a rule by id.
    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.get(rule_id)
    }

    /// All rules, ordered by id for reproducible iteration.
    pub fn rules(&self) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.rules.values().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Retrieve a promotion request by id.
    pub fn request(&self, request_id: &str) -> Option<&PromotionRequest> {
        self.requests.get(request_id)
    }

    /// The append-only audit log, oldest first.
    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Monotonic store version; bumps on every serving-relevant mutation.
    pub fn version(&self) -> u64 {
        self.version
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Deterministic rule id derived from the pattern identity.
fn digest_id(content: &str, scope: &RuleScope, trigger: Option<&str>) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let payload = format!("{}:{:?}:{}", content, scope, trigger.unwrap_or(""));
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    format!("rule-{:012x}", hasher.finish() & 0xffff_ffff_ffff)
}

/// Digest over the evidence a promotion request was submitted with.
///
/// Two submissions with the same rule, evidence count, and content produce
/// the same digest, which is what the rejection cooldown keys on.
fn evidence_digest(rule: &Rule) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let payload = format!("{}:{}:{}", rule.id, rule.evidence, rule.content);
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
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

    fn ctx(query: &str) -> ResolveContext {
        ResolveContext { query: query.into(), ..ResolveContext::default() }
    }

    fn store() -> RuleStore {
        RuleStore::new(&Config::default())
    }

    /// Drive a fresh rule up to Tertiary via the real promotion path.
    fn tertiary_rule(store: &mut RuleStore, content: &str) -> String {
        let id = store
            .observe_pattern(content, RuleScope::Global, None, 100)
            .unwrap();
        store.add_evidence(&id).unwrap(); // evidence = 2 (threshold for Tertiary)
        let req = store.submit_promotion(&id, RuleTier::Tertiary, 200).unwrap();
        assert!(store.apply_approval(&req.id, true, 300).unwrap());
        id
    }

    #[test]
    fn test_resolve_is_pure() {
        let mut store = store();
        store
            .observe_pattern("cache tool results", RuleScope::Global, None, 100)
            .unwrap();
        store
            .observe_pattern("verify claims", RuleScope::User("ada".into()), None, 110)
            .unwrap();

        let context = ResolveContext {
            query: "anything".into(),
            user_id: Some("ada".into()),
            ..ResolveContext::default()
        };
        let first = store.resolve_at(&context, 500).unwrap();
        let second = store.resolve_at(&context, 500).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_orders_prime_first() {
        let mut store = store();
        store
            .observe_pattern("a pattern", RuleScope::Global, None, 100)
            .unwrap();
        let set = store.resolve_at(&ctx("q"), 200).unwrap();
        assert_eq!(set.rules[0].id, PRIME_RULE_ID);
        assert_eq!(set.rules[0].tier, RuleTier::Prime);
    }

    #[test]
    fn test_resolve_scope_matching() {
        let mut store = store();
        store
            .observe_pattern("user rule", RuleScope::User("ada".into()), None, 100)
            .unwrap();
        store
            .observe_pattern("domain rule", RuleScope::Domain("finance".into()), None, 100)
            .unwrap();

        let set = store.resolve_at(&ctx("q"), 200).unwrap();
        // Only the prime matches a context with no user or domain.
        assert_eq!(set.rules.len(), 1);

        let set = store
            .resolve_at(
                &ResolveContext {
                    query: "q".into(),
                    user_id: Some("ada".into()),
                    domain: Some("finance".into()),
                    ..ResolveContext::default()
                },
                200,
            )
            .unwrap();
        assert_eq!(set.rules.len(), 3);
    }

    #[test]
    fn test_resolve_excludes_rolled_back_rules() {
        let mut store = store();
        let id = store
            .observe_pattern("fragile rule", RuleScope::Global, None, 100)
            .unwrap();
        store.rollback(&id, "violation", 200).unwrap();

        let set = store.resolve_at(&ctx("q"), 300).unwrap();
        assert!(set.rules.iter().all(|rule| rule.id != id));
    }

    #[test]
    fn test_resolve_contradiction_keeps_most_recent() {
        let mut store = store();
        let older = tertiary_rule(&mut store, "prefer brevity");
        // A later rule at the same tier/scope/trigger wins.
        let newer = tertiary_rule(&mut store, "prefer detail");
        {
            let older_rule = store.rules.get_mut(&older).unwrap();
            older_rule.trigger = Some("verbosity".into());
            older_rule.promoted_at_ms = Some(300);
        }
        {
            let newer_rule = store.rules.get_mut(&newer).unwrap();
            newer_rule.trigger = Some("verbosity".into());
            newer_rule.promoted_at_ms = Some(400);
        }

        let set = store.resolve_at(&ctx("q"), 500).unwrap();
        assert!(set.rules.iter().any(|rule| rule.id == newer));
        assert!(set.rules.iter().all(|rule| rule.id != older));
    }

    #[test]
    fn test_resolve_rejects_malformed_context() {
        let store = store();
        let err = store.resolve_at(&ctx("   "), 100).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedContext(_)));
    }

    #[test]
    fn test_observe_identical_pattern_increments_evidence() {
        let mut store = store();
        let first = store
            .observe_pattern("batch updates", RuleScope::Global, None, 100)
            .unwrap();
        let second = store
            .observe_pattern("batch updates", RuleScope::Global, None, 200)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.rule(&first).unwrap().evidence, 2);
    }

    #[test]
    fn test_observe_conflicting_trigger_is_rejected() {
        let mut store = store();
        store
            .observe_pattern("answer tersely", RuleScope::Global, Some("style"), 100)
            .unwrap();
        let err = store
            .observe_pattern("answer at length", RuleScope::Global, Some("style"), 200)
            .unwrap_err();
        assert!(matches!(err, ValidationError::ConflictingRule(_, _)));
    }

    #[test]
    fn test_promotion_evidence_scenario() {
        // Thresholds: Tertiary→Secondary requires 3 confirmations.
        let mut store = store();
        let id = tertiary_rule(&mut store, "cache aggressively");
        assert_eq!(store.rule(&id).unwrap().evidence, 2);

        let err = store
            .submit_promotion(&id, RuleTier::Secondary, 400)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InsufficientEvidence { have: 2, need: 3, tier: RuleTier::Secondary }
        );

        store.add_evidence(&id).unwrap();
        let req = store.submit_promotion(&id, RuleTier::Secondary, 500).unwrap();
        assert_eq!(req.status, ApprovalStatus::Pending);

        assert!(store.apply_approval(&req.id, true, 600).unwrap());
        assert_eq!(store.rule(&id).unwrap().tier, RuleTier::Secondary);
        assert_eq!(store.rule(&id).unwrap().promoted_at_ms, Some(600));
    }

    #[test]
    fn test_promotion_skipping_a_tier_fails() {
        let mut store = store();
        let id = store
            .observe_pattern("shortcut", RuleScope::Global, None, 100)
            .unwrap();
        store.add_evidence(&id).unwrap();
        store.add_evidence(&id).unwrap();

        let err = store
            .submit_promotion(&id, RuleTier::Secondary, 200)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidTransition {
                from: RuleTier::Quaternary,
                to: RuleTier::Secondary
            }
        );
    }

    #[test]
    fn test_prime_rule_cannot_be_promoted_or_rolled_back() {
        let mut store = store();
        assert!(matches!(
            store.submit_promotion(PRIME_RULE_ID, RuleTier::Prime, 100),
            Err(ValidationError::PrimeImmutable(_))
        ));
        assert!(matches!(
            store.rollback(PRIME_RULE_ID, "any", 100),
            Err(ValidationError::PrimeImmutable(_))
        ));
        // Prime content and status are untouched by the refused calls.
        let prime = store.rule(PRIME_RULE_ID).unwrap();
        assert_eq!(prime.status, RuleStatus::Active);
        assert_eq!(prime.tier, RuleTier::Prime);
    }

    #[test]
    fn test_secondary_is_the_promotion_ceiling() {
        let mut store = store();
        let id = store
            .observe_pattern("escalating pattern", RuleScope::Global, None, 100)
            .unwrap();
        for _ in 0..5 {
            store.add_evidence(&id).unwrap();
        }

        let req = store.submit_promotion(&id, RuleTier::Tertiary, 200).unwrap();
        assert!(store.apply_approval(&req.id, true, 210).unwrap());
        let req = store.submit_promotion(&id, RuleTier::Secondary, 300).unwrap();
        assert!(store.apply_approval(&req.id, true, 310).unwrap());
        assert_eq!(store.rule(&id).unwrap().tier, RuleTier::Secondary);

        // No elevation into Prime: the seeded directive stays the only
        // Prime-tier rule and keeps serving first.
        assert!(matches!(
            store.submit_promotion(&id, RuleTier::Prime, 400),
            Err(ValidationError::PrimeImmutable(_))
        ));
        let set = store.resolve_at(&ctx("q"), 500).unwrap();
        assert_eq!(
            set.rules.iter().filter(|r| r.tier == RuleTier::Prime).count(),
            1
        );
        assert_eq!(set.rules[0].id, PRIME_RULE_ID);

        // A rule at the ceiling remains inside the rollback safety net.
        assert!(store.rollback(&id, "contradicted prime directive", 600).unwrap());
    }

    #[test]
    fn test_apply_approval_is_idempotent() {
        let mut store = store();
        let id = store
            .observe_pattern("pattern", RuleScope::Global, None, 100)
            .unwrap();
        store.add_evidence(&id).unwrap();
        let req = store.submit_promotion(&id, RuleTier::Tertiary, 200).unwrap();

        assert!(store.apply_approval(&req.id, true, 300).unwrap());
        // Duplicate signal: no further movement.
        assert!(!store.apply_approval(&req.id, true, 400).unwrap());
        // Conflicting late signal: also absorbed.
        assert!(!store.apply_approval(&req.id, false, 500).unwrap());
        assert_eq!(store.rule(&id).unwrap().tier, RuleTier::Tertiary);
    }

    #[test]
    fn test_rejected_identical_evidence_hits_cooldown() {
        let mut store = store();
        let id = store
            .observe_pattern("pattern", RuleScope::Global, None, 100)
            .unwrap();
        store.add_evidence(&id).unwrap();

        let req = store.submit_promotion(&id, RuleTier::Tertiary, 200).unwrap();
        store.apply_approval(&req.id, false, 300).unwrap();

        let err = store
            .submit_promotion(&id, RuleTier::Tertiary, 400)
            .unwrap_err();
        assert!(matches!(err, ValidationError::CooldownActive { .. }));

        // New evidence changes the digest; resubmission is allowed.
        store.add_evidence(&id).unwrap();
        assert!(store.submit_promotion(&id, RuleTier::Tertiary, 500).is_ok());

        // And once the cooldown elapses, even identical evidence may retry.
        let cooldown = Config::default().rejection_cooldown_ms;
        let mut late_store = RuleStore::new(&Config::default());
        let late_id = late_store
            .observe_pattern("pattern", RuleScope::Global, None, 100)
            .unwrap();
        late_store.add_evidence(&late_id).unwrap();
        let late_req = late_store
            .submit_promotion(&late_id, RuleTier::Tertiary, 200)
            .unwrap();
        late_store.apply_approval(&late_req.id, false, 300).unwrap();
        assert!(late_store
            .submit_promotion(&late_id, RuleTier::Tertiary, 300 + cooldown + 1)
            .is_ok());
    }

    #[test]
    fn test_pending_request_expires_to_rejected_semantics() {
        let config = Config::default();
        let mut store = RuleStore::new(&config);
        let id = store
            .observe_pattern("pattern", RuleScope::Global, None, 100)
            .unwrap();
        store.add_evidence(&id).unwrap();
        let req = store.submit_promotion(&id, RuleTier::Tertiary, 200).unwrap();

        let expired = store.expire_requests(200 + config.approval_ttl_ms);
        assert_eq!(expired, vec![req.id.clone()]);
        assert_eq!(store.request(&req.id).unwrap().status, ApprovalStatus::Expired);

        // Rejection semantics: identical evidence is now in cooldown.
        let err = store
            .submit_promotion(&id, RuleTier::Tertiary, 200 + config.approval_ttl_ms + 1)
            .unwrap_err();
        assert!(matches!(err, ValidationError::CooldownActive { .. }));
    }

    #[test]
    fn test_rollback_records_audit_entry() {
        let mut store = store();
        let id = store
            .observe_pattern("pattern", RuleScope::Global, None, 100)
            .unwrap();
        assert!(store.rollback(&id, "contradicted prime", 200).unwrap());
        assert!(!store.rollback(&id, "again", 300).unwrap());

        let rollbacks: Vec<_> = store
            .audit()
            .iter()
            .filter(|entry| matches!(entry.action, AuditAction::Rollback { .. }))
            .collect();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].rule_id, id);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let config = Config::default();
        let mut store = RuleStore::new(&config);
        tertiary_rule(&mut store, "survives persistence");

        let snapshot = store.snapshot();
        let restored = RuleStore::from_snapshot(snapshot, &config).unwrap();
        assert_eq!(restored.version(), store.version());
        assert_eq!(
            restored.resolve_at(&ctx("q"), 999).unwrap(),
            store.resolve_at(&ctx("q"), 999).unwrap()
        );
    }

    #[test]
    fn test_snapshot_without_prime_fails_fast() {
        let config = Config::default();
        let store = RuleStore::new(&config);
        let mut snapshot = store.snapshot();
        snapshot.rules.remove(PRIME_RULE_ID);

        assert!(matches!(
            RuleStore::from_snapshot(snapshot, &config),
            Err(EngineError::CorruptSnapshot(_))
        ));
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared data types used across all engine sub-systems.
//!
//! All types implement [`Clone`], [`Debug`], [`serde::Serialize`], and
//! [`serde::Deserialize`] so they can be serialised to JSON, persisted, and
//! emitted to telemetry sinks without additional conversion steps.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Rule tiers
// ---------------------------------------------------------------------------

/// Four-level graduated trust hierarchy for behavioral rules.
///
/// Each variant's discriminant value (`repr(u8)`) reflects its position in
/// the hierarchy.  Higher numeric values represent higher trust and higher
/// precedence during resolution.  Rules enter the store at
/// [`RuleTier::Quaternary`] and may only move up one tier per approved
/// promotion.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::types::RuleTier;
///
/// assert!(RuleTier::Prime > RuleTier::Secondary);
/// assert_eq!(RuleTier::Quaternary as u8, 0);
/// assert_eq!(RuleTier::Tertiary.next_up(), Some(RuleTier::Secondary));
/// assert_eq!(RuleTier::Secondary.next_up(), None);
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleTier {
    /// Observed pattern with minimal accumulated evidence.
    Quaternary = 0,
    /// Confirmed pattern, still scoped and revocable.
    Tertiary = 1,
    /// Established rule applied broadly, revocable.
    Secondary = 2,
    /// The immutable, highest-priority tier.  Never subject to promotion or
    /// rollback mutation.
    Prime = 3,
}

impl RuleTier {
    /// Human-readable display name for logging and telemetry.
    pub fn display_name(self) -> &'static str {
        match self {
            RuleTier::Quaternary => "Quaternary",
            RuleTier::Tertiary   => "Tertiary",
            RuleTier::Secondary  => "Secondary",
            RuleTier::Prime      => "Prime",
        }
    }

    /// Try to construct a [`RuleTier`] from its raw `u8` discriminant.
    ///
    /// Returns `None` for values outside `0..=3`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RuleTier::Quaternary),
            1 => Some(RuleTier::Tertiary),
            2 => Some(RuleTier::Secondary),
            3 => Some(RuleTier::Prime),
            _ => None,
        }
    }

    /// The tier a promotion from this tier must target.
    ///
    /// Promotion proceeds strictly one tier at a time:
    /// Quaternary → Tertiary → Secondary.  The Prime tier holds exactly one
    /// rule, seeded at store creation, and is never a promotion target, so
    /// Secondary is the ceiling for learned rules.
    pub fn next_up(self) -> Option<Self> {
        match self {
            RuleTier::Quaternary => Some(RuleTier::Tertiary),
            RuleTier::Tertiary   => Some(RuleTier::Secondary),
            RuleTier::Secondary  => None,
            RuleTier::Prime      => None,
        }
    }
}

/// Where a rule applies.
///
/// Scope matching against a [`ResolveContext`] is exact: a `User` rule only
/// matches when the context carries the same user id, a `Domain` rule only
/// when the context carries the same domain label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleScope {
    /// Applies to every interaction.
    Global,
    /// Applies only to interactions for the named user.
    User(String),
    /// Applies only to interactions within the named domain.
    Domain(String),
}

impl RuleScope {
    /// Whether this scope matches the given resolution context.
    pub fn matches(&self, ctx: &ResolveContext) -> bool {
        match self {
            RuleScope::Global => true,
            RuleScope::User(user) => ctx.user_id.as_deref() == Some(user.as_str()),
            RuleScope::Domain(domain) => ctx.domain.as_deref() == Some(domain.as_str()),
        }
    }
}

/// Lifecycle status of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleStatus {
    /// Served by `resolve()`.
    Active,
    /// Created but not yet confirmed for serving.
    Pending,
    /// Explicitly rejected; never served.
    Rejected,
    /// Demoted/deactivated after a safety violation; never served.
    RolledBack,
}

/// A single behavioral rule held by the store.
///
/// `content` is an opaque payload — the engine orders, caches, promotes, and
/// renders it but never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier, unique within the store.
    pub id: String,
    /// Current trust tier.
    pub tier: RuleTier,
    /// Opaque content payload.
    pub content: String,
    /// Where the rule applies.
    pub scope: RuleScope,
    /// Optional trigger label.  Two active rules sharing (tier, scope,
    /// trigger) are treated as contradictory; only the most recently
    /// promoted survives resolution.
    pub trigger: Option<String>,
    /// Lifecycle status.
    pub status: RuleStatus,
    /// Number of observed confirmations.
    pub evidence: u32,
    /// Unix epoch milliseconds at which the rule was created.
    pub created_at_ms: u64,
    /// Unix epoch milliseconds of the most recent promotion, if any.
    pub promoted_at_ms: Option<u64>,
}

impl Rule {
    /// Timestamp used for recency ordering: the last promotion, or creation
    /// when the rule was never promoted.
    pub fn recency_ms(&self) -> u64 {
        self.promoted_at_ms.unwrap_or(self.created_at_ms)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The interaction context a ruleset is resolved against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveContext {
    /// Free-text description of what the interaction is about.  Used for
    /// scope-independent similarity search at the Dynamic level.
    pub query: String,
    /// User the interaction belongs to, if known.
    pub user_id: Option<String>,
    /// Domain label for the interaction, if known.
    pub domain: Option<String>,
    /// Tool ids whose availability the session cache should snapshot.
    pub tool_ids: Vec<String>,
}

/// The ordered result of resolving all matching active rules for a context.
///
/// Invariant: exactly one Prime-tier entry is present and it is always the
/// first entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Store version this set was resolved from.  Lets caches detect
    /// staleness without re-resolving.
    pub version: u64,
    /// Rules in serving order: tier precedence, then most recent promotion
    /// within a tier, then id.
    pub rules: Vec<Rule>,
    /// Unix epoch milliseconds at which the set was resolved.
    pub resolved_at_ms: u64,
}

impl RuleSet {
    /// The Prime-tier rule.
    ///
    /// Every set produced by resolution has one, placed first; `None` can
    /// only occur for a hand-built or deserialised empty set.
    pub fn prime(&self) -> Option<&Rule> {
        self.rules.first().filter(|r| r.tier == RuleTier::Prime)
    }
}

// ---------------------------------------------------------------------------
// Tool availability
// ---------------------------------------------------------------------------

/// Health classification reported by a tool probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolHealth {
    Available,
    Degraded,
    Unavailable,
}

/// A cached tool-availability snapshot entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    /// Probe outcome.
    pub health: ToolHealth,
    /// Probe round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Unix epoch milliseconds at which the probe ran.
    pub checked_at_ms: u64,
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Engine component a token spend is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentTag {
    /// Directive/ruleset payload delivery.
    Directive,
    /// Tool probing and tool operations.
    Tools,
    /// Memory and cache queries.
    Memory,
    /// Response generation by the consuming model.
    Response,
}

impl ComponentTag {
    pub fn display_name(self) -> &'static str {
        match self {
            ComponentTag::Directive => "directive",
            ComponentTag::Tools     => "tools",
            ComponentTag::Memory    => "memory",
            ComponentTag::Response  => "response",
        }
    }
}

/// A single recorded token spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    /// Unix epoch milliseconds at which the spend was recorded.
    pub timestamp_ms: u64,
    /// Component the spend is attributed to.
    pub component: ComponentTag,
    /// Tokens consumed.
    pub tokens: u64,
}

/// Payload rendering level selected by the budget circuit breaker.
///
/// The five budget levels form a severity ladder; the monitor only ever
/// moves down it within a day.  [`OptimizationLevel::Dynamic`] sits outside
/// the ladder: it is reachable only by operator pinning, never by automatic
/// downgrade.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::types::OptimizationLevel;
///
/// assert!(OptimizationLevel::Skeleton.auto_rank() > OptimizationLevel::Standard.auto_rank());
/// assert_eq!(OptimizationLevel::Dynamic.auto_rank(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// Full ruleset, verbatim.
    Standard,
    /// All rules, compacted content.
    Optimized,
    /// Prime and Secondary tiers only, compacted.
    Lightweight,
    /// Prime verbatim plus a conservation marker.
    Emergency,
    /// Prime tier alone.
    Skeleton,
    /// Context-filtered subset via similarity search, Prime force-included.
    Dynamic,
}

impl OptimizationLevel {
    /// Position on the automatic severity ladder, or `None` for levels the
    /// monitor never selects on its own.
    pub fn auto_rank(self) -> Option<u8> {
        match self {
            OptimizationLevel::Standard    => Some(0),
            OptimizationLevel::Optimized   => Some(1),
            OptimizationLevel::Lightweight => Some(2),
            OptimizationLevel::Emergency   => Some(3),
            OptimizationLevel::Skeleton    => Some(4),
            OptimizationLevel::Dynamic     => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            OptimizationLevel::Standard    => "standard",
            OptimizationLevel::Optimized   => "optimized",
            OptimizationLevel::Lightweight => "lightweight",
            OptimizationLevel::Emergency   => "emergency",
            OptimizationLevel::Skeleton    => "skeleton",
            OptimizationLevel::Dynamic     => "dynamic",
        }
    }
}

/// Per-component token totals for the current day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTotals {
    pub directive: u64,
    pub tools: u64,
    pub memory: u64,
    pub response: u64,
}

impl ComponentTotals {
    /// Add a spend to the named component's bucket.
    pub fn add(&mut self, component: ComponentTag, tokens: u64) {
        match component {
            ComponentTag::Directive => self.directive += tokens,
            ComponentTag::Tools => self.tools += tokens,
            ComponentTag::Memory => self.memory += tokens,
            ComponentTag::Response => self.response += tokens,
        }
    }
}

/// Shared budget state tracked by the monitor and persisted at checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    /// Tokens allowed per day.
    pub daily_budget: u64,
    /// Tokens consumed since the current day started.
    pub consumed_today: u64,
    /// Today's consumption broken down by component.
    pub component_totals: ComponentTotals,
    /// Currently served optimization level.
    pub level: OptimizationLevel,
    /// Unix epoch milliseconds at which the current day bucket began.
    pub day_start_ms: u64,
    /// Unix epoch milliseconds of the last level change, if any.
    pub last_level_change_ms: Option<u64>,
    /// Operator-pinned level applied at day reset instead of Standard.
    pub pinned: Option<OptimizationLevel>,
}

impl BudgetState {
    /// Consumed-today as a fraction of the daily budget.
    pub fn utilization(&self) -> f64 {
        if self.daily_budget == 0 {
            return 0.0;
        }
        self.consumed_today as f64 / self.daily_budget as f64
    }
}

/// Severity of a budget alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An operator-facing budget alert with a recommended action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub level: AlertLevel,
    pub message: String,
    pub recommended_action: String,
    pub timestamp_ms: u64,
}

/// Emitted by the monitor when the served level changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub from: OptimizationLevel,
    pub to: OptimizationLevel,
    /// Utilization ratio at the moment of the change.
    pub utilization: f64,
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Approval state of a promotion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Awaiting a human decision.
    Pending,
    /// Approved; the rule advanced one tier.
    Approved,
    /// Rejected by a human.
    Rejected,
    /// No response arrived within the TTL.  Carries rejection semantics.
    Expired,
}

/// A request to elevate a rule by exactly one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    /// Stable request identifier.
    pub id: String,
    /// Rule the request concerns.
    pub rule_id: String,
    /// Tier at submission time.
    pub from_tier: RuleTier,
    /// Target tier; always exactly one above `from_tier`.
    pub to_tier: RuleTier,
    /// Evidence count captured at submission.
    pub evidence: u32,
    /// Digest over (rule id, evidence, content) at submission.  A rejected
    /// request cannot be resubmitted with an identical digest before the
    /// rejection cooldown elapses.
    pub evidence_digest: String,
    /// Approval state.
    pub status: ApprovalStatus,
    /// Unix epoch milliseconds at submission.
    pub requested_at_ms: u64,
    /// Unix epoch milliseconds at approval/rejection/expiry, if resolved.
    pub resolved_at_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// What a rule-store audit entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditAction {
    PromotionApplied { to_tier: RuleTier },
    PromotionRejected,
    PromotionExpired,
    Rollback { reason: String },
}

/// An immutable record of a rule-store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix epoch milliseconds at which the mutation was applied.
    pub timestamp_ms: u64,
    /// Rule the mutation concerned.
    pub rule_id: String,
    /// The mutation.
    pub action: AuditAction,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A single rendered rule inside a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    /// Source rule id, or a synthetic id for marker entries.
    pub rule_id: String,
    /// Tier of the source rule.
    pub tier: RuleTier,
    /// Rendered content (verbatim or compacted, depending on level).
    pub content: String,
}

/// The concrete payload handed to the consuming model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Level the payload was rendered at.  May differ from the requested
    /// level when a Dynamic selection degraded to its fallback form.
    pub level: OptimizationLevel,
    /// Entries in serving order; the Prime entry is always first.
    pub entries: Vec<PayloadEntry>,
    /// Rough token estimate (1 token ≈ 4 characters).
    pub token_estimate: u64,
}

impl Payload {
    /// Whether the payload contains the given content verbatim.
    pub fn contains_verbatim(&self, content: &str) -> bool {
        self.entries.iter().any(|entry| entry.content == content)
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Structured events emitted for external observability pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    LevelChanged {
        from: OptimizationLevel,
        to: OptimizationLevel,
        utilization: f64,
    },
    SafetyViolation {
        rule_id: String,
        reason: String,
    },
    PromotionApproved {
        rule_id: String,
        to_tier: RuleTier,
    },
    CacheInvalidated {
        session_id: String,
        reason: String,
    },
}

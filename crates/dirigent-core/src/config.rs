// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Engine-level configuration.
//!
//! [`Config`] is the single entry point for tuning the engine at
//! construction time.  All numeric values are configurable defaults, not
//! contracts — correctness never depends on a particular threshold or
//! evidence count.

use serde::{Deserialize, Serialize};

use crate::types::RuleTier;

/// Utilization ratios at which the budget monitor downgrades the served
/// optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    /// Standard → Optimized.
    pub optimized: f64,
    /// Optimized → Lightweight.
    pub lightweight: f64,
    /// Lightweight → Emergency.
    pub emergency: f64,
    /// Emergency → Skeleton.
    pub skeleton: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            optimized: 0.50,
            lightweight: 0.80,
            emergency: 0.95,
            skeleton: 0.98,
        }
    }
}

/// Confirmations required before a promotion *into* each tier may be
/// submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceThresholds {
    /// Quaternary → Tertiary.
    pub tertiary: u32,
    /// Tertiary → Secondary.
    pub secondary: u32,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        Self { tertiary: 2, secondary: 3 }
    }
}

impl EvidenceThresholds {
    /// The confirmation count required to promote into `tier`.
    ///
    /// Quaternary is the entry tier; nothing promotes into it.  Prime holds
    /// only the seeded directive and is never a promotion target, so no
    /// evidence count can reach it.
    pub fn required_for(&self, tier: RuleTier) -> u32 {
        match tier {
            RuleTier::Quaternary => 0,
            RuleTier::Tertiary   => self.tertiary,
            RuleTier::Secondary  => self.secondary,
            RuleTier::Prime      => u32::MAX,
        }
    }
}

/// Top-level configuration for the engine.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::config::Config;
///
/// let config = Config {
///     daily_budget: 25_000,
///     ..Config::default()
/// };
/// assert_eq!(config.top_k, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Content of the Prime-tier rule seeded at store creation.
    pub prime_content: String,

    /// Tokens allowed per day before the circuit breaker reaches Skeleton.
    pub daily_budget: u64,

    /// Utilization ratios for automatic level downgrades.
    pub level_thresholds: LevelThresholds,

    /// Confirmations required per promotion target tier.
    pub evidence_thresholds: EvidenceThresholds,

    /// Milliseconds a promotion request may stay Pending before it expires.
    pub approval_ttl_ms: u64,

    /// Milliseconds an identical-evidence resubmission is refused after a
    /// rejection.
    pub rejection_cooldown_ms: u64,

    /// Buffered learning deltas that trigger an early session flush.
    pub delta_flush_size: usize,

    /// Chunks retrieved by a Dynamic-level similarity search.
    pub top_k: usize,

    /// Minimum similarity score a Dynamic-level chunk must reach.
    pub min_similarity: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prime_content: "Use available tools proactively; mark verified vs assumed claims; \
                            cache operations for efficiency; direct task focus."
                .into(),
            daily_budget: 50_000,
            level_thresholds: LevelThresholds::default(),
            evidence_thresholds: EvidenceThresholds::default(),
            approval_ttl_ms: 86_400_000,
            rejection_cooldown_ms: 3_600_000,
            delta_flush_size: 32,
            top_k: 5,
            min_similarity: 0.30,
        }
    }
}

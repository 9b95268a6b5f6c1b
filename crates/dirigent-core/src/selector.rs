// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Payload rendering for each optimization level.
//!
//! [`OptimizationSelector`] turns a resolved [`RuleSet`] into the concrete
//! [`Payload`] handed to the consuming model.  Every level force-includes
//! the Prime rule verbatim as the first entry; the levels differ in which
//! other rules survive and whether their content is compacted.
//!
//! The Dynamic level is the only one that consults an external collaborator
//! (the embedding index).  An unreachable index is retried once, then the
//! selection degrades to the Lightweight rendering — serving never blocks on
//! a collaborator.

use crate::collab::EmbeddingIndex;
use crate::config::Config;
use crate::monitor::estimate_tokens;
use crate::types::{
    OptimizationLevel, Payload, PayloadEntry, ResolveContext, Rule, RuleSet, RuleTier,
};

/// Synthetic entry id for the Emergency conservation marker.
const CONSERVATION_MARKER_ID: &str = "conservation-marker";

const CONSERVATION_NOTICE: &str =
    "Conservation mode active: respond concisely and defer non-essential tool use.";

/// Renders rulesets into level-appropriate payloads.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::collab::KeywordIndex;
/// use dirigent_core::config::Config;
/// use dirigent_core::selector::OptimizationSelector;
/// use dirigent_core::store::RuleStore;
/// use dirigent_core::types::{OptimizationLevel, ResolveContext};
///
/// let config = Config::default();
/// let store = RuleStore::new(&config);
/// let ctx = ResolveContext { query: "task".into(), ..ResolveContext::default() };
/// let set = store.resolve_at(&ctx, 100).unwrap();
///
/// let selector = OptimizationSelector::new(&config);
/// let payload = selector.select_payload(OptimizationLevel::Skeleton, &set, &ctx, &KeywordIndex::new());
/// assert_eq!(payload.entries.len(), 1);
/// assert!(payload.contains_verbatim(&set.prime().unwrap().content));
/// ```
#[derive(Debug, Clone)]
pub struct OptimizationSelector {
    top_k: usize,
    min_similarity: f32,
}

impl OptimizationSelector {
    pub fn new(config: &Config) -> Self {
        Self { top_k: config.top_k, min_similarity: config.min_similarity }
    }

    /// Render `ruleset` at `level`.
    ///
    /// The returned payload's `level` reflects what was actually rendered;
    /// it differs from the requested level only when a Dynamic selection
    /// degraded to its Lightweight fallback.
    pub fn select_payload(
        &self,
        level: OptimizationLevel,
        ruleset: &RuleSet,
        ctx: &ResolveContext,
        index: &dyn EmbeddingIndex,
    ) -> Payload {
        match level {
            OptimizationLevel::Standard => self.render(level, ruleset, |r| non_prime(r), false),
            OptimizationLevel::Optimized => self.render(level, ruleset, |r| non_prime(r), true),
            OptimizationLevel::Lightweight => self.render(
                level,
                ruleset,
                |r| non_prime(r) && r.tier == RuleTier::Secondary,
                true,
            ),
            OptimizationLevel::Emergency => {
                let mut payload = self.render(level, ruleset, |_| false, false);
                payload.entries.push(PayloadEntry {
                    rule_id: CONSERVATION_MARKER_ID.into(),
                    tier: RuleTier::Prime,
                    content: CONSERVATION_NOTICE.into(),
                });
                payload.token_estimate += estimate_tokens(CONSERVATION_NOTICE);
                payload
            }
            OptimizationLevel::Skeleton => self.render(level, ruleset, |_| false, false),
            OptimizationLevel::Dynamic => self.select_dynamic(ruleset, ctx, index),
        }
    }

    /// Shared rendering: Prime verbatim first, then every non-Prime rule
    /// passing `keep`, optionally compacted.
    fn render(
        &self,
        level: OptimizationLevel,
        ruleset: &RuleSet,
        keep: impl Fn(&Rule) -> bool,
        compacted: bool,
    ) -> Payload {
        let mut entries = Vec::new();
        entries.extend(prime_entry(ruleset));
        for rule in ruleset.rules.iter().filter(|r| non_prime(r) && keep(r)) {
            let content = if compacted { compact(&rule.content) } else { rule.content.clone() };
            entries.push(PayloadEntry { rule_id: rule.id.clone(), tier: rule.tier, content });
        }

        let token_estimate = entries
            .iter()
            .map(|entry| estimate_tokens(&entry.content))
            .sum();
        Payload { level, entries, token_estimate }
    }

    /// Context-filtered selection via similarity search.
    ///
    /// Retries an unreachable index once, then falls back to the
    /// Lightweight rendering.
    fn select_dynamic(
        &self,
        ruleset: &RuleSet,
        ctx: &ResolveContext,
        index: &dyn EmbeddingIndex,
    ) -> Payload {
        let hits = index
            .similarity_search(&ctx.query, self.top_k)
            .or_else(|_| index.similarity_search(&ctx.query, self.top_k));

        let hits = match hits {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, "embedding index unreachable; degrading to lightweight");
                return self.render(
                    OptimizationLevel::Lightweight,
                    ruleset,
                    |r| r.tier == RuleTier::Secondary,
                    true,
                );
            }
        };

        let selected: Vec<&str> = hits
            .iter()
            .filter(|(_, score)| *score >= self.min_similarity)
            .map(|(chunk_id, _)| chunk_id.as_str())
            .collect();

        // Selected rules keep the ruleset's serving order.
        self.render(
            OptimizationLevel::Dynamic,
            ruleset,
            |r| selected.contains(&r.id.as_str()),
            false,
        )
    }
}

fn non_prime(rule: &Rule) -> bool {
    rule.tier != RuleTier::Prime
}

fn prime_entry(ruleset: &RuleSet) -> Option<PayloadEntry> {
    let prime = ruleset.prime()?;
    Some(PayloadEntry { rule_id: prime.id.clone(), tier: prime.tier, content: prime.content.clone() })
}

/// Collapse whitespace runs to single spaces.
fn compact(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

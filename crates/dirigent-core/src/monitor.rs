// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Daily token budget tracking and the optimization circuit breaker.
//!
//! [`TokenBudgetMonitor`] accumulates per-component token spends into a
//! daily bucket and downgrades the served [`OptimizationLevel`] as
//! utilization crosses the configured thresholds.  Within a day the level
//! only ever moves down the severity ladder; the bucket resets at the UTC
//! day boundary, returning to [`OptimizationLevel::Standard`] (or the pinned
//! level, when an operator pinned one).
//!
//! Pinning is an operator override: while a pin is set, automatic level
//! changes are suppressed and the pinned level also survives day resets.
//! [`OptimizationLevel::Dynamic`] is reachable only through pinning.

use std::collections::VecDeque;

use crate::config::{Config, LevelThresholds};
use crate::types::{
    AlertLevel, BudgetAlert, BudgetState, ComponentTag, ComponentTotals, LevelChange,
    OptimizationLevel, TokenUsageRecord,
};

const DAY_MS: u64 = 86_400_000;

/// Alerts retained for operator inspection.
const ALERT_HISTORY: usize = 10;

/// Usage records retained for inspection and attribution summaries.
const USAGE_HISTORY: usize = 100;

/// Rough token estimate for a piece of text (1 token ≈ 4 characters).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Point-in-time budget summary for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetStatus {
    pub level: OptimizationLevel,
    pub utilization: f64,
    pub consumed_today: u64,
    pub daily_budget: u64,
    pub component_totals: ComponentTotals,
    pub alerts: Vec<BudgetAlert>,
}

/// The budget circuit breaker.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::config::Config;
/// use dirigent_core::monitor::TokenBudgetMonitor;
/// use dirigent_core::types::{ComponentTag, OptimizationLevel};
///
/// let mut monitor = TokenBudgetMonitor::new(&Config { daily_budget: 1_000, ..Config::default() });
/// let change = monitor.record_at(ComponentTag::Response, 600, 0).unwrap();
/// assert_eq!(change.to, OptimizationLevel::Optimized);
/// ```
#[derive(Debug)]
pub struct TokenBudgetMonitor {
    state: BudgetState,
    thresholds: LevelThresholds,
    alerts: VecDeque<BudgetAlert>,
    usage: VecDeque<TokenUsageRecord>,
    warned_today: bool,
    critical_today: bool,
}

impl TokenBudgetMonitor {
    pub fn new(config: &Config) -> Self {
        let state = BudgetState {
            daily_budget: config.daily_budget,
            consumed_today: 0,
            component_totals: ComponentTotals::default(),
            level: OptimizationLevel::Standard,
            day_start_ms: day_start(current_time_ms()),
            last_level_change_ms: None,
            pinned: None,
        };
        Self::from_state(state, config.level_thresholds)
    }

    /// Rebuild a monitor from a persisted [`BudgetState`].
    ///
    /// Alert once-per-day latches are re-derived from utilization so a
    /// restart does not re-fire alerts that already went out.
    pub fn from_state(state: BudgetState, thresholds: LevelThresholds) -> Self {
        let utilization = state.utilization();
        Self {
            warned_today: utilization >= thresholds.lightweight,
            critical_today: utilization >= thresholds.emergency,
            state,
            thresholds,
            alerts: VecDeque::new(),
            usage: VecDeque::new(),
        }
    }

    /// Record a token spend at the current wall clock.
    pub fn record(&mut self, component: ComponentTag, tokens: u64) -> Option<LevelChange> {
        self.record_at(component, tokens, current_time_ms())
    }

    /// Record a token spend at an explicit timestamp.
    ///
    /// Rolls the day bucket first when `now_ms` falls past the current day
    /// boundary, then applies the spend and evaluates the thresholds.
    /// Returns the level change, if one occurred.
    pub fn record_at(
        &mut self,
        component: ComponentTag,
        tokens: u64,
        now_ms: u64,
    ) -> Option<LevelChange> {
        let rollover = self.roll_day(now_ms);

        self.state.consumed_today += tokens;
        self.state.component_totals.add(component, tokens);
        self.usage.push_back(TokenUsageRecord { timestamp_ms: now_ms, component, tokens });
        if self.usage.len() > USAGE_HISTORY {
            self.usage.pop_front();
        }

        self.check_alerts(now_ms);
        let change = self.apply_thresholds(now_ms);
        change.or(rollover)
    }

    /// Pin the served level, or clear the pin with `None`.
    ///
    /// A pin takes effect immediately — including upward and to
    /// [`OptimizationLevel::Dynamic`] — and persists across day resets.
    /// While pinned, automatic downgrades are suppressed.
    pub fn pin_level(
        &mut self,
        level: Option<OptimizationLevel>,
        now_ms: u64,
    ) -> Option<LevelChange> {
        self.state.pinned = level;
        match level {
            Some(level) if level != self.state.level => Some(self.transition(level, now_ms)),
            _ => None,
        }
    }

    /// Snapshot the budget state for persistence.
    pub fn checkpoint(&self) -> BudgetState {
        self.state.clone()
    }

    /// Replace the budget state, e.g. after loading a checkpoint.
    pub fn restore(&mut self, state: BudgetState) {
        let utilization = state.utilization();
        self.warned_today = utilization >= self.thresholds.lightweight;
        self.critical_today = utilization >= self.thresholds.emergency;
        self.state = state;
    }

    /// Current served level.
    pub fn level(&self) -> OptimizationLevel {
        self.state.level
    }

    /// Current budget state.
    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    /// Retained usage records, oldest first.
    pub fn recent_usage(&self) -> impl Iterator<Item = &TokenUsageRecord> {
        self.usage.iter()
    }

    /// Operator-facing summary, rolling the day bucket first if needed.
    pub fn status(&mut self, now_ms: u64) -> BudgetStatus {
        self.roll_day(now_ms);
        BudgetStatus {
            level: self.state.level,
            utilization: self.state.utilization(),
            consumed_today: self.state.consumed_today,
            daily_budget: self.state.daily_budget,
            component_totals: self.state.component_totals,
            alerts: self.alerts.iter().cloned().collect(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn roll_day(&mut self, now_ms: u64) -> Option<LevelChange> {
        if now_ms < self.state.day_start_ms + DAY_MS {
            return None;
        }

        self.state.day_start_ms = day_start(now_ms);
        self.state.consumed_today = 0;
        self.state.component_totals = ComponentTotals::default();
        self.warned_today = false;
        self.critical_today = false;

        let reset_level = self.state.pinned.unwrap_or(OptimizationLevel::Standard);
        if reset_level != self.state.level {
            Some(self.transition(reset_level, now_ms))
        } else {
            None
        }
    }

    fn apply_thresholds(&mut self, now_ms: u64) -> Option<LevelChange> {
        // Operator pin suppresses automatic movement.
        if self.state.pinned.is_some() {
            return None;
        }

        let utilization = self.state.utilization();
        let candidate = if utilization >= self.thresholds.skeleton {
            OptimizationLevel::Skeleton
        } else if utilization >= self.thresholds.emergency {
            OptimizationLevel::Emergency
        } else if utilization >= self.thresholds.lightweight {
            OptimizationLevel::Lightweight
        } else if utilization >= self.thresholds.optimized {
            OptimizationLevel::Optimized
        } else {
            OptimizationLevel::Standard
        };

        // Monotonic within the day: only ever move down the ladder.
        match (candidate.auto_rank(), self.state.level.auto_rank()) {
            (Some(next), Some(current)) if next > current => {
                Some(self.transition(candidate, now_ms))
            }
            _ => None,
        }
    }

    fn transition(&mut self, to: OptimizationLevel, now_ms: u64) -> LevelChange {
        let change = LevelChange {
            from: self.state.level,
            to,
            utilization: self.state.utilization(),
        };
        tracing::info!(
            from = change.from.display_name(),
            to = change.to.display_name(),
            utilization = change.utilization,
            "optimization level changed"
        );
        self.state.level = to;
        self.state.last_level_change_ms = Some(now_ms);
        change
    }

    fn check_alerts(&mut self, now_ms: u64) {
        let utilization = self.state.utilization();

        if utilization >= self.thresholds.emergency && !self.critical_today {
            self.critical_today = true;
            self.push_alert(BudgetAlert {
                level: AlertLevel::Critical,
                message: format!("token budget at {:.0}% of daily limit", utilization * 100.0),
                recommended_action: "emergency conservation active; defer non-essential work"
                    .into(),
                timestamp_ms: now_ms,
            });
        } else if utilization >= self.thresholds.lightweight && !self.warned_today {
            self.warned_today = true;
            self.push_alert(BudgetAlert {
                level: AlertLevel::Warning,
                message: format!("token budget at {:.0}% of daily limit", utilization * 100.0),
                recommended_action: "reduce payload verbosity; batch tool operations".into(),
                timestamp_ms: now_ms,
            });
        }
    }

    fn push_alert(&mut self, alert: BudgetAlert) {
        self.alerts.push_back(alert);
        if self.alerts.len() > ALERT_HISTORY {
            self.alerts.pop_front();
        }
    }
}

fn day_start(now_ms: u64) -> u64 {
    now_ms - now_ms % DAY_MS
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

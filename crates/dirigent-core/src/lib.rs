// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # dirigent-core
//!
//! Core engine for the Dirigent directive governance protocol: hierarchical
//! behavioral rules with human-gated promotion, per-session snapshot
//! caching, and a daily token-budget circuit breaker that degrades payload
//! verbosity under pressure.
//!
//! ## Architecture
//!
//! ```text
//! DirigentEngine<P: Persistence>
//!   ├── RuleStore             — resolve / promote / rollback / audit rules
//!   ├── SessionCache          — cached snapshots, batched learning deltas
//!   ├── TokenBudgetMonitor    — daily budget, optimization circuit breaker
//!   ├── OptimizationSelector  — per-level payload rendering
//!   └── GovernanceGate        — approval signals, violation handling
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use dirigent_core::{
//!     config::Config,
//!     engine::DirigentEngine,
//!     session::LearningDelta,
//!     types::{ResolveContext, RuleScope},
//! };
//!
//! let mut engine = DirigentEngine::in_memory(Config::default()).unwrap();
//!
//! // Serve a directive payload for an interaction.
//! let ctx = ResolveContext {
//!     query: "review the deployment plan".into(),
//!     ..ResolveContext::default()
//! };
//! let payload = engine.interact("session-1", &ctx).unwrap();
//! assert!(payload.contains_verbatim(&Config::default().prime_content));
//!
//! // Record an observed behavioral pattern; it enters the store at the
//! // lowest tier when the session flushes.
//! engine
//!     .record_learning(
//!         "session-1",
//!         LearningDelta::Observation {
//!             content: "batch memory updates at session end".into(),
//!             scope: RuleScope::Global,
//!             trigger: None,
//!         },
//!     )
//!     .unwrap();
//! engine.end_session("session-1").unwrap();
//! ```
//!
//! ## Features
//!
//! * `async` — [`async_engine::AsyncDirigentEngine`], a tokio-backed
//!   task-safe handle.
//! * `config-loader` — TOML file and `DIRIGENT_*` environment configuration.

pub mod collab;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod monitor;
pub mod persist;
pub mod selector;
pub mod session;
pub mod store;
pub mod types;

#[cfg(feature = "async")]
pub mod async_engine;

#[cfg(feature = "config-loader")]
pub mod config_loader;

// Re-export the most commonly used items at the crate root so consumers can
// write `use dirigent_core::DirigentEngine;` instead of the fully qualified
// path.
pub use engine::DirigentEngine;
pub use error::{EngineError, ValidationError};
pub use persist::{InMemoryPersistence, Persistence};
pub use types::{
    ComponentTag, OptimizationLevel, Payload, PromotionRequest, ResolveContext, Rule, RuleScope,
    RuleSet, RuleTier, TelemetryEvent,
};

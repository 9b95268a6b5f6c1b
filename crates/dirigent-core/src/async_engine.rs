// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Async facade over [`DirigentEngine`] (feature `async`).
//!
//! Wraps the synchronous engine in an `Arc<tokio::sync::RwLock>` so it can
//! be shared across tasks.  Every operation takes the write lock — engine
//! operations are short and mutate shared state (the cache, the monitor),
//! so a reader/writer split buys nothing here.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::engine::DirigentEngine;
use crate::error::EngineError;
use crate::monitor::BudgetStatus;
use crate::persist::Persistence;
use crate::session::{FlushSummary, LearningDelta};
use crate::types::{ComponentTag, OptimizationLevel, Payload, PromotionRequest, ResolveContext};

/// A cloneable, task-safe handle to a [`DirigentEngine`].
///
/// # Examples
///
/// ```rust,no_run
/// use dirigent_core::async_engine::AsyncDirigentEngine;
/// use dirigent_core::config::Config;
/// use dirigent_core::types::ResolveContext;
///
/// # async fn demo() -> Result<(), dirigent_core::error::EngineError> {
/// let engine = AsyncDirigentEngine::in_memory(Config::default())?;
/// let ctx = ResolveContext { query: "task".into(), ..ResolveContext::default() };
/// let payload = engine.interact("session-1", &ctx).await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncDirigentEngine<P: Persistence> {
    inner: Arc<RwLock<DirigentEngine<P>>>,
}

impl<P: Persistence> Clone for AsyncDirigentEngine<P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl AsyncDirigentEngine<crate::persist::InMemoryPersistence> {
    /// Open an async engine backed by volatile in-process persistence.
    pub fn in_memory(config: crate::config::Config) -> Result<Self, EngineError> {
        Ok(Self::from_engine(DirigentEngine::in_memory(config)?))
    }
}

impl<P: Persistence> AsyncDirigentEngine<P> {
    /// Wrap an already-constructed engine.
    pub fn from_engine(engine: DirigentEngine<P>) -> Self {
        Self { inner: Arc::new(RwLock::new(engine)) }
    }

    /// Open an async engine, restoring persisted state.
    pub fn open(config: crate::config::Config, persistence: P) -> Result<Self, EngineError> {
        Ok(Self::from_engine(DirigentEngine::open(config, persistence)?))
    }

    pub async fn interact(
        &self,
        session_id: &str,
        ctx: &ResolveContext,
    ) -> Result<Payload, EngineError> {
        self.inner.write().await.interact(session_id, ctx)
    }

    pub async fn record_learning(
        &self,
        session_id: &str,
        delta: LearningDelta,
    ) -> Result<(), EngineError> {
        self.inner.write().await.record_learning(session_id, delta)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<FlushSummary, EngineError> {
        self.inner.write().await.end_session(session_id)
    }

    pub async fn record_correction(&self, session_id: &str) -> bool {
        self.inner.write().await.record_correction(session_id)
    }

    pub async fn abort_session(&self, session_id: &str) {
        self.inner.write().await.abort_session(session_id);
    }

    pub async fn submit_promotion(&self, rule_id: &str) -> Result<PromotionRequest, EngineError> {
        self.inner.write().await.submit_promotion(rule_id)
    }

    pub async fn report_violation(&self, rule_id: &str, reason: &str) -> Result<(), EngineError> {
        self.inner.write().await.report_violation(rule_id, reason)
    }

    pub async fn record_usage(&self, component: ComponentTag, tokens: u64) {
        self.inner.write().await.record_usage(component, tokens);
    }

    pub async fn pin_level(&self, level: Option<OptimizationLevel>) {
        self.inner.write().await.pin_level(level);
    }

    pub async fn budget_status(&self) -> BudgetStatus {
        self.inner.write().await.budget_status()
    }

    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        self.inner.write().await.checkpoint()
    }

    /// Run a closure with shared read access to the underlying engine.
    pub async fn with_engine<R>(&self, f: impl FnOnce(&DirigentEngine<P>) -> R) -> R {
        f(&*self.inner.read().await)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

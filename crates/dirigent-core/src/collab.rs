// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! External collaborator interfaces.
//!
//! The engine consumes every outside system through a narrow trait: tool
//! probing, similarity search, human approvals, and telemetry.  Each trait
//! ships a deterministic in-process implementation so the engine can run —
//! and be tested — without any external infrastructure.
//!
//! Implementations MUST be `Send + Sync` so the engine can be shared across
//! threads when wrapped in `Arc<Mutex<...>>`.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::error::ProbeError;
use crate::types::{TelemetryEvent, ToolHealth, ToolStatus};

// ---------------------------------------------------------------------------
// ToolProbe
// ---------------------------------------------------------------------------

/// Tests availability of a single tool.
///
/// Implementations carry their own bounded timeout and return
/// [`ProbeError::Timeout`] instead of blocking the caller indefinitely.
pub trait ToolProbe: Send + Sync {
    /// Probe `tool_id` and report health plus observed latency.
    fn test_availability(&self, tool_id: &str) -> Result<ToolStatus, ProbeError>;
}

/// A fixed-response [`ToolProbe`] for development and testing.
///
/// Unregistered tool ids report [`ToolHealth::Unavailable`].
///
/// # Examples
///
/// ```rust
/// use dirigent_core::collab::{StaticToolProbe, ToolProbe};
/// use dirigent_core::types::ToolHealth;
///
/// let mut probe = StaticToolProbe::new();
/// probe.set("memory-server", ToolHealth::Available, 12);
///
/// let status = probe.test_availability("memory-server").unwrap();
/// assert_eq!(status.health, ToolHealth::Available);
/// ```
#[derive(Debug, Default)]
pub struct StaticToolProbe {
    tools: HashMap<String, (ToolHealth, u64)>,
    /// Tool ids that fail with a timeout instead of answering.
    timeouts: Vec<String>,
}

impl StaticToolProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed probe response for `tool_id`.
    pub fn set(&mut self, tool_id: &str, health: ToolHealth, latency_ms: u64) {
        self.tools.insert(tool_id.into(), (health, latency_ms));
    }

    /// Make every probe of `tool_id` time out.
    pub fn set_timeout(&mut self, tool_id: &str) {
        self.timeouts.push(tool_id.into());
    }
}

impl ToolProbe for StaticToolProbe {
    fn test_availability(&self, tool_id: &str) -> Result<ToolStatus, ProbeError> {
        if self.timeouts.iter().any(|id| id == tool_id) {
            return Err(ProbeError::Timeout(0));
        }
        let (health, latency_ms) = self
            .tools
            .get(tool_id)
            .copied()
            .unwrap_or((ToolHealth::Unavailable, 0));
        Ok(ToolStatus {
            health,
            latency_ms,
            checked_at_ms: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// EmbeddingIndex
// ---------------------------------------------------------------------------

/// Similarity search over indexed rule content, used only at the Dynamic
/// optimization level.
pub trait EmbeddingIndex: Send + Sync {
    /// Return up to `top_k` `(chunk_id, score)` pairs, ordered by descending
    /// score with ties broken by ascending chunk id.
    fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, ProbeError>;
}

/// A deterministic token-overlap scorer.
///
/// Scores a chunk as the fraction of distinct query tokens it contains.
/// Not a real embedding model — it is the in-process fallback scorer, and
/// doubles as the deterministic stub the payload selector is tested with.
///
/// # Examples
///
/// ```rust
/// use dirigent_core::collab::{EmbeddingIndex, KeywordIndex};
///
/// let mut index = KeywordIndex::new();
/// index.insert("r-1", "cache memory operations for efficiency");
/// index.insert("r-2", "verify external claims before asserting");
///
/// let hits = index.similarity_search("memory cache", 5).unwrap();
/// assert_eq!(hits[0].0, "r-1");
/// ```
#[derive(Debug, Default)]
pub struct KeywordIndex {
    chunks: HashMap<String, Vec<String>>,
    /// When `true`, every search fails with a timeout.
    unreachable: bool,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `content` under `chunk_id`, replacing any prior entry.
    pub fn insert(&mut self, chunk_id: &str, content: &str) {
        self.chunks.insert(chunk_id.into(), tokenize(content));
    }

    /// Remove a chunk from the index.
    pub fn remove(&mut self, chunk_id: &str) {
        self.chunks.remove(chunk_id);
    }

    /// Simulate an unreachable index.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }
}

impl EmbeddingIndex for KeywordIndex {
    fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<(String, f32)>, ProbeError> {
        if self.unreachable {
            return Err(ProbeError::Timeout(0));
        }

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, f32)> = self
            .chunks
            .iter()
            .map(|(chunk_id, tokens)| {
                let overlap = query_tokens
                    .iter()
                    .filter(|token| tokens.contains(token))
                    .count();
                let score = overlap as f32 / query_tokens.len() as f32;
                (chunk_id.clone(), score)
            })
            .collect();

        // Total order: score descending, then chunk id ascending.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(core::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Lowercased, de-duplicated alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

// ---------------------------------------------------------------------------
// ApprovalChannel
// ---------------------------------------------------------------------------

/// A single asynchronous approval or rejection signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalSignal {
    pub request_id: String,
    pub approved: bool,
    pub reason: Option<String>,
}

/// Asynchronous request/response channel for human approvals.
///
/// `approve`/`reject` may be called at any time, in any order, and more than
/// once for the same request — the governance gate applies signals
/// idempotently.
pub trait ApprovalChannel: Send + Sync {
    /// Queue an approval for `request_id`.
    fn approve(&mut self, request_id: &str);

    /// Queue a rejection for `request_id`.
    fn reject(&mut self, request_id: &str, reason: &str);

    /// Take the next queued signal, if any.  Consumed by the gate.
    fn poll_signal(&mut self) -> Option<ApprovalSignal>;
}

/// FIFO in-process [`ApprovalChannel`].
#[derive(Debug, Default)]
pub struct QueuedApprovalChannel {
    queue: VecDeque<ApprovalSignal>,
}

impl QueuedApprovalChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApprovalChannel for QueuedApprovalChannel {
    fn approve(&mut self, request_id: &str) {
        self.queue.push_back(ApprovalSignal {
            request_id: request_id.into(),
            approved: true,
            reason: None,
        });
    }

    fn reject(&mut self, request_id: &str, reason: &str) {
        self.queue.push_back(ApprovalSignal {
            request_id: request_id.into(),
            approved: false,
            reason: Some(reason.into()),
        });
    }

    fn poll_signal(&mut self) -> Option<ApprovalSignal> {
        self.queue.pop_front()
    }
}

// ---------------------------------------------------------------------------
// TelemetrySink
// ---------------------------------------------------------------------------

/// Receives structured engine events for external observability pipelines.
pub trait TelemetrySink: Send + Sync {
    fn emit(&mut self, event: TelemetryEvent);
}

/// Records every event in memory.  Test double.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<TelemetryEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&mut self, event: TelemetryEvent) {
        self.events.push(event);
    }
}

/// Forwards every event to the `tracing` subscriber as a structured record.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&mut self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::LevelChanged { from, to, utilization } => {
                tracing::info!(
                    from = from.display_name(),
                    to = to.display_name(),
                    utilization,
                    "optimization level changed"
                );
            }
            TelemetryEvent::SafetyViolation { rule_id, reason } => {
                tracing::warn!(rule_id = %rule_id, reason = %reason, "safety violation");
            }
            TelemetryEvent::PromotionApproved { rule_id, to_tier } => {
                tracing::info!(
                    rule_id = %rule_id,
                    to_tier = to_tier.display_name(),
                    "promotion approved"
                );
            }
            TelemetryEvent::CacheInvalidated { session_id, reason } => {
                tracing::debug!(
                    session_id = %session_id,
                    reason = %reason,
                    "session cache invalidated"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

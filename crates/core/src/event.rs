//! Events: per-request progress and cross-session domain events.
//!
//! [`ProgressEvent`]s are ordered and belong to one request; they feed a
//! progress reporter. [`DomainEvent`]s are published on a shared bus for
//! audit or observability consumers that watch every session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Renderable progress of one request, in delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The model is being called
    ThinkingStarted,

    /// A long-running tool (typically a sub-agent) moved to a new stage
    SubAgentStageChanged { message: String, stage: String },

    /// Partial model text
    TextDelta { text: String },

    /// A tool call started executing
    ToolStarted { name: String, call_id: String },

    /// A tool call finished
    ToolFinished {
        name: String,
        call_id: String,
        success: bool,
    },

    /// The loop is waiting for an approval verdict
    ApprovalRequired { tool_name: String, call_id: String },

    /// No more events for this request
    StreamEnded,
}

impl ProgressEvent {
    /// Short event name, e.g. for SSE `event:` lines.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ThinkingStarted => "thinking_started",
            Self::SubAgentStageChanged { .. } => "sub_agent_stage_changed",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::StreamEnded => "stream_ended",
        }
    }
}

/// Session-level events for observers of the whole runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    SessionStarted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    InferenceCompleted {
        session_id: String,
        turn: u32,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    ApprovalRequested {
        session_id: String,
        call_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    ApprovalResolved {
        session_id: String,
        call_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        session_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    LoopTerminated {
        session_id: String,
        outcome: String,
        turns: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

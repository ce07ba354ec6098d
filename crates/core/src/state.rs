//! Loop state: everything needed to continue a session after suspension.
//!
//! `LoopState` is plain data: it is checkpointed after every transition and
//! can be reloaded by another process to resume at the pending call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Conversation, Message, SessionId};
use crate::tool::{ToolCall, ToolResult};

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The model answered without requesting tools.
    Completed { answer: String },
    /// The backend's content policy intervened.
    Refused { message: String },
    /// The turn budget ran out before a final answer.
    MaxTurnsExceeded { turns: u32 },
    /// A call was denied and the loop is configured to stop on denial.
    Denied { message: String },
}

impl Termination {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Refused { .. } => "refused",
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::Denied { .. } => "denied",
        }
    }
}

/// Where the state machine is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LoopPhase {
    Inferring,
    AwaitingApproval { call_id: String },
    Executing,
    Terminal { termination: Termination },
}

impl LoopPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inferring => "inferring",
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::Executing => "executing",
            Self::Terminal { .. } => "terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How far a call of the current turn has got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Disposition {
    NeedsApproval,
    Approved,
    Resolved { result: ToolResult },
}

/// A call from the current assistant turn and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCall {
    pub call: ToolCall,
    pub disposition: Disposition,
}

/// The checkpointed state of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub session_id: SessionId,
    pub conversation: Conversation,
    pub phase: LoopPhase,

    /// Inferences made since the latest user message
    pub turns: u32,

    /// Calls of the current turn, in the order the model issued them
    #[serde(default)]
    pub pending: Vec<PendingCall>,

    /// Whether any call of the current turn was denied
    #[serde(default)]
    pub denied_in_turn: bool,

    pub updated_at: DateTime<Utc>,
}

impl LoopState {
    /// Initial state: `Inferring` over a conversation holding the first user message.
    pub fn seed(session_id: SessionId, user_message: impl Into<String>) -> Self {
        let mut conversation = Conversation::new(session_id.clone());
        conversation.push(Message::user(user_message));
        Self {
            session_id,
            conversation,
            phase: LoopPhase::Inferring,
            turns: 0,
            pending: Vec::new(),
            denied_in_turn: false,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn termination(&self) -> Option<&Termination> {
        match &self.phase {
            LoopPhase::Terminal { termination } => Some(termination),
            _ => None,
        }
    }

    /// The call the loop is currently waiting on, if suspended.
    pub fn awaiting_call(&self) -> Option<&ToolCall> {
        let LoopPhase::AwaitingApproval { call_id } = &self.phase else {
            return None;
        };
        self.pending
            .iter()
            .find(|p| &p.call.id == call_id)
            .map(|p| &p.call)
    }

    /// Approved calls not yet executed, in issue order.
    pub fn approved_calls(&self) -> Vec<ToolCall> {
        self.pending
            .iter()
            .filter(|p| matches!(p.disposition, Disposition::Approved))
            .map(|p| p.call.clone())
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

//! Error types for the loopgate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the loop-level variants
//! live directly on [`Error`].

use crate::message::SessionId;
use thiserror::Error;

/// The top-level error type for all loopgate operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Inference backend ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Checkpoint store ---
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    // --- Session lifecycle ---
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} is not awaiting approval")]
    NotAwaitingApproval(SessionId),

    #[error("Session {0} is still running or suspended")]
    SessionBusy(SessionId),

    #[error("Verdict for call '{received}' does not match pending call '{expected}'")]
    VerdictMismatch { expected: String, received: String },

    #[error("Invalid transition: {input} while {phase}")]
    InvalidTransition { phase: String, input: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The backend's safety layer intervened. Terminal for the turn.
    #[error("Content policy violation: {0}")]
    ContentPolicyViolation(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The tool's own input schema does not compile.
    #[error("Invalid tool schema: {0}")]
    InvalidSchema(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt checkpoint for session {session}: {reason}")]
    Corrupt { session: String, reason: String },

    /// Another writer saved this session first.
    #[error("Version conflict for session {session}: expected {expected:?}, found {found:?}")]
    Conflict {
        session: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
}

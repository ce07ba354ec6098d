//! # loopgate core
//!
//! Domain types, traits, and error definitions for a human-in-the-loop,
//! tool-calling conversation loop. This crate has no runtime behaviour of
//! its own: it defines the model that the agent, checkpoint, and tool
//! crates implement against.
//!
//! ## Seams
//!
//! Every external collaborator is a trait here:
//! - [`ModelGateway`]: the inference backend
//! - [`Tool`]: an invocable capability with a declared input schema
//! - [`CheckpointStore`]: persistence of [`LoopState`] across suspension
//!
//! Implementations live in their own crates so hosts can swap them and
//! tests can stub them.

pub mod approval;
pub mod checkpoint;
pub mod context;
pub mod error;
pub mod event;
pub mod gateway;
pub mod message;
pub mod schema;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalPolicy, ApprovalRequest, ApprovalVerdict, ToolPermission};
pub use checkpoint::{Checkpoint, CheckpointStore, SessionSummary};
pub use context::RequestContext;
pub use error::{CheckpointError, Error, GatewayError, Result, ToolError};
pub use event::{DomainEvent, EventBus, ProgressEvent};
pub use gateway::{
    InferenceRequest, InferenceResult, InferenceStream, ModelGateway, StreamAccumulator,
    StreamEvent,
};
pub use message::{ContentBlock, Conversation, Message, Role, SessionId};
pub use state::{Disposition, LoopPhase, LoopState, PendingCall, Termination};
pub use tool::{Tool, ToolCall, ToolDescriptor, ToolRegistry, ToolResult, DENIAL_MESSAGE};

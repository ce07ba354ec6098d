//! The conversation loop: inference, human approval, tool execution.
//!
//! The loop follows an **Infer → Approve → Execute** cycle:
//!
//! 1. **Infer**: send the conversation and tool descriptors to the model
//! 2. **Approve**: ask a human about each proposed call the policy gates,
//!    one at a time, or suspend until a verdict arrives
//! 3. **Execute**: run approved calls, fold every result back in call order
//!
//! It repeats until the model answers without calling tools, refuses, a
//! denial stops it, or the turn budget runs out. Every transition is a pure
//! function ([`machine::step`]); [`ConversationLoop`] supplies the I/O and
//! checkpoints after each one.

pub mod approval;
pub mod executor;
pub mod guard;
pub mod loop_runner;
pub mod machine;
pub mod progress;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use approval::{
    ApprovalGate, Approver, AutoApprove, AutoDeny, ChannelApprover, GateDecision, PendingApproval,
};
pub use executor::ToolExecutor;
pub use guard::{ArgumentGuard, GuardVerdict, TermGuard};
pub use loop_runner::{ConversationLoop, LoopOutcome, LoopReport, Resume};
pub use machine::{step, DenialBehavior, Input};
pub use progress::{drain, ProgressReporter, ProgressSink, RenderUpdate, StatusBox, StatusState};

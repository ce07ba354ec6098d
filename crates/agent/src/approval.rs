//! Approval gate: asks a human (or a stand-in) about a gated tool call.
//!
//! An [`Approver`] either answers on the spot or defers. Deferral means the
//! decision will arrive out of band: the loop checkpoints, returns a
//! suspended report, and continues later through `ConversationLoop::resume`.

use async_trait::async_trait;
use loopgate_core::approval::{ApprovalRequest, ApprovalVerdict};
use loopgate_core::context::RequestContext;
use loopgate_core::event::ProgressEvent;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Decides gated tool calls.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Return a verdict, or `None` to suspend the loop until one is
    /// delivered through `resume`.
    async fn review(&self, request: &ApprovalRequest) -> Option<ApprovalVerdict>;
}

/// Approves everything. For trusted automation and tests.
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn review(&self, _request: &ApprovalRequest) -> Option<ApprovalVerdict> {
        Some(ApprovalVerdict::Approve)
    }
}

/// Denies everything.
pub struct AutoDeny;

#[async_trait]
impl Approver for AutoDeny {
    async fn review(&self, _request: &ApprovalRequest) -> Option<ApprovalVerdict> {
        Some(ApprovalVerdict::Deny)
    }
}

/// An approval request handed to a UI task, with the handle to answer it.
pub struct PendingApproval {
    pub request: ApprovalRequest,
    reply: oneshot::Sender<ApprovalVerdict>,
}

impl PendingApproval {
    /// Deliver the verdict. Returns false if the loop stopped waiting.
    pub fn respond(self, verdict: ApprovalVerdict) -> bool {
        self.reply.send(verdict).is_ok()
    }

    /// Drop the request without answering; the loop suspends.
    pub fn defer(self) {}
}

/// Forwards requests over a channel to an in-process UI.
///
/// If the UI side goes away, or drops a request unanswered, the loop
/// suspends instead of failing.
pub struct ChannelApprover {
    sender: mpsc::Sender<PendingApproval>,
}

impl ChannelApprover {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Approver for ChannelApprover {
    async fn review(&self, request: &ApprovalRequest) -> Option<ApprovalVerdict> {
        let (reply, answer) = oneshot::channel();
        let pending = PendingApproval {
            request: request.clone(),
            reply,
        };
        if self.sender.send(pending).await.is_err() {
            debug!(call_id = %request.call_id, "Approval channel closed");
            return None;
        }
        answer.await.ok()
    }
}

/// Outcome of asking the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Verdict(ApprovalVerdict),
    Suspend,
}

/// Routes approval requests to the configured approver.
///
/// With no approver every request suspends.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    approver: Option<Arc<dyn Approver>>,
}

impl ApprovalGate {
    pub fn new(approver: Arc<dyn Approver>) -> Self {
        Self {
            approver: Some(approver),
        }
    }

    /// A gate that always defers to `resume`.
    pub fn deferred() -> Self {
        Self::default()
    }

    pub async fn request(&self, ctx: &RequestContext, request: &ApprovalRequest) -> GateDecision {
        ctx.emit(ProgressEvent::ApprovalRequired {
            tool_name: request.tool_name.clone(),
            call_id: request.call_id.clone(),
        });

        let verdict = match &self.approver {
            Some(approver) => approver.review(request).await,
            None => None,
        };

        match verdict {
            Some(verdict) => {
                info!(
                    session_id = %request.session_id,
                    call_id = %request.call_id,
                    tool = %request.tool_name,
                    %verdict,
                    "Approval decided"
                );
                GateDecision::Verdict(verdict)
            }
            None => {
                info!(
                    session_id = %request.session_id,
                    call_id = %request.call_id,
                    tool = %request.tool_name,
                    "Approval deferred, suspending"
                );
                GateDecision::Suspend
            }
        }
    }
}

//! Per-request context handed to the loop, the executor, and every tool.
//!
//! Holds what one request owns: its session, a request id for log
//! correlation, and the progress channel the caller is listening on.
//! Nothing here outlives the request.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::ProgressEvent;
use crate::message::SessionId;

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Session this request operates on
    pub session_id: SessionId,

    /// Unique id for this request (one `start`/`resume`/`retry` call)
    pub request_id: String,

    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl RequestContext {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            request_id: Uuid::new_v4().to_string(),
            progress: None,
        }
    }

    /// Attach a progress channel; returns the receiving half.
    pub fn with_progress_channel(mut self) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress = Some(tx);
        (self, rx)
    }

    /// Send a progress event. A caller that stopped listening is not an error.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    /// Report a stage change from inside a long-running tool (e.g. a sub-agent).
    pub fn report_stage(&self, message: impl Into<String>, stage: impl Into<String>) {
        self.emit(ProgressEvent::SubAgentStageChanged {
            message: message.into(),
            stage: stage.into(),
        });
    }
}

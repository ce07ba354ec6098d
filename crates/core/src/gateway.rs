//! ModelGateway trait: the abstraction over inference backends.
//!
//! A gateway takes the conversation plus the advertised tools and returns
//! either a final answer or one or more tool-call requests, as a complete
//! result or as a stream of partial events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::message::{Message, SessionId};
use crate::tool::{ToolCall, ToolDescriptor};

/// Everything the backend needs for one inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Session the request belongs to (for backend-side tracing)
    pub session_id: SessionId,

    /// Instructions prepended by the backend adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// The conversation so far
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

/// What one model turn produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceResult {
    /// No further tool use; the turn (and the loop) ends here.
    FinalAnswer { text: String },

    /// The model wants tools run. `text` is any preamble it emitted.
    ToolRequest { text: String, calls: Vec<ToolCall> },
}

impl InferenceResult {
    pub fn final_answer(text: impl Into<String>) -> Self {
        Self::FinalAnswer { text: text.into() }
    }

    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self::ToolRequest {
            text: String::new(),
            calls,
        }
    }

    /// A tool request with no calls is a final answer.
    pub fn normalize(self) -> Self {
        match self {
            Self::ToolRequest { text, calls } if calls.is_empty() => Self::FinalAnswer { text },
            other => other,
        }
    }
}

/// One partial event of a streamed inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { text: String },
    ToolCallStarted { id: String, name: String },
    ToolCallFinished { call: ToolCall },
    StreamEnded,
}

/// Folds stream events into the [`InferenceResult`] they describe.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    open_calls: Vec<String>,
    calls: Vec<ToolCall>,
    ended: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns the finished result on `StreamEnded`.
    pub fn push(&mut self, event: StreamEvent) -> Result<Option<InferenceResult>, GatewayError> {
        if self.ended {
            return Err(GatewayError::MalformedResponse(
                "event received after StreamEnded".into(),
            ));
        }

        match event {
            StreamEvent::TextDelta { text } => self.text.push_str(&text),
            StreamEvent::ToolCallStarted { id, .. } => self.open_calls.push(id),
            StreamEvent::ToolCallFinished { call } => {
                self.open_calls.retain(|id| id != &call.id);
                self.calls.push(call);
            }
            StreamEvent::StreamEnded => {
                self.ended = true;
                if let Some(id) = self.open_calls.first() {
                    return Err(GatewayError::StreamInterrupted(format!(
                        "tool call '{id}' started but never finished"
                    )));
                }
                return Ok(Some(self.result()));
            }
        }

        Ok(None)
    }

    fn result(&mut self) -> InferenceResult {
        let text = std::mem::take(&mut self.text);
        let calls = std::mem::take(&mut self.calls);
        InferenceResult::ToolRequest { text, calls }.normalize()
    }
}

/// A finite, non-restartable sequence of stream events.
pub struct InferenceStream {
    receiver: mpsc::Receiver<Result<StreamEvent, GatewayError>>,
}

impl InferenceStream {
    pub fn new(receiver: mpsc::Receiver<Result<StreamEvent, GatewayError>>) -> Self {
        Self { receiver }
    }

    /// Build a stream from a channel of the given capacity.
    pub fn channel(
        capacity: usize,
    ) -> (mpsc::Sender<Result<StreamEvent, GatewayError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Next event, or `None` once the producer is done.
    pub async fn next(&mut self) -> Option<Result<StreamEvent, GatewayError>> {
        self.receiver.recv().await
    }

    /// Drain the stream into its final result.
    pub async fn collect(mut self) -> Result<InferenceResult, GatewayError> {
        let mut acc = StreamAccumulator::new();
        while let Some(event) = self.next().await {
            if let Some(result) = acc.push(event?)? {
                return Ok(result);
            }
        }
        Err(GatewayError::StreamInterrupted(
            "stream closed before StreamEnded".into(),
        ))
    }
}

/// The core ModelGateway trait.
///
/// The loop calls `infer()` or `infer_stream()` without knowing which
/// backend is behind it.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g., "bedrock", "scripted").
    fn name(&self) -> &str;

    /// Run one inference and return the complete result.
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResult, GatewayError>;

    /// Run one inference as a stream of partial events.
    ///
    /// Default implementation calls `infer()` and replays the result as events.
    async fn infer_stream(&self, request: InferenceRequest) -> Result<InferenceStream, GatewayError> {
        let result = self.infer(request).await?;
        let events = replay_events(result);
        let (tx, stream) = InferenceStream::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event, so this never waits
            let _ = tx.send(Ok(event)).await;
        }
        Ok(stream)
    }
}

/// The event sequence that accumulates to `result`.
pub fn replay_events(result: InferenceResult) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let (text, calls) = match result {
        InferenceResult::FinalAnswer { text } => (text, Vec::new()),
        InferenceResult::ToolRequest { text, calls } => (text, calls),
    };
    if !text.is_empty() {
        events.push(StreamEvent::TextDelta { text });
    }
    for call in calls {
        events.push(StreamEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        events.push(StreamEvent::ToolCallFinished { call });
    }
    events.push(StreamEvent::StreamEnded);
    events
}

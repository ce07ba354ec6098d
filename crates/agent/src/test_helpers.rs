//! Shared test helpers for loop, executor and gate tests.

use async_trait::async_trait;
use loopgate_core::context::RequestContext;
use loopgate_core::error::{GatewayError, ToolError};
use loopgate_core::gateway::{
    InferenceRequest, InferenceResult, InferenceStream, ModelGateway, StreamEvent,
};
use loopgate_core::tool::{Tool, ToolCall};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A gateway that returns a sequence of scripted results.
///
/// Each inference pops the next entry. Once the script is exhausted the
/// `repeat` result (if any) is returned forever; otherwise the call fails.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<InferenceResult, GatewayError>>>,
    repeat: Option<InferenceResult>,
    requests: Mutex<Vec<InferenceRequest>>,
    chunked_stream: bool,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<InferenceResult, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            chunked_stream: false,
        }
    }

    pub fn results(results: Vec<InferenceResult>) -> Self {
        Self::new(results.into_iter().map(Ok).collect())
    }

    /// One tool call, then a final answer.
    pub fn tool_then_answer(call: ToolCall, answer: &str) -> Self {
        Self::results(vec![
            InferenceResult::tool_request(vec![call]),
            InferenceResult::final_answer(answer),
        ])
    }

    /// Requests the same tool call on every inference.
    pub fn always(result: InferenceResult) -> Self {
        let mut gateway = Self::new(Vec::new());
        gateway.repeat = Some(result);
        gateway
    }

    /// Stream text word by word instead of in one delta.
    pub fn chunked(mut self) -> Self {
        self.chunked_stream = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResult, GatewayError> {
        self.requests.lock().unwrap().push(request);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        self.repeat
            .clone()
            .ok_or_else(|| GatewayError::MalformedResponse("script exhausted".into()))
    }

    async fn infer_stream(&self, request: InferenceRequest) -> Result<InferenceStream, GatewayError> {
        let result = self.infer(request).await?;
        let (text, calls) = match result {
            InferenceResult::FinalAnswer { text } => (text, Vec::new()),
            InferenceResult::ToolRequest { text, calls } => (text, calls),
        };

        let mut events = Vec::new();
        if self.chunked_stream {
            for word in text.split_inclusive(' ') {
                events.push(StreamEvent::TextDelta { text: word.into() });
            }
        } else if !text.is_empty() {
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

        let (tx, stream) = InferenceStream::channel(events.len());
        for event in events {
            tx.send(Ok(event)).await.unwrap();
        }
        Ok(stream)
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Echo,
    Fail,
    Panic,
}

/// A tool that counts invocations and echoes its arguments.
pub struct CountingTool {
    name: String,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    behavior: Behavior,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            behavior: Behavior::Echo,
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn failing(mut self) -> Self {
        self.behavior = Behavior::Fail;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.behavior = Behavior::Panic;
        self
    }

    /// Shared handle to the invocation counter.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Counts invocations"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &RequestContext,
    ) -> Result<serde_json::Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.behavior {
            Behavior::Echo => Ok(serde_json::json!({"tool": self.name, "arguments": arguments})),
            Behavior::Fail => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: "backend unavailable".into(),
            }),
            Behavior::Panic => panic!("{} blew up", self.name),
        }
    }
}

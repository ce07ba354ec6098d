//! Tool executor: runs approved calls and always produces a result.
//!
//! Nothing that goes wrong inside a single call escapes as an error:
//! unknown tools, bad arguments, guard blocks, tool errors, timeouts and
//! panics all become `success = false` results the model can read.

use futures::FutureExt;
use loopgate_core::context::RequestContext;
use loopgate_core::error::ToolError;
use loopgate_core::event::{DomainEvent, EventBus, ProgressEvent};
use loopgate_core::schema::validate_arguments;
use loopgate_core::tool::{ToolCall, ToolRegistry, ToolResult};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::guard::{ArgumentGuard, GuardVerdict};

#[derive(Clone)]
pub struct ToolExecutor {
    tools: Arc<ToolRegistry>,
    guard: Option<Arc<dyn ArgumentGuard>>,
    timeout: Option<Duration>,
    concurrent: bool,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolExecutor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            guard: None,
            timeout: None,
            concurrent: true,
            event_bus: None,
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn ArgumentGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Per-call time limit. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the calls of one batch concurrently (default) or one by one.
    pub fn with_concurrency(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Execute one call.
    pub async fn execute(&self, ctx: &RequestContext, call: &ToolCall) -> ToolResult {
        ctx.emit(ProgressEvent::ToolStarted {
            name: call.name.clone(),
            call_id: call.id.clone(),
        });

        let start = Instant::now();
        let result = self.run(ctx, call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if result.success {
            debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool succeeded");
        } else {
            warn!(
                tool = %call.name,
                call_id = %call.id,
                error = result.error.as_deref().unwrap_or_default(),
                "Tool failed"
            );
        }

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                session_id: ctx.session_id.to_string(),
                tool_name: call.name.clone(),
                success: result.success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }

        ctx.emit(ProgressEvent::ToolFinished {
            name: call.name.clone(),
            call_id: call.id.clone(),
            success: result.success,
        });
        result
    }

    /// Execute a batch. The output is in the same order as `calls`,
    /// whatever order the calls complete in.
    pub async fn execute_batch(&self, ctx: &RequestContext, calls: &[ToolCall]) -> Vec<ToolResult> {
        if self.concurrent && calls.len() > 1 {
            futures::future::join_all(calls.iter().map(|call| self.execute(ctx, call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(ctx, call).await);
            }
            results
        }
    }

    async fn run(&self, ctx: &RequestContext, call: &ToolCall) -> ToolResult {
        let tool = match self.tools.resolve(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                return ToolResult::failure(
                    &call.id,
                    &call.name,
                    format!("{e}. Available tools: {}", self.tools.names().join(", ")),
                );
            }
        };

        if let Err(e) = validate_arguments(&tool.input_schema(), &call.arguments) {
            return ToolResult::failure(&call.id, &call.name, e.to_string());
        }

        if let Some(guard) = &self.guard
            && let GuardVerdict::Block { reason } = guard.screen(call).await
        {
            return ToolResult::blocked(call, reason);
        }

        let invocation = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    };
                    return ToolResult::failure(&call.id, &call.name, err.to_string());
                }
            },
            None => invocation.await,
        };

        match outcome {
            Ok(Ok(payload)) => ToolResult::success(&call.id, &call.name, payload),
            Ok(Err(e)) => ToolResult::failure(&call.id, &call.name, e.to_string()),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                ToolResult::failure(&call.id, &call.name, format!("Tool panicked: {detail}"))
            }
        }
    }
}

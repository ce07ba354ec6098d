//! Tool trait: the abstraction over invocable capabilities.
//!
//! Tools are what give the model the ability to act in the world:
//! search the web, write files, publish messages, etc.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::ToolError;

/// Fixed payload folded into the conversation when a call is denied.
pub const DENIAL_MESSAGE: &str =
    "Tool use was denied by the user. Stop using this tool and tell the user the request could not be completed with it.";

/// A request from the model to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID within the originating assistant message
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result answers
    pub call_id: String,

    /// Name of the tool that was called
    pub tool_name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output (or an explanatory payload on failure)
    pub payload: serde_json::Value,

    /// Error description when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            payload: serde_json::Value::String(error.clone()),
            error: Some(error),
        }
    }

    /// Synthetic result for a call the approver refused.
    pub fn denied(call: &ToolCall) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            payload: serde_json::Value::String(DENIAL_MESSAGE.to_string()),
            error: Some("denied".into()),
        }
    }

    /// Synthetic result for a call stopped by an argument guard.
    pub fn blocked(call: &ToolCall, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            payload: serde_json::Value::String(format!(
                "The arguments contain disallowed content ({reason}). Tell the user this cannot be done."
            )),
            error: Some(format!("blocked: {reason}")),
        }
    }

    pub fn is_denial(&self) -> bool {
        self.error.as_deref() == Some("denied")
    }
}

/// What the gateway advertises to the model for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// The core Tool trait.
///
/// Side effects are whatever the capability performs. The loop never
/// retries a call, so idempotence is the tool's own concern.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's arguments.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &RequestContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Extra content an approver should see before deciding.
    fn approval_preview(&self, _arguments: &serde_json::Value) -> Option<String> {
        None
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

type InvokeFn = dyn Fn(serde_json::Value) -> BoxFuture<'static, std::result::Result<serde_json::Value, ToolError>>
    + Send
    + Sync;

/// A tool backed by a closure, for `ToolRegistry::register_fn`.
struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    invoke: Box<InvokeFn>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &RequestContext,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        (self.invoke)(arguments).await
    }
}

/// A registry of available tools.
///
/// Shared read-only across sessions once built.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::from(tool)).is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool registration");
        }
    }

    /// Register a closure as a tool.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        invoke: F,
    ) where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<serde_json::Value, ToolError>>
            + Send
            + 'static,
    {
        self.register(Box::new(FnTool {
            name: name.into(),
            description: description.into(),
            schema: input_schema,
            invoke: Box::new(move |args| invoke(args).boxed()),
        }));
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Descriptors for every tool, sorted by name so requests are stable.
    pub fn describe(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

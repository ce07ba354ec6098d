//! Built-in tool implementations for loopgate.
//!
//! Tools give the model the ability to act: search the web, write a
//! document into the workspace, and publish a notification.

pub mod file_write;
pub mod publish_message;
pub mod web_search;

use loopgate_config::ToolsConfig;
use loopgate_core::tool::ToolRegistry;

pub use file_write::FileWriteTool;
pub use publish_message::{Outbox, PublishMessageTool, PublishedMessage};
pub use web_search::WebSearchTool;

/// Create a registry with every built-in tool.
///
/// Returns the outbox the `publish_message` tool writes to, so the host
/// can forward or inspect what was sent.
pub fn default_registry(config: &ToolsConfig) -> (ToolRegistry, Outbox) {
    let outbox = Outbox::new();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WebSearchTool::new(config.search_max_results)));
    registry.register(Box::new(FileWriteTool::new(config.resolved_workspace())));
    registry.register(Box::new(PublishMessageTool::new(outbox.clone())));
    tracing::debug!(tools = registry.len(), "Built-in tools registered");
    (registry, outbox)
}

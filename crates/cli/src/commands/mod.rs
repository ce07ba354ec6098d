//! Subcommand implementations and the wiring they share.

pub mod config_cmd;
pub mod run;
pub mod sessions;

use loopgate_agent::{AutoApprove, AutoDeny, ConversationLoop};
use loopgate_checkpoint::{FileCheckpointStore, InMemoryCheckpointStore};
use loopgate_config::LoopgateConfig;
use loopgate_core::checkpoint::CheckpointStore;
use loopgate_tools::Outbox;
use std::sync::Arc;

use crate::demo::DemoGateway;
use crate::terminal::StdinApprover;
use crate::ApprovalMode;

/// Open the checkpoint store the config names.
pub fn open_store(config: &LoopgateConfig) -> Arc<dyn CheckpointStore> {
    match config.checkpoint.backend.as_str() {
        "memory" => {
            tracing::warn!("Memory checkpoint backend: sessions end with this process");
            Arc::new(InMemoryCheckpointStore::new())
        }
        _ => Arc::new(FileCheckpointStore::new(config.checkpoint.resolved_dir())),
    }
}

/// Build the demo research agent over the built-in tools.
pub fn build_loop(
    config: &LoopgateConfig,
    store: Arc<dyn CheckpointStore>,
    approval: ApprovalMode,
) -> Result<(ConversationLoop, Outbox), Box<dyn std::error::Error>> {
    let (registry, outbox) = loopgate_tools::default_registry(&config.tools);
    let agent = ConversationLoop::from_config(
        config,
        Arc::new(DemoGateway::new()),
        Arc::new(registry),
        store,
    )?;
    let agent = match approval {
        ApprovalMode::Prompt => agent.with_approver(Arc::new(StdinApprover)),
        ApprovalMode::Auto => agent.with_approver(Arc::new(AutoApprove)),
        ApprovalMode::Deny => agent.with_approver(Arc::new(AutoDeny)),
        ApprovalMode::Defer => agent,
    };
    Ok((agent, outbox))
}

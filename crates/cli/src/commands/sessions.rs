//! `loopgate sessions`, `show` and `abandon`.

use loopgate_config::LoopgateConfig;
use loopgate_core::message::{ContentBlock, SessionId};

use super::{build_loop, open_store};
use crate::ApprovalMode;

pub async fn list(config: &LoopgateConfig) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = open_store(config).list().await?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!("{:<38} {:<18} {:>5} {:>7}  saved", "session", "phase", "turns", "version");
    for s in sessions {
        println!(
            "{:<38} {:<18} {:>5} {:>7}  {}",
            s.session_id,
            s.phase,
            s.turns,
            s.version,
            s.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn show(
    config: &LoopgateConfig,
    session: String,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (agent, _) = build_loop(config, open_store(config), ApprovalMode::Defer)?;
    let session_id = SessionId::from(session);
    let state = agent.snapshot(&session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Session: {}", state.session_id);
    println!("Phase:   {}", state.phase.name());
    println!("Turns:   {}", state.turns);
    println!();
    for message in state.conversation.messages() {
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => println!("[{:?}] {text}", message.role),
                ContentBlock::ToolUse(call) => {
                    println!("[{:?}] calls {} ({}) {}", message.role, call.name, call.id, call.arguments)
                }
                ContentBlock::ToolOutcome(result) => {
                    let status = if result.success { "ok" } else { "failed" };
                    println!("[{:?}] {} {status}: {}", message.role, result.tool_name, result.payload)
                }
            }
        }
    }

    if let Some(request) = agent.pending_approval(&session_id).await? {
        println!();
        println!("Waiting for approval of call {}:", request.call_id);
        println!("{}", request.rendered_arguments);
    }
    Ok(())
}

pub async fn abandon(
    config: &LoopgateConfig,
    session: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let (agent, _) = build_loop(config, open_store(config), ApprovalMode::Defer)?;
    if agent.abandon(&SessionId::from(session.as_str())).await? {
        println!("Abandoned session {session}.");
    } else {
        println!("No session {session}.");
    }
    Ok(())
}

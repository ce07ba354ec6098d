//! `loopgate run` and `loopgate resume`.

use loopgate_agent::{drain, LoopOutcome, LoopReport, Resume};
use loopgate_config::LoopgateConfig;
use loopgate_core::approval::ApprovalVerdict;
use loopgate_core::context::RequestContext;
use loopgate_core::error::Result as LoopResult;
use loopgate_core::event::ProgressEvent;
use loopgate_core::message::SessionId;
use loopgate_tools::Outbox;
use std::future::Future;
use tokio::sync::mpsc;

use super::{build_loop, open_store};
use crate::terminal::TerminalSink;
use crate::ApprovalMode;

pub async fn run(
    config: &LoopgateConfig,
    message: String,
    session: Option<String>,
    approval: ApprovalMode,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (agent, outbox) = build_loop(config, open_store(config), approval)?;
    let agent = agent.with_streaming(stream || config.loop_settings.streaming);

    let session_id = session.map(SessionId::from).unwrap_or_default();
    eprintln!("  Session: {session_id}");
    let (ctx, rx) = RequestContext::new(session_id).with_progress_channel();

    let report = with_progress(rx, agent.start(&ctx, message)).await?;
    print_report(&report, &outbox);
    Ok(())
}

pub async fn resume(
    config: &LoopgateConfig,
    session: String,
    verdict: &str,
    call_id: Option<String>,
    approval: ApprovalMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let verdict: ApprovalVerdict = verdict.parse()?;
    let (agent, outbox) = build_loop(config, open_store(config), approval)?;
    let agent = agent.with_streaming(config.loop_settings.streaming);

    let mut resume = Resume::new(session.as_str(), verdict);
    resume.call_id = call_id;
    let (ctx, rx) = RequestContext::new(resume.session_id.clone()).with_progress_channel();

    let report = with_progress(rx, agent.resume(&ctx, resume)).await?;
    print_report(&report, &outbox);
    Ok(())
}

/// Render progress on stderr while `work` runs.
async fn with_progress(
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    work: impl Future<Output = LoopResult<LoopReport>>,
) -> LoopResult<LoopReport> {
    let renderer = tokio::spawn(async move {
        let mut sink = TerminalSink::new();
        drain(&mut rx, &mut sink).await;
    });
    let result = work.await;
    let _ = renderer.await;
    result
}

fn print_report(report: &LoopReport, outbox: &Outbox) {
    for published in outbox.drain() {
        eprintln!("  📨 [{}] {}", published.topic, published.text);
    }

    match &report.outcome {
        LoopOutcome::Completed { answer } => println!("{answer}"),
        LoopOutcome::Refused { message } | LoopOutcome::Denied { message } => {
            println!("{message}")
        }
        LoopOutcome::MaxTurnsExceeded { turns } => {
            eprintln!("  Stopped after {turns} turns without an answer.");
        }
        LoopOutcome::Suspended { request } => {
            eprintln!(
                "  Session {} is waiting for approval of {} ({}).",
                report.session_id, request.tool_name, request.call_id
            );
            eprintln!(
                "  Resume with: loopgate resume --session {} --verdict approve|deny",
                report.session_id
            );
        }
    }
}

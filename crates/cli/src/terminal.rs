//! Terminal approver and progress renderer.

use async_trait::async_trait;
use loopgate_agent::approval::Approver;
use loopgate_agent::progress::{ProgressSink, RenderUpdate};
use loopgate_core::approval::{ApprovalRequest, ApprovalVerdict};
use std::io::Write;

/// Asks on stderr and reads the verdict from stdin.
///
/// End of input suspends the session instead of deciding.
pub struct StdinApprover;

#[async_trait]
impl Approver for StdinApprover {
    async fn review(&self, request: &ApprovalRequest) -> Option<ApprovalVerdict> {
        eprintln!();
        eprintln!("  Approval required for call {}", request.call_id);
        for line in request.rendered_arguments.lines() {
            eprintln!("    {line}");
        }
        if let Some(preview) = &request.preview {
            eprintln!("  ---- preview ----");
            for line in preview.lines() {
                eprintln!("  | {line}");
            }
            eprintln!("  -----------------");
        }

        loop {
            eprint!("  Approve? [y/n] > ");
            let _ = std::io::stderr().flush();

            let line = tokio::task::spawn_blocking(|| {
                let mut buf = String::new();
                std::io::stdin().read_line(&mut buf).map(|n| (n, buf))
            })
            .await
            .ok()?
            .ok()?;

            match line {
                (0, _) => return None,
                (_, text) => match text.parse::<ApprovalVerdict>() {
                    Ok(verdict) => return Some(verdict),
                    Err(e) => eprintln!("  {e}"),
                },
            }
        }
    }
}

/// Renders status boxes and streamed text to stderr.
#[derive(Default)]
pub struct TerminalSink {
    labels: Vec<String>,
    printed: usize,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_text_line(&mut self) {
        if self.printed > 0 {
            eprintln!();
            self.printed = 0;
        }
    }
}

impl ProgressSink for TerminalSink {
    fn render(&mut self, update: &RenderUpdate) {
        match update {
            RenderUpdate::StatusOpened { label, .. } => {
                self.end_text_line();
                self.labels.push(label.clone());
                eprintln!("  ⏳ {label}");
            }
            RenderUpdate::StatusCompleted { index, success } => {
                self.end_text_line();
                let label = self.labels.get(*index).map(String::as_str).unwrap_or("");
                let mark = if *success { "✅" } else { "❌" };
                eprintln!("  {mark} {label}");
            }
            RenderUpdate::TextUpdated { text } => {
                // `text` is the whole buffer; print what is new
                if let Some(new) = text.get(self.printed..) {
                    if self.printed == 0 {
                        eprint!("  ");
                    }
                    eprint!("{new}");
                    let _ = std::io::stderr().flush();
                }
                self.printed = text.len();
            }
            RenderUpdate::Finished { .. } => self.end_text_line(),
        }
    }
}

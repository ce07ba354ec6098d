//! Progress reporter: projects progress events onto a renderable view.
//!
//! The view is a list of status boxes plus one growing text buffer. At
//! most one box is open at a time; opening a box completes the previous
//! one and flushes the buffer into it. The reporter never affects the
//! loop, and it assumes events arrive in the order they were emitted.

use loopgate_core::event::ProgressEvent;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Running,
    Complete,
    Failed,
}

/// One status box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBox {
    pub label: String,
    /// Sub-agent stage, when the box came from one
    pub stage: Option<String>,
    pub state: StatusState,
    /// Text streamed while this box was current
    pub text: String,
    #[serde(skip)]
    call_id: Option<String>,
}

/// A change a renderer should apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderUpdate {
    StatusOpened {
        index: usize,
        label: String,
        running: bool,
    },
    StatusCompleted {
        index: usize,
        success: bool,
    },
    TextUpdated {
        text: String,
    },
    Finished {
        text: String,
    },
}

/// Receives render updates. Terminal output, a web socket, a test vector.
pub trait ProgressSink: Send {
    fn render(&mut self, update: &RenderUpdate);
}

impl ProgressSink for Vec<RenderUpdate> {
    fn render(&mut self, update: &RenderUpdate) {
        self.push(update.clone());
    }
}

#[derive(Debug, Default)]
pub struct ProgressReporter {
    statuses: Vec<StatusBox>,
    current: Option<usize>,
    buffer: String,
    last_text: String,
    finished: bool,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event and return what changed.
    pub fn apply(&mut self, event: &ProgressEvent) -> Vec<RenderUpdate> {
        if self.finished {
            return Vec::new();
        }

        let mut updates = Vec::new();
        match event {
            ProgressEvent::ThinkingStarted => {
                self.open("Thinking...".into(), None, None, &mut updates);
            }
            ProgressEvent::SubAgentStageChanged { message, stage } => {
                self.open(message.clone(), Some(stage.clone()), None, &mut updates);
            }
            ProgressEvent::ToolStarted { name, call_id } => {
                self.open(
                    format!("Running {name}"),
                    None,
                    Some(call_id.clone()),
                    &mut updates,
                );
            }
            ProgressEvent::ToolFinished {
                call_id, success, ..
            } => {
                // Concurrent calls: the finished one may no longer be current.
                // A box already completed by a later open stays as it is.
                let index = self.statuses.iter().rposition(|s| {
                    s.call_id.as_deref() == Some(call_id.as_str())
                        && s.state == StatusState::Running
                });
                if let Some(index) = index {
                    self.flush_into(index);
                    self.statuses[index].state = if *success {
                        StatusState::Complete
                    } else {
                        StatusState::Failed
                    };
                    if self.current == Some(index) {
                        self.current = None;
                    }
                    updates.push(RenderUpdate::StatusCompleted {
                        index,
                        success: *success,
                    });
                }
            }
            ProgressEvent::ApprovalRequired { tool_name, .. } => {
                self.open(
                    format!("Waiting for approval: {tool_name}"),
                    None,
                    None,
                    &mut updates,
                );
            }
            ProgressEvent::TextDelta { text } => {
                self.buffer.push_str(text);
                updates.push(RenderUpdate::TextUpdated {
                    text: self.buffer.clone(),
                });
            }
            ProgressEvent::StreamEnded => {
                self.complete_current(&mut updates);
                if !self.buffer.is_empty() {
                    self.last_text = std::mem::take(&mut self.buffer);
                }
                self.finished = true;
                updates.push(RenderUpdate::Finished {
                    text: self.last_text.clone(),
                });
            }
        }
        updates
    }

    fn open(
        &mut self,
        label: String,
        stage: Option<String>,
        call_id: Option<String>,
        updates: &mut Vec<RenderUpdate>,
    ) {
        self.complete_current(updates);
        if !self.buffer.is_empty() {
            self.last_text = std::mem::take(&mut self.buffer);
        }
        let index = self.statuses.len();
        self.statuses.push(StatusBox {
            label: label.clone(),
            stage,
            state: StatusState::Running,
            text: String::new(),
            call_id,
        });
        self.current = Some(index);
        updates.push(RenderUpdate::StatusOpened {
            index,
            label,
            running: true,
        });
    }

    fn complete_current(&mut self, updates: &mut Vec<RenderUpdate>) {
        if let Some(index) = self.current {
            self.flush_into(index);
            self.current = None;
            if self.statuses[index].state == StatusState::Running {
                self.statuses[index].state = StatusState::Complete;
                updates.push(RenderUpdate::StatusCompleted {
                    index,
                    success: true,
                });
            }
        }
    }

    fn flush_into(&mut self, index: usize) {
        if self.current == Some(index) && !self.buffer.is_empty() {
            self.statuses[index].text.push_str(&self.buffer);
            self.last_text = std::mem::take(&mut self.buffer);
        }
    }

    pub fn statuses(&self) -> &[StatusBox] {
        &self.statuses
    }

    /// The most recent block of streamed text (usually the answer).
    pub fn final_text(&self) -> &str {
        if self.buffer.is_empty() {
            &self.last_text
        } else {
            &self.buffer
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Feed every event from `rx` through a reporter into `sink` until the
/// stream ends or the sender goes away.
pub async fn drain(
    rx: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    sink: &mut dyn ProgressSink,
) -> ProgressReporter {
    let mut reporter = ProgressReporter::new();
    while let Some(event) = rx.recv().await {
        for update in reporter.apply(&event) {
            sink.render(&update);
        }
        if reporter.is_finished() {
            break;
        }
    }
    reporter
}

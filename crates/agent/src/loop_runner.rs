//! The conversation loop driver.
//!
//! Wraps [`machine::step`] with the I/O each phase needs: inference in
//! `Inferring`, the approval gate in `AwaitingApproval`, the executor in
//! `Executing`. State is checkpointed after every transition, so a session
//! suspended for approval can be resumed later, by this process or another.

use loopgate_config::LoopgateConfig;
use loopgate_core::approval::{ApprovalPolicy, ApprovalRequest, ApprovalVerdict};
use loopgate_core::checkpoint::CheckpointStore;
use loopgate_core::context::RequestContext;
use loopgate_core::error::{Error, GatewayError, Result};
use loopgate_core::event::{DomainEvent, EventBus, ProgressEvent};
use loopgate_core::gateway::{
    InferenceRequest, InferenceResult, ModelGateway, StreamAccumulator, StreamEvent,
};
use loopgate_core::message::{Conversation, SessionId};
use loopgate_core::state::{LoopPhase, LoopState, Termination};
use loopgate_core::tool::{ToolCall, ToolRegistry};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalGate, Approver, GateDecision};
use crate::executor::ToolExecutor;
use crate::guard::{ArgumentGuard, TermGuard};
use crate::machine::{self, DenialBehavior, Input};

/// How a `start`/`resume`/`retry` call ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopOutcome {
    Completed { answer: String },
    Refused { message: String },
    MaxTurnsExceeded { turns: u32 },
    Denied { message: String },
    /// Waiting for a verdict; continue with `ConversationLoop::resume`.
    Suspended { request: ApprovalRequest },
}

impl LoopOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Refused { .. } => "refused",
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::Denied { .. } => "denied",
            Self::Suspended { .. } => "suspended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Suspended { .. })
    }

    /// The user-facing text of a terminal outcome.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed { answer } => Some(answer),
            Self::Refused { message } | Self::Denied { message } => Some(message),
            Self::MaxTurnsExceeded { .. } | Self::Suspended { .. } => None,
        }
    }
}

impl From<Termination> for LoopOutcome {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::Completed { answer } => Self::Completed { answer },
            Termination::Refused { message } => Self::Refused { message },
            Termination::MaxTurnsExceeded { turns } => Self::MaxTurnsExceeded { turns },
            Termination::Denied { message } => Self::Denied { message },
        }
    }
}

/// The result of driving a session until it ends or suspends.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub session_id: SessionId,
    pub outcome: LoopOutcome,
    /// The conversation as checkpointed, for inspection
    pub conversation: Conversation,
    pub turns: u32,
}

/// A verdict delivered for a suspended session.
#[derive(Debug, Clone)]
pub struct Resume {
    pub session_id: SessionId,
    /// The call the verdict is for. `None` applies it to whichever call is pending.
    pub call_id: Option<String>,
    pub verdict: ApprovalVerdict,
}

impl Resume {
    pub fn new(session_id: impl Into<SessionId>, verdict: ApprovalVerdict) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: None,
            verdict,
        }
    }

    pub fn for_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// Orchestrates inference, approval, and tool execution for many sessions.
///
/// Shared state is read-only (gateway, tools, policy); per-session state
/// lives in the checkpoint store.
pub struct ConversationLoop {
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn CheckpointStore>,
    executor: ToolExecutor,
    gate: ApprovalGate,
    policy: ApprovalPolicy,
    max_turns: u32,
    system_prompt: Option<String>,
    streaming: bool,
    denial: DenialBehavior,
    event_bus: Arc<EventBus>,
}

impl ConversationLoop {
    /// Create a loop that asks about every tool and suspends for each verdict.
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            gateway,
            executor: ToolExecutor::new(tools.clone()),
            tools,
            store,
            gate: ApprovalGate::deferred(),
            policy: ApprovalPolicy::ask_all(),
            max_turns: 10,
            system_prompt: None,
            streaming: false,
            denial: DenialBehavior::Continue,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Build a loop from configuration. The approver is left to the host.
    pub fn from_config(
        config: &LoopgateConfig,
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let settings = &config.loop_settings;
        let policy = config.approval.to_policy().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let denial = settings
            .on_denial
            .parse::<DenialBehavior>()
            .map_err(|message| Error::Config { message })?;
        let timeout = (settings.tool_timeout_secs > 0)
            .then(|| Duration::from_secs(settings.tool_timeout_secs));

        let mut agent = Self::new(gateway, tools, store)
            .with_policy(policy)
            .with_max_turns(settings.max_turns)
            .with_streaming(settings.streaming)
            .with_concurrent_tools(settings.concurrent_tools)
            .with_tool_timeout(timeout)
            .with_denial_behavior(denial);
        if let Some(prompt) = &settings.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }
        if let Some(guard) = TermGuard::from_config(&config.guard) {
            agent = agent.with_guard(Arc::new(guard));
        }
        Ok(agent)
    }

    /// Maximum inferences per user message.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max.max(1);
        self
    }

    pub fn with_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Decide gated calls in-process instead of suspending.
    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.gate = ApprovalGate::new(approver);
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn ArgumentGuard>) -> Self {
        self.executor = self.executor.with_guard(guard);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Use the gateway's streaming interface and forward text deltas.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn with_concurrent_tools(mut self, enabled: bool) -> Self {
        self.executor = self.executor.with_concurrency(enabled);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor = self.executor.with_timeout(timeout);
        self
    }

    pub fn with_denial_behavior(mut self, denial: DenialBehavior) -> Self {
        self.denial = denial;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.executor = self.executor.with_event_bus(bus.clone());
        self.event_bus = bus;
        self
    }

    /// Submit a user message for `ctx.session_id`.
    ///
    /// A new session is seeded with the message; a finished session takes it
    /// as a follow-up. A session that is suspended or mid-turn is busy.
    pub async fn start(
        &self,
        ctx: &RequestContext,
        user_message: impl Into<String>,
    ) -> Result<LoopReport> {
        let result = self.start_inner(ctx, user_message.into()).await;
        ctx.emit(ProgressEvent::StreamEnded);
        result
    }

    async fn start_inner(&self, ctx: &RequestContext, user_message: String) -> Result<LoopReport> {
        let session_id = ctx.session_id.clone();
        let (state, version) = match self.store.load(&session_id).await? {
            None => {
                let state = LoopState::seed(session_id.clone(), user_message);
                let version = self.store.save(&state, None).await?;
                info!(session_id = %session_id, "Session started");
                self.event_bus.publish(DomainEvent::SessionStarted {
                    session_id: session_id.to_string(),
                    timestamp: Utc::now(),
                });
                (state, version)
            }
            Some(cp) if cp.state.is_terminal() => {
                debug!(session_id = %session_id, "Follow-up on finished session");
                let state = self.step(cp.state, Input::FollowUp(user_message))?;
                let version = self.store.save(&state, Some(cp.version)).await?;
                (state, version)
            }
            Some(_) => return Err(Error::SessionBusy(session_id)),
        };
        self.drive(ctx, state, version).await
    }

    /// Deliver a verdict to a suspended session and continue it.
    ///
    /// The verdict is checkpointed before any tool runs, so of two racing
    /// resumes for the same call only one proceeds.
    pub async fn resume(&self, ctx: &RequestContext, resume: Resume) -> Result<LoopReport> {
        let mut ctx = ctx.clone();
        ctx.session_id = resume.session_id.clone();
        let result = self.resume_inner(&ctx, resume).await;
        ctx.emit(ProgressEvent::StreamEnded);
        result
    }

    async fn resume_inner(&self, ctx: &RequestContext, resume: Resume) -> Result<LoopReport> {
        let cp = self
            .store
            .load(&resume.session_id)
            .await?
            .ok_or_else(|| Error::UnknownSession(resume.session_id.clone()))?;

        let LoopPhase::AwaitingApproval { call_id } = &cp.state.phase else {
            return Err(Error::NotAwaitingApproval(resume.session_id));
        };
        let call_id = match resume.call_id {
            Some(received) if &received != call_id => {
                return Err(Error::VerdictMismatch {
                    expected: call_id.clone(),
                    received,
                });
            }
            _ => call_id.clone(),
        };

        info!(
            session_id = %resume.session_id,
            call_id = %call_id,
            verdict = %resume.verdict,
            "Resuming session"
        );
        let approved = resume.verdict.is_approved();
        let state = self.step(
            cp.state,
            Input::Verdict {
                call_id: call_id.clone(),
                verdict: resume.verdict,
            },
        )?;
        let version = self.store.save(&state, Some(cp.version)).await?;
        self.event_bus.publish(DomainEvent::ApprovalResolved {
            session_id: resume.session_id.to_string(),
            call_id,
            approved,
            timestamp: Utc::now(),
        });
        self.drive(ctx, state, version).await
    }

    /// Continue a session that stopped mid-turn.
    ///
    /// From `Inferring` the pending inference is re-run after a gateway
    /// error. From `Executing` the approved calls of the turn run again, so
    /// a tool that finished before the crash may run twice.
    pub async fn retry(&self, ctx: &RequestContext, session_id: &SessionId) -> Result<LoopReport> {
        let mut ctx = ctx.clone();
        ctx.session_id = session_id.clone();
        let result = async {
            let cp = self
                .store
                .load(session_id)
                .await?
                .ok_or_else(|| Error::UnknownSession(session_id.clone()))?;
            match cp.state.phase {
                LoopPhase::Inferring => {}
                LoopPhase::Executing => warn!(
                    session_id = %session_id,
                    calls = cp.state.approved_calls().len(),
                    "Re-running approved calls of an interrupted turn"
                ),
                _ => {
                    return Err(Error::InvalidTransition {
                        phase: cp.state.phase.name().to_string(),
                        input: "retry".into(),
                    });
                }
            }
            self.drive(&ctx, cp.state, cp.version).await
        }
        .await;
        ctx.emit(ProgressEvent::StreamEnded);
        result
    }

    /// The checkpointed state of a session.
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<LoopState> {
        self.store
            .load(session_id)
            .await?
            .map(|cp| cp.state)
            .ok_or_else(|| Error::UnknownSession(session_id.clone()))
    }

    /// The approval a suspended session is waiting on, if any.
    pub async fn pending_approval(&self, session_id: &SessionId) -> Result<Option<ApprovalRequest>> {
        let state = self.snapshot(session_id).await?;
        Ok(state.awaiting_call().map(|call| self.approval_request(&state, call)))
    }

    /// Drop a session. Returns whether it existed.
    pub async fn abandon(&self, session_id: &SessionId) -> Result<bool> {
        let removed = self.store.remove(session_id).await?;
        if removed {
            info!(session_id = %session_id, "Session abandoned");
            self.event_bus.publish(DomainEvent::LoopTerminated {
                session_id: session_id.to_string(),
                outcome: "abandoned".into(),
                turns: 0,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    fn step(&self, state: LoopState, input: Input) -> Result<LoopState> {
        machine::step(state, input, &self.policy, self.denial)
    }

    async fn drive(
        &self,
        ctx: &RequestContext,
        mut state: LoopState,
        mut version: u64,
    ) -> Result<LoopReport> {
        loop {
            // Published once the verdict is checkpointed
            let mut resolved = None;
            let input = match state.phase.clone() {
                LoopPhase::Terminal { termination } => {
                    return Ok(self.finish(state, termination.into()));
                }

                LoopPhase::Inferring => {
                    if state.turns >= self.max_turns {
                        warn!(
                            session_id = %state.session_id,
                            turns = state.turns,
                            "Turn budget exhausted"
                        );
                        Input::TurnBudgetExhausted
                    } else {
                        match self.infer(ctx, &state).await {
                            Ok(result) => {
                                let tool_calls = match &result {
                                    InferenceResult::FinalAnswer { .. } => 0,
                                    InferenceResult::ToolRequest { calls, .. } => calls.len(),
                                };
                                debug!(
                                    session_id = %state.session_id,
                                    turn = state.turns + 1,
                                    tool_calls,
                                    "Inference completed"
                                );
                                self.event_bus.publish(DomainEvent::InferenceCompleted {
                                    session_id: state.session_id.to_string(),
                                    turn: state.turns + 1,
                                    tool_calls,
                                    timestamp: Utc::now(),
                                });
                                Input::Inference(result)
                            }
                            Err(GatewayError::ContentPolicyViolation(reason)) => {
                                warn!(session_id = %state.session_id, %reason, "Content policy refusal");
                                Input::PolicyRefusal {
                                    message: format!(
                                        "I can't help with that request. ({reason})"
                                    ),
                                }
                            }
                            Err(e) => {
                                warn!(session_id = %state.session_id, error = %e, "Inference failed");
                                return Err(e.into());
                            }
                        }
                    }
                }

                LoopPhase::AwaitingApproval { call_id } => {
                    let Some(call) = state.awaiting_call() else {
                        return Err(Error::InvalidTransition {
                            phase: state.phase.name().to_string(),
                            input: format!("approval for missing call '{call_id}'"),
                        });
                    };
                    let request = self.approval_request(&state, call);
                    self.event_bus.publish(DomainEvent::ApprovalRequested {
                        session_id: state.session_id.to_string(),
                        call_id: call_id.clone(),
                        tool_name: request.tool_name.clone(),
                        timestamp: Utc::now(),
                    });

                    match self.gate.request(ctx, &request).await {
                        GateDecision::Verdict(verdict) => {
                            resolved = Some(DomainEvent::ApprovalResolved {
                                session_id: state.session_id.to_string(),
                                call_id: call_id.clone(),
                                approved: verdict.is_approved(),
                                timestamp: Utc::now(),
                            });
                            Input::Verdict { call_id, verdict }
                        }
                        GateDecision::Suspend => {
                            return Ok(LoopReport {
                                session_id: state.session_id.clone(),
                                turns: state.turns,
                                conversation: state.conversation,
                                outcome: LoopOutcome::Suspended { request },
                            });
                        }
                    }
                }

                LoopPhase::Executing => {
                    let calls = state.approved_calls();
                    debug!(
                        session_id = %state.session_id,
                        calls = calls.len(),
                        "Executing approved calls"
                    );
                    Input::Executed(self.executor.execute_batch(ctx, &calls).await)
                }
            };

            state = self.step(state, input)?;
            version = self.store.save(&state, Some(version)).await?;
            if let Some(event) = resolved {
                self.event_bus.publish(event);
            }
        }
    }

    async fn infer(
        &self,
        ctx: &RequestContext,
        state: &LoopState,
    ) -> std::result::Result<InferenceResult, GatewayError> {
        ctx.emit(ProgressEvent::ThinkingStarted);
        let request = InferenceRequest {
            session_id: state.session_id.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: state.conversation.messages().to_vec(),
            tools: self.tools.describe(),
        };

        if !self.streaming {
            let result = self.gateway.infer(request).await?.normalize();
            let text = match &result {
                InferenceResult::FinalAnswer { text } | InferenceResult::ToolRequest { text, .. } => {
                    text
                }
            };
            if !text.is_empty() {
                ctx.emit(ProgressEvent::TextDelta { text: text.clone() });
            }
            return Ok(result);
        }

        let mut stream = self.gateway.infer_stream(request).await?;
        let mut accumulator = StreamAccumulator::new();
        while let Some(event) = stream.next().await {
            let event = event?;
            if let StreamEvent::TextDelta { text } = &event {
                ctx.emit(ProgressEvent::TextDelta { text: text.clone() });
            }
            if let Some(result) = accumulator.push(event)? {
                return Ok(result);
            }
        }
        Err(GatewayError::StreamInterrupted(
            "stream closed before StreamEnded".into(),
        ))
    }

    fn approval_request(
        &self,
        state: &LoopState,
        call: &ToolCall,
    ) -> ApprovalRequest {
        let preview = self
            .tools
            .resolve(&call.name)
            .ok()
            .and_then(|tool| tool.approval_preview(&call.arguments));
        ApprovalRequest::for_call(state.session_id.clone(), call, preview)
    }

    fn finish(&self, state: LoopState, outcome: LoopOutcome) -> LoopReport {
        info!(
            session_id = %state.session_id,
            outcome = outcome.kind(),
            turns = state.turns,
            "Loop terminated"
        );
        self.event_bus.publish(DomainEvent::LoopTerminated {
            session_id: state.session_id.to_string(),
            outcome: outcome.kind().to_string(),
            turns: state.turns,
            timestamp: Utc::now(),
        });
        LoopReport {
            session_id: state.session_id,
            outcome,
            conversation: state.conversation,
            turns: state.turns,
        }
    }
}

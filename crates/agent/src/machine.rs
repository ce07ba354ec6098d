//! The loop's transition function.
//!
//! `step` is pure: it takes a [`LoopState`] and one [`Input`] and returns
//! the next state. All I/O (inference, approval, tool execution,
//! checkpointing) happens in the driver around it.
//!
//! ```text
//!   Inferring ──FinalAnswer──────────────────────────────▶ Terminal
//!   Inferring ──ToolRequest──▶ AwaitingApproval ──APPROVE──▶ Executing
//!                    │                 │
//!                    │                 └──DENY (denial result)──┐
//!                    └──ungated──▶ Executing ──results──▶ fold ◀┘──▶ Inferring
//! ```

use loopgate_core::approval::{ApprovalPolicy, ApprovalVerdict, ToolPermission};
use loopgate_core::error::{Error, GatewayError, Result};
use loopgate_core::gateway::InferenceResult;
use loopgate_core::message::Message;
use loopgate_core::state::{Disposition, LoopPhase, LoopState, PendingCall, Termination};
use loopgate_core::tool::{ToolResult, DENIAL_MESSAGE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// What happens after a turn in which a call was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialBehavior {
    /// Fold the denial and let the model react to it.
    #[default]
    Continue,
    /// Fold the denial, then end the session with the refusal text.
    Stop,
}

impl FromStr for DenialBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown denial behavior '{other}', expected continue or stop")),
        }
    }
}

/// Everything that can move the state machine.
#[derive(Debug, Clone)]
pub enum Input {
    /// The gateway answered.
    Inference(InferenceResult),
    /// The gateway's content policy refused the turn.
    PolicyRefusal { message: String },
    /// A human decided on the awaited call.
    Verdict {
        call_id: String,
        verdict: ApprovalVerdict,
    },
    /// Results for the approved calls of this turn.
    Executed(Vec<ToolResult>),
    /// No inferences left for this user message.
    TurnBudgetExhausted,
    /// A new user message on a finished session.
    FollowUp(String),
}

impl Input {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inference(_) => "inference",
            Self::PolicyRefusal { .. } => "policy_refusal",
            Self::Verdict { .. } => "verdict",
            Self::Executed(_) => "executed",
            Self::TurnBudgetExhausted => "turn_budget_exhausted",
            Self::FollowUp(_) => "follow_up",
        }
    }
}

/// Apply one input to the state.
pub fn step(
    mut state: LoopState,
    input: Input,
    policy: &ApprovalPolicy,
    denial: DenialBehavior,
) -> Result<LoopState> {
    let phase = state.phase.clone();
    match (phase, input) {
        (LoopPhase::Inferring, Input::Inference(result)) => {
            state.turns += 1;
            match result.normalize() {
                InferenceResult::FinalAnswer { text } => {
                    state
                        .conversation
                        .push(Message::assistant(text.clone(), Vec::new()));
                    state.phase = LoopPhase::Terminal {
                        termination: Termination::Completed { answer: text },
                    };
                }
                InferenceResult::ToolRequest { text, calls } => {
                    let mut seen = HashSet::new();
                    if let Some(dup) = calls.iter().find(|c| !seen.insert(c.id.as_str())) {
                        return Err(GatewayError::MalformedResponse(format!(
                            "tool call id '{}' appears more than once",
                            dup.id
                        ))
                        .into());
                    }

                    state
                        .conversation
                        .push(Message::assistant(text, calls.clone()));
                    state.denied_in_turn = false;
                    state.pending = calls
                        .into_iter()
                        .map(|call| {
                            let disposition = match policy.permission_for(&call.name) {
                                ToolPermission::Allow => Disposition::Approved,
                                ToolPermission::Ask => Disposition::NeedsApproval,
                                ToolPermission::Deny => {
                                    state.denied_in_turn = true;
                                    Disposition::Resolved {
                                        result: ToolResult::denied(&call),
                                    }
                                }
                            };
                            PendingCall { call, disposition }
                        })
                        .collect();
                    settle(&mut state, denial);
                }
            }
        }

        (LoopPhase::Inferring, Input::PolicyRefusal { message }) => {
            state
                .conversation
                .push(Message::assistant(message.clone(), Vec::new()));
            state.phase = LoopPhase::Terminal {
                termination: Termination::Refused { message },
            };
        }

        (LoopPhase::Inferring, Input::TurnBudgetExhausted) => {
            state.phase = LoopPhase::Terminal {
                termination: Termination::MaxTurnsExceeded { turns: state.turns },
            };
        }

        (LoopPhase::AwaitingApproval { call_id: awaited }, Input::Verdict { call_id, verdict }) => {
            if call_id != awaited {
                return Err(Error::VerdictMismatch {
                    expected: awaited,
                    received: call_id,
                });
            }
            let Some(pending) = state
                .pending
                .iter_mut()
                .find(|p| p.call.id == awaited && p.disposition == Disposition::NeedsApproval)
            else {
                return Err(invalid(&state, "verdict"));
            };
            pending.disposition = match verdict {
                ApprovalVerdict::Approve => Disposition::Approved,
                ApprovalVerdict::Deny => {
                    state.denied_in_turn = true;
                    Disposition::Resolved {
                        result: ToolResult::denied(&pending.call),
                    }
                }
            };
            settle(&mut state, denial);
        }

        (LoopPhase::Executing, Input::Executed(results)) => {
            for result in results {
                let Some(pending) = state.pending.iter_mut().find(|p| {
                    p.call.id == result.call_id && p.disposition == Disposition::Approved
                }) else {
                    return Err(invalid(&state, "result for a call that was not approved"));
                };
                pending.disposition = Disposition::Resolved { result };
            }
            if state
                .pending
                .iter()
                .any(|p| p.disposition == Disposition::Approved)
            {
                return Err(invalid(&state, "executed (results missing)"));
            }
            settle(&mut state, denial);
        }

        (LoopPhase::Terminal { .. }, Input::FollowUp(text)) => {
            state.conversation.push(Message::user(text));
            state.turns = 0;
            state.pending.clear();
            state.denied_in_turn = false;
            state.phase = LoopPhase::Inferring;
        }

        (_, input) => return Err(invalid(&state, input.name())),
    }

    state.touch();
    Ok(state)
}

/// Route the current turn forward: ask about the first ungated call,
/// execute approved calls, or fold once everything is resolved.
fn settle(state: &mut LoopState, denial: DenialBehavior) {
    if let Some(next) = state
        .pending
        .iter()
        .find(|p| p.disposition == Disposition::NeedsApproval)
    {
        state.phase = LoopPhase::AwaitingApproval {
            call_id: next.call.id.clone(),
        };
        return;
    }

    if state
        .pending
        .iter()
        .any(|p| p.disposition == Disposition::Approved)
    {
        state.phase = LoopPhase::Executing;
        return;
    }

    // Every call resolved: append results in issue order
    for pending in std::mem::take(&mut state.pending) {
        if let Disposition::Resolved { result } = pending.disposition {
            state.conversation.push(Message::tool_result(result));
        }
    }

    state.phase = if state.denied_in_turn && denial == DenialBehavior::Stop {
        LoopPhase::Terminal {
            termination: Termination::Denied {
                message: DENIAL_MESSAGE.to_string(),
            },
        }
    } else {
        LoopPhase::Inferring
    };
    state.denied_in_turn = false;
}

fn invalid(state: &LoopState, input: &str) -> Error {
    Error::InvalidTransition {
        phase: state.phase.name().to_string(),
        input: input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopgate_core::message::{Role, SessionId};
    use loopgate_core::tool::ToolCall;
    use serde_json::json;

    fn seed() -> LoopState {
        LoopState::seed(SessionId::from("s1"), "search X and report")
    }

    fn search(id: &str) -> ToolCall {
        ToolCall::new(id, "search", json!({"q": "X"}))
    }

    fn ask() -> ApprovalPolicy {
        ApprovalPolicy::ask_all()
    }

    #[test]
    fn final_answer_terminates() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::final_answer("done")),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(
            state.termination(),
            Some(&Termination::Completed {
                answer: "done".into()
            })
        );
        assert_eq!(state.turns, 1);
        assert_eq!(state.conversation.len(), 2);
    }

    #[test]
    fn gated_call_awaits_approval() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("c1")])),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(
            state.phase,
            LoopPhase::AwaitingApproval {
                call_id: "c1".into()
            }
        );
        assert_eq!(state.conversation.last().unwrap().tool_calls().len(), 1);
    }

    #[test]
    fn ungated_call_goes_straight_to_executing() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("c1")])),
            &ApprovalPolicy::allow_all(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(state.phase, LoopPhase::Executing);
        assert_eq!(state.approved_calls().len(), 1);
    }

    #[test]
    fn approvals_are_requested_in_call_order() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("a"), search("b")])),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let state = step(
            state,
            Input::Verdict {
                call_id: "a".into(),
                verdict: ApprovalVerdict::Approve,
            },
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(
            state.phase,
            LoopPhase::AwaitingApproval {
                call_id: "b".into()
            }
        );
    }

    #[test]
    fn deny_folds_without_executing() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("c1")])),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let state = step(
            state,
            Input::Verdict {
                call_id: "c1".into(),
                verdict: ApprovalVerdict::Deny,
            },
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(state.phase, LoopPhase::Inferring);
        let last = state.conversation.last().unwrap();
        assert_eq!(last.role, Role::ToolResult);
        assert!(last.tool_result_block().unwrap().is_denial());
        assert!(state.pending.is_empty());
    }

    #[test]
    fn deny_with_stop_terminates() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("c1")])),
            &ask(),
            DenialBehavior::Stop,
        )
        .unwrap();
        let state = step(
            state,
            Input::Verdict {
                call_id: "c1".into(),
                verdict: ApprovalVerdict::Deny,
            },
            &ask(),
            DenialBehavior::Stop,
        )
        .unwrap();
        assert_eq!(
            state.termination(),
            Some(&Termination::Denied {
                message: DENIAL_MESSAGE.into()
            })
        );
        // The denial is still folded before terminating
        assert_eq!(state.conversation.last().unwrap().role, Role::ToolResult);
    }

    #[test]
    fn denial_does_not_cancel_siblings() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("a"), search("b")])),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let state = step(
            state,
            Input::Verdict {
                call_id: "a".into(),
                verdict: ApprovalVerdict::Deny,
            },
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let state = step(
            state,
            Input::Verdict {
                call_id: "b".into(),
                verdict: ApprovalVerdict::Approve,
            },
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(state.phase, LoopPhase::Executing);
        assert_eq!(state.approved_calls()[0].id, "b");
    }

    #[test]
    fn results_fold_in_call_order() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("a"), search("b")])),
            &ApprovalPolicy::allow_all(),
            DenialBehavior::Continue,
        )
        .unwrap();
        // Results arrive in completion order, b first
        let state = step(
            state,
            Input::Executed(vec![
                ToolResult::success("b", "search", json!("B")),
                ToolResult::success("a", "search", json!("A")),
            ]),
            &ApprovalPolicy::allow_all(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let ids: Vec<_> = state
            .conversation
            .messages()
            .iter()
            .filter_map(|m| m.tool_result_block())
            .map(|r| r.call_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(state.phase, LoopPhase::Inferring);
    }

    #[test]
    fn denied_permission_never_asks() {
        let policy = ApprovalPolicy::allow_all().with_tool("search", ToolPermission::Deny);
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("c1")])),
            &policy,
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(state.phase, LoopPhase::Inferring);
        assert!(state
            .conversation
            .last()
            .unwrap()
            .tool_result_block()
            .unwrap()
            .is_denial());
    }

    #[test]
    fn mismatched_verdict_is_rejected() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("c1")])),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let err = step(
            state,
            Input::Verdict {
                call_id: "other".into(),
                verdict: ApprovalVerdict::Approve,
            },
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VerdictMismatch { .. }));
    }

    #[test]
    fn duplicate_call_ids_are_malformed() {
        let err = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("a"), search("a")])),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Gateway(GatewayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn partial_results_are_rejected() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::tool_request(vec![search("a"), search("b")])),
            &ApprovalPolicy::allow_all(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let err = step(
            state,
            Input::Executed(vec![ToolResult::success("a", "search", json!(1))]),
            &ApprovalPolicy::allow_all(),
            DenialBehavior::Continue,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn budget_exhaustion_terminates() {
        let mut state = seed();
        state.turns = 3;
        let state = step(state, Input::TurnBudgetExhausted, &ask(), DenialBehavior::Continue)
            .unwrap();
        assert_eq!(
            state.termination(),
            Some(&Termination::MaxTurnsExceeded { turns: 3 })
        );
    }

    #[test]
    fn policy_refusal_terminates() {
        let state = step(
            seed(),
            Input::PolicyRefusal {
                message: "I can't help with that.".into(),
            },
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(state.termination().unwrap().kind(), "refused");
    }

    #[test]
    fn follow_up_reopens_terminal_session() {
        let state = step(
            seed(),
            Input::Inference(InferenceResult::final_answer("done")),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        let state = step(
            state,
            Input::FollowUp("and now Y".into()),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap();
        assert_eq!(state.phase, LoopPhase::Inferring);
        assert_eq!(state.turns, 0);
        assert_eq!(state.conversation.len(), 3);
    }

    #[test]
    fn wrong_input_for_phase_is_invalid() {
        let err = step(
            seed(),
            Input::Executed(vec![]),
            &ask(),
            DenialBehavior::Continue,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { phase, .. } if phase == "inferring"));
    }

    #[test]
    fn denial_behavior_parses() {
        assert_eq!("stop".parse::<DenialBehavior>().unwrap(), DenialBehavior::Stop);
        assert_eq!(" Continue ".parse::<DenialBehavior>().unwrap(), DenialBehavior::Continue);
        assert!("halt".parse::<DenialBehavior>().is_err());
    }
}

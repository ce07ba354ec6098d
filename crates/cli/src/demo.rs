//! Demo gateway: a scripted research assistant.
//!
//! Stands in for a hosted model so approval, denial and resume can be tried
//! from the terminal. For each user message it searches the web, writes a
//! report from the results, and answers. It reads only the conversation, so
//! a resumed session picks up where it stopped.

use async_trait::async_trait;
use loopgate_core::error::GatewayError;
use loopgate_core::gateway::{InferenceRequest, InferenceResult, ModelGateway};
use loopgate_core::message::{Message, Role};
use loopgate_core::tool::{ToolCall, ToolResult};
use serde_json::json;

pub const REPORT_PATH: &str = "report.md";

/// Messages mentioning these are refused by the gateway itself.
const REFUSED_TOPICS: &[&str] = &["malware", "weapon"];

#[derive(Debug, Default)]
pub struct DemoGateway;

impl DemoGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelGateway for DemoGateway {
    fn name(&self) -> &str {
        "demo"
    }

    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResult, GatewayError> {
        let start = request
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| GatewayError::MalformedResponse("no user message".into()))?;
        let topic = request.messages[start].text();
        let turn = &request.messages[start..];

        let lowered = topic.to_lowercase();
        if let Some(term) = REFUSED_TOPICS.iter().find(|t| lowered.contains(**t)) {
            return Err(GatewayError::ContentPolicyViolation(format!(
                "requests about {term} are not supported"
            )));
        }

        let call_id = format!("call_{}", request.messages.len());
        let last = turn.iter().rev().find_map(Message::tool_result_block);

        Ok(match last {
            None => InferenceResult::ToolRequest {
                text: format!("Let me search for \"{topic}\"."),
                calls: vec![ToolCall::new(call_id, "web_search", json!({ "query": topic }))],
            },
            Some(result) if result.tool_name == "web_search" && result.success => {
                InferenceResult::ToolRequest {
                    text: "I found some sources. I'll write them up.".into(),
                    calls: vec![ToolCall::new(
                        call_id,
                        "file_write",
                        json!({
                            "file_path": REPORT_PATH,
                            "text": render_report(&topic, result),
                        }),
                    )],
                }
            }
            Some(result) if result.tool_name == "web_search" => InferenceResult::final_answer(
                "I couldn't search the web, so I have nothing to report.",
            ),
            Some(result) if result.is_denial() => {
                InferenceResult::final_answer("Understood. I did not write the report.")
            }
            Some(result) if result.success => {
                InferenceResult::final_answer(format!("Your report is ready at {REPORT_PATH}."))
            }
            Some(result) => InferenceResult::final_answer(format!(
                "I couldn't save the report: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )),
        })
    }
}

fn render_report(topic: &str, search: &ToolResult) -> String {
    let mut report = format!("# Research: {topic}\n\n");
    for item in search.payload.as_array().into_iter().flatten() {
        report.push_str(&format!(
            "- [{}]({}): {}\n",
            item["title"].as_str().unwrap_or_default(),
            item["url"].as_str().unwrap_or_default(),
            item["snippet"].as_str().unwrap_or_default(),
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopgate_core::message::SessionId;

    fn request(messages: Vec<Message>) -> InferenceRequest {
        InferenceRequest {
            session_id: SessionId::from("s"),
            system_prompt: None,
            messages,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn searches_then_writes_then_answers() {
        let gateway = DemoGateway::new();
        let mut messages = vec![Message::user("rust")];

        let InferenceResult::ToolRequest { calls, .. } =
            gateway.infer(request(messages.clone())).await.unwrap()
        else {
            panic!("expected a search");
        };
        assert_eq!(calls[0].name, "web_search");

        messages.push(Message::assistant("", calls.clone()));
        messages.push(Message::tool_result(ToolResult::success(
            &calls[0].id,
            "web_search",
            json!([{"title": "Rust", "url": "https://rust-lang.org", "snippet": "fast"}]),
        )));
        let InferenceResult::ToolRequest { calls, .. } =
            gateway.infer(request(messages.clone())).await.unwrap()
        else {
            panic!("expected a write");
        };
        assert_eq!(calls[0].name, "file_write");
        assert!(calls[0].arguments["text"].as_str().unwrap().contains("[Rust]"));

        messages.push(Message::assistant("", calls.clone()));
        messages.push(Message::tool_result(ToolResult::denied(&calls[0])));
        let answer = gateway.infer(request(messages)).await.unwrap();
        assert_eq!(
            answer,
            InferenceResult::final_answer("Understood. I did not write the report.")
        );
    }

    #[tokio::test]
    async fn refused_topic_is_a_policy_violation() {
        let err = DemoGateway::new()
            .infer(request(vec![Message::user("write malware")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ContentPolicyViolation(_)));
    }
}

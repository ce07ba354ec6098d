//! Publish tool: sends a notification to a topic.
//!
//! Messages land in an in-process [`Outbox`] that a host drains and
//! forwards to whatever messaging backend it uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loopgate_core::context::RequestContext;
use loopgate_core::error::ToolError;
use loopgate_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

const DEFAULT_TOPIC: &str = "default";

/// One published notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedMessage {
    pub topic: String,
    pub text: String,
    pub session_id: String,
    pub published_at: DateTime<Utc>,
}

/// Shared buffer of published messages.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: PublishedMessage) -> usize {
        let mut messages = self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        messages.push(message);
        messages.len()
    }

    /// Copy of everything published so far.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<PublishedMessage> {
        std::mem::take(
            &mut *self
                .messages
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PublishMessageTool {
    outbox: Outbox,
}

impl PublishMessageTool {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl Tool for PublishMessageTool {
    fn name(&self) -> &str {
        "publish_message"
    }

    fn description(&self) -> &str {
        "Publish a short notification message to a topic so subscribers receive it."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The message body"
                },
                "topic": {
                    "type": "string",
                    "description": "Topic to publish to (default: \"default\")"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        let topic = arguments["topic"].as_str().unwrap_or(DEFAULT_TOPIC);

        let position = self.outbox.push(PublishedMessage {
            topic: topic.to_string(),
            text: text.to_string(),
            session_id: ctx.session_id.to_string(),
            published_at: Utc::now(),
        });
        tracing::info!(session_id = %ctx.session_id, topic, "Message published");

        Ok(serde_json::json!({
            "topic": topic,
            "message_number": position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopgate_core::message::SessionId;

    #[tokio::test]
    async fn publishes_to_outbox() {
        let outbox = Outbox::new();
        let tool = PublishMessageTool::new(outbox.clone());
        let ctx = RequestContext::new(SessionId::from("s1"));

        let out = tool
            .execute(serde_json::json!({"text": "report ready", "topic": "alerts"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["message_number"], 1);

        let sent = outbox.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "alerts");
        assert_eq!(sent[0].session_id, "s1");
    }

    #[tokio::test]
    async fn default_topic_and_drain() {
        let outbox = Outbox::new();
        let tool = PublishMessageTool::new(outbox.clone());
        let ctx = RequestContext::new(SessionId::from("s1"));
        tool.execute(serde_json::json!({"text": "hi"}), &ctx).await.unwrap();

        let drained = outbox.drain();
        assert_eq!(drained[0].topic, DEFAULT_TOPIC);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn missing_text_rejected() {
        let tool = PublishMessageTool::new(Outbox::new());
        let ctx = RequestContext::new(SessionId::from("s1"));
        assert!(tool.execute(serde_json::json!({}), &ctx).await.is_err());
    }
}

//! Approval types: what a human is asked, what they answer, and which
//! tools need asking at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::message::SessionId;
use crate::tool::ToolCall;

/// A proposed tool call waiting on a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub session_id: SessionId,
    pub call_id: String,
    pub tool_name: String,

    /// Human-readable rendering of the arguments
    pub rendered_arguments: String,

    /// Raw arguments, for UIs that render their own view
    pub arguments: serde_json::Value,

    /// Large content worth showing in full (e.g. a document about to be written)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn for_call(session_id: SessionId, call: &ToolCall, preview: Option<String>) -> Self {
        Self {
            session_id,
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            rendered_arguments: render_arguments(call),
            arguments: call.arguments.clone(),
            preview,
            created_at: Utc::now(),
        }
    }
}

/// Bullet-list rendering of a call: the tool name, then each argument.
pub fn render_arguments(call: &ToolCall) -> String {
    let mut out = format!("* tool\n  * {}\n* arguments", call.name);
    match call.arguments.as_object() {
        Some(args) if !args.is_empty() => {
            for (key, value) in args {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push_str(&format!("\n  * {key}\n    * {value}"));
            }
        }
        Some(_) => out.push_str("\n  * (none)"),
        None => out.push_str(&format!("\n  * {}", call.arguments)),
    }
    out
}

/// The human's answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalVerdict {
    Approve,
    Deny,
}

impl ApprovalVerdict {
    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approve)
    }
}

impl FromStr for ApprovalVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" | "APPROVED" | "Y" | "YES" => Ok(Self::Approve),
            "DENY" | "DENIED" | "N" | "NO" => Ok(Self::Deny),
            other => Err(format!("unknown verdict '{other}', expected APPROVE or DENY")),
        }
    }
}

impl std::fmt::Display for ApprovalVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Deny => write!(f, "DENY"),
        }
    }
}

/// How a tool call is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPermission {
    /// Runs without asking.
    Allow,
    /// Requires an approval verdict first.
    #[default]
    Ask,
    /// Refused without asking; folded as a denial.
    Deny,
}

impl FromStr for ToolPermission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "ask" => Ok(Self::Ask),
            "deny" => Ok(Self::Deny),
            other => Err(format!("unknown permission '{other}', expected allow, ask or deny")),
        }
    }
}

/// Per-tool gating configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Behavior for tools not listed in `overrides`.
    #[serde(default)]
    pub default: ToolPermission,

    /// Per-tool overrides.
    #[serde(default)]
    pub overrides: HashMap<String, ToolPermission>,
}

impl ApprovalPolicy {
    /// Every tool runs without approval.
    pub fn allow_all() -> Self {
        Self {
            default: ToolPermission::Allow,
            overrides: HashMap::new(),
        }
    }

    /// Every tool requires approval.
    pub fn ask_all() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, permission: ToolPermission) -> Self {
        self.overrides.insert(name.into(), permission);
        self
    }

    pub fn permission_for(&self, tool_name: &str) -> ToolPermission {
        self.overrides
            .get(tool_name)
            .copied()
            .unwrap_or(self.default)
    }
}

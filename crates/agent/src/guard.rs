//! Argument guard: screens an approved call before it runs.
//!
//! Sits between approval and execution: a human may approve a write, but
//! the document itself can still carry content the host refuses to emit.

use async_trait::async_trait;
use loopgate_config::GuardConfig;
use loopgate_core::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Pass,
    Block { reason: String },
}

#[async_trait]
pub trait ArgumentGuard: Send + Sync {
    async fn screen(&self, call: &ToolCall) -> GuardVerdict;
}

/// Blocks calls whose string arguments contain any configured term.
///
/// Matching is case-insensitive and looks through nested arrays and
/// objects. An empty tool list applies the guard to every tool.
pub struct TermGuard {
    terms: Vec<String>,
    tools: Vec<String>,
}

impl TermGuard {
    pub fn new(terms: Vec<String>, tools: Vec<String>) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            tools,
        }
    }

    /// `None` when the config lists no terms.
    pub fn from_config(config: &GuardConfig) -> Option<Self> {
        let guard = Self::new(config.blocked_terms.clone(), config.tools.clone());
        (!guard.terms.is_empty()).then_some(guard)
    }

    fn applies_to(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }
}

#[async_trait]
impl ArgumentGuard for TermGuard {
    async fn screen(&self, call: &ToolCall) -> GuardVerdict {
        if !self.applies_to(&call.name) {
            return GuardVerdict::Pass;
        }

        let mut strings = Vec::new();
        collect_strings(&call.arguments, &mut strings);
        for value in strings {
            let lowered = value.to_lowercase();
            if let Some(term) = self.terms.iter().find(|t| lowered.contains(t.as_str())) {
                tracing::warn!(tool = %call.name, call_id = %call.id, "Arguments blocked by guard");
                return GuardVerdict::Block {
                    reason: format!("contains blocked term '{term}'"),
                };
            }
        }
        GuardVerdict::Pass
    }
}

fn collect_strings<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) => out.push(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn blocks_nested_term_case_insensitively() {
        let guard = TermGuard::new(vec!["Secret".into()], vec![]);
        let call = ToolCall::new(
            "c1",
            "file_write",
            json!({"file_path": "r.md", "sections": [{"body": "the SECRET plan"}]}),
        );
        assert!(matches!(guard.screen(&call).await, GuardVerdict::Block { .. }));
    }

    #[tokio::test]
    async fn scoped_to_listed_tools() {
        let guard = TermGuard::new(vec!["secret".into()], vec!["file_write".into()]);
        let call = ToolCall::new("c1", "web_search", json!({"query": "secret"}));
        assert_eq!(guard.screen(&call).await, GuardVerdict::Pass);
    }

    #[tokio::test]
    async fn clean_arguments_pass() {
        let guard = TermGuard::new(vec!["secret".into()], vec![]);
        let call = ToolCall::new("c1", "file_write", json!({"text": "public report"}));
        assert_eq!(guard.screen(&call).await, GuardVerdict::Pass);
    }

    #[test]
    fn empty_config_builds_no_guard() {
        assert!(TermGuard::from_config(&GuardConfig::default()).is_none());
        let config = GuardConfig {
            blocked_terms: vec!["  ".into(), "x".into()],
            tools: vec![],
        };
        assert!(TermGuard::from_config(&config).is_some());
    }
}

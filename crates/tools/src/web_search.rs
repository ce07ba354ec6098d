//! Web search tool: stub that returns deterministic search results.
//!
//! A hosted search API would sit behind this in production. The stub keeps
//! the loop testable end-to-end without network access: the same query
//! always yields the same results.

use async_trait::async_trait;
use loopgate_core::context::RequestContext;
use loopgate_core::error::ToolError;
use loopgate_core::tool::Tool;
use serde::Serialize;

/// Upper bound on `max_results`, whatever the caller asks for.
const RESULT_CAP: usize = 5;

pub struct WebSearchTool {
    default_results: usize,
}

impl WebSearchTool {
    pub fn new(default_results: usize) -> Self {
        Self {
            default_results: default_results.clamp(1, RESULT_CAP),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns a list of results with titles, URLs, and snippets."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results to return"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'query' must not be empty".into()));
        }

        let count = arguments["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(self.default_results)
            .clamp(1, RESULT_CAP);

        ctx.report_stage(format!("Searching the web for '{query}'"), "searching");
        tracing::debug!(session_id = %ctx.session_id, query, count, "web_search");

        let results = mock_results(query, count);
        serde_json::to_value(&results).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

fn mock_results(query: &str, count: usize) -> Vec<SearchResult> {
    let q = query.to_lowercase();

    let topics: [(&str, &[(&str, &str, &str)]); 2] = [
        (
            "rust",
            &[
                (
                    "The Rust Programming Language",
                    "https://doc.rust-lang.org/book/",
                    "Rust is a systems programming language focused on safety, speed, and concurrency.",
                ),
                (
                    "Rust by Example",
                    "https://doc.rust-lang.org/rust-by-example/",
                    "A collection of runnable examples that illustrate Rust concepts and standard library usage.",
                ),
            ],
        ),
        (
            "llm",
            &[
                (
                    "Tool use with large language models",
                    "https://example.com/articles/tool-use",
                    "Models request tools by name with structured arguments; the host runs them and returns results.",
                ),
                (
                    "Human-in-the-loop agents",
                    "https://example.com/articles/hitl",
                    "Approval gates let a person confirm side-effecting actions before an agent performs them.",
                ),
            ],
        ),
    ];

    for (keyword, entries) in topics {
        if q.contains(keyword) {
            return entries
                .iter()
                .take(count)
                .map(|(title, url, snippet)| SearchResult {
                    title: (*title).into(),
                    url: (*url).into(),
                    snippet: (*snippet).into(),
                })
                .collect();
        }
    }

    (0..count)
        .map(|i| SearchResult {
            title: format!("Result {} for: {query}", i + 1),
            url: format!("https://example.com/search?q={}&p={}", query.replace(' ', "+"), i + 1),
            snippet: format!("Stub search result for the query '{query}'."),
        })
        .collect()
}

//! Search 工具：Tavily 联网搜索（无需用户凭证，需应用级 API Key）
//!
//! 返回至多 max_results 条结果，每条为 Title / Snippet / Link；摘要超过 500 字符时截断。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::tools::{PublicTool, ToolError};

const MAX_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// 搜索关键词
    pub query: String,
}

pub struct SearchTool {
    client: Client,
    base_url: String,
    api_key: String,
    max_results: usize,
}

impl SearchTool {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_results: max_results.clamp(1, 10),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

pub fn format_results(response: &SearchResponse, max_results: usize) -> String {
    if response.results.is_empty() {
        return "No results found.".to_string();
    }
    response
        .results
        .iter()
        .take(max_results)
        .map(|hit| {
            let snippet = hit.content.as_deref().unwrap_or("");
            let snippet = if snippet.chars().count() > MAX_SNIPPET_CHARS {
                format!(
                    "{}...[truncated]",
                    snippet.chars().take(MAX_SNIPPET_CHARS).collect::<String>()
                )
            } else {
                snippet.to_string()
            };
            format!(
                "Title: {}\nSnippet: {}\nLink: {}",
                hit.title.as_deref().unwrap_or("No title"),
                snippet,
                hit.url.as_deref().unwrap_or("No link")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl PublicTool for SearchTool {
    type Args = SearchArgs;

    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the internet for information not available from the plant APIs (news, regulations, general solar knowledge)."
    }

    async fn execute(&self, args: SearchArgs) -> Result<String, ToolError> {
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid(self.name(), "query must not be empty"));
        }

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "max_results": self.max_results,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolError::Upstream {
                service: "Tavily".to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))?;
        Ok(format_results(&parsed, self.max_results))
    }
}

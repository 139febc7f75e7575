//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 直接调用 `/chat/completions`（可配置 base_url，默认 Groq），支持 function tools。
//! 429 / 5xx / 传输错误按指数退避重试。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{LlmClient, LlmError};
use crate::memory::{AssistantMessage, Message, ToolInvocationRequest};
use crate::tools::ToolSignature;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 客户端参数（来自 [llm] 配置段）
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    settings: OpenAiSettings,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            settings,
            usage: TokenUsage::new(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    async fn send_once(&self, request: &ChatCompletionRequest) -> Result<AssistantMessage, LlmError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            );
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;
        debug!(finish_reason = ?choice.finish_reason, "chat completion received");
        Ok(choice.message.into_assistant())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSignature],
    ) -> Result<AssistantMessage, LlmError> {
        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: history.iter().map(ChatCompletionMessage::from).collect(),
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(ChatCompletionTool::from).collect())
            },
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
            },
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(message) => return Ok(message),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        attempt = attempt + 1,
                        "LLM request failed ({}), retrying in {:?}", e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// 模型返回的 arguments 字符串 → JSON；空串视为空对象，无法解析时原样保留（由参数校验报错）
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

// OpenAI 兼容 Chat Completions 协议类型

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatCompletionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

impl From<&Message> for ChatCompletionMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::System { content } => Self::plain("system", content),
            Message::User { content } => Self::plain("user", content),
            Message::Assistant(assistant) => {
                let tool_calls: Vec<ChatCompletionToolCall> = assistant
                    .tool_calls
                    .iter()
                    .map(|call| ChatCompletionToolCall {
                        id: Some(call.call_id.clone()),
                        call_type: Some("function".to_string()),
                        function: ChatCompletionToolCallFunction {
                            name: call.tool_name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect();
                Self {
                    role: "assistant",
                    content: if assistant.content.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(assistant.content.clone())
                    },
                    tool_call_id: None,
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                }
            }
            Message::ToolResult(result) => Self {
                role: "tool",
                content: Some(result.content.clone()),
                tool_call_id: Some(result.call_id.clone()),
                tool_calls: None,
            },
        }
    }
}

impl ChatCompletionMessage {
    fn plain(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatCompletionFunction,
}

impl From<&ToolSignature> for ChatCompletionTool {
    fn from(sig: &ToolSignature) -> Self {
        Self {
            tool_type: "function",
            function: ChatCompletionFunction {
                name: sig.name.clone(),
                description: Some(sig.description.clone()),
                parameters: Some(sig.parameters.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

impl ChatCompletionResponseMessage {
    fn into_assistant(self) -> AssistantMessage {
        let tool_calls = self
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let call_id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                ToolInvocationRequest::new(
                    call_id,
                    call.function.name,
                    parse_arguments(&call.function.arguments),
                )
            })
            .collect();
        AssistantMessage::with_tool_calls(self.content.unwrap_or_default(), tool_calls)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    call_type: Option<String>,
    function: ChatCompletionToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：给定完整历史与工具签名，返回一条助手消息
//! （文本，或零到多个工具调用请求）。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{AssistantMessage, Message};
use crate::tools::ToolSignature;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// 429 / 5xx / 传输层错误可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Request(_) | LlmError::Timeout => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::InvalidResponse(_) | LlmError::NotConfigured(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 单次补全：history 为完整会话历史，tools 为可调用工具签名
    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSignature],
    ) -> Result<AssistantMessage, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

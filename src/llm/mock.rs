//! 无需网络的 LLM 客户端
//!
//! - [`MockLlmClient`]: 未配置 API Key 时的兜底，回显用户最后一条消息，便于本地跑通流程
//! - [`ScriptedLlmClient`]: 按脚本依次返回预设应答，并记录每次收到的历史（测试用）

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{AssistantMessage, Message};
use crate::tools::ToolSignature;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        history: &[Message],
        _tools: &[ToolSignature],
    ) -> Result<AssistantMessage, LlmError> {
        let last_user = history
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { content } => Some(content.as_str()),
                _ => None,
            })
            .unwrap_or("(no input)");

        Ok(AssistantMessage::text(format!(
            "Echo from Mock: {} (no model API key configured)",
            last_user
        )))
    }
}

/// 脚本客户端：按顺序弹出应答；`looping` 模式下无限重复同一应答
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<AssistantMessage, LlmError>>>,
    repeat: Option<AssistantMessage>,
    delay: Duration,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<AssistantMessage, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一应答（用于模拟不收敛的模型）
    pub fn looping(reply: AssistantMessage) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    /// 每次应答前等待（用于观察并发行为）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 每次调用收到的完整历史
    pub async fn seen_histories(&self) -> Vec<Vec<Message>> {
        self.seen.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        history: &[Message],
        _tools: &[ToolSignature],
    ) -> Result<AssistantMessage, LlmError> {
        self.seen.lock().await.push(history.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reply) = &self.repeat {
            return Ok(reply.clone());
        }
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::NotConfigured("script exhausted".to_string())))
    }
}

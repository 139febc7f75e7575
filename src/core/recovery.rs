//! 错误恢复引擎
//!
//! 根据一轮中出现的失败返回 RecoveryAction，供编排器决定继续、结束本轮还是终止：
//! - 普通工具失败（未知工具、参数错误、上游错误、超时）→ Continue，交由模型解释
//! - 认证 / 刷新失败 → EndTurn(AuthenticationFailed)
//! - 凭证存储不可用 → Abort(Storage)，编排器写入 STORAGE_APOLOGY 后向上返回错误
//! - 模型失败 → EndTurn(ModelUnavailable)

use crate::core::{AgentError, RecoveryAction, TurnStatus};
use crate::llm::LlmError;
use crate::memory::{ToolFailureKind, ToolResult};

/// 凭证存储不可用时给用户的回复，同时作为本轮最后一条助手消息写入历史
pub const STORAGE_APOLOGY: &str =
    "Sorry, I can't reach the credential store right now. Please try again in a moment.";

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn after_tools(&self, results: &[ToolResult]) -> RecoveryAction {
        for r in results {
            if let Some(ToolFailureKind::Storage(msg)) = &r.failure {
                return RecoveryAction::Abort(AgentError::Storage(msg.clone()));
            }
        }
        for r in results {
            match &r.failure {
                Some(ToolFailureKind::Authentication { provider, reason })
                | Some(ToolFailureKind::Refresh { provider, reason }) => {
                    return RecoveryAction::EndTurn {
                        status: TurnStatus::AuthenticationFailed,
                        reply: format!("I couldn't authenticate with {}: {}", provider, reason),
                    };
                }
                _ => {}
            }
        }
        RecoveryAction::Continue
    }

    pub fn after_model_error(&self, err: &LlmError) -> RecoveryAction {
        RecoveryAction::EndTurn {
            status: TurnStatus::ModelUnavailable,
            reply: format!("The assistant model is unavailable right now: {}", err),
        }
    }

    pub fn round_limit(&self, max_rounds: usize) -> RecoveryAction {
        RecoveryAction::EndTurn {
            status: TurnStatus::RoundLimitReached,
            reply: format!(
                "I stopped after {} rounds of tool calls without reaching a final answer. Please try a more specific question.",
                max_rounds
            ),
        }
    }
}

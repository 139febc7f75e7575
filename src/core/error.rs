//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据一轮中出现的失败决定继续、结束本轮还是向上传播。

use thiserror::Error;

use crate::core::state::TurnStatus;

/// 需要向调用方传播的致命错误；其余失败在编排层内部转为数据
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("credential store unavailable: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// 恢复引擎给出的动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 把工具结果交还模型，继续下一次补全
    Continue,
    /// 以一条助手消息结束本轮（写入历史）
    EndTurn { status: TurnStatus, reply: String },
    /// 终止并向调用方返回错误
    Abort(AgentError),
}

//! 单轮对话状态机
//!
//! INIT → AWAITING_MODEL → { DONE, AWAITING_TOOLS }；AWAITING_TOOLS → AWAITING_MODEL。

use serde::Serialize;

use crate::memory::ToolInvocationRequest;

/// 编排器内部状态
#[derive(Clone, Debug, PartialEq)]
pub enum TurnState {
    Init,
    AwaitingModel,
    AwaitingTools(Vec<ToolInvocationRequest>),
    /// 本轮结果已确定，助手消息已写入历史
    Done(TurnReply),
}

impl TurnState {
    pub fn label(&self) -> &'static str {
        match self {
            TurnState::Init => "init",
            TurnState::AwaitingModel => "awaiting_model",
            TurnState::AwaitingTools(_) => "awaiting_tools",
            TurnState::Done(_) => "done",
        }
    }
}

/// 一轮对话的结束方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    AuthenticationFailed,
    RoundLimitReached,
    ModelUnavailable,
    /// 凭证存储不可用，本轮以致歉文本结束
    Failed,
}

/// 一轮对话的结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub text: String,
    pub status: TurnStatus,
    /// 本轮执行的工具轮数
    pub rounds: usize,
}

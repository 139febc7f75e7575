//! 记忆层：对话消息模型（会话历史由 core::session 持有）

pub mod conversation;

pub use conversation::{
    AssistantMessage, Message, ToolFailureKind, ToolInvocationRequest, ToolResult,
};

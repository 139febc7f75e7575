//! 短期记忆：对话消息模型
//!
//! Message 为带标签的枚举（System / User / Assistant / ToolResult）。Assistant 可携带零到多个工具调用请求，
//! ToolResult 通过 call_id 与请求一一对应，下一次调用模型前写回历史。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型发起的一次工具调用（call_id 在单轮内唯一）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub call_id: String,
    pub tool_name: String,
    /// 参数名 -> 值；缺省为空对象
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolInvocationRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// 工具失败分类：不参与序列化，仅供编排器决定是否结束本轮
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolFailureKind {
    UnknownTool,
    InvalidArguments,
    Execution,
    Timeout,
    /// 无可用凭证
    Authentication { provider: String, reason: String },
    /// 上游拒绝刷新
    Refresh { provider: String, reason: String },
    /// 凭证存储不可用
    Storage(String),
}

/// 工具执行结果（成功与失败统一为文本）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
    #[serde(skip)]
    pub failure: Option<ToolFailureKind>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            failure: None,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        kind: ToolFailureKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
            failure: Some(kind),
        }
    }

    /// 认证 / 刷新失败会结束本轮，其余失败交还模型解释
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.failure,
            Some(ToolFailureKind::Authentication { .. } | ToolFailureKind::Refresh { .. })
        )
    }
}

/// 助手消息：文本 + 可选的工具调用请求
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocationRequest>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolInvocationRequest>,
    ) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 单条消息（与 LLM API 的 role 一一对应）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant(AssistantMessage),
    #[serde(rename = "tool")]
    ToolResult(ToolResult),
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage::text(content))
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self::ToolResult(result)
    }

    /// 消息正文（Assistant 仅返回文本部分）
    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } => content,
            Self::Assistant(a) => &a.content,
            Self::ToolResult(r) => &r.content,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }
}

//! 编排过程事件：用于 CLI / 前端展示工具调用与观察结果

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 正在调用模型
    Thinking { session_id: String, round: usize },
    /// 调用工具
    ToolCall {
        session_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        session_id: String,
        call_id: String,
        is_error: bool,
        preview: String,
    },
    /// 本轮结束
    TurnEnded {
        session_id: String,
        status: crate::core::TurnStatus,
        rounds: usize,
    },
}

/// 截取前 max_chars 个字符
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

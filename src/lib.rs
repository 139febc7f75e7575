//! Solar Assistant - 光伏电站对话助手
//!
//! 模块划分：
//! - **agent**: 无头运行时（CLI / HTTP 共用），按配置组装全部组件并提供 post_message
//! - **auth**: OAuth 凭证存储、授权服务器客户端、Token 生命周期管理（单飞刷新）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话注册表、对话编排状态机、错误类型、工具并发调度
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 对话消息模型（System / User / Assistant / ToolResult）
//! - **observability**: tracing 日志初始化
//! - **tools**: 带类型参数的工具注册表、分发器与 iSolarCloud / 天气 / 搜索工具
//! - **web**: HTTP 入口（需启用 `web` feature）

pub mod agent;
pub mod auth;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;

pub use agent::Agent;
pub use crate::core::{ConversationOrchestrator, TurnReply, TurnStatus};

//! 工具注册表
//!
//! 工具分两类，均带强类型参数（`Deserialize + JsonSchema`）：
//! - [`PublicTool`]: 无需凭证（天气、搜索）
//! - [`AuthenticatedTool`]: 每次执行前向 TokenLifecycleManager 取调用时刻有效的 access token
//!
//! 注册后统一擦除为 [`Capability`] 描述符，由 ToolRegistry 按名查找；参数在执行前先反序列化校验，
//! 不合法即返回 [`ToolError::InvalidArguments`]，工具本身不会被调用。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::auth::{AuthError, TokenLifecycleManager};
use crate::tools::schema::{parameters_schema, ToolSignature};

/// 工具执行错误
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{service} returned an error: {message}")]
    Upstream { service: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("I couldn't authenticate with {provider}: {reason}")]
    Authentication { provider: String, reason: String },

    #[error("I couldn't authenticate with {provider}: {reason}")]
    Refresh { provider: String, reason: String },

    #[error("credential store unavailable: {0}")]
    Storage(String),
}

impl ToolError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<AuthError> for ToolError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Authentication { provider, reason } => {
                ToolError::Authentication { provider, reason }
            }
            AuthError::Refresh { provider, reason } => ToolError::Refresh { provider, reason },
            AuthError::Storage(msg) => ToolError::Storage(msg),
            AuthError::Upstream(msg) | AuthError::Configuration(msg) => {
                ToolError::Authentication {
                    provider: "the data provider".to_string(),
                    reason: msg,
                }
            }
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ToolError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            ToolError::Http(format!("status {}", status))
        } else {
            ToolError::Http(e.to_string())
        }
    }
}

/// 无需凭证的工具
#[async_trait]
pub trait PublicTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + 'static;

    /// 工具名称（模型调用时使用）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    async fn execute(&self, args: Self::Args) -> Result<String, ToolError>;
}

/// 需要 provider access token 的工具
#[async_trait]
pub trait AuthenticatedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + 'static;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn execute(&self, args: Self::Args, access_token: &str) -> Result<String, ToolError>;
}

/// 将 JSON 参数反序列化为工具的参数类型；null 视为空对象
pub fn decode_args<A: DeserializeOwned>(tool: &str, args: Value) -> Result<A, ToolError> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::invalid(tool, e.to_string()))
}

/// 类型擦除后的公开工具
#[async_trait]
pub trait DynPublicTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn call(&self, args: Value) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: PublicTool> DynPublicTool for T {
    fn name(&self) -> &str {
        PublicTool::name(self)
    }

    fn description(&self) -> &str {
        PublicTool::description(self)
    }

    fn parameters(&self) -> Value {
        parameters_schema::<T::Args>()
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let typed = decode_args::<T::Args>(PublicTool::name(self), args)?;
        self.execute(typed).await
    }
}

/// 类型擦除后的认证工具：先校验参数，再取 token，最后执行
#[async_trait]
pub trait DynAuthenticatedTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn call(
        &self,
        args: Value,
        provider: &str,
        tokens: &TokenLifecycleManager,
    ) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: AuthenticatedTool> DynAuthenticatedTool for T {
    fn name(&self) -> &str {
        AuthenticatedTool::name(self)
    }

    fn description(&self) -> &str {
        AuthenticatedTool::description(self)
    }

    fn parameters(&self) -> Value {
        parameters_schema::<T::Args>()
    }

    async fn call(
        &self,
        args: Value,
        provider: &str,
        tokens: &TokenLifecycleManager,
    ) -> Result<String, ToolError> {
        let typed = decode_args::<T::Args>(AuthenticatedTool::name(self), args)?;
        let access_token = tokens.get_valid_access_token(provider).await?;
        self.execute(typed, &access_token).await
    }
}

/// 工具能力描述符
#[derive(Clone)]
pub enum Capability {
    Public(Arc<dyn DynPublicTool>),
    Authenticated {
        provider: String,
        tool: Arc<dyn DynAuthenticatedTool>,
    },
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Capability::Public(tool) => tool.name(),
            Capability::Authenticated { tool, .. } => tool.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Capability::Public(tool) => tool.description(),
            Capability::Authenticated { tool, .. } => tool.description(),
        }
    }

    /// 需要凭证时返回 provider
    pub fn provider(&self) -> Option<&str> {
        match self {
            Capability::Public(_) => None,
            Capability::Authenticated { provider, .. } => Some(provider),
        }
    }

    pub fn signature(&self) -> ToolSignature {
        let parameters = match self {
            Capability::Public(tool) => tool.parameters(),
            Capability::Authenticated { tool, .. } => tool.parameters(),
        };
        ToolSignature {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters,
        }
    }

    pub async fn invoke(
        &self,
        args: Value,
        tokens: &TokenLifecycleManager,
    ) -> Result<String, ToolError> {
        match self {
            Capability::Public(tool) => tool.call(args).await,
            Capability::Authenticated { provider, tool } => {
                tool.call(args, provider, tokens).await
            }
        }
    }
}

/// 工具注册表：按名称存储 Capability；同名注册会覆盖
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Capability>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_public(&mut self, tool: impl PublicTool) {
        let name = PublicTool::name(&tool).to_string();
        self.tools.insert(name, Capability::Public(Arc::new(tool)));
    }

    pub fn register_authenticated(&mut self, provider: impl Into<String>, tool: impl AuthenticatedTool) {
        let name = AuthenticatedTool::name(&tool).to_string();
        self.tools.insert(
            name,
            Capability::Authenticated {
                provider: provider.into(),
                tool: Arc::new(tool),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn signatures(&self) -> Vec<ToolSignature> {
        self.tools.values().map(Capability::signature).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

//! 认证层错误类型
//!
//! 需要 Clone：单飞刷新的同一结果会被多个等待者共享。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// 无可用凭证（未授权，或已过期且没有 refresh token）
    #[error("no usable credential for {provider}: {reason}")]
    Authentication { provider: String, reason: String },

    /// 上游拒绝刷新（含超时、非成功 result_code）
    #[error("token refresh for {provider} failed: {reason}")]
    Refresh { provider: String, reason: String },

    /// 授权服务器调用失败（客户端层，尚未归因到具体 provider）
    #[error("authorization server error: {0}")]
    Upstream(String),

    #[error("credential store error: {0}")]
    Storage(String),

    #[error("auth configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

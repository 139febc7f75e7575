//! 授权服务器客户端
//!
//! [`AuthorizationServerClient`] 抽象上游 OAuth 端点；[`IsolarCloudAuthClient`] 为 iSolarCloud 实现：
//! POST JSON，头部携带 `x-access-key: <app_secret>`，应答为
//! `{"result_code": "1", "result_msg": ..., "result_data": {...}}` 信封。
//! `result_code` 不为 "1" 即视为失败，与 HTTP 状态码无关。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::{AuthError, AuthResult};
use super::types::{AppCredentials, TokenGrant};

#[async_trait]
pub trait AuthorizationServerClient: Send + Sync {
    /// 用授权码换取凭证（OAuth 回调）
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        app: &AppCredentials,
    ) -> AuthResult<TokenGrant>;

    /// 用 refresh token 刷新凭证
    async fn refresh(&self, refresh_token: &str, app: &AppCredentials) -> AuthResult<TokenGrant>;
}

/// iSolarCloud 信封中 `result_code` 是否表示成功（"1"，兼容数字 1）
pub fn is_success_code(code: &Value) -> bool {
    match code {
        Value::String(s) => s.trim() == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// 接受字符串或数字形式的整数
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    #[serde(default)]
    result_code: Value,
    #[serde(default)]
    result_msg: Option<String>,
    #[serde(default)]
    result_data: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
}

/// 解析 token 应答信封
pub fn parse_token_envelope(body: &Value) -> AuthResult<TokenGrant> {
    let envelope: TokenEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| AuthError::Upstream(format!("malformed token response: {}", e)))?;

    if !is_success_code(&envelope.result_code) {
        return Err(AuthError::Upstream(format!(
            "result_code {} ({})",
            envelope.result_code,
            envelope.result_msg.as_deref().unwrap_or("no message")
        )));
    }

    let data = envelope
        .result_data
        .ok_or_else(|| AuthError::Upstream("token response missing result_data".to_string()))?;

    Ok(TokenGrant {
        access_token: data.access_token,
        refresh_token: data.refresh_token.filter(|t| !t.is_empty()),
        expires_in: data.expires_in.as_ref().and_then(lenient_i64),
    })
}

/// iSolarCloud 授权页 URL（redirect 参数 URL 编码）
pub fn build_authorize_url(
    authorize_url: &str,
    cloud_id: &str,
    application_id: &str,
    redirect_uri: &str,
) -> String {
    format!(
        "{}?cloudId={}&applicationId={}&redirectUrl={}",
        authorize_url,
        cloud_id,
        application_id,
        urlencoding::encode(redirect_uri)
    )
}

pub struct IsolarCloudAuthClient {
    client: Client,
    token_url: String,
    refresh_url: String,
}

impl IsolarCloudAuthClient {
    pub fn new(
        token_url: impl Into<String>,
        refresh_url: impl Into<String>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            refresh_url: refresh_url.into(),
        })
    }

    async fn post_envelope(
        &self,
        url: &str,
        app: &AppCredentials,
        body: Value,
    ) -> AuthResult<TokenGrant> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-access-key", &app.app_secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Upstream(format!("request to {} timed out", url))
                } else {
                    AuthError::Upstream(format!("request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            AuthError::Upstream(format!("unreadable response (HTTP {}): {}", status, e))
        })?;

        parse_token_envelope(&body).map_err(|e| {
            warn!(http_status = %status, "Authorization server rejected request: {}", e);
            e
        })
    }
}

#[async_trait]
impl AuthorizationServerClient for IsolarCloudAuthClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        app: &AppCredentials,
    ) -> AuthResult<TokenGrant> {
        let body = json!({
            "appkey": app.app_key,
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_uri,
        });
        self.post_envelope(&self.token_url, app, body).await
    }

    async fn refresh(&self, refresh_token: &str, app: &AppCredentials) -> AuthResult<TokenGrant> {
        let body = json!({
            "refresh_token": refresh_token,
            "appkey": app.app_key,
        });
        self.post_envelope(&self.refresh_url, app, body).await
    }
}

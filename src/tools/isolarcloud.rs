//! iSolarCloud OpenAPI 调用
//!
//! 所有平台接口均为 POST JSON：头部 `Authorization: Bearer <token>` 与 `x-access-key: <app_secret>`，
//! 请求体带 `appkey`；应答信封 `result_code` 不为 "1" 即失败。

use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::client::is_success_code;
use crate::auth::AppCredentials;
use crate::tools::ToolError;

pub const QUERY_POWER_STATION_LIST: &str = "/openapi/platform/queryPowerStationList";
pub const GET_POWER_STATION_DETAIL: &str = "/openapi/platform/getPowerStationDetail";
pub const QUERY_PS_DETAIL: &str = "/openapi/platform/queryPsDetail";

/// 共享的 iSolarCloud 客户端（三个电站工具共用连接池）
#[derive(Clone)]
pub struct IsolarCloudApi {
    client: Client,
    api_base: String,
    app: AppCredentials,
}

impl IsolarCloudApi {
    pub fn new(
        api_base: impl Into<String>,
        app: AppCredentials,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            app,
        })
    }

    /// 调用平台接口，返回 `result_data`
    pub async fn call(
        &self,
        path: &str,
        access_token: &str,
        mut payload: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        payload.insert("appkey".to_string(), Value::String(self.app.app_key.clone()));
        let url = format!("{}{}", self.api_base.trim_end_matches('/'), path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json")
            .header("x-access-key", &self.app.app_secret)
            .json(&Value::Object(payload))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Http(format!(
                "{} - {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))?;
        unwrap_envelope(body)
    }
}

/// 校验信封并取出 result_data
pub fn unwrap_envelope(body: Value) -> Result<Value, ToolError> {
    let code = body.get("result_code").cloned().unwrap_or(Value::Null);
    if !is_success_code(&code) {
        let msg = body
            .get("result_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ToolError::Upstream {
            service: "iSolarCloud".to_string(),
            message: format!("{} (result_code {})", msg, code),
        });
    }
    Ok(body.get("result_data").cloned().unwrap_or(Value::Null))
}

/// 读取字段为文本（字符串或数字均可）；缺失 / 空串 / null 返回 None
pub fn field_text(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn field_f64(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// online_status == 1 为在线
pub fn online_label(v: &Value) -> &'static str {
    if field_f64(v, "online_status") == Some(1.0) {
        "ONLINE"
    } else {
        "OFFLINE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_envelope_success() {
        let data = unwrap_envelope(json!({"result_code": "1", "result_data": {"pageList": []}}))
            .unwrap();
        assert!(data["pageList"].is_array());
    }

    #[test]
    fn test_unwrap_envelope_failure() {
        let err = unwrap_envelope(json!({"result_code": "E00000", "result_msg": "er_token_login_invalid"}))
            .unwrap_err();
        assert!(err.to_string().contains("er_token_login_invalid"));
    }

    #[test]
    fn test_field_helpers() {
        let v = json!({"a": "x", "b": 12, "c": "", "d": "3.5", "online_status": "1"});
        assert_eq!(field_text(&v, "a").as_deref(), Some("x"));
        assert_eq!(field_text(&v, "b").as_deref(), Some("12"));
        assert_eq!(field_text(&v, "c"), None);
        assert_eq!(field_f64(&v, "d"), Some(3.5));
        assert_eq!(online_label(&v), "ONLINE");
        assert_eq!(online_label(&json!({"online_status": 0})), "OFFLINE");
    }
}

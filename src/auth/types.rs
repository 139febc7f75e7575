//! 凭证数据模型

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 当前 unix 秒
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// 单个 provider 的 OAuth 凭证；每个 provider 至多一条
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// unix 秒；None 表示永不过期（外部签发的长期 token）
    pub expires_at: Option<i64>,
}

impl Credential {
    pub fn new(
        provider: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            provider: provider.into(),
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// 由授权服务器的应答构造；应答未携带新 refresh token 时沿用 `previous_refresh_token`
    pub fn from_grant(
        provider: impl Into<String>,
        grant: TokenGrant,
        now: i64,
        previous_refresh_token: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh_token),
            expires_at: grant.expires_in.map(|secs| now + secs),
        }
    }

    /// `expires_at - skew <= now` 视为过期
    pub fn is_expired_at(&self, now: i64, skew_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - skew_secs <= now,
            None => false,
        }
    }

    pub fn is_expired(&self, skew_secs: i64) -> bool {
        self.is_expired_at(now_unix(), skew_secs)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// 授权服务器应答（code 换取 / 刷新）
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// 有效期秒数；None 表示不过期
    pub expires_in: Option<i64>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// 应用自身的 app key / secret，随每次 code 换取与刷新请求发送
#[derive(Clone, Default)]
pub struct AppCredentials {
    pub app_key: String,
    pub app_secret: String,
}

impl AppCredentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.app_key.is_empty() && !self.app_secret.is_empty()
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// 凭证状态（对外展示，不含 token 本身）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub provider: String,
    pub authorized: bool,
    pub valid: bool,
    pub expires_at: Option<i64>,
    pub has_refresh_token: bool,
}

impl CredentialStatus {
    pub fn missing(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            authorized: false,
            valid: false,
            expires_at: None,
            has_refresh_token: false,
        }
    }

    pub fn of(credential: &Credential, now: i64, skew_secs: i64) -> Self {
        Self {
            provider: credential.provider.clone(),
            authorized: true,
            valid: !credential.is_expired_at(now, skew_secs),
            expires_at: credential.expires_at,
            has_refresh_token: credential.refresh_token.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_with_skew() {
        let c = Credential::new("p", "at", None, Some(1_000));
        assert!(!c.is_expired_at(900, 30));
        assert!(c.is_expired_at(980, 30));
        assert!(c.is_expired_at(1_000, 0));
        assert!(!c.is_expired_at(999, 0));
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let c = Credential::new("p", "at", None, None);
        assert!(!c.is_expired_at(i64::MAX - 1, 30));
    }

    #[test]
    fn test_from_grant_keeps_previous_refresh_token() {
        let grant = TokenGrant {
            access_token: "new".into(),
            refresh_token: None,
            expires_in: Some(3600),
        };
        let c = Credential::from_grant("p", grant, 100, Some("old-rt".into()));
        assert_eq!(c.refresh_token.as_deref(), Some("old-rt"));
        assert_eq!(c.expires_at, Some(3700));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let c = Credential::new("p", "secret-access", Some("secret-refresh".into()), None);
        let s = format!("{:?}", c);
        assert!(!s.contains("secret-access"));
        assert!(!s.contains("secret-refresh"));
    }
}

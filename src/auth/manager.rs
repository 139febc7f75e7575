//! Token 生命周期管理
//!
//! `get_valid_access_token` 流程：
//! 1. 读取存储中的凭证，未过期则直接返回（快速路径，无网络调用）
//! 2. 缺失或过期 → 单飞刷新：同一 provider 同时至多一个刷新在进行，并发调用者共享同一结果
//! 3. 刷新在独立的 tokio 任务中运行，等待者被取消不会中断刷新；任务结束时自行移除登记项
//! 4. 刷新任务先重新读取存储（可能已被前一次刷新更新），仍过期才调用授权服务器
//! 5. 失败不触碰存储；成功后原子替换凭证

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::{build_authorize_url, AuthorizationServerClient};
use super::error::{AuthError, AuthResult};
use super::store::CredentialStore;
use super::types::{now_unix, AppCredentials, Credential, CredentialStatus};

pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 30;
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

type SharedRefresh = Shared<BoxFuture<'static, AuthResult<Credential>>>;

/// 授权页参数（iSolarCloud authorized-app 页面）
#[derive(Debug, Clone)]
pub struct AuthorizePage {
    pub authorize_url: String,
    pub cloud_id: String,
    pub application_id: String,
}

pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    client: Arc<dyn AuthorizationServerClient>,
    app: AppCredentials,
    expiry_skew_secs: i64,
    refresh_timeout: Duration,
    authorize_page: Option<AuthorizePage>,
    in_flight: Arc<Mutex<HashMap<String, SharedRefresh>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        client: Arc<dyn AuthorizationServerClient>,
        app: AppCredentials,
    ) -> Self {
        Self {
            store,
            client,
            app,
            expiry_skew_secs: DEFAULT_EXPIRY_SKEW_SECS,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            authorize_page: None,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_expiry_skew(mut self, secs: i64) -> Self {
        self.expiry_skew_secs = secs.max(0);
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_authorize_page(mut self, page: AuthorizePage) -> Self {
        self.authorize_page = Some(page);
        self
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// 返回调用时刻有效的 access token，必要时刷新
    pub async fn get_valid_access_token(&self, provider: &str) -> AuthResult<String> {
        if let Some(credential) = self.store.get(provider).await? {
            if !credential.is_expired_at(now_unix(), self.expiry_skew_secs) {
                debug!(provider, "Using stored access token");
                return Ok(credential.access_token);
            }
            debug!(provider, expires_at = ?credential.expires_at, "Access token expired");
        }

        let credential = self.refresh_single_flight(provider).await?;
        Ok(credential.access_token)
    }

    async fn refresh_single_flight(&self, provider: &str) -> AuthResult<Credential> {
        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(provider) {
                Some(existing) => {
                    debug!(provider, "Joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    let task = RefreshTask {
                        provider: provider.to_string(),
                        store: Arc::clone(&self.store),
                        client: Arc::clone(&self.client),
                        app: self.app.clone(),
                        expiry_skew_secs: self.expiry_skew_secs,
                        refresh_timeout: self.refresh_timeout,
                    };
                    let registry = Arc::clone(&self.in_flight);
                    let key = provider.to_string();
                    // 登记与 spawn 在同一把锁内完成，任务的移除操作必然排在登记之后
                    let handle = tokio::spawn(async move {
                        let outcome = task.run().await;
                        registry.lock().await.remove(&key);
                        outcome
                    });

                    let owner = provider.to_string();
                    let shared = async move {
                        match handle.await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(AuthError::Refresh {
                                provider: owner,
                                reason: format!("refresh task aborted: {}", e),
                            }),
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(provider.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// OAuth 回调：用授权码换取并保存凭证
    pub async fn complete_authorization(
        &self,
        provider: &str,
        code: &str,
        redirect_uri: &str,
    ) -> AuthResult<CredentialStatus> {
        info!(provider, "Exchanging authorization code");
        let grant = self
            .client
            .exchange_code(code, redirect_uri, &self.app)
            .await
            .map_err(|e| AuthError::Authentication {
                provider: provider.to_string(),
                reason: format!("authorization code exchange failed: {}", e),
            })?;

        let now = now_unix();
        let credential = Credential::from_grant(provider, grant, now, None);
        self.store.put(&credential).await?;
        info!(provider, expires_at = ?credential.expires_at, "Authorization completed");
        Ok(CredentialStatus::of(&credential, now, self.expiry_skew_secs))
    }

    /// 授权同意页 URL
    pub fn authorization_url(&self, redirect_uri: &str) -> AuthResult<String> {
        let page = self.authorize_page.as_ref().ok_or_else(|| {
            AuthError::Configuration("authorize page is not configured".to_string())
        })?;
        if page.application_id.is_empty() {
            return Err(AuthError::Configuration(
                "auth.application_id is not set".to_string(),
            ));
        }
        Ok(build_authorize_url(
            &page.authorize_url,
            &page.cloud_id,
            &page.application_id,
            redirect_uri,
        ))
    }

    pub async fn status(&self, provider: &str) -> AuthResult<CredentialStatus> {
        let now = now_unix();
        Ok(match self.store.get(provider).await? {
            Some(c) => CredentialStatus::of(&c, now, self.expiry_skew_secs),
            None => CredentialStatus::missing(provider),
        })
    }

    pub async fn status_all(&self) -> AuthResult<Vec<CredentialStatus>> {
        let now = now_unix();
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(|c| CredentialStatus::of(c, now, self.expiry_skew_secs))
            .collect())
    }

    /// 登出：删除已保存的凭证
    pub async fn logout(&self, provider: &str) -> AuthResult<bool> {
        info!(provider, "Logging out");
        self.store.delete(provider).await
    }
}

/// 单次刷新的全部输入（移入独立任务）
struct RefreshTask {
    provider: String,
    store: Arc<dyn CredentialStore>,
    client: Arc<dyn AuthorizationServerClient>,
    app: AppCredentials,
    expiry_skew_secs: i64,
    refresh_timeout: Duration,
}

impl RefreshTask {
    async fn run(self) -> AuthResult<Credential> {
        let provider = self.provider.as_str();

        let existing = self
            .store
            .get(provider)
            .await?
            .ok_or_else(|| AuthError::Authentication {
                provider: provider.to_string(),
                reason: "not authorized yet; complete the login flow first".to_string(),
            })?;

        if !existing.is_expired_at(now_unix(), self.expiry_skew_secs) {
            debug!(provider, "Credential already refreshed");
            return Ok(existing);
        }

        let refresh_token = existing
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::Authentication {
                provider: provider.to_string(),
                reason: "access token expired and no refresh token is available".to_string(),
            })?;

        info!(provider, "Refreshing access token");
        let grant = match tokio::time::timeout(
            self.refresh_timeout,
            self.client.refresh(&refresh_token, &self.app),
        )
        .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(e)) => {
                warn!(provider, "Token refresh rejected: {}", e);
                return Err(AuthError::Refresh {
                    provider: provider.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(provider, "Token refresh timed out");
                return Err(AuthError::Refresh {
                    provider: provider.to_string(),
                    reason: format!(
                        "authorization server did not answer within {}s",
                        self.refresh_timeout.as_secs()
                    ),
                });
            }
        };

        let credential = Credential::from_grant(provider, grant, now_unix(), Some(refresh_token));
        self.store.put(&credential).await?;
        info!(provider, expires_at = ?credential.expires_at, "Access token refreshed");
        Ok(credential)
    }
}

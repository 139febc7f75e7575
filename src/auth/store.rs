//! 凭证存储
//!
//! 每个 provider 至多一条记录；`put` 为原子替换（不会出现同一 provider 两条记录可见的窗口）。
//! - [`MemoryCredentialStore`]: 测试与临时运行
//! - [`SqliteCredentialStore`]: 持久化到 `oauth_tokens` 表

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::error::{AuthError, AuthResult};
use super::types::Credential;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 原子地写入（替换）该 provider 的凭证
    async fn put(&self, credential: &Credential) -> AuthResult<()>;

    async fn get(&self, provider: &str) -> AuthResult<Option<Credential>>;

    /// 删除凭证（登出），返回是否存在过
    async fn delete(&self, provider: &str) -> AuthResult<bool>;

    async fn list(&self) -> AuthResult<Vec<Credential>>;
}

/// 内存存储
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条凭证（测试用）
    pub fn with_credential(credential: Credential) -> Self {
        let mut records = HashMap::new();
        records.insert(credential.provider.clone(), credential);
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put(&self, credential: &Credential) -> AuthResult<()> {
        self.records
            .write()
            .await
            .insert(credential.provider.clone(), credential.clone());
        Ok(())
    }

    async fn get(&self, provider: &str) -> AuthResult<Option<Credential>> {
        Ok(self.records.read().await.get(provider).cloned())
    }

    async fn delete(&self, provider: &str) -> AuthResult<bool> {
        Ok(self.records.write().await.remove(provider).is_some())
    }

    async fn list(&self) -> AuthResult<Vec<Credential>> {
        let mut all: Vec<Credential> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(all)
    }
}

/// SQLite 存储
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// 打开（不存在则创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AuthError::Storage(format!(
                        "cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        Self::from_pool(pool).await
    }

    /// 基于已有连接池构造（测试可传入单连接池）
    pub async fn from_pool(pool: SqlitePool) -> AuthResult<Self> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> AuthResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS oauth_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL UNIQUE,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_credential(row: &sqlx::sqlite::SqliteRow) -> AuthResult<Credential> {
        Ok(Credential {
            provider: row.try_get("provider")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn put(&self, credential: &Credential) -> AuthResult<()> {
        debug!("Storing credential for provider: {}", credential.provider);
        sqlx::query(
            "INSERT INTO oauth_tokens (provider, access_token, refresh_token, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at",
        )
        .bind(&credential.provider)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store credential: {}", e);
            AuthError::Storage(format!("failed to store credential: {}", e))
        })?;
        Ok(())
    }

    async fn get(&self, provider: &str) -> AuthResult<Option<Credential>> {
        debug!("Fetching credential for provider: {}", provider);
        let row = sqlx::query(
            "SELECT provider, access_token, refresh_token, expires_at
             FROM oauth_tokens WHERE provider = ?",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_credential).transpose()
    }

    async fn delete(&self, provider: &str) -> AuthResult<bool> {
        debug!("Deleting credential for provider: {}", provider);
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE provider = ?")
            .bind(provider)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> AuthResult<Vec<Credential>> {
        let rows = sqlx::query(
            "SELECT provider, access_token, refresh_token, expires_at
             FROM oauth_tokens ORDER BY provider",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_credential).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite_store() -> (SqliteCredentialStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCredentialStore::open(temp_dir.path().join("tokens.db"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    async fn assert_last_write_wins(store: &dyn CredentialStore) {
        store
            .put(&Credential::new("isolarcloud", "a1", Some("r1".into()), Some(100)))
            .await
            .unwrap();
        store
            .put(&Credential::new("isolarcloud", "a2", Some("r2".into()), Some(200)))
            .await
            .unwrap();
        store
            .put(&Credential::new("other", "b1", None, None))
            .await
            .unwrap();

        let got = store.get("isolarcloud").await.unwrap().unwrap();
        assert_eq!(got.access_token, "a2");
        assert_eq!(got.refresh_token.as_deref(), Some("r2"));
        assert_eq!(got.expires_at, Some(200));

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all.iter().filter(|c| c.provider == "isolarcloud").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_memory_store_one_record_per_provider() {
        let store = MemoryCredentialStore::new();
        assert_last_write_wins(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_one_record_per_provider() {
        let (store, _dir) = sqlite_store().await;
        assert_last_write_wins(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_get_missing_returns_none() {
        let (store, _dir) = sqlite_store().await;
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_null_columns_roundtrip() {
        let (store, _dir) = sqlite_store().await;
        store
            .put(&Credential::new("isolarcloud", "long-lived", None, None))
            .await
            .unwrap();
        let got = store.get("isolarcloud").await.unwrap().unwrap();
        assert_eq!(got.refresh_token, None);
        assert_eq!(got.expires_at, None);
    }

    #[tokio::test]
    async fn test_sqlite_delete() {
        let (store, _dir) = sqlite_store().await;
        store
            .put(&Credential::new("isolarcloud", "a", None, None))
            .await
            .unwrap();
        assert!(store.delete("isolarcloud").await.unwrap());
        assert!(!store.delete("isolarcloud").await.unwrap());
        assert!(store.get("isolarcloud").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("tokens.db");
        {
            let store = SqliteCredentialStore::open(&path).await.unwrap();
            store
                .put(&Credential::new("isolarcloud", "kept", Some("rt".into()), Some(42)))
                .await
                .unwrap();
        }
        let reopened = SqliteCredentialStore::open(&path).await.unwrap();
        let got = reopened.get("isolarcloud").await.unwrap().unwrap();
        assert_eq!(got.access_token, "kept");
    }
}

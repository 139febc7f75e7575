//! OAuth 凭证生命周期
//!
//! - store: 每个 provider 一条凭证记录（内存 / SQLite）
//! - client: 授权服务器（code 换取、刷新）
//! - manager: 过期判断 + 单飞刷新，向工具层提供调用时刻有效的 access token

pub mod client;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use client::{AuthorizationServerClient, IsolarCloudAuthClient};
pub use error::{AuthError, AuthResult};
pub use manager::{AuthorizePage, TokenLifecycleManager};
pub use store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use types::{now_unix, AppCredentials, Credential, CredentialStatus, TokenGrant};

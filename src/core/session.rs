//! 会话注册表
//!
//! session_id → `Arc<Mutex<ConversationSession>>`。同一会话的多轮对话由会话锁串行化（整轮持锁），
//! 不同会话互不阻塞；注册表本身由 RwLock 保护。会话在进程生命周期内常驻，仅能显式 clear。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::memory::Message;

/// 单个会话：按顺序追加的消息历史
#[derive(Debug)]
pub struct ConversationSession {
    pub id: String,
    history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub turns: usize,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            created_at: Utc::now(),
            turns: 0,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.turns = 0;
    }
}

pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// 会话注册表
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SharedSession>>,
    default_session_id: String,
}

impl SessionRegistry {
    pub fn new(default_session_id: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_session_id: default_session_id.into(),
        }
    }

    /// 空白或缺省的 session id 归一为默认会话
    pub fn normalize_id(&self, session_id: Option<&str>) -> String {
        match session_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.default_session_id.clone(),
        }
    }

    pub fn default_session_id(&self) -> &str {
        &self.default_session_id
    }

    pub async fn get_or_create(&self, session_id: &str) -> SharedSession {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "Creating conversation session");
            Arc::new(Mutex::new(ConversationSession::new(session_id)))
        }))
    }

    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// 会话历史快照（会等待进行中的一轮结束）
    pub async fn history(&self, session_id: &str) -> Option<Vec<Message>> {
        let session = self.get(session_id).await?;
        let guard = session.lock().await;
        Some(guard.messages().to_vec())
    }

    /// 清空会话历史，返回会话是否存在
    pub async fn clear(&self, session_id: &str) -> bool {
        match self.get(session_id).await {
            Some(session) => {
                session.lock().await.clear();
                true
            }
            None => false,
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new("default")
    }
}

//! Session storage — per-conversation ordered history.
//!
//! A [`Session`] is identified by its key (by convention
//! `"{channel}:{chat_id}"`) and holds an ordered sequence of user/assistant
//! [`Turn`]s. Sessions are created lazily on first use and never deleted by
//! the agent loop; only the final summary pair of each processed message is
//! retained, not intermediate tool traffic.
//!
//! The [`SessionManager`] keeps an in-memory map and, when given a storage
//! path, mirrors every save to one pretty-printed JSON file per session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use nanoclaw_core::error::SessionError;
use nanoclaw_core::message::Role;

/// One persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// user or assistant
    pub role: Role,

    /// The text content
    pub content: String,

    /// Media references attached to this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,

    /// When this turn was recorded
    pub timestamp: DateTime<Utc>,
}

/// An ordered per-conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session key
    pub key: String,

    /// Ordered turns
    pub turns: Vec<Turn>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was appended
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append one turn.
    pub fn append(&mut self, role: Role, content: impl Into<String>, media: Vec<String>) {
        self.updated_at = Utc::now();
        self.turns.push(Turn {
            role,
            content: content.into(),
            media,
            timestamp: self.updated_at,
        });
    }

    /// The ordered history.
    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

/// Session manager with in-memory cache and optional JSON file persistence.
///
/// Cloning shares the underlying map, so one manager can be handed to the
/// agent loop and inspected from tests or CLI commands.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    storage_path: Option<PathBuf>,
}

impl SessionManager {
    /// Create a manager persisting to the given directory.
    pub fn new(storage_path: PathBuf) -> Result<Self, SessionError> {
        std::fs::create_dir_all(&storage_path)
            .map_err(|e| SessionError::Storage(format!("{}: {e}", storage_path.display())))?;
        Ok(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(storage_path),
        })
    }

    /// Create an in-memory manager without persistence (tests, one-shot runs).
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
        }
    }

    /// Get an existing session or create a new empty one.
    ///
    /// Checks memory first, then disk; a new session is not written to disk
    /// until the first [`save`](Self::save).
    pub async fn get_or_create(&self, key: &str) -> Result<Session, SessionError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key) {
                return Ok(session.clone());
            }
        }

        if let Some(session) = self.load_from_disk(key).await? {
            let mut sessions = self.sessions.write().await;
            sessions.insert(key.to_string(), session.clone());
            return Ok(session);
        }

        debug!(key = %key, "Creating new session");
        let session = Session::new(key);
        let mut sessions = self.sessions.write().await;
        sessions.insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Get a session by key without creating it.
    pub async fn get(&self, key: &str) -> Result<Option<Session>, SessionError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key) {
                return Ok(Some(session.clone()));
            }
        }

        if let Some(session) = self.load_from_disk(key).await? {
            let mut sessions = self.sessions.write().await;
            sessions.insert(key.to_string(), session.clone());
            return Ok(Some(session));
        }

        Ok(None)
    }

    /// Save a session to memory and, if persistence is enabled, to disk.
    pub async fn save(&self, session: &Session) -> Result<(), SessionError> {
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session.key.clone(), session.clone());
        }

        if let Some(ref storage_path) = self.storage_path {
            let file_path = storage_path.join(format!("{}.json", sanitize_key(&session.key)));
            let content = serde_json::to_string_pretty(session)
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            tokio::fs::write(&file_path, content)
                .await
                .map_err(|e| SessionError::Storage(format!("{}: {e}", file_path.display())))?;
        }

        Ok(())
    }

    /// List all known session keys (memory + disk).
    pub async fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut keys: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        if let Some(ref storage_path) = self.storage_path {
            let mut dir = tokio::fs::read_dir(storage_path)
                .await
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| SessionError::Storage(e.to_string()))?
            {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    if let Some(stem) = path.file_stem() {
                        let key = stem.to_string_lossy().to_string();
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn load_from_disk(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let Some(ref storage_path) = self.storage_path else {
            return Ok(None);
        };
        let file_path = storage_path.join(format!("{}.json", sanitize_key(key)));
        if !file_path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&file_path)
            .await
            .map_err(|e| SessionError::Storage(format!("{}: {e}", file_path.display())))?;
        let session = serde_json::from_str(&content).map_err(|e| SessionError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(session))
    }
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            storage_path: self.storage_path.clone(),
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Sanitize a session key for use as a filename.
fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_and_retrieve() {
        let manager = SessionManager::in_memory();
        let session = manager.get_or_create("cli:local").await.unwrap();
        assert_eq!(session.key, "cli:local");
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn one_session_per_key() {
        let manager = SessionManager::in_memory();
        let mut session = manager.get_or_create("webhook:42").await.unwrap();
        session.append(Role::User, "hi", vec![]);
        manager.save(&session).await.unwrap();

        let again = manager.get_or_create("webhook:42").await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again.turns[0].content, "hi");
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let mut session = Session::new("k");
        session.append(Role::User, "first", vec![]);
        session.append(Role::Assistant, "second", vec![]);
        session.append(Role::User, "third", vec![]);

        let roles: Vec<Role> = session.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(session.turns[2].content, "third");
    }

    #[tokio::test]
    async fn get_nonexistent_is_none() {
        let manager = SessionManager::in_memory();
        assert!(manager.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = SessionManager::in_memory();
        let b = a.clone();

        let mut session = a.get_or_create("shared").await.unwrap();
        session.append(Role::User, "from a", vec![]);
        a.save(&session).await.unwrap();

        let seen = b.get("shared").await.unwrap().unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn file_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        {
            let manager = SessionManager::new(path.clone()).unwrap();
            let mut session = manager.get_or_create("webhook:7").await.unwrap();
            session.append(Role::User, "persisted", vec!["/tmp/a.png".into()]);
            session.append(Role::Assistant, "reply", vec![]);
            manager.save(&session).await.unwrap();
        }

        // Fresh manager instance reads from disk
        let manager = SessionManager::new(path).unwrap();
        let session = manager.get_or_create("webhook:7").await.unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session.turns[0].media, vec!["/tmp/a.png".to_string()]);
        assert_eq!(session.turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn list_merges_memory_and_disk() {
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf()).unwrap();

        for key in ["alpha", "beta"] {
            let session = manager.get_or_create(key).await.unwrap();
            manager.save(&session).await.unwrap();
        }
        // In memory only, never saved
        manager.get_or_create("gamma").await.unwrap();

        let keys = manager.list().await.unwrap();
        assert_eq!(keys, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let manager = SessionManager::new(dir.path().to_path_buf()).unwrap();
        let err = manager.get_or_create("bad").await.unwrap_err();
        assert!(matches!(err, SessionError::Corrupt { .. }));
    }

    #[test]
    fn sanitize_key_strips_separators() {
        assert_eq!(sanitize_key("simple"), "simple");
        assert_eq!(sanitize_key("webhook:chat/7"), "webhook_chat_7");
    }
}

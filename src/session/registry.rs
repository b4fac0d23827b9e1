//! In-memory session registry

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::error::{AppError, Result};

/// Registry entry binding a token to a provider session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub token: String,
    /// Stream group the session runs on
    pub stream_group: String,
    /// Provider session ARN
    pub session_arn: String,
    pub created_at: Instant,
}

impl SessionRecord {
    pub fn new(
        token: impl Into<String>,
        stream_group: impl Into<String>,
        session_arn: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            stream_group: stream_group.into(),
            session_arn: session_arn.into(),
            created_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Check whether the record has outlived `timeout`
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.age() > timeout
    }
}

/// Token-keyed session storage
///
/// Absence is a normal result, never an error. `get` does not filter
/// expired records; callers check [`SessionRecord::is_expired`].
pub trait SessionStore: Send + Sync {
    /// Insert a new record. Reusing a token or a session ARN is a bug.
    fn put(&self, record: SessionRecord) -> Result<()>;

    fn get(&self, token: &str) -> Option<SessionRecord>;

    /// Remove a record; removing an absent token is a no-op
    fn remove(&self, token: &str) -> Option<SessionRecord>;

    /// Remove every record older than `timeout`, returning how many went
    fn remove_expired(&self, timeout: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local session store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, record: SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&record.token) {
            return Err(AppError::Internal("Session token collision".to_string()));
        }
        if sessions
            .values()
            .any(|existing| existing.session_arn == record.session_arn)
        {
            return Err(AppError::Internal(format!(
                "Stream session {} is already registered",
                record.session_arn
            )));
        }
        sessions.insert(record.token.clone(), record);
        Ok(())
    }

    fn get(&self, token: &str) -> Option<SessionRecord> {
        self.sessions.read().get(token).cloned()
    }

    fn remove(&self, token: &str) -> Option<SessionRecord> {
        self.sessions.write().remove(token)
    }

    fn remove_expired(&self, timeout: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| !record.is_expired(timeout));
        before - sessions.len()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let store = MemorySessionStore::new();
        assert!(store.is_empty());

        store.put(SessionRecord::new("t1", "sg-1", "arn:1")).unwrap();
        let record = store.get("t1").unwrap();
        assert_eq!(record.session_arn, "arn:1");
        assert_eq!(record.stream_group, "sg-1");
        assert_eq!(store.len(), 1);

        assert!(store.get("missing").is_none());

        assert!(store.remove("t1").is_some());
        assert!(store.remove("t1").is_none());
        assert!(store.get("t1").is_none());
    }

    #[test]
    fn test_put_rejects_collisions() {
        let store = MemorySessionStore::new();
        store.put(SessionRecord::new("t1", "sg-1", "arn:1")).unwrap();

        let dup_token = store.put(SessionRecord::new("t1", "sg-1", "arn:2"));
        assert!(matches!(dup_token, Err(AppError::Internal(_))));

        let dup_arn = store.put(SessionRecord::new("t2", "sg-1", "arn:1"));
        assert!(matches!(dup_arn, Err(AppError::Internal(_))));

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary() {
        let timeout = Duration::from_secs(120);
        let store = MemorySessionStore::new();
        store.put(SessionRecord::new("t1", "sg-1", "arn:1")).unwrap();

        tokio::time::advance(timeout - Duration::from_millis(1)).await;
        let record = store.get("t1").unwrap();
        assert!(!record.is_expired(timeout));
        assert_eq!(store.remove_expired(timeout), 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        // Still present until swept, but the caller must treat it as gone
        let record = store.get("t1").unwrap();
        assert!(record.is_expired(timeout));

        assert_eq!(store.remove_expired(timeout), 1);
        assert!(store.get("t1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_expired_keeps_fresh_records() {
        let timeout = Duration::from_secs(10);
        let store = MemorySessionStore::new();
        store.put(SessionRecord::new("old", "sg-1", "arn:1")).unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        store.put(SessionRecord::new("new", "sg-1", "arn:2")).unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(store.remove_expired(timeout), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }
}

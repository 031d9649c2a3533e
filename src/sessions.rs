//! Session lookups and rate-limit counters behind one port.
//!
//! `RedisClient` serves the running service. `MemorySessions` keeps both in
//! process for router tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::{error::Result, models::UserId};

#[async_trait]
pub trait SessionCache: Send + Sync {
    /// The user id stored for a live session, or `None` once it has expired.
    async fn get_session(&self, session_id: &str) -> Result<Option<String>>;

    /// Counts one hit against `key`. Returns `false` once more than `limit`
    /// hits land inside one window.
    async fn check_rate_limit(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

/// In-process sessions. Rate-limit windows never roll over.
#[derive(Default)]
pub struct MemorySessions {
    sessions: Mutex<HashMap<String, String>>,
    hits: Mutex<HashMap<String, u32>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_session(&self, session_id: &str, user_id: UserId) {
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), user_id.to_string());
    }
}

#[async_trait]
impl SessionCache for MemorySessions {
    async fn get_session(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn check_rate_limit(&self, key: &str, limit: u32, _window_seconds: u64) -> Result<bool> {
        let mut hits = self.hits.lock().await;
        let current = hits.entry(key.to_string()).or_insert(0);
        *current += 1;
        Ok(*current <= limit)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limit_counts_per_key() {
        let sessions = MemorySessions::new();

        assert!(sessions.check_rate_limit("vote_post:1", 2, 60).await.unwrap());
        assert!(sessions.check_rate_limit("vote_post:1", 2, 60).await.unwrap());
        assert!(!sessions.check_rate_limit("vote_post:1", 2, 60).await.unwrap());
        assert!(sessions.check_rate_limit("vote_post:2", 2, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_lookup() {
        let sessions = MemorySessions::new();
        sessions.insert_session("abc", 7).await;

        assert_eq!(
            sessions.get_session("abc").await.unwrap().as_deref(),
            Some("7")
        );
        assert!(sessions.get_session("missing").await.unwrap().is_none());
    }
}

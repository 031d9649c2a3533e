use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::{error::Result, sessions::SessionCache};

/// Session lookups and rate-limit counters. `ConnectionManager` is a cheap,
/// multiplexed handle, so each call works on its own clone.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionCache for RedisClient {
    // Sessions are written by the login flow; only lookups happen here
    async fn get_session(&self, session_id: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let user_id: Option<String> = conn.get(session_key(session_id)).await?;
        Ok(user_id)
    }

    // Fixed-window rate limiting
    async fn check_rate_limit(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool> {
        let mut conn = self.manager.clone();

        let current: u32 = conn.incr(key, 1).await?;
        if current == 1 {
            let _: () = conn.expire(key, window_seconds as i64).await?;
        }

        Ok(current <= limit)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

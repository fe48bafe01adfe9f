use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

/// Claim-once store for idempotency keys.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// `true` if the key was unclaimed (now claimed for `ttl`), `false` if seen.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryDedupStore {
    seen: Mutex<HashMap<String, Instant>>,
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, expires| *expires > now);
        if seen.contains_key(key) {
            return Ok(false);
        }
        seen.insert(key.to_string(), now + ttl);
        Ok(true)
    }
}

pub const REDIS_DEDUP_PREFIX: &str = "alertflow:dedup:";

/// `SET key 1 NX EX ttl` on a shared multiplexed connection.
pub struct RedisDedupStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisDedupStore {
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{REDIS_DEDUP_PREFIX}{key}"))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_once() {
        let store = MemoryDedupStore::default();
        let ttl = Duration::from_secs(60);
        assert!(store.claim("evt-1", ttl).await.unwrap());
        assert!(!store.claim("evt-1", ttl).await.unwrap());
        assert!(store.claim("evt-2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_expires() {
        let store = MemoryDedupStore::default();
        assert!(store.claim("evt-1", Duration::ZERO).await.unwrap());
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.claim("evt-1", Duration::from_secs(60)).await.unwrap());
    }
}

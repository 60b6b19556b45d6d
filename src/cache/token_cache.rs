//! Shared store for the gateway's OAuth token
//!
//! One entry per business short code. Entries expire in Redis at the same
//! instant the token does, so a reader never sees a token the provider has
//! already retired. A Redis outage degrades to a miss instead of an error.

use super::{error::CacheResult, keys, RedisPool};
use crate::payments::providers::mpesa::CachedToken;
use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_redis::RedisConnectionManager;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};

type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

/// Access tokens shared between gateway instances
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn load(&self, business_short_code: &str) -> CacheResult<Option<CachedToken>>;

    async fn store(&self, business_short_code: &str, token: &CachedToken) -> CacheResult<()>;

    /// Drop a token the provider no longer accepts
    async fn invalidate(&self, business_short_code: &str) -> CacheResult<bool>;
}

/// Time left before `token` expires, `None` once it has
pub fn token_ttl(token: &CachedToken, now: DateTime<Utc>) -> Option<Duration> {
    let remaining = (token.expires_at - now).to_std().ok()?;
    if remaining.as_secs() == 0 {
        return None;
    }
    Some(remaining)
}

#[derive(Clone)]
pub struct RedisTokenCache {
    pool: RedisPool,
}

impl RedisTokenCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn get_connection(&self) -> CacheResult<RedisConnection<'_>> {
        self.pool.get().await.map_err(|e| {
            warn!("Failed to get Redis connection: {}", e);
            e.into()
        })
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn load(&self, business_short_code: &str) -> CacheResult<Option<CachedToken>> {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(None),
        };

        let key = keys::mpesa_access_token(business_short_code);
        let raw: Option<String> = conn.get(&key).await.map_err(|e| {
            warn!("Redis GET failed for key '{}': {}", key, e);
            e
        })?;

        let Some(raw) = raw else {
            debug!("No shared token for {}", business_short_code);
            return Ok(None);
        };

        let token: CachedToken = serde_json::from_str(&raw).map_err(|e| {
            warn!("Discarding unreadable shared token at '{}': {}", key, e);
            e
        })?;
        Ok(Some(token))
    }

    async fn store(&self, business_short_code: &str, token: &CachedToken) -> CacheResult<()> {
        let Some(ttl) = token_ttl(token, Utc::now()) else {
            debug!("Not sharing an expired token for {}", business_short_code);
            return Ok(());
        };

        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(()),
        };

        let key = keys::mpesa_access_token(business_short_code);
        let raw = serde_json::to_string(token)?;
        let _: () = conn.set_ex(&key, raw, ttl.as_secs()).await.map_err(|e| {
            warn!("Redis SET_EX failed for key '{}': {}", key, e);
            e
        })?;

        debug!("Shared token for {} (ttl: {}s)", business_short_code, ttl.as_secs());
        Ok(())
    }

    async fn invalidate(&self, business_short_code: &str) -> CacheResult<bool> {
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false),
        };

        let key = keys::mpesa_access_token(business_short_code);
        let removed: i32 = conn.del(&key).await.map_err(|e| {
            warn!("Redis DEL failed for key '{}': {}", key, e);
            e
        })?;
        Ok(removed > 0)
    }
}

use std::{collections::HashMap, sync::Mutex, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use fred::{prelude::*, types::Expiration};
use tokio::time::Instant;
use tracing::error;

use crate::{TokenError, env};

/// String key-value storage with per-entry expiry.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), TokenError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
    pub ttl: Duration,
}

impl CacheConfig {
    /// Reads REDIS_HOST, REDIS_PORT, REDIS_DB and CACHE_TIME (seconds).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var_or("REDIS_HOST", "localhost"),
            port: env::var_parse("REDIS_PORT", 6379)?,
            db: env::var_parse("REDIS_DB", 0)?,
            ttl: Duration::from_secs(env::var_parse("CACHE_TIME", 600)?),
        })
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self, TokenError> {
        let config = Config::from_url(redis_url)?;

        let client = Builder::from_config(config)
            .with_connection_config(|config| {
                config.connection_timeout = Duration::from_secs(5);
                config.tcp = TcpConfig {
                    nodelay: Some(true),
                    ..Default::default()
                };
            })
            .build()?;

        client.on_error(|(error, server)| async move {
            error!(?server, ?error, "redis connection error");
            Ok(())
        });

        client.connect();
        client.wait_for_connect().await?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TokenCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenError> {
        Ok(self.client.get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), TokenError> {
        let seconds = ttl.as_secs().max(1) as i64;
        let _: () = self
            .client
            .set(key, value, Some(Expiration::EX(seconds)), None, false)
            .await?;
        Ok(())
    }
}

/// In-process stand-in for `RedisCache`, used by tests to run without a Redis server.
///
/// Expiry follows the tokio clock, so a paused runtime can move entries past their TTL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until next read.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        // entries are plain values, a poisoned lock leaves them intact
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenError> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), TokenError> {
        self.lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

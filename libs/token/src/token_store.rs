use std::{sync::Arc, time::Duration};

use tracing::{debug, info, instrument, warn};

use crate::{Token, TokenCache, TokenError, TokenSource, locks::KeyedLocks};

/// Longest symbol the registry accepts.
pub const MAX_SYMBOL_LEN: usize = 20;

const KEY_PREFIX: &str = "stkn";

/// Cache-or-fetch access to token metadata.
///
/// Concurrent misses on one symbol are coalesced: the first caller fetches from the
/// registry while the rest wait, then read what it cached.
pub struct TokenStore {
    source: Arc<dyn TokenSource>,
    cache: Arc<dyn TokenCache>,
    ttl: Duration,
    locks: KeyedLocks,
}

impl TokenStore {
    pub fn new(source: Arc<dyn TokenSource>, cache: Arc<dyn TokenCache>, ttl: Duration) -> Self {
        Self {
            source,
            cache,
            ttl,
            locks: KeyedLocks::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Trim and uppercase, rejecting symbols the registry cannot hold.
    pub fn normalize(symbol: &str) -> Result<String, TokenError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.chars().count() > MAX_SYMBOL_LEN {
            return Err(TokenError::SymbolTooLong);
        }
        Ok(symbol)
    }

    fn cache_key(symbol: &str) -> String {
        format!("{}:{}", KEY_PREFIX, symbol)
    }

    #[instrument(name = "get_token", skip(self))]
    pub async fn get(&self, symbol: &str) -> Result<Token, TokenError> {
        let symbol = Self::normalize(symbol)?;
        if symbol.is_empty() {
            return Err(TokenError::NotFound(symbol));
        }

        let key = Self::cache_key(&symbol);
        if let Some(token) = self.cached(&key).await? {
            debug!("cache hit");
            return Ok(token);
        }

        let _guard = self.locks.lock(&key).await;

        // another request may have filled the entry while we waited
        if let Some(token) = self.cached(&key).await? {
            debug!("cache filled by concurrent request");
            return Ok(token);
        }

        let token = self
            .source
            .get_token(&symbol)
            .await?
            .ok_or_else(|| TokenError::NotFound(symbol.clone()))?;

        self.cache
            .set(&key, serde_json::to_string(&token)?, self.ttl)
            .await?;

        info!(ttl_secs = self.ttl.as_secs(), "cached token from registry");
        Ok(token)
    }

    async fn cached(&self, key: &str) -> Result<Option<Token>, TokenError> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache entry");
                Ok(None)
            }
        }
    }
}

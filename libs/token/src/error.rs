use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Symbol is too long. Refusing to look up.")]
    SymbolTooLong,

    #[error("Symbol '{0}' was not found on SteemEngine.")]
    NotFound(String),

    #[error("Token '{0}' does not have an icon.")]
    IconMissing(String),

    /// The icon host failed, timed out or answered with a non-success status.
    #[error("icon download failed: {0}")]
    IconFetch(#[source] reqwest::Error),

    /// The registry answered with a JSON-RPC error object.
    #[error("upstream rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cache error: {0}")]
    Cache(#[from] fred::error::Error),

    #[error("malformed token data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("icon storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl TokenError {
    /// True for errors caused by the requested symbol rather than by a failing dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TokenError::SymbolTooLong | TokenError::NotFound(_))
    }
}

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

use crate::{TokenError, env};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Anything able to look a token up by its normalized symbol.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns `Ok(None)` when the registry has no such token.
    async fn get_token(&self, symbol: &str) -> Result<Option<Token>, TokenError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub host: String,
    pub path: String,
    pub ssl: bool,
    pub port: u16,
}

impl RpcConfig {
    /// Reads SE_HOST, SE_URL, SE_SSL and SE_PORT.
    pub fn from_env() -> Result<Self> {
        let ssl = env::var_bool("SE_SSL", true)?;
        Ok(Self {
            host: env::var_or("SE_HOST", "api.steem-engine.com"),
            path: env::var_or("SE_URL", "/rpc/contracts"),
            ssl,
            port: env::var_parse("SE_PORT", if ssl { 443 } else { 80 })?,
        })
    }

    pub fn endpoint(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        let path = self.path.trim_start_matches('/');
        format!("{}://{}:{}/{}", scheme, self.host, self.port, path)
    }
}

/// JSON-RPC client for the Steem Engine contracts endpoint.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self, TokenError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenSource for RpcClient {
    #[instrument(name = "rpc_get_token", skip(self))]
    async fn get_token(&self, symbol: &str) -> Result<Option<Token>, TokenError> {
        let request = RpcRequest::find_one("tokens", "tokens", symbol);

        let res: RpcResponse<Token> = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = res.error {
            return Err(TokenError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        debug!(endpoint = %self.endpoint, found = res.result.is_some(), "registry answered");
        Ok(res.result)
    }
}

//
// Steem Engine contracts RPC
// https://github.com/harpagon210/steemsmartcontracts-wiki/blob/master/JSON-RPC-server.md
//
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: FindOneParams<'a>,
}

#[derive(Debug, Serialize)]
struct FindOneParams<'a> {
    contract: &'a str,
    table: &'a str,
    query: SymbolQuery<'a>,
}

#[derive(Debug, Serialize)]
struct SymbolQuery<'a> {
    symbol: &'a str,
}

impl<'a> RpcRequest<'a> {
    fn find_one(contract: &'a str, table: &'a str, symbol: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: 1,
            method: "findOne",
            params: FindOneParams {
                contract,
                table,
                query: SymbolQuery { symbol },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// A row of the registry's `tokens` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    #[serde(deserialize_with = "lenient_string")]
    pub issuer: String,
    pub symbol: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,

    #[serde(deserialize_with = "metadata_from_json")]
    pub metadata: TokenMetadata,

    #[serde(deserialize_with = "lenient_u32")]
    pub precision: u32,

    #[serde(rename = "maxSupply", deserialize_with = "lenient_string")]
    pub max_supply: String,

    #[serde(deserialize_with = "lenient_string")]
    pub supply: String,

    #[serde(alias = "circulatingSupply", deserialize_with = "lenient_string")]
    pub circulating_supply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenMetadata {
    pub url: String,
    pub icon: String,
    pub desc: String,
}

// The registry stores metadata as a JSON-encoded string; the cache stores the decoded object.
fn metadata_from_json<'de, D>(deserializer: D) -> Result<TokenMetadata, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Encoded(String),
        Decoded(TokenMetadata),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Encoded(text)) => serde_json::from_str(&text).unwrap_or_default(),
        Some(Raw::Decoded(metadata)) => metadata,
        None => TokenMetadata::default(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Flag(bool),
}

// Amounts come back as strings for issued tokens but as bare numbers (or null) otherwise.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Text(text)) => text,
        Some(Scalar::Unsigned(n)) => n.to_string(),
        Some(Scalar::Signed(n)) => n.to_string(),
        Some(Scalar::Float(n)) => n.to_string(),
        Some(Scalar::Flag(b)) => b.to_string(),
        None => String::new(),
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Unsigned(n)) => u32::try_from(n).unwrap_or_default(),
        Some(Scalar::Text(text)) => text.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

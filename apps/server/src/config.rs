use std::path::PathBuf;

use anyhow::Result;
use token::{CacheConfig, IconConfig, RpcConfig, env};

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub debug: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub rpc: RpcConfig,
    pub cache: CacheConfig,
    pub icons: IconConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let debug = env::var_bool("DEBUG", false)?;
        let cache = CacheConfig::from_env()?;

        Ok(Self {
            listen_addr: env::var_or("LISTEN_ADDR", "127.0.0.1:5000"),
            debug,
            log_level: log_level(env::var_opt("LOG_LEVEL"), debug),
            log_dir: env::var_or("LOG_DIR", "logs").into(),
            rpc: RpcConfig::from_env()?,
            icons: IconConfig::from_env(cache.ttl)?,
            cache,
        })
    }
}

/// Explicit LOG_LEVEL wins, otherwise DEBUG picks between debug and info.
fn log_level(explicit: Option<String>, debug: bool) -> String {
    match explicit {
        Some(level) => match level.to_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            other => other.to_string(),
        },
        None if debug => "debug".to_string(),
        None => "info".to_string(),
    }
}

mod error;
mod icon;
mod locks;
mod rpc_client;
mod token_cache;
mod token_store;

pub mod env;

pub use error::TokenError;
pub use icon::{Icon, IconConfig, IconStore};
pub use rpc_client::{RpcClient, RpcConfig, Token, TokenMetadata, TokenSource};
pub use token_cache::{CacheConfig, MemoryCache, RedisCache, TokenCache};
pub use token_store::{MAX_SYMBOL_LEN, TokenStore};

use std::sync::Arc;

use anyhow::{Context, Result};
use server::{AppState, api, config::Config, logging};
use token::{IconStore, RedisCache, RpcClient, TokenStore};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    let _log_guards = logging::init(&config.log_level, &config.log_dir)?;

    let rpc_client = RpcClient::new(&config.rpc)?;
    info!(endpoint = rpc_client.endpoint(), "using token registry");

    let cache = RedisCache::new(&config.cache.url())
        .await
        .with_context(|| format!("init token cache failed ({})", config.cache.url()))?;

    let icons = IconStore::new(config.icons.clone())?;
    icons
        .ensure_dir()
        .await
        .with_context(|| format!("cannot create icon dir {}", icons.dir().display()))?;

    let state = Arc::new(AppState {
        tokens: TokenStore::new(Arc::new(rpc_client), Arc::new(cache), config.cache.ttl),
        icons,
    });

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("cannot listen on {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        debug = config.debug,
        cache_secs = config.cache.ttl.as_secs(),
        "{} v{} listening",
        api::SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::{
            select,
            signal::unix::{SignalKind, signal},
        };
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv()  => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

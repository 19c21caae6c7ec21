use token::{IconStore, TokenStore};

pub mod api;
pub mod config;
pub mod logging;

pub struct AppState {
    pub tokens: TokenStore,
    pub icons: IconStore,
}

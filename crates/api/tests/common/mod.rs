#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use herald_db::MemoryStore;
use herald_events::{DispatchConfig, DispatchWorkers};
use tokio_util::sync::CancellationToken;

use herald_api::app::build_app;
use herald_api::config::{RegistryConfig, ServerConfig};
use herald_api::state::{AppState, ChannelSetup};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        token_retention_days: 90,
        registry: RegistryConfig::default(),
    }
}

/// Application state on a fresh in-memory store with no external channels.
pub fn test_state() -> (AppState, DispatchWorkers, CancellationToken) {
    test_state_with(test_config())
}

/// Like [`test_state`], with a custom server configuration.
pub fn test_state_with(config: ServerConfig) -> (AppState, DispatchWorkers, CancellationToken) {
    let cancel = CancellationToken::new();
    let (state, workers) = AppState::build(
        Arc::new(MemoryStore::new()),
        None,
        config,
        &DispatchConfig::default(),
        ChannelSetup::default(),
        cancel.clone(),
    );
    (state, workers, cancel)
}

/// Build the full application router with all middleware layers.
pub fn build_test_app() -> Router {
    let (state, _workers, _cancel) = test_state();
    build_app(state)
}

/// Serve the application on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

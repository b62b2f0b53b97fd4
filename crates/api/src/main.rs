use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use herald_db::{MemoryStore, PgStore, SharedStore};
use herald_events::delivery::email::MailTransport;
use herald_events::delivery::push::PushProvider;
use herald_events::{
    DigestScheduler, DispatchConfig, EmailConfig, EventRouter, HttpPushProvider, PushConfig,
    SmtpMailer, WebhookAdapter, WebhookConfig,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use herald_api::config::ServerConfig;
use herald_api::state::{AppState, ChannelSetup};
use herald_api::{app, background, ws};

const DEFAULT_LOG_FILTER: &str = "herald_api=debug,herald_events=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Storage ---
    let (store, pool) = match &config.database_url {
        Some(url) => {
            let pool = herald_db::create_pool(url).await?;
            tracing::info!("Database connection pool created");

            herald_db::health_check(&pool).await?;
            tracing::info!("Database health check passed");

            herald_db::run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");

            let store: SharedStore = Arc::new(PgStore::new(pool.clone()));
            (store, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data will not survive a restart");
            let store: SharedStore = Arc::new(MemoryStore::new());
            (store, None)
        }
    };

    // --- Delivery channels ---
    let channels = build_channels()?;

    // --- App state and dispatcher ---
    let cancel = CancellationToken::new();
    let (state, workers) = AppState::build(
        store.clone(),
        pool,
        config.clone(),
        &dispatch_config,
        channels,
        cancel.clone(),
    );

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&state.registry),
        config.registry.heartbeat_interval,
    );

    // Spawn event router (turns domain events into notifications).
    let event_router = EventRouter::new(state.dispatcher.clone(), state.broadcaster.clone());
    let router_handle = tokio::spawn(event_router.run(state.event_bus.subscribe()));

    // Spawn digest scheduler (checks hourly for digest deliveries).
    let digest_scheduler = DigestScheduler::new(
        store,
        Arc::clone(&state.email),
        state.dispatcher.adapters().clone(),
    )
    .with_channel_timeout(dispatch_config.channel_timeout);
    let digest_cancel = cancel.clone();
    let digest_handle = tokio::spawn(async move {
        digest_scheduler.run(digest_cancel).await;
    });

    // Spawn device token cleanup.
    let cleanup_handle = tokio::spawn(background::token_cleanup::run(
        Arc::clone(&state.push),
        config.token_retention_days,
        cancel.clone(),
    ));

    tracing::info!("Background services started (dispatcher, event router, digest scheduler, token cleanup)");

    let registry = Arc::clone(&state.registry);
    let application = app::build_app(state);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, application)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let step_timeout = config.shutdown_timeout();

    let ws_count = registry.shutdown_all();
    tracing::info!(ws_count, "Closed remaining WebSocket connections");

    // The router exits once the last AppState (and with it the event bus) is
    // dropped by the closing connection tasks.
    if tokio::time::timeout(step_timeout, router_handle).await.is_err() {
        tracing::warn!("Event router did not stop in time");
    }

    // Workers drain what is already queued before exiting.
    cancel.cancel();
    if tokio::time::timeout(step_timeout, workers.join()).await.is_err() {
        tracing::warn!("Dispatch workers did not drain in time");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), digest_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), cleanup_handle).await;
    tracing::info!("Background services stopped");

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Build the external transports from the environment. Channels without
/// configuration stay unconfigured and fail softly per attempt.
fn build_channels() -> Result<ChannelSetup, Box<dyn std::error::Error>> {
    let mail = match EmailConfig::from_env() {
        Some(email_config) => {
            tracing::info!(smtp_host = %email_config.smtp_host, "Email delivery configured");
            Some(Arc::new(SmtpMailer::new(&email_config)?) as Arc<dyn MailTransport>)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, email delivery disabled");
            None
        }
    };

    let push = match PushConfig::from_env() {
        Some(push_config) => {
            tracing::info!("Push delivery configured");
            Some(Arc::new(HttpPushProvider::new(push_config)?) as Arc<dyn PushProvider>)
        }
        None => {
            tracing::warn!("No push gateway configured, push delivery disabled");
            None
        }
    };

    let webhook = WebhookAdapter::new(WebhookConfig::from_env())?;

    Ok(ChannelSetup {
        mail,
        push,
        webhook: Some(Arc::new(webhook)),
    })
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

mod api;
mod auth;
pub mod cache;
pub mod config;
mod state;
pub mod storage;
mod watcher;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

pub use auth::{Authenticator, JwtAuth, TokenAuth};
pub use cache::{ReloadEvent, SnapshotCache};
pub use config::{AuthKind, DEFAULT_PORT, Settings, StorageKind};
pub use storage::StorageProvider;

use state::AppState;

/// Builds the application, with every route under `/api/v1`.
pub fn router(
    cache: Arc<SnapshotCache>,
    auth: Option<Arc<dyn Authenticator>>,
    shutdown: CancellationToken,
) -> Router {
    let api = Router::new()
        .route("/account", get(api::list_accounts))
        .route("/account/{name}", get(api::get_account))
        .route("/account/{name}/balance", get(api::account_balance))
        .route(
            "/account/{name}/transactions",
            get(api::account_transactions),
        )
        .route("/directive", get(api::list_directives))
        .route("/directive/syntax", post(api::directive_syntax))
        .route("/directive/id/{id}", get(api::directive_by_id))
        .route("/directive/{ty}", get(api::directives_by_type))
        .route("/file", get(api::get_file))
        .route("/file/errors", get(api::file_errors))
        .route("/file/options", get(api::file_options))
        .route("/query", get(api::query))
        .route("/events", get(api::reload_events))
        .with_state(AppState::new(cache, shutdown));

    let api = match auth {
        Some(auth) => api.layer(middleware::from_fn_with_state(auth, auth::require_auth)),
        None => api,
    };

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
}

/// Loads the ledger and serves it on `listener` until `shutdown` is cancelled.
///
/// The initial load happens before the first request is accepted; if it fails the server does
/// not start.
pub async fn serve(
    listener: TcpListener,
    settings: Settings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    settings.validate()?;

    let storage = storage::from_settings(&settings)?;
    let cache = SnapshotCache::prime(storage, settings.interval()).await?;
    let refresher = cache.spawn_refresher(shutdown.child_token());

    let auth = auth::from_settings(&settings).await?;
    let app = router(cache, auth, shutdown.clone());

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    refresher.await.context("ledger refresher panicked")?;
    Ok(())
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    // Initialize tracing if not already initialized
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beancount_api_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let listen = SocketAddr::new(settings.host, settings.port);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutting down");
                    shutdown.cancel();
                }
                Err(error) => tracing::error!("Failed to listen for ctrl-c: {error}"),
            }
        }
    });

    serve(listener, settings, shutdown).await
}

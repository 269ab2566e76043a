//! Snapshot web server: axum endpoints over the relay client's track table.
//!
//! Handlers read through a `ClientHandle`, which copies the table under a
//! short read lock. Nothing here mutates client state.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use relay_net::ClientHandle;

pub mod kml;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub client: ClientHandle,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", axum::routing::get(routes::tracks_kml))
        .route("/tracks.kml", axum::routing::get(routes::tracks_kml))
        .route("/api/tracks", axum::routing::get(routes::api_tracks))
        .route("/api/status", axum::routing::get(routes::api_status))
        .with_state(state)
        .layer(cors)
}

/// Serve the snapshot endpoints until `shutdown` resolves.
pub async fn serve(
    client: ClientHandle,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(Arc::new(AppState { client }));
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "snapshot server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

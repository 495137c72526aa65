//! HTTP API of wazo-plugind.
//!
//! All routes live under `/0.2`. Mutating and read endpoints require a
//! bearer token belonging to the master tenant; `/status` and the OpenAPI
//! document are open.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use plugind_core::{Config, PlugindError, Result};

pub use auth::AuthClient;
pub use error::ApiErrorResponse;
pub use state::AppState;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(routes::plugins::routes())
        .merge(routes::market::routes())
        .merge(routes::config::routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::verify_token,
        ));

    let open = Router::new()
        .merge(routes::status::routes())
        .merge(routes::api::routes());

    Router::new()
        .nest("/0.2", protected.merge(open))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured listener and serve until `shutdown` resolves.
pub async fn serve(
    config: &Config,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.rest_api.listen, config.rest_api.port)
        .parse()
        .map_err(|e| PlugindError::Config(format!("invalid listen address: {e}")))?;

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("http server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("http server stopped");
    Ok(())
}

//! Configuration endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use plugind_core::Config;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/config", get(get_config))
}

async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json((*state.config).clone())
}

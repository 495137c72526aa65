//! Daemon status endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/status", get(status))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let master_tenant = if state.master_tenant().is_some() {
        "ok"
    } else {
        "fail"
    };
    Json(json!({
        "rest_api": {"status": "ok"},
        "master_tenant": {"status": master_tenant},
    }))
}

//! OpenAPI document endpoint.

use axum::http::header;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

const API_SPEC: &str = include_str!("../../resources/api.yml");

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/api.yml", get(api_spec))
}

async fn api_spec() -> ([(header::HeaderName, &'static str); 1], &'static str) {
    ([(header::CONTENT_TYPE, "application/x-yaml")], API_SPEC)
}

//! Installed plugin endpoints.

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use plugind_core::error::ConstraintViolation;
use plugind_core::{InstallOptions, InstallParams, PluginMetadata, PlugindError};

use crate::error::ApiErrorResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/plugins", get(list_plugins).post(install_plugin))
        .route(
            "/plugins/:namespace/:name",
            get(get_plugin).delete(uninstall_plugin),
        )
}

#[derive(Debug, Serialize)]
struct PluginList {
    items: Vec<PluginMetadata>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct UuidResponse {
    uuid: Uuid,
}

async fn list_plugins(State(state): State<AppState>) -> Result<Json<PluginList>, ApiErrorResponse> {
    let items = state.service.list().await?;
    let total = items.len();
    Ok(Json(PluginList { items, total }))
}

async fn install_plugin(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UuidResponse>, ApiErrorResponse> {
    let Json(body) = body.map_err(|_| invalid_data("body", "Not a valid object."))?;

    let method = body
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_data("method", "Missing data for required field."))?;
    let options = body.get("options").cloned().unwrap_or_else(|| json!({}));
    let install_options = InstallOptions::from_method(method, &options)?;

    let reinstall = match query.get("reinstall").map(String::as_str) {
        None | Some("false") | Some("0") => false,
        Some("true") | Some("1") => true,
        Some(_) => return Err(invalid_data("reinstall", "Not a valid boolean.")),
    };

    let uuid = state
        .service
        .create(install_options, InstallParams { reinstall })
        .await?;
    Ok(Json(UuidResponse { uuid }))
}

async fn get_plugin(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<PluginMetadata>, ApiErrorResponse> {
    let metadata = state.service.get_plugin_metadata(&namespace, &name).await?;
    Ok(Json(metadata))
}

async fn uninstall_plugin(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<UuidResponse>, ApiErrorResponse> {
    let uuid = state.service.delete(&namespace, &name).await?;
    Ok(Json(UuidResponse { uuid }))
}

fn invalid_data(field: &str, message: &str) -> ApiErrorResponse {
    let mut details = serde_json::Map::new();
    let mut violation = ConstraintViolation::type_error("value").into_value();
    violation["message"] = Value::String(message.to_string());
    details.insert(field.to_string(), violation);
    PlugindError::InvalidData { details }.into()
}

//! Market catalog endpoints.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use plugind_core::error::ConstraintViolation;
use plugind_core::PlugindError;
use plugind_market::{MarketEntry, MarketListParams, SortDirection};

use crate::error::ApiErrorResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/market", get(list_market))
        .route("/market/:namespace/:name", get(get_market_item))
}

#[derive(Debug, Serialize)]
struct MarketList {
    items: Vec<MarketEntry>,
    total: usize,
    filtered: usize,
}

async fn list_market(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<MarketList>, ApiErrorResponse> {
    let params = parse_list_params(query)?;

    let proxy = state.service.new_market_proxy();
    let items = state.service.list_from_market(proxy.clone(), &params).await?;
    let total = state
        .service
        .count_from_market(proxy.clone(), &params, false)
        .await?;
    let filtered = state
        .service
        .count_from_market(proxy, &params, true)
        .await?;

    Ok(Json(MarketList {
        items,
        total,
        filtered,
    }))
}

async fn get_market_item(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<MarketEntry>, ApiErrorResponse> {
    let proxy = state.service.new_market_proxy();
    let entry = state
        .service
        .get_from_market(proxy, &namespace, &name)
        .await?;
    Ok(Json(entry))
}

/// Known paging and search parameters are typed; everything left over
/// becomes a strict equality filter.
fn parse_list_params(
    mut query: HashMap<String, String>,
) -> Result<MarketListParams, ApiErrorResponse> {
    let mut params = MarketListParams::default();

    if let Some(search) = query.remove("search") {
        params.search = Some(search);
    }
    if let Some(order) = query.remove("order") {
        if order.is_empty() {
            return Err(invalid_param("order", ConstraintViolation::length_min(1)));
        }
        params.order = order;
    }
    if let Some(direction) = query.remove("direction") {
        params.direction = match direction.as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => {
                let violation = ConstraintViolation {
                    constraint_id: "enum",
                    constraint: serde_json::json!({"choices": ["asc", "desc"]}),
                    message: "Must be one of: asc, desc.".to_string(),
                };
                return Err(invalid_param("direction", violation));
            }
        };
    }
    if let Some(limit) = query.remove("limit") {
        params.limit = Some(
            limit
                .parse::<usize>()
                .map_err(|_| invalid_param("limit", ConstraintViolation::range_min(0)))?,
        );
    }
    if let Some(offset) = query.remove("offset") {
        params.offset = offset
            .parse::<usize>()
            .map_err(|_| invalid_param("offset", ConstraintViolation::range_min(0)))?;
    }
    if let Some(installed) = query.remove("installed") {
        params.installed = match installed.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => return Err(invalid_param("installed", ConstraintViolation::type_error("boolean"))),
        };
    }

    params.extra_filters = query.into_iter().collect::<BTreeMap<_, _>>();
    Ok(params)
}

fn invalid_param(field: &str, violation: ConstraintViolation) -> ApiErrorResponse {
    let mut details = serde_json::Map::new();
    details.insert(field.to_string(), violation.into_value());
    PlugindError::InvalidData { details }.into()
}

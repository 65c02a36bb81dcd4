use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementViewRequest {
    #[serde(default)]
    pub unique_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ViewCountResponse {
    pub views: i64,
}

#[derive(Debug, Deserialize)]
pub struct MultipleViewsQuery {
    /// Comma-separated slugs.
    #[serde(default)]
    pub slugs: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MultipleViewsResponse {
    pub views: BTreeMap<String, i64>,
}

pub async fn increment_view(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    ApiJson(req): ApiJson<IncrementViewRequest>,
) -> Result<Json<ViewCountResponse>, ApiError> {
    let slug = slug.trim();
    if slug.is_empty() {
        return Err(ApiError::bad_request("Invalid or missing slug in URL path"));
    }
    let unique_id = req
        .unique_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Unique ID is required in body"))?;

    let views = state
        .views
        .increment_view(slug, unique_id)
        .await
        .map_err(|err| {
            error!(slug, "Error incrementing view count: {err:#}");
            ApiError::internal("Error incrementing view count")
        })?;

    Ok(Json(ViewCountResponse { views }))
}

pub async fn get_views(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Json<ViewCountResponse> {
    let views = state.views.get_views(&slug).await.unwrap_or_else(|err| {
        warn!(slug, "Error reading view count, returning 0: {err:#}");
        0
    });
    Json(ViewCountResponse { views })
}

pub async fn get_multiple_views(
    State(state): State<AppState>,
    Query(query): Query<MultipleViewsQuery>,
) -> Json<MultipleViewsResponse> {
    let slugs = parse_slugs(query.slugs.as_deref().unwrap_or_default());
    let views = match state.views.get_multiple_views(&slugs).await {
        Ok(views) => views,
        Err(err) => {
            warn!("Error reading view counts, returning zeros: {err:#}");
            slugs.into_iter().map(|slug| (slug, 0)).collect()
        }
    };
    Json(MultipleViewsResponse { views })
}

fn parse_slugs(raw: &str) -> Vec<String> {
    let mut slugs: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|slug| !slug.is_empty())
        .map(str::to_string)
        .collect();
    slugs.sort();
    slugs.dedup();
    slugs
}

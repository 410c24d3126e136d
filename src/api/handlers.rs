//! Route handlers. Each one is a thin call into [`FeedService`].

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use crate::service::FeedService;
use crate::storage::{Episode, FeedWithEpisodes, RefreshStats, DEFAULT_EPISODE_LIMIT};

pub type AppState = Arc<FeedService>;

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub url: String,
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

fn default_auto_refresh() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct EpisodeQuery {
    pub feed_id: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /feeds - All subscriptions with their episodes, newest subscription first.
pub async fn list_feeds(
    State(service): State<AppState>,
) -> Result<Json<Vec<FeedWithEpisodes>>, ApiError> {
    Ok(Json(service.list_feeds().await?))
}

/// POST /feeds - Subscribe, refreshing right away unless `auto_refresh` is false.
pub async fn subscribe(
    State(service): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FeedWithEpisodes>), ApiError> {
    let Json(request) = payload?;
    let feed = service.subscribe(&request.url, request.auto_refresh).await?;
    Ok((StatusCode::CREATED, Json(feed)))
}

/// GET /feeds/:id
pub async fn get_feed(
    State(service): State<AppState>,
    feed_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<FeedWithEpisodes>, ApiError> {
    let Path(feed_id) = feed_id?;
    Ok(Json(service.get_feed(feed_id).await?))
}

/// DELETE /feeds/:id
pub async fn delete_feed(
    State(service): State<AppState>,
    feed_id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(feed_id) = feed_id?;
    service.delete_feed(feed_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /feeds/:id/refresh
pub async fn refresh_feed(
    State(service): State<AppState>,
    feed_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<RefreshStats>, ApiError> {
    let Path(feed_id) = feed_id?;
    Ok(Json(service.refresh_feed(feed_id).await?))
}

/// GET /episodes?feed_id=&limit=
pub async fn list_episodes(
    State(service): State<AppState>,
    query: Result<Query<EpisodeQuery>, QueryRejection>,
) -> Result<Json<Vec<Episode>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_EPISODE_LIMIT);
    Ok(Json(service.list_episodes(query.feed_id, limit).await?))
}

/// Unknown routes get the same error body as everything else.
pub async fn fallback() -> ApiError {
    ApiError::not_found("Not Found")
}

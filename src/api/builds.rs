//! Build status endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use crate::SharedState;
use crate::registry::{BuildRecord, BuildStatus};

#[derive(Debug, Deserialize)]
pub struct BuildsQuery {
    /// Only return builds in this state
    pub status: Option<BuildStatus>,
}

/// GET /builds - tracked builds, newest first
pub async fn list_builds(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<BuildsQuery>,
) -> Json<Vec<BuildRecord>> {
    let mut builds = state.registry.list();
    if let Some(status) = params.status {
        builds.retain(|build| build.status == status);
    }
    Json(builds)
}

/// GET /builds/{id}
pub async fn get_build(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<BuildRecord>, StatusCode> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /builds/{id}/cancel
pub async fn cancel_build(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.registry.cancel(&id) {
        info!(build_id = %id, "Cancellation requested");
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

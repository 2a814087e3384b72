use crate::analytics::stats::ProgressionStats;
use crate::domain::models::UserRole;
use crate::domain::visibility::UserSummary;
use crate::error::AppResult;
use crate::middleware::RequestScope;
use crate::services::progression::{ProgressionOut, ProgressionService, ReopenRequest};
use crate::state::SharedState;
use crate::web::{visible_progressions, visible_teachers, ProgressionQuery};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub teacher_id: Option<Uuid>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/progressions", get(progressions))
        .route("/progressions/:id/validate", post(validate))
        .route("/progressions/:id/reopen", post(reopen))
        .route("/teachers", get(teachers))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn progressions(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<ProgressionQuery>,
) -> AppResult<Json<Vec<ProgressionOut>>> {
    scope.require_role(&[UserRole::Inspector])?;
    Ok(Json(visible_progressions(&state, &scope, &query).await?))
}

async fn validate(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProgressionOut>> {
    let service = ProgressionService::new(state.pool.clone());
    Ok(Json(service.validate(&scope, id, state.config.clock.today()).await?))
}

async fn reopen(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReopenRequest>>,
) -> AppResult<Json<ProgressionOut>> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let service = ProgressionService::new(state.pool.clone());
    Ok(Json(
        service
            .reopen(&scope, id, &request, state.config.clock.today())
            .await?,
    ))
}

async fn teachers(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<UserSummary>>> {
    scope.require_role(&[UserRole::Inspector])?;
    Ok(Json(visible_teachers(&state, &scope).await?))
}

async fn stats(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<ProgressionStats>> {
    scope.require_role(&[UserRole::Inspector])?;
    let service = ProgressionService::new(state.pool.clone());
    Ok(Json(
        service
            .stats(&scope, query.teacher_id, state.config.clock.today())
            .await?,
    ))
}

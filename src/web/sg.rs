use crate::db::{self, curriculum};
use crate::domain::models::{SchoolClass, UserRole};
use crate::domain::visibility::UserSummary;
use crate::error::AppResult;
use crate::middleware::RequestScope;
use crate::services::progression::ProgressionOut;
use crate::state::SharedState;
use crate::web::{visible_progressions, visible_teachers, ProgressionQuery};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/teachers", get(teachers))
        .route("/classes", get(classes))
        .route("/progressions", get(progressions))
        .with_state(state)
}

async fn teachers(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<UserSummary>>> {
    scope.require_role(&[UserRole::Sg])?;
    Ok(Json(visible_teachers(&state, &scope).await?))
}

/// Classes of the year whose level falls in one of the SG's cycles.
async fn classes(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<SchoolClass>>> {
    scope.require_role(&[UserRole::Sg])?;
    let Some(year) = scope.year.as_ref().map(|y| y.id) else {
        return Ok(Json(Vec::new()));
    };
    let classes = curriculum::list_classes(&state.pool, Some(year)).await?;
    let facts = db::teaching_facts(&state.pool, Some(year)).await?;
    Ok(Json(scope.access.filter_classes(classes, &facts)))
}

async fn progressions(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<ProgressionQuery>,
) -> AppResult<Json<Vec<ProgressionOut>>> {
    scope.require_role(&[UserRole::Sg])?;
    Ok(Json(visible_progressions(&state, &scope, &query).await?))
}

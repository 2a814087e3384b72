use crate::db::audit;
use crate::domain::models::Notification;
use crate::error::{AppError, AppResult};
use crate::middleware::RequestScope;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize, Default)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/:id/read", post(mark_read))
        .with_state(state)
}

async fn list(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    Ok(Json(
        audit::list_notifications(&state.pool, scope.user.id, query.unread).await?,
    ))
}

async fn mark_read(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    // other users' notifications look missing
    if audit::mark_read(&state.pool, id, scope.user.id).await? == 0 {
        return Err(AppError::NotFound("notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

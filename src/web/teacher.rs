use crate::analytics::stats::ProgressionStats;
use crate::db::{self, curriculum, TeachingPair};
use crate::domain::models::{Chapter, ChapterElement, Lesson, UserRole};
use crate::error::{AppError, AppResult};
use crate::middleware::RequestScope;
use crate::services::progression::{annotate, CompleteLesson, PlanLesson, PlanResult, ProgressionOut, ProgressionService};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonQuery {
    pub class_id: Uuid,
    pub subject_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonWithProgress {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub progression: Option<ProgressionOut>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/assignments", get(assignments))
        .route("/lessons", get(lessons))
        .route("/lessons/complete", post(complete))
        .route("/lessons/plan", post(plan))
        .route("/chapters/:id/elements", get(chapter_elements))
        .route("/progressions", get(progressions))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn assignments(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<TeachingPair>>> {
    scope.require_role(&[UserRole::Teacher])?;
    let Some(year) = scope.year.as_ref() else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(db::teaching_pairs(&state.pool, scope.user.id, year.id).await?))
}

/// Lessons of one assigned (class, subject) pair with this teacher's
/// progression on each.
async fn lessons(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<LessonQuery>,
) -> AppResult<Json<Vec<LessonWithProgress>>> {
    scope.require_role(&[UserRole::Teacher])?;
    if !scope.access.can_act_on(query.class_id, query.subject_id) {
        tracing::warn!(
            "Teacher {} asked lessons for unassigned class {} / subject {}",
            scope.user.id,
            query.class_id,
            query.subject_id
        );
        return Err(AppError::Forbidden);
    }
    let year = scope.year_id()?;
    let class = curriculum::find_class(&state.pool, query.class_id)
        .await?
        .ok_or(AppError::NotFound("class"))?;

    let lessons = curriculum::list_lessons(&state.pool, Some(year), Some(query.subject_id), Some(class.level_id)).await?;

    let service = ProgressionService::new(state.pool.clone());
    let today = state.config.clock.today();
    let mut by_lesson: HashMap<Uuid, ProgressionOut> = service
        .list_visible(&scope, None)
        .await?
        .into_iter()
        .filter(|p| p.class_id == class.id)
        .map(|p| (p.lesson_id, annotate(p, today)))
        .collect();

    Ok(Json(
        lessons
            .into_iter()
            .map(|lesson| LessonWithProgress {
                progression: by_lesson.remove(&lesson.id),
                lesson,
            })
            .collect(),
    ))
}

async fn complete(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<CompleteLesson>,
) -> AppResult<Json<ProgressionOut>> {
    let service = ProgressionService::new(state.pool.clone());
    let out = service
        .mark_completed(&scope, &payload, state.config.clock.today())
        .await?;
    Ok(Json(out))
}

async fn plan(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<PlanLesson>,
) -> AppResult<(StatusCode, Json<PlanResult>)> {
    let service = ProgressionService::new(state.pool.clone());
    let result = service.plan(&scope, &payload, state.config.clock.today()).await?;
    let status = if result.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(result)))
}

async fn chapter_elements(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(chapter_id): Path<Uuid>,
) -> AppResult<Json<Vec<ChapterElement>>> {
    scope.require_role(&[UserRole::Teacher])?;
    let year = scope.year_id()?;
    let chapter = curriculum::find_chapter(&state.pool, chapter_id)
        .await?
        .ok_or(AppError::NotFound("chapter"))?;
    let pairs = db::teaching_pairs(&state.pool, scope.user.id, year).await?;
    if !covers_chapter(&pairs, &chapter) {
        tracing::warn!("Teacher {} asked elements of unassigned chapter {}", scope.user.id, chapter_id);
        return Err(AppError::Forbidden);
    }
    Ok(Json(curriculum::list_elements(&state.pool, chapter_id).await?))
}

/// A chapter is open to a teacher who teaches its subject at its level.
fn covers_chapter(pairs: &[TeachingPair], chapter: &Chapter) -> bool {
    pairs
        .iter()
        .any(|p| p.subject_id == chapter.subject_id && p.level_id == chapter.level_id)
}

async fn progressions(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<ProgressionOut>>> {
    scope.require_role(&[UserRole::Teacher])?;
    let service = ProgressionService::new(state.pool.clone());
    let today = state.config.clock.today();
    let rows = service.list_visible(&scope, None).await?;
    Ok(Json(rows.into_iter().map(|p| annotate(p, today)).collect()))
}

async fn stats(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<ProgressionStats>> {
    scope.require_role(&[UserRole::Teacher])?;
    let service = ProgressionService::new(state.pool.clone());
    let own = Some(scope.user.id);
    Ok(Json(service.stats(&scope, own, state.config.clock.today()).await?))
}

use crate::analytics::finance::{finance_summary, FinanceSummary};
use crate::analytics::stats::{by_class, by_subject, compute_stats, teacher_reports, CompletionBreakdown, ProgressionStats, TeacherReport};
use crate::db;
use crate::domain::models::{AcademicYear, UserRole};
use crate::error::AppResult;
use crate::middleware::RequestScope;
use crate::services::progression::{ProgressionOut, ProgressionService};
use crate::state::SharedState;
use crate::web::{visible_progressions, ProgressionQuery};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FounderDashboard {
    pub academic_year: Option<AcademicYear>,
    pub stats: ProgressionStats,
    pub teacher_count: usize,
    pub by_subject: Vec<CompletionBreakdown>,
    pub by_class: Vec<CompletionBreakdown>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/stats", get(dashboard))
        .route("/progressions", get(progressions))
        .route("/teachers", get(teachers))
        .route("/finance", get(finance))
        .with_state(state)
}

const FOUNDER_ROLES: &[UserRole] = &[UserRole::Founder, UserRole::Admin];

async fn dashboard(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<FounderDashboard>> {
    scope.require_role(FOUNDER_ROLES)?;
    let rows = ProgressionService::new(state.pool.clone())
        .list_visible(&scope, None)
        .await?;
    let today = state.config.clock.today();
    let teacher_count = rows
        .iter()
        .map(|r| r.teacher_id)
        .collect::<std::collections::HashSet<_>>()
        .len();

    Ok(Json(FounderDashboard {
        stats: compute_stats(&rows, None, today),
        teacher_count,
        by_subject: by_subject(&rows),
        by_class: by_class(&rows),
        academic_year: scope.year,
    }))
}

async fn progressions(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<ProgressionQuery>,
) -> AppResult<Json<Vec<ProgressionOut>>> {
    scope.require_role(FOUNDER_ROLES)?;
    Ok(Json(visible_progressions(&state, &scope, &query).await?))
}

async fn teachers(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<TeacherReport>>> {
    scope.require_role(FOUNDER_ROLES)?;
    let rows = ProgressionService::new(state.pool.clone())
        .list_visible(&scope, None)
        .await?;
    Ok(Json(teacher_reports(&rows, state.config.clock.today())))
}

async fn finance(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<FinanceSummary>> {
    scope.require_role(FOUNDER_ROLES)?;
    let rows = ProgressionService::new(state.pool.clone())
        .list_visible(&scope, None)
        .await?;
    let rates = db::hourly_rates(&state.pool).await?;
    Ok(Json(finance_summary(&rows, &rates)))
}

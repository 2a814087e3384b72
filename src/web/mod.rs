pub mod admin;
pub mod auth;
pub mod founder;
pub mod inspector;
pub mod notifications;
pub mod reports;
pub mod session;
pub mod sg;
pub mod teacher;

use crate::db;
use crate::domain::models::UserRole;
use crate::domain::progression::EffectiveStatus;
use crate::domain::visibility::UserSummary;
use crate::error::AppResult;
use crate::middleware::RequestScope;
use crate::services::progression::{annotate, ProgressionOut, ProgressionService};
use crate::state::SharedState;
use axum::{routing::get, Router};
use serde::Deserialize;
use uuid::Uuid;

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    let api = Router::new()
        .nest("/auth", auth::router(state.clone()))
        .nest("/teacher", teacher::router(state.clone()))
        .nest("/inspector", inspector::router(state.clone()))
        .nest("/founder", founder::router(state.clone()))
        .nest("/sg", sg::router(state.clone()))
        .nest("/sg-reports", reports::sg_router(state.clone()))
        .nest("/anomaly-reports", reports::anomaly_router(state.clone()))
        .nest("/notifications", notifications::router(state.clone()))
        .nest("/admin", admin::router(state));

    Router::new().route("/health", get(health)).nest("/api", api)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionQuery {
    pub teacher_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub status: Option<EffectiveStatus>,
}

impl ProgressionQuery {
    fn keeps(&self, p: &ProgressionOut) -> bool {
        self.class_id.map_or(true, |c| p.view.class_id == c)
            && self.subject_id.map_or(true, |s| p.view.subject_id == s)
            && self.status.map_or(true, |s| p.effective_status == s)
    }
}

/// Scope-filtered progressions with derived fields, narrowed by query.
pub(crate) async fn visible_progressions(
    state: &SharedState,
    scope: &RequestScope,
    query: &ProgressionQuery,
) -> AppResult<Vec<ProgressionOut>> {
    let service = ProgressionService::new(state.pool.clone());
    let today = state.config.clock.today();
    let rows = service.list_visible(scope, query.teacher_id).await?;
    Ok(rows
        .into_iter()
        .map(|p| annotate(p, today))
        .filter(|p| query.keeps(p))
        .collect())
}

/// Teachers the scope may see for its year.
pub(crate) async fn visible_teachers(state: &SharedState, scope: &RequestScope) -> AppResult<Vec<UserSummary>> {
    let facts = db::teaching_facts(&state.pool, scope.year.as_ref().map(|y| y.id)).await?;
    let teachers = db::list_users(&state.pool, Some(UserRole::Teacher)).await?;
    Ok(scope.access.filter_users(teachers, &facts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::stats::fixtures::row;
    use crate::domain::models::{ProgressionStatus, SessionType};
    use chrono::NaiveDate;

    #[test]
    fn query_narrows_on_derived_status() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let past = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let teacher = Uuid::new_v4();
        let late = annotate(row(teacher, ProgressionStatus::Planned, past, 55, None, SessionType::Lesson), today);
        let done = annotate(row(teacher, ProgressionStatus::Completed, past, 55, Some(55), SessionType::Lesson), today);

        let query = ProgressionQuery {
            status: Some(EffectiveStatus::Delayed),
            ..Default::default()
        };
        assert!(query.keeps(&late));
        assert!(!query.keeps(&done));

        let query: ProgressionQuery = serde_json::from_value(serde_json::json!({ "status": "completed" })).unwrap();
        assert!(query.keeps(&done));
        assert!(ProgressionQuery::default().keeps(&late));
    }
}

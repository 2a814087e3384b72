//! Anomaly reports and SG session reports. Both are observational records
//! outside the progression lifecycle; only their reviewer role mutates them.

use crate::db::{self, audit, curriculum, reports};
use crate::domain::models::{AnomalyReport, AnomalySeverity, AnomalyStatus, SgReport, UserRole};
use crate::domain::review::anomaly_transition_allowed;
use crate::domain::validation::Validator;
use crate::error::{AppError, AppResult};
use crate::middleware::RequestScope;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const MAX_TEXT_LEN: usize = 4000;
const MAX_HEADCOUNT: i64 = 1000;

const ANOMALY_REPORTERS: &[UserRole] = &[UserRole::Inspector, UserRole::Sg, UserRole::Teacher];
const SG_REVIEWERS: &[UserRole] = &[UserRole::Founder, UserRole::Admin];

pub fn anomaly_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_anomalies).post(create_anomaly))
        .route("/:id/status", patch(review_anomaly))
        .with_state(state)
}

pub fn sg_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_sg_reports).post(create_sg_report))
        .route("/:id/validate", patch(validate_sg_report))
        .with_state(state)
}

/// `None` lists everything; otherwise only reports filed by that user.
fn own_reports_only(role: UserRole, user_id: Uuid) -> Option<Uuid> {
    match role {
        UserRole::Founder | UserRole::Admin => None,
        _ => Some(user_id),
    }
}

// ============================================
// Anomaly reports
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyQuery {
    pub status: Option<AnomalyStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnomalyPayload {
    pub teacher_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub lesson_id: Option<Uuid>,
    pub description: String,
    #[serde(default)]
    pub severity: AnomalySeverity,
}

impl NewAnomalyPayload {
    fn validate(&self) -> AppResult<()> {
        let mut v = Validator::new();
        v.non_empty("description", &self.description)
            .max_len("description", &self.description, MAX_TEXT_LEN)
            .check(
                self.teacher_id.is_some() || self.class_id.is_some() || self.lesson_id.is_some(),
                "teacherId",
                "a teacher, class or lesson must be referenced",
            );
        v.finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPayload {
    pub status: AnomalyStatus,
    pub note: Option<String>,
}

async fn list_anomalies(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<AnomalyQuery>,
) -> AppResult<Json<Vec<AnomalyReport>>> {
    let reporter = own_reports_only(scope.user.role, scope.user.id);
    Ok(Json(reports::list_anomalies(&state.pool, reporter, query.status).await?))
}

async fn create_anomaly(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<NewAnomalyPayload>,
) -> AppResult<(StatusCode, Json<AnomalyReport>)> {
    scope.require_role(ANOMALY_REPORTERS)?;
    payload.validate()?;

    let mut tx = state.pool.begin().await?;
    let report = reports::insert_anomaly(
        &mut *tx,
        &reports::NewAnomaly {
            reporter_id: scope.user.id,
            teacher_id: payload.teacher_id,
            class_id: payload.class_id,
            lesson_id: payload.lesson_id,
            description: payload.description.trim(),
            severity: payload.severity,
        },
    )
    .await?;
    audit::record(
        &mut *tx,
        Some(scope.user.id),
        "anomaly.create",
        "anomaly_report",
        Some(report.id),
        json!({ "severity": report.severity, "teacherId": report.teacher_id }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!("Anomaly report {} filed by {}", report.id, scope.user.id);
    Ok((StatusCode::CREATED, Json(report)))
}

async fn review_anomaly(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewPayload>,
) -> AppResult<Json<AnomalyReport>> {
    scope.require_role(&[UserRole::Admin])?;
    let note = payload.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if let Some(note) = note {
        let mut v = Validator::new();
        v.max_len("note", note, MAX_TEXT_LEN);
        v.finish()?;
    }

    let mut tx = state.pool.begin().await?;
    let current = reports::find_anomaly(&mut *tx, id)
        .await?
        .ok_or(AppError::NotFound("anomaly report"))?;
    if !anomaly_transition_allowed(current.status, payload.status) {
        return Err(AppError::Conflict(format!(
            "cannot move an anomaly report from {:?} to {:?}",
            current.status, payload.status
        )));
    }
    let updated = reports::set_anomaly_status(&mut *tx, id, current.status, payload.status, scope.user.id, note)
        .await?
        .ok_or_else(|| AppError::Conflict("anomaly report was reviewed concurrently".to_string()))?;
    audit::record(
        &mut *tx,
        Some(scope.user.id),
        "anomaly.review",
        "anomaly_report",
        Some(id),
        json!({ "from": current.status, "to": updated.status }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        "Anomaly report {} moved {:?} -> {:?} by {}",
        id,
        current.status,
        updated.status,
        scope.user.id
    );
    Ok(Json(updated))
}

// ============================================
// SG reports
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSgReportPayload {
    pub teacher_id: Uuid,
    pub class_id: Uuid,
    pub session_date: NaiveDate,
    pub observation: String,
    #[serde(default)]
    pub students_present: i32,
    #[serde(default)]
    pub students_absent: i32,
}

impl NewSgReportPayload {
    fn validate(&self) -> AppResult<()> {
        let mut v = Validator::new();
        v.non_empty("observation", &self.observation)
            .max_len("observation", &self.observation, MAX_TEXT_LEN)
            .in_range("studentsPresent", i64::from(self.students_present), 0, MAX_HEADCOUNT)
            .in_range("studentsAbsent", i64::from(self.students_absent), 0, MAX_HEADCOUNT);
        v.finish()
    }
}

#[derive(Deserialize)]
pub struct SgValidationPayload {
    #[serde(default = "default_validated")]
    pub validated: bool,
}

fn default_validated() -> bool {
    true
}

async fn list_sg_reports(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<SgReport>>> {
    scope.require_role(&[UserRole::Sg, UserRole::Founder, UserRole::Admin])?;
    let sg = own_reports_only(scope.user.role, scope.user.id);
    Ok(Json(reports::list_sg_reports(&state.pool, sg).await?))
}

async fn create_sg_report(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<NewSgReportPayload>,
) -> AppResult<(StatusCode, Json<SgReport>)> {
    scope.require_role(&[UserRole::Sg])?;
    payload.validate()?;
    let year = scope.year_id()?;

    let class = curriculum::find_class(&state.pool, payload.class_id)
        .await?
        .ok_or(AppError::NotFound("class"))?;
    if class.academic_year_id != year {
        return Err(AppError::BadRequest("class does not belong to the selected academic year".to_string()));
    }
    if !scope.access.can_observe_cycle(class.cycle) {
        tracing::warn!("SG {} may not observe class {} ({:?})", scope.user.id, class.id, class.cycle);
        return Err(AppError::Forbidden);
    }
    let facts = db::teaching_facts(&state.pool, Some(year)).await?;
    if !facts
        .iter()
        .any(|f| f.teacher_id == payload.teacher_id && f.class_id == class.id)
    {
        return Err(AppError::BadRequest("teacher is not assigned to this class".to_string()));
    }

    let mut tx = state.pool.begin().await?;
    let report = reports::insert_sg_report(
        &mut *tx,
        &reports::NewSgReport {
            sg_id: scope.user.id,
            teacher_id: payload.teacher_id,
            class_id: class.id,
            session_date: payload.session_date,
            observation: payload.observation.trim(),
            students_present: payload.students_present,
            students_absent: payload.students_absent,
        },
    )
    .await?;
    audit::record(
        &mut *tx,
        Some(scope.user.id),
        "sg_report.create",
        "sg_report",
        Some(report.id),
        json!({ "classId": class.id, "teacherId": payload.teacher_id }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!("SG report {} filed by {}", report.id, scope.user.id);
    Ok((StatusCode::CREATED, Json(report)))
}

async fn validate_sg_report(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SgValidationPayload>,
) -> AppResult<Json<SgReport>> {
    scope.require_role(SG_REVIEWERS)?;

    let mut tx = state.pool.begin().await?;
    let report = reports::set_sg_validation(&mut *tx, id, payload.validated, scope.user.id)
        .await?
        .ok_or(AppError::NotFound("sg report"))?;
    audit::record(
        &mut *tx,
        Some(scope.user.id),
        "sg_report.validate",
        "sg_report",
        Some(id),
        json!({ "validated": payload.validated }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!("SG report {} session validated={} by {}", id, payload.validated, scope.user.id);
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewers_list_everything_others_their_own() {
        let me = Uuid::new_v4();
        assert_eq!(own_reports_only(UserRole::Admin, me), None);
        assert_eq!(own_reports_only(UserRole::Founder, me), None);
        assert_eq!(own_reports_only(UserRole::Sg, me), Some(me));
        assert_eq!(own_reports_only(UserRole::Teacher, me), Some(me));
    }

    #[test]
    fn anomaly_needs_a_subject_and_a_description() {
        let payload: NewAnomalyPayload = serde_json::from_value(json!({ "description": "  " })).unwrap();
        assert_eq!(payload.severity, AnomalySeverity::Medium);
        match payload.validate() {
            Err(AppError::Validation(details)) => {
                let paths: Vec<&str> = details.iter().map(|d| d.path.as_str()).collect();
                assert_eq!(paths, vec!["description", "teacherId"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn sg_report_headcounts_are_bounded() {
        let payload: NewSgReportPayload = serde_json::from_value(json!({
            "teacherId": Uuid::new_v4(),
            "classId": Uuid::new_v4(),
            "sessionDate": "2025-02-03",
            "observation": "Calm session",
            "studentsPresent": 28,
            "studentsAbsent": -1
        }))
        .unwrap();
        match payload.validate() {
            Err(AppError::Validation(details)) => assert_eq!(details[0].path, "studentsAbsent"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn validation_toggle_defaults_to_true() {
        let payload: SgValidationPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.validated);
    }
}

use crate::domain::models::{AnomalyReport, AnomalySeverity, AnomalyStatus, SgReport};
use chrono::NaiveDate;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

const ANOMALY_COLUMNS: &str = r#"
    id, reporter_id, teacher_id, class_id, lesson_id, description, severity,
    status, reviewed_by, reviewed_at, resolution_note, created_at
"#;

const SG_COLUMNS: &str = r#"
    id, sg_id, teacher_id, class_id, session_date, observation, students_present,
    students_absent, session_validated, validated_by, validated_at, created_at
"#;

pub struct NewAnomaly<'a> {
    pub reporter_id: Uuid,
    pub teacher_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub lesson_id: Option<Uuid>,
    pub description: &'a str,
    pub severity: AnomalySeverity,
}

pub async fn insert_anomaly<'e>(exec: impl PgExecutor<'e>, report: &NewAnomaly<'_>) -> sqlx::Result<AnomalyReport> {
    sqlx::query_as::<_, AnomalyReport>(&format!(
        r#"
        INSERT INTO anomaly_reports (id, reporter_id, teacher_id, class_id, lesson_id, description, severity)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {ANOMALY_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(report.reporter_id)
    .bind(report.teacher_id)
    .bind(report.class_id)
    .bind(report.lesson_id)
    .bind(report.description)
    .bind(report.severity)
    .fetch_one(exec)
    .await
}

pub async fn list_anomalies(
    pool: &PgPool,
    reporter_id: Option<Uuid>,
    status: Option<AnomalyStatus>,
) -> sqlx::Result<Vec<AnomalyReport>> {
    sqlx::query_as::<_, AnomalyReport>(&format!(
        r#"
        SELECT {ANOMALY_COLUMNS}
        FROM anomaly_reports
        WHERE ($1::uuid IS NULL OR reporter_id = $1)
          AND ($2::anomaly_status IS NULL OR status = $2)
        ORDER BY created_at DESC
        "#
    ))
    .bind(reporter_id)
    .bind(status)
    .fetch_all(pool)
    .await
}

pub async fn find_anomaly<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<Option<AnomalyReport>> {
    sqlx::query_as::<_, AnomalyReport>(&format!(
        "SELECT {ANOMALY_COLUMNS} FROM anomaly_reports WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await
}

/// Compare-and-set on the status so concurrent reviews cannot skip a check.
pub async fn set_anomaly_status<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    expected: AnomalyStatus,
    next: AnomalyStatus,
    reviewer_id: Uuid,
    note: Option<&str>,
) -> sqlx::Result<Option<AnomalyReport>> {
    sqlx::query_as::<_, AnomalyReport>(&format!(
        r#"
        UPDATE anomaly_reports
        SET status = $3, reviewed_by = $4, reviewed_at = now(),
            resolution_note = COALESCE($5, resolution_note)
        WHERE id = $1 AND status = $2
        RETURNING {ANOMALY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(expected)
    .bind(next)
    .bind(reviewer_id)
    .bind(note)
    .fetch_optional(exec)
    .await
}

pub struct NewSgReport<'a> {
    pub sg_id: Uuid,
    pub teacher_id: Uuid,
    pub class_id: Uuid,
    pub session_date: NaiveDate,
    pub observation: &'a str,
    pub students_present: i32,
    pub students_absent: i32,
}

pub async fn insert_sg_report<'e>(exec: impl PgExecutor<'e>, report: &NewSgReport<'_>) -> sqlx::Result<SgReport> {
    sqlx::query_as::<_, SgReport>(&format!(
        r#"
        INSERT INTO sg_reports (id, sg_id, teacher_id, class_id, session_date, observation,
                                students_present, students_absent)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {SG_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(report.sg_id)
    .bind(report.teacher_id)
    .bind(report.class_id)
    .bind(report.session_date)
    .bind(report.observation)
    .bind(report.students_present)
    .bind(report.students_absent)
    .fetch_one(exec)
    .await
}

pub async fn list_sg_reports(pool: &PgPool, sg_id: Option<Uuid>) -> sqlx::Result<Vec<SgReport>> {
    sqlx::query_as::<_, SgReport>(&format!(
        r#"
        SELECT {SG_COLUMNS}
        FROM sg_reports
        WHERE ($1::uuid IS NULL OR sg_id = $1)
        ORDER BY session_date DESC, created_at DESC
        "#
    ))
    .bind(sg_id)
    .fetch_all(pool)
    .await
}

pub async fn set_sg_validation<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    validated: bool,
    reviewer_id: Uuid,
) -> sqlx::Result<Option<SgReport>> {
    sqlx::query_as::<_, SgReport>(&format!(
        r#"
        UPDATE sg_reports
        SET session_validated = $2,
            validated_by = CASE WHEN $2 THEN $3 ELSE NULL END,
            validated_at = CASE WHEN $2 THEN now() ELSE NULL END
        WHERE id = $1
        RETURNING {SG_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(validated)
    .bind(reviewer_id)
    .fetch_optional(exec)
    .await
}

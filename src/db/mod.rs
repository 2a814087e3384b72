pub mod audit;
pub mod curriculum;
pub mod progressions;
pub mod reports;
pub mod seed;

use crate::domain::models::{
    AcademicYear, AssignmentSet, Cycle, InspectorAssignment, SgAssignment, TeacherAssignment,
    UserRole,
};
use crate::domain::visibility::{TeachingFact, UserSummary};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DbUser {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub hash: String,
    pub role: UserRole,
    pub display_name: String,
    pub hourly_rate_cents: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

const USER_COLUMNS: &str = r#"
    id, username, hash, role, display_name, hourly_rate_cents,
    is_active, created_at, updated_at
"#;

pub async fn find_user_by_username(pool: &PgPool, username: &str) -> sqlx::Result<Option<DbUser>> {
    sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE lower(username) = lower($1)"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn find_user_by_id<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<Option<DbUser>> {
    sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn list_users(pool: &PgPool, role: Option<UserRole>) -> sqlx::Result<Vec<UserSummary>> {
    sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT id, username, display_name, role, is_active
        FROM users
        WHERE ($1::user_role IS NULL OR role = $1)
        ORDER BY display_name
        "#,
    )
    .bind(role)
    .fetch_all(pool)
    .await
}

pub async fn count_admins(pool: &PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'ADMIN' AND is_active")
        .fetch_one(pool)
        .await
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub hash: &'a str,
    pub role: UserRole,
    pub display_name: &'a str,
    pub hourly_rate_cents: Option<i64>,
}

pub async fn insert_user<'e>(exec: impl PgExecutor<'e>, user: &NewUser<'_>) -> sqlx::Result<DbUser> {
    sqlx::query_as::<_, DbUser>(&format!(
        r#"
        INSERT INTO users (id, username, hash, role, display_name, hourly_rate_cents)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user.username)
    .bind(user.hash)
    .bind(user.role)
    .bind(user.display_name)
    .bind(user.hourly_rate_cents)
    .fetch_one(exec)
    .await
}

pub struct UserChanges<'a> {
    pub display_name: Option<&'a str>,
    pub hourly_rate_cents: Option<Option<i64>>,
    pub hash: Option<&'a str>,
    pub is_active: Option<bool>,
}

pub async fn update_user<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    changes: &UserChanges<'_>,
) -> sqlx::Result<Option<DbUser>> {
    sqlx::query_as::<_, DbUser>(&format!(
        r#"
        UPDATE users SET
            display_name = COALESCE($2, display_name),
            hourly_rate_cents = CASE WHEN $3 THEN $4 ELSE hourly_rate_cents END,
            hash = COALESCE($5, hash),
            is_active = COALESCE($6, is_active),
            updated_at = now()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(changes.display_name)
    .bind(changes.hourly_rate_cents.is_some())
    .bind(changes.hourly_rate_cents.flatten())
    .bind(changes.hash)
    .bind(changes.is_active)
    .fetch_optional(exec)
    .await
}

pub async fn delete_user<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<u64> {
    let res = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(res.rows_affected())
}

pub async fn hourly_rates(pool: &PgPool) -> sqlx::Result<HashMap<Uuid, Option<i64>>> {
    let rows: Vec<(Uuid, Option<i64>)> =
        sqlx::query_as("SELECT id, hourly_rate_cents FROM users WHERE role = 'TEACHER'")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

// ============================================
// Sessions
// ============================================

pub async fn insert_session(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find_session(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<DbSession>> {
    sqlx::query_as::<_, DbSession>(
        "SELECT id, user_id, expires_at, revoked_at FROM sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn revoke_session(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn revoke_user_sessions<'e>(exec: impl PgExecutor<'e>, user_id: Uuid) -> sqlx::Result<u64> {
    let res = sqlx::query(
        "UPDATE sessions SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(exec)
    .await?;
    Ok(res.rows_affected())
}

pub async fn purge_sessions(pool: &PgPool) -> sqlx::Result<u64> {
    let res = sqlx::query("DELETE FROM sessions WHERE expires_at < now() OR revoked_at IS NOT NULL")
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ============================================
// Academic years
// ============================================

const YEAR_COLUMNS: &str = "id, label, starts_on, ends_on, is_active, created_at";

pub async fn active_year(pool: &PgPool) -> sqlx::Result<Option<AcademicYear>> {
    sqlx::query_as::<_, AcademicYear>(&format!(
        "SELECT {YEAR_COLUMNS} FROM academic_years WHERE is_active"
    ))
    .fetch_optional(pool)
    .await
}

pub async fn find_year(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<AcademicYear>> {
    sqlx::query_as::<_, AcademicYear>(&format!(
        "SELECT {YEAR_COLUMNS} FROM academic_years WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_years(pool: &PgPool) -> sqlx::Result<Vec<AcademicYear>> {
    sqlx::query_as::<_, AcademicYear>(&format!(
        "SELECT {YEAR_COLUMNS} FROM academic_years ORDER BY starts_on DESC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn insert_year<'e>(
    exec: impl PgExecutor<'e>,
    label: &str,
    starts_on: NaiveDate,
    ends_on: NaiveDate,
) -> sqlx::Result<AcademicYear> {
    sqlx::query_as::<_, AcademicYear>(&format!(
        r#"
        INSERT INTO academic_years (id, label, starts_on, ends_on)
        VALUES ($1, $2, $3, $4)
        RETURNING {YEAR_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(label)
    .bind(starts_on)
    .bind(ends_on)
    .fetch_one(exec)
    .await
}

/// Exactly one year is active afterwards. Runs on the caller's transaction.
pub async fn activate_year(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<AcademicYear>> {
    sqlx::query("UPDATE academic_years SET is_active = FALSE WHERE is_active AND id <> $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query_as::<_, AcademicYear>(&format!(
        "UPDATE academic_years SET is_active = TRUE WHERE id = $1 RETURNING {YEAR_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
}

// ============================================
// Assignments
// ============================================

pub async fn load_assignments(pool: &PgPool, user_id: Uuid) -> sqlx::Result<AssignmentSet> {
    let teaching = sqlx::query_as::<_, TeacherAssignment>(
        r#"
        SELECT id, teacher_id, class_id, subject_id, academic_year_id
        FROM teacher_assignments WHERE teacher_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let inspecting = sqlx::query_as::<_, InspectorAssignment>(
        r#"
        SELECT id, inspector_id, subject_id, academic_year_id
        FROM inspector_assignments WHERE inspector_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let surveilling = sqlx::query_as::<_, SgAssignment>(
        "SELECT id, sg_id, cycle, academic_year_id FROM sg_assignments WHERE sg_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(AssignmentSet {
        teaching,
        inspecting,
        surveilling,
    })
}

/// A teacher's pairs for the year with display names, for the lesson picker.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeachingPair {
    pub assignment_id: Uuid,
    pub class_id: Uuid,
    pub class_name: String,
    pub level_id: Uuid,
    pub cycle: Cycle,
    pub subject_id: Uuid,
    pub subject_name: String,
}

pub async fn teaching_pairs(pool: &PgPool, teacher_id: Uuid, year: Uuid) -> sqlx::Result<Vec<TeachingPair>> {
    sqlx::query_as::<_, TeachingPair>(
        r#"
        SELECT ta.id AS assignment_id, c.id AS class_id, c.name AS class_name,
               lv.id AS level_id, lv.cycle, s.id AS subject_id, s.name AS subject_name
        FROM teacher_assignments ta
        JOIN classes c ON c.id = ta.class_id
        JOIN levels lv ON lv.id = c.level_id
        JOIN subjects s ON s.id = ta.subject_id
        WHERE ta.teacher_id = $1 AND ta.academic_year_id = $2
        ORDER BY lv.sort_order, c.name, s.name
        "#,
    )
    .bind(teacher_id)
    .bind(year)
    .fetch_all(pool)
    .await
}

pub async fn teaching_facts(pool: &PgPool, year: Option<Uuid>) -> sqlx::Result<Vec<TeachingFact>> {
    let Some(year) = year else {
        return Ok(Vec::new());
    };
    sqlx::query_as::<_, TeachingFact>(
        r#"
        SELECT ta.teacher_id, ta.class_id, ta.subject_id, lv.cycle
        FROM teacher_assignments ta
        JOIN classes c ON c.id = ta.class_id
        JOIN levels lv ON lv.id = c.level_id
        WHERE ta.academic_year_id = $1
        "#,
    )
    .bind(year)
    .fetch_all(pool)
    .await
}

pub async fn insert_teacher_assignment<'e>(
    exec: impl PgExecutor<'e>,
    teacher_id: Uuid,
    class_id: Uuid,
    subject_id: Uuid,
    year: Uuid,
) -> sqlx::Result<TeacherAssignment> {
    sqlx::query_as::<_, TeacherAssignment>(
        r#"
        INSERT INTO teacher_assignments (id, teacher_id, class_id, subject_id, academic_year_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, teacher_id, class_id, subject_id, academic_year_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(teacher_id)
    .bind(class_id)
    .bind(subject_id)
    .bind(year)
    .fetch_one(exec)
    .await
}

pub async fn insert_inspector_assignment<'e>(
    exec: impl PgExecutor<'e>,
    inspector_id: Uuid,
    subject_id: Uuid,
    year: Uuid,
) -> sqlx::Result<InspectorAssignment> {
    sqlx::query_as::<_, InspectorAssignment>(
        r#"
        INSERT INTO inspector_assignments (id, inspector_id, subject_id, academic_year_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, inspector_id, subject_id, academic_year_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(inspector_id)
    .bind(subject_id)
    .bind(year)
    .fetch_one(exec)
    .await
}

pub async fn insert_sg_assignment<'e>(
    exec: impl PgExecutor<'e>,
    sg_id: Uuid,
    cycle: Cycle,
    year: Uuid,
) -> sqlx::Result<SgAssignment> {
    sqlx::query_as::<_, SgAssignment>(
        r#"
        INSERT INTO sg_assignments (id, sg_id, cycle, academic_year_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, sg_id, cycle, academic_year_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(sg_id)
    .bind(cycle)
    .bind(year)
    .fetch_one(exec)
    .await
}

/// Removes an assignment of any kind by id.
pub async fn delete_assignment<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<u64> {
    let res = sqlx::query(
        r#"
        WITH t AS (DELETE FROM teacher_assignments WHERE id = $1 RETURNING 1),
             i AS (DELETE FROM inspector_assignments WHERE id = $1 RETURNING 1),
             s AS (DELETE FROM sg_assignments WHERE id = $1 RETURNING 1)
        SELECT (SELECT COUNT(*) FROM t) + (SELECT COUNT(*) FROM i) + (SELECT COUNT(*) FROM s)
        "#,
    )
    .bind(id)
    .fetch_one(exec)
    .await?;
    let removed: i64 = res.try_get(0)?;
    Ok(removed as u64)
}

pub async fn inspectors_for_subject<'e>(
    exec: impl PgExecutor<'e>,
    subject_id: Uuid,
    year: Uuid,
) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar(
        r#"
        SELECT DISTINCT ia.inspector_id
        FROM inspector_assignments ia
        JOIN users u ON u.id = ia.inspector_id
        WHERE ia.subject_id = $1 AND ia.academic_year_id = $2 AND u.is_active
        "#,
    )
    .bind(subject_id)
    .bind(year)
    .fetch_all(exec)
    .await
}

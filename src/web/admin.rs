//! Reference data and account administration. Every write commits together
//! with its audit row.

use crate::crypto::{self, MIN_PASSWORD_LEN};
use crate::db::{self, audit, curriculum, curriculum::ReferenceTable, DbUser, NewUser, UserChanges};
use crate::domain::models::{
    AcademicYear, AuditLog, Chapter, ChapterElement, Cycle, Lesson, Level, SchoolClass, Subject, UserRole,
};
use crate::domain::progression::MAX_SESSION_MINUTES;
use crate::domain::validation::Validator;
use crate::domain::visibility::UserSummary;
use crate::error::{AppError, AppResult};
use crate::middleware::RequestScope;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 120;
const MAX_AUDIT_PAGE: i64 = 500;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/years", get(list_years).post(create_year))
        .route("/years/:id/activate", post(activate_year))
        .route("/years/:id", delete(delete_year))
        .route("/subjects", get(list_subjects).post(create_subject))
        .route("/subjects/:id", put(update_subject).delete(delete_subject))
        .route("/levels", get(list_levels).post(create_level))
        .route("/levels/:id", put(update_level).delete(delete_level))
        .route("/classes", get(list_classes).post(create_class))
        .route("/classes/:id", put(update_class).delete(delete_class))
        .route("/chapters", get(list_chapters).post(create_chapter))
        .route("/chapters/:id", put(update_chapter).delete(delete_chapter))
        .route("/chapters/:id/elements", get(list_elements).post(create_element))
        .route("/elements/:id", delete(delete_element))
        .route("/lessons", get(list_lessons).post(create_lesson))
        .route("/lessons/:id", put(update_lesson).delete(delete_lesson))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", put(update_user).delete(delete_user))
        .route("/assignments", post(create_assignment))
        .route("/assignments/:id", delete(delete_assignment))
        .route("/audit-logs", get(audit_logs))
        .with_state(state)
}

async fn log_write(
    conn: &mut PgConnection,
    scope: &RequestScope,
    action: &str,
    entity: &str,
    id: Uuid,
    details: Value,
) -> AppResult<()> {
    audit::record(conn, Some(scope.user.id), action, entity, Some(id), details).await?;
    tracing::info!("Admin {} {} {} {}", scope.user.id, action, entity, id);
    Ok(())
}

fn require_admin(scope: &RequestScope) -> AppResult<()> {
    scope.require_role(&[UserRole::Admin])
}

fn check_name(path: &str, value: &str) -> AppResult<()> {
    let mut v = Validator::new();
    v.non_empty(path, value).max_len(path, value, MAX_NAME_LEN);
    v.finish()
}

async fn delete_row(
    state: &SharedState,
    scope: &RequestScope,
    table: ReferenceTable,
    id: Uuid,
) -> AppResult<StatusCode> {
    let mut tx = state.pool.begin().await?;
    if curriculum::delete_reference(&mut tx, table, id).await? == 0 {
        return Err(AppError::NotFound(table.entity()));
    }
    log_write(&mut tx, scope, "delete", table.entity(), id, json!({})).await?;
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Academic years
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearPayload {
    pub label: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

async fn list_years(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<AcademicYear>>> {
    require_admin(&scope)?;
    Ok(Json(db::list_years(&state.pool).await?))
}

async fn create_year(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<YearPayload>,
) -> AppResult<(StatusCode, Json<AcademicYear>)> {
    require_admin(&scope)?;
    let mut v = Validator::new();
    v.non_empty("label", &payload.label)
        .max_len("label", &payload.label, MAX_NAME_LEN)
        .check(payload.starts_on < payload.ends_on, "endsOn", "must be after startsOn");
    v.finish()?;

    let mut tx = state.pool.begin().await?;
    let year = db::insert_year(&mut *tx, payload.label.trim(), payload.starts_on, payload.ends_on).await?;
    log_write(&mut tx, &scope, "create", "academic year", year.id, json!({ "label": year.label })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(year)))
}

async fn activate_year(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AcademicYear>> {
    require_admin(&scope)?;
    let mut tx = state.pool.begin().await?;
    let year = db::activate_year(&mut tx, id)
        .await?
        .ok_or(AppError::NotFound("academic year"))?;
    log_write(&mut tx, &scope, "activate", "academic year", id, json!({ "label": year.label })).await?;
    tx.commit().await?;
    Ok(Json(year))
}

async fn delete_year(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    delete_row(&state, &scope, ReferenceTable::AcademicYears, id).await
}

// ============================================
// Subjects
// ============================================

#[derive(Deserialize)]
pub struct SubjectPayload {
    pub name: String,
}

async fn list_subjects(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<Subject>>> {
    require_admin(&scope)?;
    Ok(Json(curriculum::list_subjects(&state.pool).await?))
}

async fn create_subject(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<SubjectPayload>,
) -> AppResult<(StatusCode, Json<Subject>)> {
    require_admin(&scope)?;
    check_name("name", &payload.name)?;
    let mut tx = state.pool.begin().await?;
    let subject = curriculum::insert_subject(&mut tx, payload.name.trim()).await?;
    log_write(&mut tx, &scope, "create", "subject", subject.id, json!({ "name": subject.name })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

async fn update_subject(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubjectPayload>,
) -> AppResult<Json<Subject>> {
    require_admin(&scope)?;
    check_name("name", &payload.name)?;
    let mut tx = state.pool.begin().await?;
    let subject = curriculum::update_subject(&mut tx, id, payload.name.trim())
        .await?
        .ok_or(AppError::NotFound("subject"))?;
    log_write(&mut tx, &scope, "update", "subject", id, json!({ "name": subject.name })).await?;
    tx.commit().await?;
    Ok(Json(subject))
}

async fn delete_subject(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    delete_row(&state, &scope, ReferenceTable::Subjects, id).await
}

// ============================================
// Levels
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPayload {
    pub name: String,
    pub cycle: Cycle,
    #[serde(default)]
    pub sort_order: i32,
}

/// Message for a level that cannot be deleted, or `None` when it is free.
fn level_in_use(chapters: i64, classes: i64) -> Option<String> {
    match (chapters, classes) {
        (0, 0) => None,
        (ch, 0) => Some(format!("level is still referenced by {ch} chapter(s)")),
        (0, cl) => Some(format!("level is still referenced by {cl} class(es)")),
        (ch, cl) => Some(format!("level is still referenced by {ch} chapter(s) and {cl} class(es)")),
    }
}

async fn list_levels(scope: RequestScope, State(state): State<SharedState>) -> AppResult<Json<Vec<Level>>> {
    require_admin(&scope)?;
    Ok(Json(curriculum::list_levels(&state.pool).await?))
}

async fn create_level(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<LevelPayload>,
) -> AppResult<(StatusCode, Json<Level>)> {
    require_admin(&scope)?;
    check_name("name", &payload.name)?;
    let mut tx = state.pool.begin().await?;
    let level = curriculum::insert_level(&mut tx, payload.name.trim(), payload.cycle, payload.sort_order).await?;
    log_write(&mut tx, &scope, "create", "level", level.id, json!({ "name": level.name, "cycle": level.cycle })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(level)))
}

async fn update_level(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LevelPayload>,
) -> AppResult<Json<Level>> {
    require_admin(&scope)?;
    check_name("name", &payload.name)?;
    let mut tx = state.pool.begin().await?;
    let level = curriculum::update_level(&mut tx, id, payload.name.trim(), payload.cycle, payload.sort_order)
        .await?
        .ok_or(AppError::NotFound("level"))?;
    log_write(&mut tx, &scope, "update", "level", id, json!({ "name": level.name, "cycle": level.cycle })).await?;
    tx.commit().await?;
    Ok(Json(level))
}

async fn delete_level(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    let (chapters, classes) = curriculum::level_references(&state.pool, id).await?;
    if let Some(message) = level_in_use(chapters, classes) {
        tracing::warn!("Refusing to delete level {}: {}", id, message);
        return Err(AppError::BadRequest(message));
    }
    // a racing insert still surfaces as the translated FK error
    delete_row(&state, &scope, ReferenceTable::Levels, id).await
}

// ============================================
// Classes
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassQuery {
    pub academic_year_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPayload {
    pub name: String,
    pub level_id: Uuid,
    pub academic_year_id: Option<Uuid>,
}

async fn list_classes(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<ClassQuery>,
) -> AppResult<Json<Vec<SchoolClass>>> {
    require_admin(&scope)?;
    Ok(Json(curriculum::list_classes(&state.pool, query.academic_year_id).await?))
}

async fn create_class(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<ClassPayload>,
) -> AppResult<(StatusCode, Json<SchoolClass>)> {
    require_admin(&scope)?;
    check_name("name", &payload.name)?;
    let year = match payload.academic_year_id {
        Some(id) => id,
        None => scope.year_id()?,
    };
    let mut tx = state.pool.begin().await?;
    let class = curriculum::insert_class(&mut tx, payload.name.trim(), payload.level_id, year).await?;
    log_write(&mut tx, &scope, "create", "class", class.id, json!({ "name": class.name, "academicYearId": year })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(class)))
}

/// Message for a class whose level cannot change, or `None` when nothing
/// depends on it yet.
fn class_level_locked(progressions: i64, assignments: i64) -> Option<String> {
    match (progressions, assignments) {
        (0, 0) => None,
        (p, 0) => Some(format!("class level cannot change: {p} progression(s) recorded")),
        (0, a) => Some(format!("class level cannot change: {a} teacher assignment(s) exist")),
        (p, a) => Some(format!(
            "class level cannot change: {p} progression(s) recorded and {a} teacher assignment(s) exist"
        )),
    }
}

async fn update_class(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClassPayload>,
) -> AppResult<Json<SchoolClass>> {
    require_admin(&scope)?;
    check_name("name", &payload.name)?;
    let mut tx = state.pool.begin().await?;
    let current = curriculum::find_class(&mut *tx, id)
        .await?
        .ok_or(AppError::NotFound("class"))?;
    if current.level_id != payload.level_id {
        let (progressions, assignments) = curriculum::class_references(&mut *tx, id).await?;
        if let Some(message) = class_level_locked(progressions, assignments) {
            tracing::warn!("Refusing to move class {} to level {}: {}", id, payload.level_id, message);
            return Err(AppError::BadRequest(message));
        }
    }
    let class = curriculum::update_class(&mut tx, id, payload.name.trim(), payload.level_id)
        .await?
        .ok_or(AppError::NotFound("class"))?;
    log_write(&mut tx, &scope, "update", "class", id, json!({ "name": class.name, "levelId": class.level_id })).await?;
    tx.commit().await?;
    Ok(Json(class))
}

async fn delete_class(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    delete_row(&state, &scope, ReferenceTable::Classes, id).await
}

// ============================================
// Chapters & elements
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterQuery {
    pub subject_id: Option<Uuid>,
    pub level_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterPayload {
    pub subject_id: Uuid,
    pub level_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterUpdate {
    pub title: String,
    #[serde(default)]
    pub sort_order: i32,
}

async fn list_chapters(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<ChapterQuery>,
) -> AppResult<Json<Vec<Chapter>>> {
    require_admin(&scope)?;
    Ok(Json(curriculum::list_chapters(&state.pool, query.subject_id, query.level_id).await?))
}

async fn create_chapter(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<ChapterPayload>,
) -> AppResult<(StatusCode, Json<Chapter>)> {
    require_admin(&scope)?;
    check_name("title", &payload.title)?;
    let mut tx = state.pool.begin().await?;
    let chapter = curriculum::insert_chapter(
        &mut tx,
        payload.subject_id,
        payload.level_id,
        payload.title.trim(),
        payload.sort_order,
    )
    .await?;
    log_write(&mut tx, &scope, "create", "chapter", chapter.id, json!({ "title": chapter.title })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn update_chapter(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChapterUpdate>,
) -> AppResult<Json<Chapter>> {
    require_admin(&scope)?;
    check_name("title", &payload.title)?;
    let mut tx = state.pool.begin().await?;
    let chapter = curriculum::update_chapter(&mut tx, id, payload.title.trim(), payload.sort_order)
        .await?
        .ok_or(AppError::NotFound("chapter"))?;
    log_write(&mut tx, &scope, "update", "chapter", id, json!({ "title": chapter.title })).await?;
    tx.commit().await?;
    Ok(Json(chapter))
}

async fn delete_chapter(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    delete_row(&state, &scope, ReferenceTable::Chapters, id).await
}

async fn list_elements(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(chapter_id): Path<Uuid>,
) -> AppResult<Json<Vec<ChapterElement>>> {
    require_admin(&scope)?;
    Ok(Json(curriculum::list_elements(&state.pool, chapter_id).await?))
}

async fn create_element(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(chapter_id): Path<Uuid>,
    Json(payload): Json<ChapterUpdate>,
) -> AppResult<(StatusCode, Json<ChapterElement>)> {
    require_admin(&scope)?;
    check_name("title", &payload.title)?;
    let mut tx = state.pool.begin().await?;
    let element = curriculum::insert_element(&mut tx, chapter_id, payload.title.trim(), payload.sort_order).await?;
    log_write(
        &mut tx,
        &scope,
        "create",
        "chapter element",
        element.id,
        json!({ "chapterId": chapter_id, "title": element.title }),
    )
    .await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(element)))
}

async fn delete_element(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    delete_row(&state, &scope, ReferenceTable::ChapterElements, id).await
}

// ============================================
// Lessons
// ============================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonQuery {
    pub academic_year_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub level_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPayload {
    pub chapter_id: Uuid,
    pub academic_year_id: Option<Uuid>,
    pub title: String,
    pub planned_date: NaiveDate,
    pub planned_duration_minutes: i32,
}

impl LessonPayload {
    fn validate(&self) -> AppResult<()> {
        let mut v = Validator::new();
        v.non_empty("title", &self.title)
            .max_len("title", &self.title, MAX_NAME_LEN)
            .in_range(
                "plannedDurationMinutes",
                i64::from(self.planned_duration_minutes),
                1,
                i64::from(MAX_SESSION_MINUTES),
            );
        v.finish()
    }
}

/// A lesson with recorded progressions keeps its subject, level and year;
/// moving it between chapters of the same subject and level is allowed.
fn lesson_move_blocked(current: &Lesson, target: &Chapter, year: Uuid, progressions: i64) -> Option<String> {
    if progressions == 0 {
        return None;
    }
    let mut changed = Vec::new();
    if target.subject_id != current.subject_id {
        changed.push("subject");
    }
    if target.level_id != current.level_id {
        changed.push("level");
    }
    if year != current.academic_year_id {
        changed.push("academic year");
    }
    if changed.is_empty() {
        return None;
    }
    Some(format!(
        "lesson {} cannot change: {progressions} progression(s) recorded",
        changed.join(" and ")
    ))
}

async fn list_lessons(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<LessonQuery>,
) -> AppResult<Json<Vec<Lesson>>> {
    require_admin(&scope)?;
    Ok(Json(
        curriculum::list_lessons(&state.pool, query.academic_year_id, query.subject_id, query.level_id).await?,
    ))
}

async fn create_lesson(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<LessonPayload>,
) -> AppResult<(StatusCode, Json<Lesson>)> {
    require_admin(&scope)?;
    payload.validate()?;
    let year = match payload.academic_year_id {
        Some(id) => id,
        None => scope.year_id()?,
    };
    let mut tx = state.pool.begin().await?;
    let lesson = curriculum::insert_lesson(
        &mut tx,
        &curriculum::LessonInput {
            chapter_id: payload.chapter_id,
            academic_year_id: year,
            title: payload.title.trim(),
            planned_date: payload.planned_date,
            planned_duration_minutes: payload.planned_duration_minutes,
        },
    )
    .await?;
    log_write(&mut tx, &scope, "create", "lesson", lesson.id, json!({ "title": lesson.title })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn update_lesson(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LessonPayload>,
) -> AppResult<Json<Lesson>> {
    require_admin(&scope)?;
    payload.validate()?;
    let mut tx = state.pool.begin().await?;
    let current = curriculum::find_lesson(&mut *tx, id)
        .await?
        .ok_or(AppError::NotFound("lesson"))?;
    let year = payload.academic_year_id.unwrap_or(current.academic_year_id);
    if payload.chapter_id != current.chapter_id || year != current.academic_year_id {
        let chapter = curriculum::find_chapter(&mut *tx, payload.chapter_id)
            .await?
            .ok_or(AppError::NotFound("chapter"))?;
        let progressions = curriculum::lesson_progression_count(&mut *tx, id).await?;
        if let Some(message) = lesson_move_blocked(&current, &chapter, year, progressions) {
            tracing::warn!("Refusing to move lesson {}: {}", id, message);
            return Err(AppError::BadRequest(message));
        }
    }
    let lesson = curriculum::update_lesson(
        &mut tx,
        id,
        &curriculum::LessonInput {
            chapter_id: payload.chapter_id,
            academic_year_id: year,
            title: payload.title.trim(),
            planned_date: payload.planned_date,
            planned_duration_minutes: payload.planned_duration_minutes,
        },
    )
    .await?
    .ok_or(AppError::NotFound("lesson"))?;
    log_write(
        &mut tx,
        &scope,
        "update",
        "lesson",
        id,
        json!({ "plannedDate": lesson.planned_date, "plannedDurationMinutes": lesson.planned_duration_minutes }),
    )
    .await?;
    tx.commit().await?;
    Ok(Json(lesson))
}

async fn delete_lesson(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    delete_row(&state, &scope, ReferenceTable::Lessons, id).await
}

// ============================================
// Users & assignments
// ============================================

#[derive(Deserialize)]
pub struct UserQuery {
    pub role: Option<UserRole>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSubject {
    pub class_id: Uuid,
    pub subject_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserPayload {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub role: UserRole,
    pub hourly_rate_cents: Option<i64>,
    /// Year for the assignments below; defaults to the year in effect.
    pub academic_year_id: Option<Uuid>,
    #[serde(default)]
    pub class_subjects: Vec<ClassSubject>,
    #[serde(default)]
    pub subjects: Vec<Uuid>,
    #[serde(default)]
    pub cycles: Vec<Cycle>,
}

impl CreateUserPayload {
    fn validate(&self) -> AppResult<()> {
        let mut v = Validator::new();
        v.non_empty("username", &self.username)
            .max_len("username", &self.username, 64)
            .check(
                !self.username.trim().contains(char::is_whitespace),
                "username",
                "must not contain spaces",
            )
            .check(
                self.password.chars().count() >= MIN_PASSWORD_LEN,
                "password",
                &format!("must be at least {MIN_PASSWORD_LEN} characters"),
            )
            .non_empty("displayName", &self.display_name)
            .max_len("displayName", &self.display_name, MAX_NAME_LEN)
            .check(self.hourly_rate_cents.map_or(true, |r| r >= 0), "hourlyRateCents", "must not be negative");
        check_assignment_kinds(&mut v, self.role, self);
        v.finish()
    }

    fn has_assignments(&self) -> bool {
        !(self.class_subjects.is_empty() && self.subjects.is_empty() && self.cycles.is_empty())
    }
}

/// Each role only carries its own kind of assignment.
fn check_assignment_kinds(v: &mut Validator, role: UserRole, payload: &CreateUserPayload) {
    v.check(
        payload.class_subjects.is_empty() || role == UserRole::Teacher,
        "classSubjects",
        "only teachers teach classes",
    )
    .check(
        payload.subjects.is_empty() || role == UserRole::Inspector,
        "subjects",
        "only inspectors are assigned subjects",
    )
    .check(
        payload.cycles.is_empty() || role == UserRole::Sg,
        "cycles",
        "only surveillance staff are assigned cycles",
    )
    .check(
        payload.hourly_rate_cents.is_none() || role == UserRole::Teacher,
        "hourlyRateCents",
        "only teachers have an hourly rate",
    );
}

/// `Some(None)` when the key is present with `null`.
fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserPayload {
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub hourly_rate_cents: Option<Option<i64>>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateUserPayload {
    /// `role` is the edited user's; a rate may only be set on a teacher.
    fn validate(&self, role: UserRole, editing_self: bool) -> AppResult<()> {
        let mut v = Validator::new();
        if let Some(name) = &self.display_name {
            v.non_empty("displayName", name).max_len("displayName", name, MAX_NAME_LEN);
        }
        if let Some(password) = &self.password {
            v.check(
                password.chars().count() >= MIN_PASSWORD_LEN,
                "password",
                &format!("must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        if let Some(Some(rate)) = self.hourly_rate_cents {
            v.check(rate >= 0, "hourlyRateCents", "must not be negative")
                .check(role == UserRole::Teacher, "hourlyRateCents", "only teachers have an hourly rate");
        }
        v.check(
            !(editing_self && self.is_active == Some(false)),
            "isActive",
            "you cannot deactivate your own account",
        );
        v.finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub user: DbUser,
    pub assignment_count: usize,
}

async fn list_users(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<Vec<UserSummary>>> {
    require_admin(&scope)?;
    Ok(Json(db::list_users(&state.pool, query.role).await?))
}

async fn create_user(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<CreateUserPayload>,
) -> AppResult<(StatusCode, Json<CreatedUser>)> {
    require_admin(&scope)?;
    payload.validate()?;
    let year = match (payload.academic_year_id, payload.has_assignments()) {
        (Some(id), _) => Some(id),
        (None, true) => Some(scope.year_id()?),
        (None, false) => None,
    };
    let hash = crypto::hash_password(&payload.password).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut tx = state.pool.begin().await?;
    let user = db::insert_user(
        &mut *tx,
        &NewUser {
            username: payload.username.trim(),
            hash: &hash,
            role: payload.role,
            display_name: payload.display_name.trim(),
            hourly_rate_cents: payload.hourly_rate_cents,
        },
    )
    .await?;

    let mut assignment_count = 0;
    if let Some(year) = year {
        for pair in &payload.class_subjects {
            ensure_class_in_year(&mut tx, pair.class_id, year).await?;
            db::insert_teacher_assignment(&mut *tx, user.id, pair.class_id, pair.subject_id, year).await?;
            assignment_count += 1;
        }
        for subject in &payload.subjects {
            db::insert_inspector_assignment(&mut *tx, user.id, *subject, year).await?;
            assignment_count += 1;
        }
        for cycle in &payload.cycles {
            db::insert_sg_assignment(&mut *tx, user.id, *cycle, year).await?;
            assignment_count += 1;
        }
    }

    log_write(
        &mut tx,
        &scope,
        "create",
        "user",
        user.id,
        json!({ "role": user.role.as_str(), "assignments": assignment_count, "academicYearId": year }),
    )
    .await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(CreatedUser { user, assignment_count })))
}

async fn update_user(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserPayload>,
) -> AppResult<Json<DbUser>> {
    require_admin(&scope)?;
    let target = db::find_user_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    payload.validate(target.role, id == scope.user.id)?;

    let hash = match &payload.password {
        Some(p) => Some(crypto::hash_password(p).map_err(|e| AppError::Internal(e.to_string()))?),
        None => None,
    };

    let mut tx = state.pool.begin().await?;
    let user = db::update_user(
        &mut *tx,
        id,
        &UserChanges {
            display_name: payload.display_name.as_deref().map(str::trim),
            hourly_rate_cents: payload.hourly_rate_cents,
            hash: hash.as_deref(),
            is_active: payload.is_active,
        },
    )
    .await?
    .ok_or(AppError::NotFound("user"))?;
    if hash.is_some() || payload.is_active == Some(false) {
        db::revoke_user_sessions(&mut *tx, id).await?;
    }
    log_write(
        &mut tx,
        &scope,
        "update",
        "user",
        id,
        json!({
            "displayName": payload.display_name.is_some(),
            "hourlyRate": payload.hourly_rate_cents.is_some(),
            "password": hash.is_some(),
            "isActive": payload.is_active,
        }),
    )
    .await?;
    tx.commit().await?;
    Ok(Json(user))
}

async fn delete_user(scope: RequestScope, State(state): State<SharedState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    if id == scope.user.id {
        return Err(AppError::BadRequest("you cannot delete your own account".to_string()));
    }
    let mut tx = state.pool.begin().await?;
    db::revoke_user_sessions(&mut *tx, id).await?;
    if db::delete_user(&mut *tx, id).await? == 0 {
        return Err(AppError::NotFound("user"));
    }
    log_write(&mut tx, &scope, "delete", "user", id, json!({})).await?;
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssignmentPayload {
    #[serde(rename_all = "camelCase")]
    Teacher {
        user_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
        academic_year_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    Inspector {
        user_id: Uuid,
        subject_id: Uuid,
        academic_year_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    Sg {
        user_id: Uuid,
        cycle: Cycle,
        academic_year_id: Option<Uuid>,
    },
}

impl AssignmentPayload {
    fn user_id(&self) -> Uuid {
        match self {
            AssignmentPayload::Teacher { user_id, .. }
            | AssignmentPayload::Inspector { user_id, .. }
            | AssignmentPayload::Sg { user_id, .. } => *user_id,
        }
    }

    fn year(&self) -> Option<Uuid> {
        match self {
            AssignmentPayload::Teacher { academic_year_id, .. }
            | AssignmentPayload::Inspector { academic_year_id, .. }
            | AssignmentPayload::Sg { academic_year_id, .. } => *academic_year_id,
        }
    }

    fn role(&self) -> UserRole {
        match self {
            AssignmentPayload::Teacher { .. } => UserRole::Teacher,
            AssignmentPayload::Inspector { .. } => UserRole::Inspector,
            AssignmentPayload::Sg { .. } => UserRole::Sg,
        }
    }
}

async fn ensure_class_in_year(conn: &mut PgConnection, class_id: Uuid, year: Uuid) -> AppResult<()> {
    let class = curriculum::find_class(&mut *conn, class_id)
        .await?
        .ok_or(AppError::NotFound("class"))?;
    if class.academic_year_id != year {
        return Err(AppError::BadRequest(format!(
            "class {} does not belong to the assignment's academic year",
            class.name
        )));
    }
    Ok(())
}

async fn create_assignment(
    scope: RequestScope,
    State(state): State<SharedState>,
    Json(payload): Json<AssignmentPayload>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_admin(&scope)?;
    let year = match payload.year() {
        Some(id) => id,
        None => scope.year_id()?,
    };

    let mut tx = state.pool.begin().await?;
    let user = db::find_user_by_id(&mut *tx, payload.user_id())
        .await?
        .ok_or(AppError::NotFound("user"))?;
    if user.role != payload.role() {
        return Err(AppError::BadRequest(format!(
            "user is a {}, not a {}",
            user.role.as_str(),
            payload.role().as_str()
        )));
    }

    let (id, body) = match payload {
        AssignmentPayload::Teacher { class_id, subject_id, .. } => {
            ensure_class_in_year(&mut tx, class_id, year).await?;
            let a = db::insert_teacher_assignment(&mut *tx, user.id, class_id, subject_id, year).await?;
            (a.id, serde_json::to_value(&a))
        }
        AssignmentPayload::Inspector { subject_id, .. } => {
            let a = db::insert_inspector_assignment(&mut *tx, user.id, subject_id, year).await?;
            (a.id, serde_json::to_value(&a))
        }
        AssignmentPayload::Sg { cycle, .. } => {
            let a = db::insert_sg_assignment(&mut *tx, user.id, cycle, year).await?;
            (a.id, serde_json::to_value(&a))
        }
    };
    let body = body.map_err(|e| AppError::Internal(e.to_string()))?;
    log_write(&mut tx, &scope, "create", "assignment", id, json!({ "userId": user.id, "academicYearId": year })).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(body)))
}

async fn delete_assignment(
    scope: RequestScope,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&scope)?;
    let mut tx = state.pool.begin().await?;
    if db::delete_assignment(&mut *tx, id).await? == 0 {
        return Err(AppError::NotFound("assignment"));
    }
    log_write(&mut tx, &scope, "delete", "assignment", id, json!({})).await?;
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Audit
// ============================================

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

async fn audit_logs(
    scope: RequestScope,
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditLog>>> {
    require_admin(&scope)?;
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_AUDIT_PAGE);
    Ok(Json(audit::list_audit(&state.pool, limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_payload(role: UserRole) -> CreateUserPayload {
        CreateUserPayload {
            username: "m.diallo".into(),
            password: "long-enough".into(),
            display_name: "M. Diallo".into(),
            role,
            hourly_rate_cents: None,
            academic_year_id: None,
            class_subjects: vec![],
            subjects: vec![],
            cycles: vec![],
        }
    }

    fn paths(result: AppResult<()>) -> Vec<String> {
        match result {
            Ok(()) => vec![],
            Err(AppError::Validation(details)) => details.into_iter().map(|d| d.path).collect(),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn referenced_level_gets_a_descriptive_message() {
        assert_eq!(level_in_use(0, 0), None);
        assert_eq!(
            level_in_use(2, 0).as_deref(),
            Some("level is still referenced by 2 chapter(s)")
        );
        assert!(level_in_use(1, 3).unwrap().contains("3 class(es)"));
    }

    #[test]
    fn class_level_is_locked_once_used() {
        assert_eq!(class_level_locked(0, 0), None);
        assert_eq!(
            class_level_locked(4, 0).as_deref(),
            Some("class level cannot change: 4 progression(s) recorded")
        );
        assert_eq!(
            class_level_locked(0, 2).as_deref(),
            Some("class level cannot change: 2 teacher assignment(s) exist")
        );
        assert!(class_level_locked(1, 1).unwrap().contains("and 1 teacher assignment(s)"));
    }

    fn lesson_in(chapter: &Chapter, year: Uuid) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            chapter_id: chapter.id,
            academic_year_id: year,
            title: "Thales".into(),
            planned_date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            planned_duration_minutes: 55,
            subject_id: chapter.subject_id,
            level_id: chapter.level_id,
        }
    }

    fn chapter(subject_id: Uuid, level_id: Uuid) -> Chapter {
        Chapter {
            id: Uuid::new_v4(),
            subject_id,
            level_id,
            title: "Geometrie".into(),
            sort_order: 0,
        }
    }

    #[test]
    fn referenced_lesson_keeps_subject_level_and_year() {
        let (maths, physics, fourth, third) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let year = Uuid::new_v4();
        let home = chapter(maths, fourth);
        let lesson = lesson_in(&home, year);

        let sibling = chapter(maths, fourth);
        assert_eq!(lesson_move_blocked(&lesson, &sibling, year, 3), None);

        let other_subject = chapter(physics, fourth);
        assert_eq!(lesson_move_blocked(&lesson, &other_subject, year, 0), None);
        assert_eq!(
            lesson_move_blocked(&lesson, &other_subject, year, 3).as_deref(),
            Some("lesson subject cannot change: 3 progression(s) recorded")
        );
        assert_eq!(
            lesson_move_blocked(&lesson, &chapter(maths, third), Uuid::new_v4(), 1).as_deref(),
            Some("lesson level and academic year cannot change: 1 progression(s) recorded")
        );
    }

    #[test]
    fn hourly_rate_update_is_teacher_only() {
        let set: UpdateUserPayload = serde_json::from_value(json!({ "hourlyRateCents": 3000 })).unwrap();
        assert!(paths(set.validate(UserRole::Teacher, false)).is_empty());
        assert_eq!(paths(set.validate(UserRole::Inspector, false)), vec!["hourlyRateCents"]);

        let cleared: UpdateUserPayload = serde_json::from_value(json!({ "hourlyRateCents": null })).unwrap();
        assert!(paths(cleared.validate(UserRole::Sg, false)).is_empty());

        let deactivate: UpdateUserPayload = serde_json::from_value(json!({ "isActive": false })).unwrap();
        assert_eq!(paths(deactivate.validate(UserRole::Admin, true)), vec!["isActive"]);
        assert!(paths(deactivate.validate(UserRole::Admin, false)).is_empty());
    }

    #[test]
    fn assignments_must_match_the_role() {
        let mut teacher = user_payload(UserRole::Teacher);
        teacher.class_subjects.push(ClassSubject {
            class_id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
        });
        teacher.hourly_rate_cents = Some(2500);
        assert!(paths(teacher.validate()).is_empty());

        let mut inspector = user_payload(UserRole::Inspector);
        inspector.cycles.push(Cycle::College);
        inspector.hourly_rate_cents = Some(100);
        assert_eq!(paths(inspector.validate()), vec!["cycles", "hourlyRateCents"]);
    }

    #[test]
    fn weak_credentials_are_rejected() {
        let mut payload = user_payload(UserRole::Sg);
        payload.username = "two words".into();
        payload.password = "short".into();
        assert_eq!(paths(payload.validate()), vec!["username", "password"]);
    }

    #[test]
    fn rate_update_distinguishes_null_from_absent() {
        let absent: UpdateUserPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(absent.hourly_rate_cents, None);
        let cleared: UpdateUserPayload = serde_json::from_value(json!({ "hourlyRateCents": null })).unwrap();
        assert_eq!(cleared.hourly_rate_cents, Some(None));
        let set: UpdateUserPayload = serde_json::from_value(json!({ "hourlyRateCents": 3000 })).unwrap();
        assert_eq!(set.hourly_rate_cents, Some(Some(3000)));
    }

    #[test]
    fn assignment_kind_is_tagged() {
        let payload: AssignmentPayload = serde_json::from_value(json!({
            "kind": "sg",
            "userId": Uuid::nil(),
            "cycle": "lycee"
        }))
        .unwrap();
        assert_eq!(payload.role(), UserRole::Sg);
        assert_eq!(payload.year(), None);

        let lesson: LessonPayload = serde_json::from_value(json!({
            "chapterId": Uuid::nil(),
            "title": "Pythagore",
            "plannedDate": "2025-02-03",
            "plannedDurationMinutes": 0
        }))
        .unwrap();
        assert_eq!(paths(lesson.validate()), vec!["plannedDurationMinutes"]);
    }
}

//! Progression engine. Every write runs in one transaction and re-checks the
//! caller's [`AccessScope`](crate::domain::visibility::AccessScope) itself.

use crate::analytics::stats::{compute_stats, ProgressionStats};
use crate::db::{self, audit, curriculum, progressions};
use crate::domain::models::{Lesson, ProgressionView, SchoolClass, SessionType, UserRole};
use crate::domain::progression::{
    check_reopen, check_validation, effective_status, format_reliquat, plan_completion, plan_planning,
    reliquat_minutes, resolve_session_type, CompletionPlan, EffectiveStatus, PlanningOutcome,
    TransitionError, MAX_SESSION_MINUTES,
};
use crate::domain::validation::Validator;
use crate::error::{AppError, AppResult, FieldError};
use crate::middleware::RequestScope;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub const MAX_NOTES_LEN: usize = 2000;
const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLesson {
    pub lesson_id: Uuid,
    pub class_id: Uuid,
    pub actual_date: NaiveDate,
    pub actual_duration_minutes: i32,
    pub notes: Option<String>,
    pub session_type: Option<SessionType>,
    #[serde(default)]
    pub chapter_elements: Vec<Uuid>,
}

impl CompleteLesson {
    fn validate(&self) -> AppResult<()> {
        let mut v = Validator::new();
        v.in_range(
            "actualDurationMinutes",
            i64::from(self.actual_duration_minutes),
            1,
            i64::from(MAX_SESSION_MINUTES),
        );
        if let Some(notes) = &self.notes {
            v.max_len("notes", notes, MAX_NOTES_LEN);
        }
        let mut seen = std::collections::HashSet::new();
        v.check(
            self.chapter_elements.iter().all(|id| seen.insert(*id)),
            "chapterElements",
            "must not contain duplicates",
        );
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLesson {
    pub lesson_id: Uuid,
    pub class_id: Uuid,
    pub session_type: Option<SessionType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReopenRequest {
    pub reason: Option<String>,
}

/// A progression as every role sees it: stored row plus derived fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionOut {
    #[serde(flatten)]
    pub view: ProgressionView,
    pub effective_status: EffectiveStatus,
    pub reliquat_minutes: Option<i32>,
    pub reliquat: Option<String>,
}

pub fn annotate(view: ProgressionView, today: NaiveDate) -> ProgressionOut {
    let effective = effective_status(view.status, view.planned_date, today);
    let minutes = view
        .actual_duration_minutes
        .map(|actual| reliquat_minutes(view.planned_duration_minutes, actual));
    let formatted = format_reliquat(view.planned_duration_minutes, view.actual_duration_minutes);
    ProgressionOut {
        view,
        effective_status: effective,
        reliquat_minutes: minutes,
        reliquat: formatted,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    pub created: bool,
    pub progression: ProgressionOut,
}

#[derive(Clone)]
pub struct ProgressionService {
    pool: PgPool,
}

impl ProgressionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Progressions of the scope's year the caller may see. A teacher only
    /// ever gets their own rows.
    pub async fn list_visible(
        &self,
        scope: &RequestScope,
        teacher_id: Option<Uuid>,
    ) -> AppResult<Vec<ProgressionView>> {
        let Some(year) = scope.year.as_ref().map(|y| y.id) else {
            return Ok(Vec::new());
        };
        let teacher_filter = match scope.user.role {
            UserRole::Teacher => Some(scope.user.id),
            _ => teacher_id,
        };
        let rows = progressions::list_views(&self.pool, year, teacher_filter).await?;
        Ok(scope.access.filter_progressions(rows))
    }

    pub async fn stats(
        &self,
        scope: &RequestScope,
        teacher_id: Option<Uuid>,
        today: NaiveDate,
    ) -> AppResult<ProgressionStats> {
        let rows = self.list_visible(scope, teacher_id).await?;
        Ok(compute_stats(&rows, teacher_id, today))
    }

    pub async fn mark_completed(
        &self,
        scope: &RequestScope,
        input: &CompleteLesson,
        today: NaiveDate,
    ) -> AppResult<ProgressionOut> {
        scope.require_role(&[UserRole::Teacher])?;
        input.validate()?;
        let year = scope.year_id()?;
        let teacher_id = scope.user.id;

        let mut tx = self.pool.begin().await?;
        let (lesson, class) = load_pair(&mut tx, scope, year, input.lesson_id, input.class_id).await?;

        let foreign = curriculum::foreign_elements(&mut *tx, lesson.chapter_id, &input.chapter_elements).await?;
        if !foreign.is_empty() {
            return Err(AppError::Validation(
                foreign
                    .iter()
                    .map(|id| FieldError::new("chapterElements", format!("{id} is not an element of the lesson's chapter")))
                    .collect(),
            ));
        }

        let existing = progressions::lock_by_key(&mut tx, lesson.id, class.id, teacher_id).await?;
        let plan = plan_completion(existing.as_ref().map(|p| p.status))?;
        let session_type = resolve_session_type(input.session_type, existing.as_ref().map(|p| p.session_type));

        let saved = progressions::upsert_completed(
            &mut tx,
            lesson.id,
            class.id,
            teacher_id,
            &progressions::CompletionFields {
                actual_date: input.actual_date,
                actual_duration_minutes: input.actual_duration_minutes,
                notes: input.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
                session_type,
                chapter_elements: &input.chapter_elements,
            },
        )
        .await?
        // a concurrent validation won the row between lock and upsert
        .ok_or(TransitionError::AlreadyValidated)?;

        let message = format!(
            "{} completed \"{}\" with {}",
            scope.user.display_name, lesson.title, class.name
        );
        for inspector in db::inspectors_for_subject(&mut *tx, lesson.subject_id, year).await? {
            audit::notify(&mut *tx, inspector, "progression_completed", &message, Some(saved.id)).await?;
        }

        let previous = match plan {
            CompletionPlan::Insert => None,
            CompletionPlan::Update { previous } => Some(previous),
        };
        audit::record(
            &mut *tx,
            Some(teacher_id),
            "progression.complete",
            "lesson_progression",
            Some(saved.id),
            json!({
                "lessonId": lesson.id,
                "classId": class.id,
                "previousStatus": previous,
                "actualDurationMinutes": input.actual_duration_minutes,
                "sessionType": session_type,
            }),
        )
        .await?;

        let view = reload(&mut tx, saved.id).await?;
        tx.commit().await?;

        tracing::info!(
            "Progression {} completed by teacher {} (lesson {}, class {})",
            saved.id,
            teacher_id,
            lesson.id,
            class.id
        );
        Ok(annotate(view, today))
    }

    /// Creates a planned row. An existing row is returned untouched.
    pub async fn plan(&self, scope: &RequestScope, input: &PlanLesson, today: NaiveDate) -> AppResult<PlanResult> {
        scope.require_role(&[UserRole::Teacher])?;
        let year = scope.year_id()?;
        let teacher_id = scope.user.id;

        let mut tx = self.pool.begin().await?;
        let (lesson, class) = load_pair(&mut tx, scope, year, input.lesson_id, input.class_id).await?;

        let existing = progressions::lock_by_key(&mut tx, lesson.id, class.id, teacher_id).await?;
        let (id, created) = match (plan_planning(existing.as_ref().map(|p| p.status)), existing) {
            (PlanningOutcome::Unchanged(_), Some(row)) => (row.id, false),
            _ => {
                let session_type = input.session_type.unwrap_or_default();
                match progressions::insert_planned(&mut tx, lesson.id, class.id, teacher_id, session_type).await? {
                    Some(row) => {
                        audit::record(
                            &mut *tx,
                            Some(teacher_id),
                            "progression.plan",
                            "lesson_progression",
                            Some(row.id),
                            json!({ "lessonId": lesson.id, "classId": class.id, "sessionType": session_type }),
                        )
                        .await?;
                        (row.id, true)
                    }
                    None => {
                        let row = progressions::lock_by_key(&mut tx, lesson.id, class.id, teacher_id)
                            .await?
                            .ok_or(AppError::NotFound("progression"))?;
                        (row.id, false)
                    }
                }
            }
        };

        let view = reload(&mut tx, id).await?;
        tx.commit().await?;

        if created {
            tracing::info!("Progression {} planned by teacher {}", id, teacher_id);
        }
        Ok(PlanResult {
            created,
            progression: annotate(view, today),
        })
    }

    pub async fn validate(&self, scope: &RequestScope, id: Uuid, today: NaiveDate) -> AppResult<ProgressionOut> {
        scope.require_role(&[UserRole::Inspector])?;
        let inspector_id = scope.user.id;

        let mut tx = self.pool.begin().await?;
        let row = progressions::lock_by_id(&mut tx, id)
            .await?
            .ok_or(AppError::NotFound("progression"))?;
        let view = reload(&mut tx, row.id).await?;
        ensure_inspects(scope, &view)?;
        check_validation(row.status)?;

        progressions::mark_validated(&mut tx, row.id, inspector_id).await?;
        audit::notify(
            &mut *tx,
            row.teacher_id,
            "progression_validated",
            &format!("\"{}\" with {} was validated by {}", view.lesson_title, view.class_name, scope.user.display_name),
            Some(row.id),
        )
        .await?;
        audit::record(
            &mut *tx,
            Some(inspector_id),
            "progression.validate",
            "lesson_progression",
            Some(row.id),
            json!({ "teacherId": row.teacher_id }),
        )
        .await?;

        let view = reload(&mut tx, row.id).await?;
        tx.commit().await?;

        tracing::info!("Progression {} validated by inspector {}", row.id, inspector_id);
        Ok(annotate(view, today))
    }

    /// validated -> completed. Clears the validation stamp.
    pub async fn reopen(
        &self,
        scope: &RequestScope,
        id: Uuid,
        request: &ReopenRequest,
        today: NaiveDate,
    ) -> AppResult<ProgressionOut> {
        scope.require_role(&[UserRole::Inspector])?;
        let reason = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
        if let Some(reason) = reason {
            let mut v = Validator::new();
            v.max_len("reason", reason, MAX_REASON_LEN);
            v.finish()?;
        }
        let inspector_id = scope.user.id;

        let mut tx = self.pool.begin().await?;
        let row = progressions::lock_by_id(&mut tx, id)
            .await?
            .ok_or(AppError::NotFound("progression"))?;
        let view = reload(&mut tx, row.id).await?;
        ensure_inspects(scope, &view)?;
        check_reopen(row.status)?;

        progressions::mark_reopened(&mut tx, row.id).await?;
        let message = match reason {
            Some(reason) => format!("\"{}\" with {} was reopened: {}", view.lesson_title, view.class_name, reason),
            None => format!("\"{}\" with {} was reopened", view.lesson_title, view.class_name),
        };
        audit::notify(&mut *tx, row.teacher_id, "progression_reopened", &message, Some(row.id)).await?;
        audit::record(
            &mut *tx,
            Some(inspector_id),
            "progression.reopen",
            "lesson_progression",
            Some(row.id),
            json!({ "previousValidator": row.validated_by, "reason": reason }),
        )
        .await?;

        let view = reload(&mut tx, row.id).await?;
        tx.commit().await?;

        tracing::info!("Progression {} reopened by inspector {}", row.id, inspector_id);
        Ok(annotate(view, today))
    }
}

/// Loads lesson and class and runs [`check_pair`] on them.
async fn load_pair(
    conn: &mut PgConnection,
    scope: &RequestScope,
    year: Uuid,
    lesson_id: Uuid,
    class_id: Uuid,
) -> AppResult<(Lesson, SchoolClass)> {
    let lesson = curriculum::find_lesson(&mut *conn, lesson_id)
        .await?
        .ok_or(AppError::NotFound("lesson"))?;
    let class = curriculum::find_class(&mut *conn, class_id)
        .await?
        .ok_or(AppError::NotFound("class"))?;
    check_pair(scope, year, &lesson, &class)?;
    Ok((lesson, class))
}

/// Lesson and class belong to `year` and share a level, and the teacher
/// holds the (class, subject) pair.
fn check_pair(scope: &RequestScope, year: Uuid, lesson: &Lesson, class: &SchoolClass) -> AppResult<()> {
    if lesson.academic_year_id != year || class.academic_year_id != year {
        return Err(AppError::BadRequest(
            "lesson and class must belong to the selected academic year".to_string(),
        ));
    }
    if lesson.level_id != class.level_id {
        return Err(AppError::BadRequest("lesson level does not match the class level".to_string()));
    }
    if !scope.access.can_act_on(class.id, lesson.subject_id) {
        tracing::warn!(
            "Teacher {} has no assignment for class {} / subject {}",
            scope.user.id,
            class.id,
            lesson.subject_id
        );
        return Err(AppError::Forbidden);
    }
    Ok(())
}

fn ensure_inspects(scope: &RequestScope, view: &ProgressionView) -> AppResult<()> {
    let in_year = scope.year.as_ref().is_some_and(|y| y.id == view.academic_year_id);
    if in_year && scope.access.can_validate_subject(view.subject_id) {
        return Ok(());
    }
    tracing::warn!(
        "Inspector {} may not review progression {} (subject {})",
        scope.user.id,
        view.id,
        view.subject_id
    );
    Err(AppError::Forbidden)
}

async fn reload(conn: &mut PgConnection, id: Uuid) -> AppResult<ProgressionView> {
    progressions::find_view(conn, id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("progression {id} vanished inside its transaction")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::stats::fixtures::row;
    use crate::db::DbUser;
    use crate::domain::models::{
        AcademicYear, AssignmentSet, Cycle, InspectorAssignment, ProgressionStatus, TeacherAssignment,
    };
    use crate::domain::visibility::AccessScope;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn completion(minutes: i32) -> CompleteLesson {
        CompleteLesson {
            lesson_id: Uuid::new_v4(),
            class_id: Uuid::new_v4(),
            actual_date: date(2025, 1, 10),
            actual_duration_minutes: minutes,
            notes: None,
            session_type: None,
            chapter_elements: vec![],
        }
    }

    fn academic_year(id: Uuid) -> AcademicYear {
        AcademicYear {
            id,
            label: "2024-2025".into(),
            starts_on: date(2024, 9, 2),
            ends_on: date(2025, 6, 30),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn scope_for(role: UserRole, year: Uuid, assignments: &AssignmentSet) -> RequestScope {
        let id = Uuid::new_v4();
        RequestScope {
            user: DbUser {
                id,
                username: "user".into(),
                hash: String::new(),
                role,
                display_name: "User".into(),
                hourly_rate_cents: None,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            session_id: Uuid::new_v4(),
            year: Some(academic_year(year)),
            access: AccessScope::build(id, role, assignments, Some(year)),
        }
    }

    fn teacher_scope(year: Uuid, class_id: Uuid, subject_id: Uuid) -> RequestScope {
        let mut scope = scope_for(UserRole::Teacher, year, &AssignmentSet::default());
        let assignments = AssignmentSet {
            teaching: vec![TeacherAssignment {
                id: Uuid::new_v4(),
                teacher_id: scope.user.id,
                class_id,
                subject_id,
                academic_year_id: year,
            }],
            ..Default::default()
        };
        scope.access = AccessScope::build(scope.user.id, UserRole::Teacher, &assignments, Some(year));
        scope
    }

    fn inspector_scope(year: Uuid, subject_id: Uuid) -> RequestScope {
        let mut scope = scope_for(UserRole::Inspector, year, &AssignmentSet::default());
        let assignments = AssignmentSet {
            inspecting: vec![InspectorAssignment {
                id: Uuid::new_v4(),
                inspector_id: scope.user.id,
                subject_id,
                academic_year_id: year,
            }],
            ..Default::default()
        };
        scope.access = AccessScope::build(scope.user.id, UserRole::Inspector, &assignments, Some(year));
        scope
    }

    fn lesson(year: Uuid, subject_id: Uuid, level_id: Uuid) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            chapter_id: Uuid::new_v4(),
            academic_year_id: year,
            title: "Fractions".into(),
            planned_date: date(2025, 1, 6),
            planned_duration_minutes: 55,
            subject_id,
            level_id,
        }
    }

    fn class(year: Uuid, level_id: Uuid) -> SchoolClass {
        SchoolClass {
            id: Uuid::new_v4(),
            name: "6eA".into(),
            level_id,
            academic_year_id: year,
            cycle: Cycle::College,
        }
    }

    #[test]
    fn teacher_must_hold_the_pair() {
        let (year, maths, level) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let class = class(year, level);
        let lesson = lesson(year, maths, level);

        let scope = teacher_scope(year, class.id, maths);
        assert!(check_pair(&scope, year, &lesson, &class).is_ok());

        let other_subject = teacher_scope(year, class.id, Uuid::new_v4());
        assert!(matches!(check_pair(&other_subject, year, &lesson, &class), Err(AppError::Forbidden)));

        let other_class = teacher_scope(year, Uuid::new_v4(), maths);
        assert!(matches!(check_pair(&other_class, year, &lesson, &class), Err(AppError::Forbidden)));
    }

    #[test]
    fn lesson_and_class_must_share_year_and_level() {
        let (year, maths, level) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let class = class(year, level);
        let scope = teacher_scope(year, class.id, maths);

        let last_year = lesson(Uuid::new_v4(), maths, level);
        assert!(matches!(
            check_pair(&scope, year, &last_year, &class),
            Err(AppError::BadRequest(m)) if m.contains("academic year")
        ));

        let other_level = lesson(year, maths, Uuid::new_v4());
        assert!(matches!(
            check_pair(&scope, year, &other_level, &class),
            Err(AppError::BadRequest(m)) if m.contains("level")
        ));
    }

    #[test]
    fn inspector_reviews_only_their_subject_in_their_year() {
        let (year, maths) = (Uuid::new_v4(), Uuid::new_v4());
        let scope = inspector_scope(year, maths);

        let mut view = row(Uuid::new_v4(), ProgressionStatus::Completed, date(2025, 1, 6), 55, Some(55), SessionType::Lesson);
        view.subject_id = maths;
        view.academic_year_id = year;
        assert!(ensure_inspects(&scope, &view).is_ok());

        let mut old = view.clone();
        old.academic_year_id = Uuid::new_v4();
        assert!(matches!(ensure_inspects(&scope, &old), Err(AppError::Forbidden)));

        let mut physics = view.clone();
        physics.subject_id = Uuid::new_v4();
        assert!(matches!(ensure_inspects(&scope, &physics), Err(AppError::Forbidden)));

        let teacher = teacher_scope(year, view.class_id, maths);
        assert!(matches!(ensure_inspects(&teacher, &view), Err(AppError::Forbidden)));
    }

    #[test]
    fn duration_must_be_within_a_school_day() {
        assert!(completion(1).validate().is_ok());
        assert!(completion(600).validate().is_ok());
        for bad in [0, -5, 601] {
            match completion(bad).validate() {
                Err(AppError::Validation(details)) => {
                    assert_eq!(details[0].path, "actualDurationMinutes");
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn notes_length_and_duplicate_elements_are_reported_together() {
        let element = Uuid::new_v4();
        let mut input = completion(0);
        input.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        input.chapter_elements = vec![element, element];
        match input.validate() {
            Err(AppError::Validation(details)) => {
                let paths: Vec<&str> = details.iter().map(|d| d.path.as_str()).collect();
                assert_eq!(paths, vec!["actualDurationMinutes", "notes", "chapterElements"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn completion_body_uses_camel_case_and_defaults_elements() {
        let lesson = Uuid::new_v4();
        let class = Uuid::new_v4();
        let body = json!({
            "lessonId": lesson,
            "classId": class,
            "actualDate": "2025-01-10",
            "actualDurationMinutes": 50,
            "sessionType": "control"
        });
        let parsed: CompleteLesson = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.lesson_id, lesson);
        assert_eq!(parsed.session_type, Some(SessionType::Control));
        assert!(parsed.chapter_elements.is_empty());
    }

    #[test]
    fn annotate_adds_derived_status_and_reliquat() {
        let today = date(2025, 3, 10);
        let done = annotate(
            row(Uuid::new_v4(), ProgressionStatus::Completed, date(2025, 3, 1), 55, Some(50), SessionType::Lesson),
            today,
        );
        assert_eq!(done.effective_status, EffectiveStatus::Completed);
        assert_eq!(done.reliquat_minutes, Some(5));
        assert_eq!(done.reliquat.as_deref(), Some("+0h05"));

        let late = annotate(
            row(Uuid::new_v4(), ProgressionStatus::Planned, date(2025, 3, 1), 55, None, SessionType::Lesson),
            today,
        );
        assert_eq!(late.effective_status, EffectiveStatus::Delayed);
        assert_eq!(late.reliquat, None);

        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["effectiveStatus"], "completed");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["plannedDurationMinutes"], 55);
    }
}

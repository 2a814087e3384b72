use crate::domain::models::{Progression, ProgressionView, SessionType};
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const PROGRESSION_COLUMNS: &str = r#"
    id, lesson_id, class_id, teacher_id, status, actual_date, actual_duration_minutes,
    notes, session_type, chapter_elements, completed_at, validated_by, validated_at,
    created_at, updated_at
"#;

const VIEW_SELECT: &str = r#"
    SELECT
        p.id, p.lesson_id, l.title AS lesson_title,
        p.class_id, c.name AS class_name, lv.cycle,
        p.teacher_id, u.display_name AS teacher_name,
        ch.subject_id, s.name AS subject_name, l.chapter_id, l.academic_year_id,
        p.status, l.planned_date, l.planned_duration_minutes,
        p.actual_date, p.actual_duration_minutes, p.session_type, p.notes,
        p.chapter_elements, p.completed_at, p.validated_by, p.validated_at
    FROM lesson_progressions p
    JOIN lessons l ON l.id = p.lesson_id
    JOIN chapters ch ON ch.id = l.chapter_id
    JOIN subjects s ON s.id = ch.subject_id
    JOIN classes c ON c.id = p.class_id
    JOIN levels lv ON lv.id = c.level_id
    JOIN users u ON u.id = p.teacher_id
"#;

/// Progressions of a year, optionally narrowed to one teacher. Role
/// visibility is applied by the caller's scope.
pub async fn list_views(
    pool: &PgPool,
    year: Uuid,
    teacher_id: Option<Uuid>,
) -> sqlx::Result<Vec<ProgressionView>> {
    sqlx::query_as::<_, ProgressionView>(&format!(
        r#"
        {VIEW_SELECT}
        WHERE l.academic_year_id = $1
          AND ($2::uuid IS NULL OR p.teacher_id = $2)
        ORDER BY l.planned_date, c.name, l.title
        "#
    ))
    .bind(year)
    .bind(teacher_id)
    .fetch_all(pool)
    .await
}

pub async fn find_view(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<ProgressionView>> {
    sqlx::query_as::<_, ProgressionView>(&format!("{VIEW_SELECT} WHERE p.id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn lock_by_key(
    conn: &mut PgConnection,
    lesson_id: Uuid,
    class_id: Uuid,
    teacher_id: Uuid,
) -> sqlx::Result<Option<Progression>> {
    sqlx::query_as::<_, Progression>(&format!(
        r#"
        SELECT {PROGRESSION_COLUMNS}
        FROM lesson_progressions
        WHERE lesson_id = $1 AND class_id = $2 AND teacher_id = $3
        FOR UPDATE
        "#
    ))
    .bind(lesson_id)
    .bind(class_id)
    .bind(teacher_id)
    .fetch_optional(conn)
    .await
}

pub async fn lock_by_id(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<Progression>> {
    sqlx::query_as::<_, Progression>(&format!(
        "SELECT {PROGRESSION_COLUMNS} FROM lesson_progressions WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub struct CompletionFields<'a> {
    pub actual_date: NaiveDate,
    pub actual_duration_minutes: i32,
    pub notes: Option<&'a str>,
    pub session_type: SessionType,
    pub chapter_elements: &'a [Uuid],
}

/// Upsert keyed on (lesson, class, teacher). A validated row is left alone
/// and `None` is returned.
pub async fn upsert_completed(
    conn: &mut PgConnection,
    lesson_id: Uuid,
    class_id: Uuid,
    teacher_id: Uuid,
    fields: &CompletionFields<'_>,
) -> sqlx::Result<Option<Progression>> {
    sqlx::query_as::<_, Progression>(&format!(
        r#"
        INSERT INTO lesson_progressions (
            id, lesson_id, class_id, teacher_id, status, actual_date,
            actual_duration_minutes, notes, session_type, chapter_elements, completed_at
        )
        VALUES ($1, $2, $3, $4, 'completed', $5, $6, $7, $8, $9, now())
        ON CONFLICT (lesson_id, class_id, teacher_id) DO UPDATE SET
            status = 'completed',
            actual_date = EXCLUDED.actual_date,
            actual_duration_minutes = EXCLUDED.actual_duration_minutes,
            notes = EXCLUDED.notes,
            session_type = EXCLUDED.session_type,
            chapter_elements = EXCLUDED.chapter_elements,
            completed_at = now(),
            updated_at = now()
        WHERE lesson_progressions.status <> 'validated'
        RETURNING {PROGRESSION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(lesson_id)
    .bind(class_id)
    .bind(teacher_id)
    .bind(fields.actual_date)
    .bind(fields.actual_duration_minutes)
    .bind(fields.notes)
    .bind(fields.session_type)
    .bind(fields.chapter_elements)
    .fetch_optional(conn)
    .await
}

/// Creates a planned row unless one already exists for the key.
pub async fn insert_planned(
    conn: &mut PgConnection,
    lesson_id: Uuid,
    class_id: Uuid,
    teacher_id: Uuid,
    session_type: SessionType,
) -> sqlx::Result<Option<Progression>> {
    sqlx::query_as::<_, Progression>(&format!(
        r#"
        INSERT INTO lesson_progressions (id, lesson_id, class_id, teacher_id, status, session_type)
        VALUES ($1, $2, $3, $4, 'planned', $5)
        ON CONFLICT (lesson_id, class_id, teacher_id) DO NOTHING
        RETURNING {PROGRESSION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(lesson_id)
    .bind(class_id)
    .bind(teacher_id)
    .bind(session_type)
    .fetch_optional(conn)
    .await
}

pub async fn mark_validated(
    conn: &mut PgConnection,
    id: Uuid,
    validator_id: Uuid,
) -> sqlx::Result<Progression> {
    sqlx::query_as::<_, Progression>(&format!(
        r#"
        UPDATE lesson_progressions
        SET status = 'validated', validated_by = $2, validated_at = now(), updated_at = now()
        WHERE id = $1
        RETURNING {PROGRESSION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(validator_id)
    .fetch_one(conn)
    .await
}

pub async fn mark_reopened(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Progression> {
    sqlx::query_as::<_, Progression>(&format!(
        r#"
        UPDATE lesson_progressions
        SET status = 'completed', validated_by = NULL, validated_at = NULL, updated_at = now()
        WHERE id = $1
        RETURNING {PROGRESSION_COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_one(conn)
    .await
}

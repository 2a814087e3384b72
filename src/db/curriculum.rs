use crate::domain::models::{Chapter, ChapterElement, Cycle, Lesson, Level, SchoolClass, Subject};
use chrono::NaiveDate;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

// ============================================
// Subjects
// ============================================

pub async fn list_subjects(pool: &PgPool) -> sqlx::Result<Vec<Subject>> {
    sqlx::query_as::<_, Subject>("SELECT id, name FROM subjects ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn insert_subject(conn: &mut PgConnection, name: &str) -> sqlx::Result<Subject> {
    sqlx::query_as::<_, Subject>("INSERT INTO subjects (id, name) VALUES ($1, $2) RETURNING id, name")
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&mut *conn)
        .await
}

pub async fn update_subject(conn: &mut PgConnection, id: Uuid, name: &str) -> sqlx::Result<Option<Subject>> {
    sqlx::query_as::<_, Subject>("UPDATE subjects SET name = $2 WHERE id = $1 RETURNING id, name")
        .bind(id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
}

// ============================================
// Levels
// ============================================

pub async fn list_levels(pool: &PgPool) -> sqlx::Result<Vec<Level>> {
    sqlx::query_as::<_, Level>("SELECT id, name, cycle, sort_order FROM levels ORDER BY sort_order, name")
        .fetch_all(pool)
        .await
}

pub async fn insert_level(conn: &mut PgConnection, name: &str, cycle: Cycle, sort_order: i32) -> sqlx::Result<Level> {
    sqlx::query_as::<_, Level>(
        r#"
        INSERT INTO levels (id, name, cycle, sort_order)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, cycle, sort_order
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(cycle)
    .bind(sort_order)
    .fetch_one(&mut *conn)
    .await
}

pub async fn update_level(
    conn: &mut PgConnection,
    id: Uuid,
    name: &str,
    cycle: Cycle,
    sort_order: i32,
) -> sqlx::Result<Option<Level>> {
    sqlx::query_as::<_, Level>(
        r#"
        UPDATE levels SET name = $2, cycle = $3, sort_order = $4
        WHERE id = $1
        RETURNING id, name, cycle, sort_order
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(cycle)
    .bind(sort_order)
    .fetch_optional(&mut *conn)
    .await
}

/// (chapters, classes) still pointing at the level.
pub async fn level_references<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<(i64, i64)> {
    sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM chapters WHERE level_id = $1),
            (SELECT COUNT(*) FROM classes WHERE level_id = $1)
        "#,
    )
    .bind(id)
    .fetch_one(exec)
    .await
}

// ============================================
// Classes
// ============================================

const CLASS_SELECT: &str = r#"
    SELECT c.id, c.name, c.level_id, c.academic_year_id, lv.cycle
    FROM classes c
    JOIN levels lv ON lv.id = c.level_id
"#;

pub async fn list_classes(pool: &PgPool, year: Option<Uuid>) -> sqlx::Result<Vec<SchoolClass>> {
    sqlx::query_as::<_, SchoolClass>(&format!(
        "{CLASS_SELECT} WHERE ($1::uuid IS NULL OR c.academic_year_id = $1) ORDER BY lv.sort_order, c.name"
    ))
    .bind(year)
    .fetch_all(pool)
    .await
}

pub async fn find_class<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<Option<SchoolClass>> {
    sqlx::query_as::<_, SchoolClass>(&format!("{CLASS_SELECT} WHERE c.id = $1"))
        .bind(id)
        .fetch_optional(exec)
        .await
}

/// (progressions, teacher assignments) still pointing at a class.
pub async fn class_references<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<(i64, i64)> {
    sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM lesson_progressions WHERE class_id = $1),
            (SELECT COUNT(*) FROM teacher_assignments WHERE class_id = $1)
        "#,
    )
    .bind(id)
    .fetch_one(exec)
    .await
}

pub async fn insert_class(conn: &mut PgConnection, name: &str, level_id: Uuid, year: Uuid) -> sqlx::Result<SchoolClass> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO classes (id, name, level_id, academic_year_id) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(name)
        .bind(level_id)
        .bind(year)
        .execute(&mut *conn)
        .await?;
    find_class(&mut *conn, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn update_class(conn: &mut PgConnection, id: Uuid, name: &str, level_id: Uuid) -> sqlx::Result<Option<SchoolClass>> {
    let res = sqlx::query("UPDATE classes SET name = $2, level_id = $3 WHERE id = $1")
        .bind(id)
        .bind(name)
        .bind(level_id)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() == 0 {
        return Ok(None);
    }
    find_class(&mut *conn, id).await
}

// ============================================
// Chapters & elements
// ============================================

pub async fn list_chapters(
    pool: &PgPool,
    subject_id: Option<Uuid>,
    level_id: Option<Uuid>,
) -> sqlx::Result<Vec<Chapter>> {
    sqlx::query_as::<_, Chapter>(
        r#"
        SELECT id, subject_id, level_id, title, sort_order
        FROM chapters
        WHERE ($1::uuid IS NULL OR subject_id = $1)
          AND ($2::uuid IS NULL OR level_id = $2)
        ORDER BY sort_order, title
        "#,
    )
    .bind(subject_id)
    .bind(level_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_chapter(
    conn: &mut PgConnection,
    subject_id: Uuid,
    level_id: Uuid,
    title: &str,
    sort_order: i32,
) -> sqlx::Result<Chapter> {
    sqlx::query_as::<_, Chapter>(
        r#"
        INSERT INTO chapters (id, subject_id, level_id, title, sort_order)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, subject_id, level_id, title, sort_order
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subject_id)
    .bind(level_id)
    .bind(title)
    .bind(sort_order)
    .fetch_one(&mut *conn)
    .await
}

pub async fn update_chapter(conn: &mut PgConnection, id: Uuid, title: &str, sort_order: i32) -> sqlx::Result<Option<Chapter>> {
    sqlx::query_as::<_, Chapter>(
        r#"
        UPDATE chapters SET title = $2, sort_order = $3
        WHERE id = $1
        RETURNING id, subject_id, level_id, title, sort_order
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(sort_order)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn list_elements(pool: &PgPool, chapter_id: Uuid) -> sqlx::Result<Vec<ChapterElement>> {
    sqlx::query_as::<_, ChapterElement>(
        "SELECT id, chapter_id, title, sort_order FROM chapter_elements WHERE chapter_id = $1 ORDER BY sort_order",
    )
    .bind(chapter_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_element(conn: &mut PgConnection, chapter_id: Uuid, title: &str, sort_order: i32) -> sqlx::Result<ChapterElement> {
    sqlx::query_as::<_, ChapterElement>(
        r#"
        INSERT INTO chapter_elements (id, chapter_id, title, sort_order)
        VALUES ($1, $2, $3, $4)
        RETURNING id, chapter_id, title, sort_order
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(chapter_id)
    .bind(title)
    .bind(sort_order)
    .fetch_one(&mut *conn)
    .await
}

/// Ids from `candidates` that are not elements of the chapter.
pub async fn foreign_elements<'e>(
    exec: impl PgExecutor<'e>,
    chapter_id: Uuid,
    candidates: &[Uuid],
) -> sqlx::Result<Vec<Uuid>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_scalar(
        r#"
        SELECT c.id
        FROM UNNEST($2::uuid[]) AS c(id)
        WHERE NOT EXISTS (
            SELECT 1 FROM chapter_elements e WHERE e.id = c.id AND e.chapter_id = $1
        )
        "#,
    )
    .bind(chapter_id)
    .bind(candidates)
    .fetch_all(exec)
    .await
}

pub async fn find_chapter<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<Option<Chapter>> {
    sqlx::query_as::<_, Chapter>("SELECT id, subject_id, level_id, title, sort_order FROM chapters WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

// ============================================
// Lessons
// ============================================

const LESSON_SELECT: &str = r#"
    SELECT l.id, l.chapter_id, l.academic_year_id, l.title, l.planned_date,
           l.planned_duration_minutes, ch.subject_id, ch.level_id
    FROM lessons l
    JOIN chapters ch ON ch.id = l.chapter_id
"#;

pub async fn find_lesson<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<Option<Lesson>> {
    sqlx::query_as::<_, Lesson>(&format!("{LESSON_SELECT} WHERE l.id = $1"))
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn lesson_progression_count<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM lesson_progressions WHERE lesson_id = $1")
        .bind(id)
        .fetch_one(exec)
        .await
}

pub async fn list_lessons(
    pool: &PgPool,
    year: Option<Uuid>,
    subject_id: Option<Uuid>,
    level_id: Option<Uuid>,
) -> sqlx::Result<Vec<Lesson>> {
    sqlx::query_as::<_, Lesson>(&format!(
        r#"
        {LESSON_SELECT}
        WHERE ($1::uuid IS NULL OR l.academic_year_id = $1)
          AND ($2::uuid IS NULL OR ch.subject_id = $2)
          AND ($3::uuid IS NULL OR ch.level_id = $3)
        ORDER BY l.planned_date, ch.sort_order, l.title
        "#
    ))
    .bind(year)
    .bind(subject_id)
    .bind(level_id)
    .fetch_all(pool)
    .await
}

pub struct LessonInput<'a> {
    pub chapter_id: Uuid,
    pub academic_year_id: Uuid,
    pub title: &'a str,
    pub planned_date: NaiveDate,
    pub planned_duration_minutes: i32,
}

pub async fn insert_lesson(conn: &mut PgConnection, input: &LessonInput<'_>) -> sqlx::Result<Lesson> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO lessons (id, chapter_id, academic_year_id, title, planned_date, planned_duration_minutes)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(input.chapter_id)
    .bind(input.academic_year_id)
    .bind(input.title)
    .bind(input.planned_date)
    .bind(input.planned_duration_minutes)
    .execute(&mut *conn)
    .await?;
    find_lesson(&mut *conn, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn update_lesson(conn: &mut PgConnection, id: Uuid, input: &LessonInput<'_>) -> sqlx::Result<Option<Lesson>> {
    let res = sqlx::query(
        r#"
        UPDATE lessons SET chapter_id = $2, academic_year_id = $3, title = $4,
                           planned_date = $5, planned_duration_minutes = $6
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(input.chapter_id)
    .bind(input.academic_year_id)
    .bind(input.title)
    .bind(input.planned_date)
    .bind(input.planned_duration_minutes)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(None);
    }
    find_lesson(&mut *conn, id).await
}

/// Deletes a row from one of the reference tables. Returns rows removed.
pub async fn delete_reference(conn: &mut PgConnection, table: ReferenceTable, id: Uuid) -> sqlx::Result<u64> {
    let res = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table.as_str()))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    Subjects,
    Levels,
    Classes,
    Chapters,
    ChapterElements,
    Lessons,
    AcademicYears,
}

impl ReferenceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceTable::Subjects => "subjects",
            ReferenceTable::Levels => "levels",
            ReferenceTable::Classes => "classes",
            ReferenceTable::Chapters => "chapters",
            ReferenceTable::ChapterElements => "chapter_elements",
            ReferenceTable::Lessons => "lessons",
            ReferenceTable::AcademicYears => "academic_years",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            ReferenceTable::Subjects => "subject",
            ReferenceTable::Levels => "level",
            ReferenceTable::Classes => "class",
            ReferenceTable::Chapters => "chapter",
            ReferenceTable::ChapterElements => "chapter element",
            ReferenceTable::Lessons => "lesson",
            ReferenceTable::AcademicYears => "academic year",
        }
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Teacher,
    Inspector,
    Founder,
    Sg,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Teacher => "teacher",
            UserRole::Inspector => "inspector",
            UserRole::Founder => "founder",
            UserRole::Sg => "sg",
            UserRole::Admin => "admin",
        }
    }
}

impl TryFrom<&str> for UserRole {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "teacher" => Ok(UserRole::Teacher),
            "inspector" => Ok(UserRole::Inspector),
            "founder" => Ok(UserRole::Founder),
            "sg" => Ok(UserRole::Sg),
            "admin" => Ok(UserRole::Admin),
            _ => Err(()),
        }
    }
}

/// Grouping of levels used to scope surveillance staff.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[sqlx(type_name = "school_cycle", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Cycle {
    Maternelle,
    Primaire,
    College,
    Lycee,
}

/// Stored progression state. `delayed` is never stored, see
/// [`crate::domain::progression::effective_status`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "progression_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProgressionStatus {
    Planned,
    Completed,
    Validated,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "session_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Lesson,
    Exercises,
    Control,
    Revision,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "anomaly_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Open,
    InReview,
    Resolved,
    Rejected,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "anomaly_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: Uuid,
    pub label: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: Uuid,
    pub name: String,
    pub cycle: Cycle,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SchoolClass {
    pub id: Uuid,
    pub name: String,
    pub level_id: Uuid,
    pub academic_year_id: Uuid,
    pub cycle: Cycle,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub level_id: Uuid,
    pub title: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChapterElement {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub title: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub academic_year_id: Uuid,
    pub title: String,
    pub planned_date: NaiveDate,
    pub planned_duration_minutes: i32,
    pub subject_id: Uuid,
    pub level_id: Uuid,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAssignment {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub academic_year_id: Uuid,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InspectorAssignment {
    pub id: Uuid,
    pub inspector_id: Uuid,
    pub subject_id: Uuid,
    pub academic_year_id: Uuid,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SgAssignment {
    pub id: Uuid,
    pub sg_id: Uuid,
    pub cycle: Cycle,
    pub academic_year_id: Uuid,
}

/// All assignments a user holds, across years. Scopes filter by year.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSet {
    pub teaching: Vec<TeacherAssignment>,
    pub inspecting: Vec<InspectorAssignment>,
    pub surveilling: Vec<SgAssignment>,
}

impl AssignmentSet {
    /// Keeps only the assignments of `year`; everything is dropped when no
    /// year is in effect.
    pub fn for_year(self, year: Option<Uuid>) -> Self {
        let keep = |y: Uuid| year == Some(y);
        Self {
            teaching: self.teaching.into_iter().filter(|a| keep(a.academic_year_id)).collect(),
            inspecting: self.inspecting.into_iter().filter(|a| keep(a.academic_year_id)).collect(),
            surveilling: self.surveilling.into_iter().filter(|a| keep(a.academic_year_id)).collect(),
        }
    }
}

/// Raw `lesson_progressions` row.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Progression {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub status: ProgressionStatus,
    pub actual_date: Option<NaiveDate>,
    pub actual_duration_minutes: Option<i32>,
    pub notes: Option<String>,
    pub session_type: SessionType,
    pub chapter_elements: Vec<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Progression joined with the curriculum facts needed for visibility and stats.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionView {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub lesson_title: String,
    pub class_id: Uuid,
    pub class_name: String,
    pub cycle: Cycle,
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub chapter_id: Uuid,
    pub academic_year_id: Uuid,
    pub status: ProgressionStatus,
    pub planned_date: NaiveDate,
    pub planned_duration_minutes: i32,
    pub actual_date: Option<NaiveDate>,
    pub actual_duration_minutes: Option<i32>,
    pub session_type: SessionType,
    pub notes: Option<String>,
    pub chapter_elements: Vec<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub teacher_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub lesson_id: Option<Uuid>,
    pub description: String,
    pub severity: AnomalySeverity,
    pub status: AnomalyStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SgReport {
    pub id: Uuid,
    pub sg_id: Uuid,
    pub teacher_id: Uuid,
    pub class_id: Uuid,
    pub session_date: NaiveDate,
    pub observation: String,
    pub students_present: i32,
    pub students_absent: i32,
    pub session_validated: bool,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub message: String,
    pub progression_id: Option<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(UserRole::try_from("SG"), Ok(UserRole::Sg));
        assert_eq!(UserRole::try_from(" Inspector "), Ok(UserRole::Inspector));
        assert!(UserRole::try_from("student").is_err());
    }

    #[test]
    fn assignments_are_narrowed_to_one_year() {
        let (y1, y2) = (Uuid::new_v4(), Uuid::new_v4());
        let teaching = |year| TeacherAssignment {
            id: Uuid::new_v4(),
            teacher_id: Uuid::nil(),
            class_id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            academic_year_id: year,
        };
        let set = AssignmentSet {
            teaching: vec![teaching(y1), teaching(y2), teaching(y1)],
            inspecting: vec![],
            surveilling: vec![SgAssignment {
                id: Uuid::new_v4(),
                sg_id: Uuid::nil(),
                cycle: Cycle::Lycee,
                academic_year_id: y2,
            }],
        };
        let narrowed = set.clone().for_year(Some(y1));
        assert_eq!(narrowed.teaching.len(), 2);
        assert!(narrowed.surveilling.is_empty());

        let none = set.for_year(None);
        assert!(none.teaching.is_empty() && none.surveilling.is_empty());
    }

    #[test]
    fn enums_serialize_in_api_casing() {
        assert_eq!(serde_json::to_string(&UserRole::Founder).unwrap(), "\"founder\"");
        assert_eq!(serde_json::to_string(&AnomalyStatus::InReview).unwrap(), "\"in_review\"");
        assert_eq!(serde_json::to_string(&SessionType::Control).unwrap(), "\"control\"");
    }
}

//! Request-level error type rendered as `{ "message": ..., "details": [...] }`.

use crate::domain::progression::TransitionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("too many requests, try again later")]
    TooManyRequests,
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::from_db(err)
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::Conflict(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Turns constraint violations into client errors; anything else stays a
    /// 500.
    pub fn from_db(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or_default();
            match db_err.code().as_deref() {
                Some("23503") => {
                    let on_delete = db_err.message().starts_with("update or delete");
                    return AppError::BadRequest(describe_foreign_key(constraint, on_delete));
                }
                Some("23505") => return AppError::Conflict(describe_unique(constraint)),
                Some("23514") => {
                    return AppError::BadRequest(format!("value rejected by check constraint {constraint}"))
                }
                _ => {}
            }
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return AppError::NotFound("record");
        }
        AppError::Database(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation(details) => ErrorBody {
                message: "invalid request body".to_string(),
                details: Some(details),
            },
            AppError::Database(e) => {
                tracing::error!("Database failure: {}", e);
                ErrorBody {
                    message: "internal server error".to_string(),
                    details: None,
                }
            }
            AppError::Internal(e) => {
                tracing::error!("Internal failure: {}", e);
                ErrorBody {
                    message: "internal server error".to_string(),
                    details: None,
                }
            }
            other => ErrorBody {
                message: other.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

const TABLES: &[&str] = &[
    "teacher_assignments",
    "inspector_assignments",
    "sg_assignments",
    "lesson_progressions",
    "anomaly_reports",
    "sg_reports",
    "chapter_elements",
    "academic_years",
    "notifications",
    "audit_logs",
    "sessions",
    "chapters",
    "classes",
    "lessons",
    "levels",
    "subjects",
    "users",
];

/// Postgres names FK constraints `<table>_<column>_fkey`. On delete the
/// violating side is the referencing table; on insert it is the missing parent.
pub fn describe_foreign_key(constraint: &str, on_delete: bool) -> String {
    if !on_delete {
        let column = constraint.strip_suffix("_id_fkey").and_then(|rest| {
            TABLES
                .iter()
                .find_map(|table| rest.strip_prefix(table).and_then(|r| r.strip_prefix('_')))
        });
        return match column {
            Some(column) => format!("referenced {} does not exist", column.replace('_', " ")),
            None => "referenced record does not exist".to_string(),
        };
    }
    let message = match constraint {
        "chapters_level_id_fkey" => "level is still referenced by chapters",
        "classes_level_id_fkey" => "level is still referenced by classes",
        "chapters_subject_id_fkey" => "subject is still referenced by chapters",
        "lessons_chapter_id_fkey" => "chapter is still referenced by lessons",
        "classes_academic_year_id_fkey" => "academic year is still referenced by classes",
        "lessons_academic_year_id_fkey" => "academic year is still referenced by lessons",
        "lesson_progressions_lesson_id_fkey" => "lesson is still referenced by progressions",
        "lesson_progressions_class_id_fkey" => "class is still referenced by progressions",
        "sg_reports_class_id_fkey" => "class is still referenced by SG reports",
        "anomaly_reports_class_id_fkey" => "class is still referenced by anomaly reports",
        "anomaly_reports_lesson_id_fkey" => "lesson is still referenced by anomaly reports",
        _ => {
            return match constraint.strip_suffix("_fkey") {
                Some(rest) if !rest.is_empty() => {
                    format!("operation conflicts with existing references ({rest})")
                }
                _ => "operation conflicts with existing references".to_string(),
            }
        }
    };
    message.to_string()
}

pub fn describe_unique(constraint: &str) -> String {
    match constraint {
        "users_username_key" | "users_username_lower_key" => "username already taken".to_string(),
        "subjects_name_key" => "a subject with this name already exists".to_string(),
        "levels_name_key" => "a level with this name already exists".to_string(),
        "academic_years_label_key" => "an academic year with this label already exists".to_string(),
        "classes_name_academic_year_id_key" => {
            "a class with this name already exists for the academic year".to_string()
        }
        "academic_years_single_active" => "another academic year is already active".to_string(),
        "" => "record already exists".to_string(),
        other => format!("record already exists ({other})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_referenced_by_chapter_is_descriptive() {
        assert_eq!(
            describe_foreign_key("chapters_level_id_fkey", true),
            "level is still referenced by chapters"
        );
        assert_eq!(
            describe_foreign_key("notifications_progression_id_fkey", true),
            "operation conflicts with existing references (notifications_progression_id)"
        );
        assert_eq!(describe_foreign_key("", true), "operation conflicts with existing references");
    }

    #[test]
    fn progression_history_blocks_lesson_and_class_deletion() {
        assert_eq!(
            describe_foreign_key("lesson_progressions_lesson_id_fkey", true),
            "lesson is still referenced by progressions"
        );
        assert_eq!(
            describe_foreign_key("lesson_progressions_class_id_fkey", true),
            "class is still referenced by progressions"
        );
        assert_eq!(
            describe_foreign_key("sg_reports_class_id_fkey", true),
            "class is still referenced by SG reports"
        );
        assert_eq!(
            describe_foreign_key("anomaly_reports_lesson_id_fkey", true),
            "lesson is still referenced by anomaly reports"
        );
    }

    #[test]
    fn missing_parent_on_insert_is_named() {
        assert_eq!(
            describe_foreign_key("classes_level_id_fkey", false),
            "referenced level does not exist"
        );
        assert_eq!(
            describe_foreign_key("lessons_academic_year_id_fkey", false),
            "referenced academic year does not exist"
        );
        assert_eq!(
            describe_foreign_key("teacher_assignments_subject_id_fkey", false),
            "referenced subject does not exist"
        );
        assert_eq!(describe_foreign_key("weird", false), "referenced record does not exist");
    }

    #[test]
    fn statuses_follow_categories() {
        assert_eq!(AppError::Validation(vec![]).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("lesson").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(TransitionError::AlreadyValidated).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from_db(sqlx::Error::RowNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from_db(sqlx::Error::PoolTimedOut).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unique_violations_are_named() {
        assert_eq!(describe_unique("users_username_key"), "username already taken");
        assert_eq!(describe_unique("users_username_lower_key"), "username already taken");
        assert_eq!(describe_unique(""), "record already exists");
    }
}

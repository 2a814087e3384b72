//! Lesson progression lifecycle.
//!
//! Stored states move `planned -> completed -> validated`. The only backwards
//! edge is an explicit reopen (`validated -> completed`). `delayed` is derived
//! from the planned date and never written.

use crate::domain::models::{ProgressionStatus, SessionType};
use crate::time_utils::format_signed_duration;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MAX_SESSION_MINUTES: i32 = 600;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Planned,
    Delayed,
    Completed,
    Validated,
}

/// The single place where "delayed" is decided. Every view goes through here.
pub fn effective_status(
    status: ProgressionStatus,
    planned_date: NaiveDate,
    today: NaiveDate,
) -> EffectiveStatus {
    match status {
        ProgressionStatus::Planned if planned_date < today => EffectiveStatus::Delayed,
        ProgressionStatus::Planned => EffectiveStatus::Planned,
        ProgressionStatus::Completed => EffectiveStatus::Completed,
        ProgressionStatus::Validated => EffectiveStatus::Validated,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("progression is validated; it must be reopened before it can be edited")]
    AlreadyValidated,
    #[error("only completed progressions can be validated (current status: {0:?})")]
    NotCompleted(ProgressionStatus),
    #[error("only validated progressions can be reopened (current status: {0:?})")]
    NotValidated(ProgressionStatus),
}

/// What a "mark completed" call does to the row keyed by (lesson, class, teacher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPlan {
    Insert,
    /// Overwrite the delivery fields of the existing row and set it completed.
    Update { previous: ProgressionStatus },
}

pub fn plan_completion(
    existing: Option<ProgressionStatus>,
) -> Result<CompletionPlan, TransitionError> {
    match existing {
        None => Ok(CompletionPlan::Insert),
        Some(ProgressionStatus::Validated) => Err(TransitionError::AlreadyValidated),
        Some(previous) => Ok(CompletionPlan::Update { previous }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningOutcome {
    Insert,
    /// Row exists; planning never touches it.
    Unchanged(ProgressionStatus),
}

pub fn plan_planning(existing: Option<ProgressionStatus>) -> PlanningOutcome {
    match existing {
        None => PlanningOutcome::Insert,
        Some(status) => PlanningOutcome::Unchanged(status),
    }
}

pub fn check_validation(current: ProgressionStatus) -> Result<(), TransitionError> {
    match current {
        ProgressionStatus::Completed => Ok(()),
        other => Err(TransitionError::NotCompleted(other)),
    }
}

pub fn check_reopen(current: ProgressionStatus) -> Result<(), TransitionError> {
    match current {
        ProgressionStatus::Validated => Ok(()),
        other => Err(TransitionError::NotValidated(other)),
    }
}

/// Session type to store on completion: explicit input wins, otherwise the
/// type chosen when the lesson was planned is kept.
pub fn resolve_session_type(
    requested: Option<SessionType>,
    existing: Option<SessionType>,
) -> SessionType {
    requested.or(existing).unwrap_or_default()
}

/// Planned minus actual. Positive means time left over.
pub fn reliquat_minutes(planned_minutes: i32, actual_minutes: i32) -> i32 {
    planned_minutes - actual_minutes
}

pub fn format_reliquat(planned_minutes: i32, actual_minutes: Option<i32>) -> Option<String> {
    actual_minutes.map(|actual| format_signed_duration(reliquat_minutes(planned_minutes, actual)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn planned_in_the_past_is_delayed() {
        let today = date(2025, 3, 10);
        assert_eq!(
            effective_status(ProgressionStatus::Planned, date(2025, 3, 9), today),
            EffectiveStatus::Delayed
        );
        assert_eq!(
            effective_status(ProgressionStatus::Planned, today, today),
            EffectiveStatus::Planned
        );
        assert_eq!(
            effective_status(ProgressionStatus::Completed, date(2024, 1, 1), today),
            EffectiveStatus::Completed
        );
    }

    #[test]
    fn repeated_completion_updates_the_same_row() {
        assert_eq!(plan_completion(None), Ok(CompletionPlan::Insert));
        assert_eq!(
            plan_completion(Some(ProgressionStatus::Planned)),
            Ok(CompletionPlan::Update { previous: ProgressionStatus::Planned })
        );
        // second call for the same triple never asks for another insert
        assert_eq!(
            plan_completion(Some(ProgressionStatus::Completed)),
            Ok(CompletionPlan::Update { previous: ProgressionStatus::Completed })
        );
    }

    #[test]
    fn validated_progression_does_not_silently_revert() {
        assert_eq!(
            plan_completion(Some(ProgressionStatus::Validated)),
            Err(TransitionError::AlreadyValidated)
        );
        assert!(check_reopen(ProgressionStatus::Validated).is_ok());
        // after reopen the row is completed again and can be edited
        assert!(plan_completion(Some(ProgressionStatus::Completed)).is_ok());
    }

    #[test]
    fn validation_requires_completed() {
        assert!(check_validation(ProgressionStatus::Completed).is_ok());
        assert_eq!(
            check_validation(ProgressionStatus::Planned),
            Err(TransitionError::NotCompleted(ProgressionStatus::Planned))
        );
        assert_eq!(
            check_validation(ProgressionStatus::Validated),
            Err(TransitionError::NotCompleted(ProgressionStatus::Validated))
        );
    }

    #[test]
    fn reopen_requires_validated() {
        assert_eq!(
            check_reopen(ProgressionStatus::Completed),
            Err(TransitionError::NotValidated(ProgressionStatus::Completed))
        );
    }

    #[test]
    fn planning_never_downgrades() {
        assert_eq!(plan_planning(None), PlanningOutcome::Insert);
        assert_eq!(
            plan_planning(Some(ProgressionStatus::Validated)),
            PlanningOutcome::Unchanged(ProgressionStatus::Validated)
        );
    }

    #[test]
    fn session_type_falls_back_to_planned_type() {
        assert_eq!(resolve_session_type(None, Some(SessionType::Control)), SessionType::Control);
        assert_eq!(
            resolve_session_type(Some(SessionType::Revision), Some(SessionType::Control)),
            SessionType::Revision
        );
        assert_eq!(resolve_session_type(None, None), SessionType::Lesson);
    }

    #[test]
    fn reliquat_for_shorter_session() {
        // 55 planned, 50 delivered
        assert_eq!(reliquat_minutes(55, 50), 5);
        assert_eq!(format_reliquat(55, Some(50)).as_deref(), Some("+0h05"));
        assert_eq!(format_reliquat(60, Some(130)).as_deref(), Some("-1h10"));
        assert_eq!(format_reliquat(60, None), None);
    }
}

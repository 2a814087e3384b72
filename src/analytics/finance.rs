//! Founder-facing salary projections from hourly rates.

use crate::domain::models::{ProgressionStatus, ProgressionView};
use crate::time_utils::minutes_to_hours;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeacherFinance {
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub hourly_rate_cents: Option<i64>,
    pub planned_hours: f64,
    pub actual_hours: f64,
    /// Delivered hours times rate.
    pub earned_cents: i64,
    /// Planned hours times rate.
    pub projected_cents: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinanceSummary {
    pub teachers: Vec<TeacherFinance>,
    pub total_earned_cents: i64,
    pub total_projected_cents: i64,
    /// Teachers with progressions but no rate on file.
    pub missing_rates: Vec<Uuid>,
}

/// `minutes * rate / 60`, rounded half away from zero.
pub fn amount_for_minutes(minutes: i64, rate_cents: i64) -> i64 {
    let numerator = minutes * rate_cents;
    (numerator + 30) / 60
}

pub fn finance_summary(
    rows: &[ProgressionView],
    hourly_rates: &HashMap<Uuid, Option<i64>>,
) -> FinanceSummary {
    #[derive(Default)]
    struct Acc {
        name: String,
        planned: i64,
        actual: i64,
    }

    let mut per_teacher: BTreeMap<Uuid, Acc> = BTreeMap::new();
    for row in rows {
        let acc = per_teacher.entry(row.teacher_id).or_default();
        if acc.name.is_empty() {
            acc.name = row.teacher_name.clone();
        }
        acc.planned += i64::from(row.planned_duration_minutes);
        if matches!(row.status, ProgressionStatus::Completed | ProgressionStatus::Validated) {
            acc.actual += i64::from(row.actual_duration_minutes.unwrap_or(0));
        }
    }

    let mut summary = FinanceSummary::default();
    for (teacher_id, acc) in per_teacher {
        let rate = hourly_rates.get(&teacher_id).copied().flatten();
        let (earned, projected) = match rate {
            Some(r) => (amount_for_minutes(acc.actual, r), amount_for_minutes(acc.planned, r)),
            None => {
                summary.missing_rates.push(teacher_id);
                (0, 0)
            }
        };
        summary.total_earned_cents += earned;
        summary.total_projected_cents += projected;
        summary.teachers.push(TeacherFinance {
            teacher_id,
            teacher_name: acc.name,
            hourly_rate_cents: rate,
            planned_hours: minutes_to_hours(acc.planned),
            actual_hours: minutes_to_hours(acc.actual),
            earned_cents: earned,
            projected_cents: projected,
        });
    }
    summary.teachers.sort_by(|a, b| b.earned_cents.cmp(&a.earned_cents));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::stats::fixtures::row;
    use crate::domain::models::SessionType;
    use chrono::NaiveDate;

    #[test]
    fn amounts_round_to_the_cent() {
        // 50 minutes at 120.00/h
        assert_eq!(amount_for_minutes(50, 12_000), 10_000);
        // 1 minute at 1.00/h is 1.67 cents
        assert_eq!(amount_for_minutes(1, 100), 2);
        assert_eq!(amount_for_minutes(0, 5_000), 0);
    }

    #[test]
    fn earned_counts_only_delivered_sessions() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            row(a, ProgressionStatus::Validated, day, 60, Some(60), SessionType::Lesson),
            row(a, ProgressionStatus::Planned, day, 60, None, SessionType::Lesson),
            row(b, ProgressionStatus::Completed, day, 30, Some(30), SessionType::Control),
        ];
        let rates = HashMap::from([(a, Some(10_000)), (b, None)]);
        let summary = finance_summary(&rows, &rates);

        assert_eq!(summary.teachers.len(), 2);
        let first = &summary.teachers[0];
        assert_eq!(first.teacher_id, a);
        assert_eq!(first.earned_cents, 10_000);
        assert_eq!(first.projected_cents, 20_000);
        assert_eq!(first.planned_hours, 2.0);
        assert_eq!(summary.total_earned_cents, 10_000);
        assert_eq!(summary.missing_rates, vec![b]);
    }
}

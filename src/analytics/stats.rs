//! Aggregates over an already scope-filtered progression set.

use crate::domain::models::{ProgressionStatus, ProgressionView, SessionType};
use crate::domain::progression::{effective_status, EffectiveStatus};
use crate::time_utils::minutes_to_hours;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionStats {
    /// Rows that exist; lessons never touched by a teacher are not counted.
    pub total_lessons: i64,
    pub completed_lessons: i64,
    pub validated_lessons: i64,
    pub delayed_lessons: i64,
    pub total_planned_hours: f64,
    pub total_actual_hours: f64,
    pub completion_rate: f64,
}

pub fn compute_stats(
    rows: &[ProgressionView],
    teacher_id: Option<Uuid>,
    today: NaiveDate,
) -> ProgressionStats {
    let mut stats = ProgressionStats::default();
    let mut planned_minutes: i64 = 0;
    let mut actual_minutes: i64 = 0;

    for row in rows
        .iter()
        .filter(|r| teacher_id.map_or(true, |t| r.teacher_id == t))
    {
        stats.total_lessons += 1;
        match effective_status(row.status, row.planned_date, today) {
            EffectiveStatus::Completed => stats.completed_lessons += 1,
            EffectiveStatus::Validated => {
                stats.completed_lessons += 1;
                stats.validated_lessons += 1;
            }
            EffectiveStatus::Delayed => stats.delayed_lessons += 1,
            EffectiveStatus::Planned => {}
        }
        planned_minutes += i64::from(row.planned_duration_minutes);
        actual_minutes += i64::from(row.actual_duration_minutes.unwrap_or(0));
    }

    stats.total_planned_hours = minutes_to_hours(planned_minutes);
    stats.total_actual_hours = minutes_to_hours(actual_minutes);
    stats.completion_rate = percentage(stats.completed_lessons, stats.total_lessons);
    stats
}

pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    let raw = part as f64 * 100.0 / whole as f64;
    (raw * 10.0).round() / 10.0
}

fn is_done(status: ProgressionStatus) -> bool {
    matches!(status, ProgressionStatus::Completed | ProgressionStatus::Validated)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherReport {
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub stats: ProgressionStats,
    pub planned_controls: i64,
    pub completed_controls: i64,
    pub actual_hours_by_session_type: BTreeMap<String, f64>,
}

/// Control counts come from the recorded session type, not from ratios.
pub fn control_counts(rows: &[&ProgressionView]) -> (i64, i64) {
    rows.iter()
        .filter(|r| r.session_type == SessionType::Control)
        .fold((0, 0), |(planned, done), r| {
            (planned + 1, done + i64::from(is_done(r.status)))
        })
}

fn session_type_key(session_type: SessionType) -> &'static str {
    match session_type {
        SessionType::Lesson => "lesson",
        SessionType::Exercises => "exercises",
        SessionType::Control => "control",
        SessionType::Revision => "revision",
    }
}

pub fn teacher_reports(rows: &[ProgressionView], today: NaiveDate) -> Vec<TeacherReport> {
    let mut by_teacher: BTreeMap<Uuid, Vec<&ProgressionView>> = BTreeMap::new();
    for row in rows {
        by_teacher.entry(row.teacher_id).or_default().push(row);
    }

    let mut reports: Vec<TeacherReport> = by_teacher
        .into_iter()
        .map(|(teacher_id, group)| {
            let owned: Vec<ProgressionView> = group.iter().map(|r| (*r).clone()).collect();
            let (planned_controls, completed_controls) = control_counts(&group);

            let mut minutes: BTreeMap<String, i64> = BTreeMap::new();
            for row in group.iter().filter(|r| is_done(r.status)) {
                *minutes
                    .entry(session_type_key(row.session_type).to_string())
                    .or_default() += i64::from(row.actual_duration_minutes.unwrap_or(0));
            }

            TeacherReport {
                teacher_id,
                teacher_name: group[0].teacher_name.clone(),
                stats: compute_stats(&owned, None, today),
                planned_controls,
                completed_controls,
                actual_hours_by_session_type: minutes
                    .into_iter()
                    .map(|(k, v)| (k, minutes_to_hours(v)))
                    .collect(),
            }
        })
        .collect();

    reports.sort_by(|a, b| a.teacher_name.cmp(&b.teacher_name));
    reports
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionBreakdown {
    pub id: Uuid,
    pub name: String,
    pub total: i64,
    pub completed: i64,
    pub completion_rate: f64,
}

fn breakdown<F>(rows: &[ProgressionView], key: F) -> Vec<CompletionBreakdown>
where
    F: Fn(&ProgressionView) -> (Uuid, &str),
{
    let mut groups: BTreeMap<Uuid, CompletionBreakdown> = BTreeMap::new();
    for row in rows {
        let (id, name) = key(row);
        let entry = groups.entry(id).or_insert_with(|| CompletionBreakdown {
            id,
            name: name.to_string(),
            total: 0,
            completed: 0,
            completion_rate: 0.0,
        });
        entry.total += 1;
        entry.completed += i64::from(is_done(row.status));
    }
    let mut out: Vec<CompletionBreakdown> = groups
        .into_values()
        .map(|mut b| {
            b.completion_rate = percentage(b.completed, b.total);
            b
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

pub fn by_subject(rows: &[ProgressionView]) -> Vec<CompletionBreakdown> {
    breakdown(rows, |r| (r.subject_id, r.subject_name.as_str()))
}

pub fn by_class(rows: &[ProgressionView]) -> Vec<CompletionBreakdown> {
    breakdown(rows, |r| (r.class_id, r.class_name.as_str()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::models::Cycle;

    pub fn row(
        teacher_id: Uuid,
        status: ProgressionStatus,
        planned_date: NaiveDate,
        planned: i32,
        actual: Option<i32>,
        session_type: SessionType,
    ) -> ProgressionView {
        ProgressionView {
            id: Uuid::new_v4(),
            lesson_id: Uuid::new_v4(),
            lesson_title: "Lesson".into(),
            class_id: Uuid::nil(),
            class_name: "5e B".into(),
            cycle: Cycle::College,
            teacher_id,
            teacher_name: format!("teacher-{}", &teacher_id.to_string()[..4]),
            subject_id: Uuid::nil(),
            subject_name: "Français".into(),
            chapter_id: Uuid::new_v4(),
            academic_year_id: Uuid::nil(),
            status,
            planned_date,
            planned_duration_minutes: planned,
            actual_date: None,
            actual_duration_minutes: actual,
            session_type,
            notes: None,
            chapter_elements: vec![],
            completed_at: None,
            validated_by: None,
            validated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::row;
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, day).unwrap()
    }

    #[test]
    fn stats_count_each_status_once() {
        let t = Uuid::new_v4();
        let today = d(15);
        let rows = vec![
            row(t, ProgressionStatus::Completed, d(1), 60, Some(50), SessionType::Lesson),
            row(t, ProgressionStatus::Validated, d(2), 60, Some(60), SessionType::Lesson),
            row(t, ProgressionStatus::Planned, d(3), 60, None, SessionType::Lesson),
            row(t, ProgressionStatus::Planned, d(20), 60, None, SessionType::Lesson),
        ];
        let stats = compute_stats(&rows, Some(t), today);
        assert_eq!(stats.total_lessons, 4);
        assert_eq!(stats.completed_lessons, 2);
        assert_eq!(stats.validated_lessons, 1);
        assert_eq!(stats.delayed_lessons, 1);
        assert_eq!(stats.total_planned_hours, 4.0);
        assert!((stats.total_actual_hours - 110.0 / 60.0).abs() < 1e-9);
        assert_eq!(stats.completion_rate, 50.0);
    }

    #[test]
    fn completed_never_exceeds_total() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            row(a, ProgressionStatus::Validated, d(1), 45, Some(45), SessionType::Lesson),
            row(b, ProgressionStatus::Completed, d(1), 45, Some(40), SessionType::Lesson),
            row(b, ProgressionStatus::Validated, d(1), 45, Some(40), SessionType::Lesson),
        ];
        for filter in [None, Some(a), Some(b), Some(Uuid::new_v4())] {
            let stats = compute_stats(&rows, filter, d(10));
            assert!(stats.completed_lessons <= stats.total_lessons);
            assert!(stats.validated_lessons <= stats.completed_lessons);
        }
        assert_eq!(compute_stats(&rows, Some(b), d(10)).total_lessons, 2);
    }

    #[test]
    fn empty_set_has_zero_rate() {
        let stats = compute_stats(&[], None, d(1));
        assert_eq!(stats, ProgressionStats::default());
    }

    #[test]
    fn controls_come_from_session_type() {
        let t = Uuid::new_v4();
        let rows = vec![
            row(t, ProgressionStatus::Planned, d(20), 55, None, SessionType::Control),
            row(t, ProgressionStatus::Validated, d(1), 55, Some(55), SessionType::Control),
            row(t, ProgressionStatus::Completed, d(1), 55, Some(50), SessionType::Exercises),
            row(t, ProgressionStatus::Completed, d(1), 55, Some(30), SessionType::Lesson),
        ];
        let reports = teacher_reports(&rows, d(10));
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.planned_controls, 2);
        assert_eq!(report.completed_controls, 1);
        assert_eq!(report.actual_hours_by_session_type.get("exercises"), Some(&(50.0 / 60.0)));
        assert_eq!(report.actual_hours_by_session_type.get("control"), Some(&(55.0 / 60.0)));
        assert_eq!(report.stats.completed_lessons, 3);
    }

    #[test]
    fn breakdown_groups_by_subject() {
        let t = Uuid::new_v4();
        let mut other = row(t, ProgressionStatus::Planned, d(20), 55, None, SessionType::Lesson);
        other.subject_id = Uuid::new_v4();
        other.subject_name = "Arabe".into();
        let rows = vec![
            row(t, ProgressionStatus::Completed, d(1), 55, Some(55), SessionType::Lesson),
            row(t, ProgressionStatus::Planned, d(20), 55, None, SessionType::Lesson),
            other,
        ];
        let subjects = by_subject(&rows);
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].name, "Arabe");
        assert_eq!(subjects[0].completion_rate, 0.0);
        assert_eq!(subjects[1].total, 2);
        assert_eq!(subjects[1].completion_rate, 50.0);
        assert_eq!(by_class(&rows).len(), 1);
    }

    #[test]
    fn percentage_rounds_to_one_decimal() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(0, 0), 0.0);
    }
}

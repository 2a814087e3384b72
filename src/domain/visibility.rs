//! Role-indexed visibility rules.
//!
//! An [`AccessScope`] is built once per request from the requester's
//! assignments for the academic year in effect. Visibility is the union over
//! all of those assignments; assignments of other years never contribute.

use crate::domain::models::{AssignmentSet, Cycle, ProgressionView, SchoolClass, UserRole};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// One (teacher, class, subject) teaching assignment of the year, with the
/// class cycle resolved.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeachingFact {
    pub teacher_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub cycle: Cycle,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: UserRole,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    Teacher {
        teacher_id: Uuid,
        /// (class_id, subject_id)
        pairs: HashSet<(Uuid, Uuid)>,
    },
    Inspector {
        inspector_id: Uuid,
        subjects: HashSet<Uuid>,
    },
    Sg {
        sg_id: Uuid,
        cycles: HashSet<Cycle>,
    },
    Founder,
    Admin,
}

impl AccessScope {
    /// `year` is `None` when no academic year is active: every
    /// assignment-based scope is then empty.
    pub fn build(user_id: Uuid, role: UserRole, assignments: &AssignmentSet, year: Option<Uuid>) -> Self {
        let in_year = |y: Uuid| year == Some(y);
        match role {
            UserRole::Teacher => AccessScope::Teacher {
                teacher_id: user_id,
                pairs: assignments
                    .teaching
                    .iter()
                    .filter(|a| a.teacher_id == user_id && in_year(a.academic_year_id))
                    .map(|a| (a.class_id, a.subject_id))
                    .collect(),
            },
            UserRole::Inspector => AccessScope::Inspector {
                inspector_id: user_id,
                subjects: assignments
                    .inspecting
                    .iter()
                    .filter(|a| a.inspector_id == user_id && in_year(a.academic_year_id))
                    .map(|a| a.subject_id)
                    .collect(),
            },
            UserRole::Sg => AccessScope::Sg {
                sg_id: user_id,
                cycles: assignments
                    .surveilling
                    .iter()
                    .filter(|a| a.sg_id == user_id && in_year(a.academic_year_id))
                    .map(|a| a.cycle)
                    .collect(),
            },
            UserRole::Founder => AccessScope::Founder,
            UserRole::Admin => AccessScope::Admin,
        }
    }

    /// Teacher-only write check on a (class, subject) pair.
    pub fn can_act_on(&self, class_id: Uuid, subject_id: Uuid) -> bool {
        match self {
            AccessScope::Teacher { pairs, .. } => pairs.contains(&(class_id, subject_id)),
            _ => false,
        }
    }

    /// Inspector-only: may validate or reopen progressions of this subject.
    pub fn can_validate_subject(&self, subject_id: Uuid) -> bool {
        match self {
            AccessScope::Inspector { subjects, .. } => subjects.contains(&subject_id),
            _ => false,
        }
    }

    pub fn can_observe_cycle(&self, cycle: Cycle) -> bool {
        match self {
            AccessScope::Sg { cycles, .. } => cycles.contains(&cycle),
            AccessScope::Founder | AccessScope::Admin => true,
            _ => false,
        }
    }

    pub fn can_view_progression(&self, progression: &ProgressionView) -> bool {
        match self {
            AccessScope::Teacher { teacher_id, .. } => progression.teacher_id == *teacher_id,
            AccessScope::Inspector { subjects, .. } => subjects.contains(&progression.subject_id),
            AccessScope::Sg { cycles, .. } => cycles.contains(&progression.cycle),
            AccessScope::Founder | AccessScope::Admin => true,
        }
    }

    pub fn filter_progressions(&self, rows: Vec<ProgressionView>) -> Vec<ProgressionView> {
        rows.into_iter()
            .filter(|p| self.can_view_progression(p))
            .collect()
    }

    /// Teachers visible through the year's teaching facts.
    pub fn visible_teacher_ids(&self, facts: &[TeachingFact]) -> Option<HashSet<Uuid>> {
        match self {
            AccessScope::Teacher { teacher_id, .. } => Some(HashSet::from([*teacher_id])),
            AccessScope::Inspector { subjects, .. } => Some(
                facts
                    .iter()
                    .filter(|f| subjects.contains(&f.subject_id))
                    .map(|f| f.teacher_id)
                    .collect(),
            ),
            AccessScope::Sg { cycles, .. } => Some(
                facts
                    .iter()
                    .filter(|f| cycles.contains(&f.cycle))
                    .map(|f| f.teacher_id)
                    .collect(),
            ),
            // None means unrestricted
            AccessScope::Founder | AccessScope::Admin => None,
        }
    }

    pub fn filter_users(&self, users: Vec<UserSummary>, facts: &[TeachingFact]) -> Vec<UserSummary> {
        match self.visible_teacher_ids(facts) {
            None => users,
            Some(ids) => users.into_iter().filter(|u| ids.contains(&u.id)).collect(),
        }
    }

    pub fn can_view_class(&self, class: &SchoolClass, facts: &[TeachingFact]) -> bool {
        match self {
            AccessScope::Teacher { pairs, .. } => pairs.iter().any(|(c, _)| *c == class.id),
            AccessScope::Inspector { subjects, .. } => facts
                .iter()
                .any(|f| f.class_id == class.id && subjects.contains(&f.subject_id)),
            AccessScope::Sg { cycles, .. } => cycles.contains(&class.cycle),
            AccessScope::Founder | AccessScope::Admin => true,
        }
    }

    pub fn filter_classes(&self, classes: Vec<SchoolClass>, facts: &[TeachingFact]) -> Vec<SchoolClass> {
        classes
            .into_iter()
            .filter(|c| self.can_view_class(c, facts))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        InspectorAssignment, ProgressionStatus, SessionType, SgAssignment, TeacherAssignment,
    };
    use chrono::NaiveDate;

    fn view(teacher_id: Uuid, subject_id: Uuid, cycle: Cycle) -> ProgressionView {
        ProgressionView {
            id: Uuid::new_v4(),
            lesson_id: Uuid::new_v4(),
            lesson_title: "Fractions".into(),
            class_id: Uuid::new_v4(),
            class_name: "6e A".into(),
            cycle,
            teacher_id,
            teacher_name: "T".into(),
            subject_id,
            subject_name: "Maths".into(),
            chapter_id: Uuid::new_v4(),
            academic_year_id: Uuid::new_v4(),
            status: ProgressionStatus::Completed,
            planned_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            planned_duration_minutes: 55,
            actual_date: None,
            actual_duration_minutes: Some(50),
            session_type: SessionType::Lesson,
            notes: None,
            chapter_elements: vec![],
            completed_at: None,
            validated_by: None,
            validated_at: None,
        }
    }

    fn summary(id: Uuid, role: UserRole) -> UserSummary {
        UserSummary {
            id,
            username: id.to_string(),
            display_name: "x".into(),
            role,
            is_active: true,
        }
    }

    #[test]
    fn teacher_without_assignment_can_act_on_nothing() {
        let teacher = Uuid::new_v4();
        let scope = AccessScope::build(teacher, UserRole::Teacher, &AssignmentSet::default(), Some(Uuid::new_v4()));
        assert_eq!(
            scope,
            AccessScope::Teacher { teacher_id: teacher, pairs: HashSet::new() }
        );
        assert!(!scope.can_act_on(Uuid::new_v4(), Uuid::new_v4()));
    }

    #[test]
    fn teacher_scope_is_union_of_year_assignments() {
        let teacher = Uuid::new_v4();
        let year = Uuid::new_v4();
        let other_year = Uuid::new_v4();
        let (c1, c2, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let assign = |class_id, subject_id, academic_year_id| TeacherAssignment {
            id: Uuid::new_v4(),
            teacher_id: teacher,
            class_id,
            subject_id,
            academic_year_id,
        };
        let set = AssignmentSet {
            teaching: vec![assign(c1, s1, year), assign(c2, s2, year), assign(c1, s2, other_year)],
            ..Default::default()
        };
        let scope = AccessScope::build(teacher, UserRole::Teacher, &set, Some(year));
        assert!(scope.can_act_on(c1, s1));
        assert!(scope.can_act_on(c2, s2));
        assert!(!scope.can_act_on(c1, s2));
    }

    #[test]
    fn inspector_only_sees_assigned_subject() {
        let inspector = Uuid::new_v4();
        let year = Uuid::new_v4();
        let (maths, physics) = (Uuid::new_v4(), Uuid::new_v4());
        let set = AssignmentSet {
            inspecting: vec![InspectorAssignment {
                id: Uuid::new_v4(),
                inspector_id: inspector,
                subject_id: maths,
                academic_year_id: year,
            }],
            ..Default::default()
        };
        let scope = AccessScope::build(inspector, UserRole::Inspector, &set, Some(year));
        let teacher = Uuid::new_v4();
        let rows = vec![
            view(teacher, maths, Cycle::College),
            view(teacher, physics, Cycle::College),
            view(Uuid::new_v4(), maths, Cycle::Lycee),
        ];
        let visible = scope.filter_progressions(rows);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|p| p.subject_id == maths));
        assert!(scope.can_validate_subject(maths));
        assert!(!scope.can_validate_subject(physics));
    }

    #[test]
    fn new_year_without_reassignment_yields_no_teachers() {
        let inspector = Uuid::new_v4();
        let (last_year, this_year) = (Uuid::new_v4(), Uuid::new_v4());
        let maths = Uuid::new_v4();
        let teacher = Uuid::new_v4();
        let set = AssignmentSet {
            inspecting: vec![InspectorAssignment {
                id: Uuid::new_v4(),
                inspector_id: inspector,
                subject_id: maths,
                academic_year_id: last_year,
            }],
            ..Default::default()
        };
        let facts = vec![TeachingFact {
            teacher_id: teacher,
            class_id: Uuid::new_v4(),
            subject_id: maths,
            cycle: Cycle::College,
        }];
        let users = vec![summary(teacher, UserRole::Teacher)];

        let previous = AccessScope::build(inspector, UserRole::Inspector, &set, Some(last_year));
        assert_eq!(previous.filter_users(users.clone(), &facts).len(), 1);

        let current = AccessScope::build(inspector, UserRole::Inspector, &set, Some(this_year));
        assert!(current.filter_users(users, &facts).is_empty());
    }

    #[test]
    fn sg_sees_teachers_and_classes_of_assigned_cycles() {
        let sg = Uuid::new_v4();
        let year = Uuid::new_v4();
        let set = AssignmentSet {
            surveilling: vec![
                SgAssignment { id: Uuid::new_v4(), sg_id: sg, cycle: Cycle::College, academic_year_id: year },
                SgAssignment { id: Uuid::new_v4(), sg_id: sg, cycle: Cycle::Lycee, academic_year_id: year },
            ],
            ..Default::default()
        };
        let scope = AccessScope::build(sg, UserRole::Sg, &set, Some(year));
        let (t_college, t_primaire) = (Uuid::new_v4(), Uuid::new_v4());
        let facts = vec![
            TeachingFact { teacher_id: t_college, class_id: Uuid::new_v4(), subject_id: Uuid::new_v4(), cycle: Cycle::College },
            TeachingFact { teacher_id: t_primaire, class_id: Uuid::new_v4(), subject_id: Uuid::new_v4(), cycle: Cycle::Primaire },
        ];
        let users = vec![summary(t_college, UserRole::Teacher), summary(t_primaire, UserRole::Teacher)];
        let visible = scope.filter_users(users, &facts);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, t_college);

        let class = |cycle| SchoolClass {
            id: Uuid::new_v4(),
            name: "c".into(),
            level_id: Uuid::new_v4(),
            academic_year_id: year,
            cycle,
        };
        let classes = scope.filter_classes(vec![class(Cycle::Lycee), class(Cycle::Maternelle)], &facts);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].cycle, Cycle::Lycee);
    }

    #[test]
    fn teacher_only_sees_self() {
        let me = Uuid::new_v4();
        let scope = AccessScope::build(me, UserRole::Teacher, &AssignmentSet::default(), None);
        let users = vec![summary(me, UserRole::Teacher), summary(Uuid::new_v4(), UserRole::Teacher)];
        let visible = scope.filter_users(users, &[]);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, me);
        let rows = vec![view(me, Uuid::new_v4(), Cycle::College), view(Uuid::new_v4(), Uuid::new_v4(), Cycle::College)];
        assert_eq!(scope.filter_progressions(rows).len(), 1);
    }

    #[test]
    fn founder_and_admin_see_all() {
        let rows = vec![view(Uuid::new_v4(), Uuid::new_v4(), Cycle::Maternelle)];
        for role in [UserRole::Founder, UserRole::Admin] {
            let scope = AccessScope::build(Uuid::new_v4(), role, &AssignmentSet::default(), None);
            assert!(scope.can_observe_cycle(Cycle::Maternelle));
            assert_eq!(scope.filter_progressions(rows.clone()).len(), 1);
            assert!(!scope.can_act_on(Uuid::new_v4(), Uuid::new_v4()));
        }
    }
}

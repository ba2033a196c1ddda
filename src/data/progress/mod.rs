use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::course::{CourseModule, Lesson};

pub mod db;

pub static LESSON_PROGRESS_COLLECTION_NAME: &str = "lesson.progress";

/// One learner's completion state for one lesson. Written only by the
/// learner's own playback/completion actions, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonProgress {
    pub learner_id: Uuid,
    pub lesson_id: Uuid,
    /// Denormalized so a course's completed set is one query.
    pub course_id: Uuid,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watched_seconds: Option<u32>,
}

/// Rounded percentage of `total` lessons completed, half-up so 12.5% shows
/// as 13 rather than flickering between renderings.
fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((200 * completed + total) / (2 * total)) as u8
}

/// Course completion percentage over the lessons *currently* in the tree.
///
/// Completed ids for lessons that were since removed don't count in either
/// direction, so percentages never exceed 100 or dip below what the learner
/// actually finished.
pub fn course_progress(modules: &[CourseModule], completed: &HashSet<Uuid>) -> u8 {
    let lessons: Vec<&Lesson> = modules.iter().flat_map(|m| m.lessons.iter()).collect();
    let done = lessons.iter().filter(|l| completed.contains(&l.id)).count();
    percent(done, lessons.len())
}

/// Completion percentage scoped to a single module's lesson list.
pub fn module_progress(lessons: &[Lesson], completed: &HashSet<Uuid>) -> u8 {
    let done = lessons.iter().filter(|l| completed.contains(&l.id)).count();
    percent(done, lessons.len())
}

/// First unlocked, uncompleted lesson in declared order.
///
/// When everything is complete (or only locked lessons remain) this falls
/// back to the first lesson of the course so "continue learning" always has
/// somewhere to land; `None` only for a course with no lessons at all.
pub fn next_incomplete_lesson<'a>(
    modules: &'a [CourseModule],
    completed: &HashSet<Uuid>,
) -> Option<&'a Lesson> {
    modules
        .iter()
        .flat_map(|m| m.lessons.iter())
        .find(|l| !l.locked && !completed.contains(&l.id))
        .or_else(|| modules.iter().flat_map(|m| m.lessons.iter()).next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::course::LessonKind;

    fn lesson(title: &str) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind: LessonKind::Video,
            duration_minutes: 10,
            locked: false,
        }
    }

    fn module(name: &str, lessons: Vec<Lesson>) -> CourseModule {
        CourseModule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            lessons,
        }
    }

    fn two_module_course() -> Vec<CourseModule> {
        vec![
            module("Basics", vec![lesson("a"), lesson("b")]),
            module("Advanced", vec![lesson("c"), lesson("d")]),
        ]
    }

    fn all_ids(modules: &[CourseModule]) -> HashSet<Uuid> {
        modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .map(|l| l.id)
            .collect()
    }

    #[test]
    fn empty_course_has_zero_progress() {
        assert_eq!(course_progress(&[], &HashSet::new()), 0);
        assert_eq!(
            course_progress(&[module("empty", vec![])], &HashSet::new()),
            0
        );
    }

    #[test]
    fn no_completions_is_zero_and_all_completions_is_hundred() {
        let modules = two_module_course();

        assert_eq!(course_progress(&modules, &HashSet::new()), 0);
        assert_eq!(course_progress(&modules, &all_ids(&modules)), 100);
    }

    #[test]
    fn hundred_percent_requires_every_lesson() {
        let modules = two_module_course();
        let mut almost = all_ids(&modules);
        let dropped = *almost.iter().next().expect("non-empty");
        almost.remove(&dropped);

        assert!(course_progress(&modules, &almost) < 100);
    }

    #[test]
    fn percentages_round_half_up() {
        // 1 of 8 = 12.5% -> 13
        let modules = vec![module(
            "m",
            (0..8).map(|i| lesson(&format!("l{}", i))).collect(),
        )];
        let first = modules[0].lessons[0].id;

        assert_eq!(course_progress(&modules, &HashSet::from([first])), 13);
    }

    #[test]
    fn orphaned_completed_lessons_are_ignored() {
        let modules = two_module_course();
        let mut completed = all_ids(&modules);
        completed.insert(Uuid::new_v4());
        completed.insert(Uuid::new_v4());

        assert_eq!(course_progress(&modules, &completed), 100);
    }

    #[test]
    fn module_progress_is_monotonic_in_completions() {
        let modules = two_module_course();
        let lessons = &modules[0].lessons;

        let mut completed = HashSet::new();
        let mut last = module_progress(lessons, &completed);
        for id in all_ids(&modules) {
            completed.insert(id);
            let next = module_progress(lessons, &completed);
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn next_lesson_walks_declared_order() {
        let modules = two_module_course();

        let first = next_incomplete_lesson(&modules, &HashSet::new()).expect("has lessons");
        assert_eq!(first.id, modules[0].lessons[0].id);

        let after_first = next_incomplete_lesson(&modules, &HashSet::from([first.id]))
            .expect("has lessons");
        assert_eq!(after_first.id, modules[0].lessons[1].id);

        let into_second_module = next_incomplete_lesson(
            &modules,
            &HashSet::from([modules[0].lessons[0].id, modules[0].lessons[1].id]),
        )
        .expect("has lessons");
        assert_eq!(into_second_module.id, modules[1].lessons[0].id);
    }

    #[test]
    fn next_lesson_skips_locked_lessons() {
        let mut modules = two_module_course();
        modules[0].lessons[0].locked = true;

        let next = next_incomplete_lesson(&modules, &HashSet::new()).expect("has lessons");
        assert_eq!(next.id, modules[0].lessons[1].id);
    }

    #[test]
    fn completed_course_falls_back_to_first_lesson() {
        let modules = two_module_course();

        let rewatch = next_incomplete_lesson(&modules, &all_ids(&modules)).expect("has lessons");
        assert_eq!(rewatch.id, modules[0].lessons[0].id);
    }

    #[test]
    fn course_without_lessons_has_no_next_lesson() {
        assert!(next_incomplete_lesson(&[], &HashSet::new()).is_none());
        assert!(next_incomplete_lesson(&[module("empty", vec![])], &HashSet::new()).is_none());
    }
}

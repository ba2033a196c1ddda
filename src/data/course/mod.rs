use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

pub static COURSE_COLLECTION_NAME: &str = "courses";
pub static EVENT_COLLECTION_NAME: &str = "events";
pub static ATTENDANCE_COLLECTION_NAME: &str = "event.attendance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum LessonKind {
    Video,
    Reading,
    Exercise,
    Quiz,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Lesson {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String,
    pub kind: LessonKind,
    pub duration_minutes: u32,
    /// Locked lessons are skipped when resolving the next actionable lesson;
    /// unlock rules live outside this core.
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseModule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

/// Course content tree. Authored elsewhere; this core only reads it.
/// The order of `modules` and of each module's `lessons` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Course {
    #[serde(
        default = "Uuid::new_v4",
        rename = "_id",
        with = "bson::serde_helpers::uuid_1_as_binary"
    )]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub certificate_enabled: bool,
    #[serde(default)]
    pub modules: Vec<CourseModule>,
}

impl Course {
    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.modules.iter().flat_map(|m| m.lessons.iter())
    }

    pub fn lesson_count(&self) -> usize {
        self.lessons().count()
    }

    pub fn contains_lesson(&self, lesson_id: Uuid) -> bool {
        self.lessons().any(|l| l.id == lesson_id)
    }
}

/// A one-off event (workshop, webinar). Attendance substitutes for course
/// completion when certificates are issued for events.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    #[serde(
        default = "Uuid::new_v4",
        rename = "_id",
        with = "bson::serde_helpers::uuid_1_as_binary"
    )]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub starts_on: DateTime<Utc>,
    #[serde(default)]
    pub certificate_enabled: bool,
}

/// Attendance record written by external event tooling and read here as the
/// eligibility source for event certificates. Keyed by the normalized ID
/// document so attendees without accounts can still claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAttendance {
    pub event_id: Uuid,
    pub id_document: String,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

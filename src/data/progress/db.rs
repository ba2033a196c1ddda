use std::collections::HashSet;

use bson::doc;
use chrono::Utc;
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Database, IndexModel};
use rocket::futures::TryStreamExt;
use rocket::http::Status;
use thiserror::Error;
use uuid::Uuid;

use crate::data::course::Course;
use crate::data::enrollment::db::EnrollmentDbExt;
use crate::data::enrollment::{Enrollment, EnrollmentError};
use crate::resp::problem::Problem;

use super::{course_progress, LessonProgress, LESSON_PROGRESS_COLLECTION_NAME};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("lesson '{lesson}' isn't part of course '{course}'")]
    LessonNotFound { lesson: Uuid, course: Uuid },
    #[error("learner has no approved enrollment for this course")]
    NotEnrolled,
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Storage(#[from] mongodb::error::Error),
}

impl From<ProgressError> for Problem {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::LessonNotFound { lesson, .. } => {
                Problem::new_untyped(Status::NotFound, "Lesson doesn't exist in this course.")
                    .insert_str("lesson", lesson)
                    .clone()
            }
            ProgressError::NotEnrolled => Problem::new_untyped(
                Status::Forbidden,
                "Course access requires an approved enrollment.",
            ),
            ProgressError::Enrollment(inner) => inner.into(),
            ProgressError::Storage(err) => {
                tracing::error!("progress storage error: {}", err);
                crate::resp::problem::problems::storage_problem()
            }
        }
    }
}

/// Result of recording a lesson completion: the refreshed enrollment and
/// whether this write was the one that pushed the course to 100%.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub enrollment: Enrollment,
    pub newly_completed: bool,
}

pub trait ProgressDbExt {
    /// Ids of the course's lessons the learner has completed.
    async fn completed_lesson_ids(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<HashSet<Uuid>, mongodb::error::Error>;

    /// Marks a lesson complete for the learner and folds the result into the
    /// enrollment's aggregated progress.
    async fn complete_lesson(
        &self,
        learner: Uuid,
        course: &Course,
        lesson: Uuid,
        watched_seconds: Option<u32>,
    ) -> Result<ProgressUpdate, ProgressError>;
}

impl ProgressDbExt for Database {
    async fn completed_lesson_ids(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<HashSet<Uuid>, mongodb::error::Error> {
        let mut rows = self
            .collection::<LessonProgress>(LESSON_PROGRESS_COLLECTION_NAME)
            .find(
                doc! {
                    "learner_id": learner.to_string(),
                    "course_id": course.to_string(),
                    "completed": true,
                },
                None,
            )
            .await?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.try_next().await? {
            ids.insert(row.lesson_id);
        }
        Ok(ids)
    }

    async fn complete_lesson(
        &self,
        learner: Uuid,
        course: &Course,
        lesson: Uuid,
        watched_seconds: Option<u32>,
    ) -> Result<ProgressUpdate, ProgressError> {
        let enrollment = self
            .approved_enrollment(learner, course.id)
            .await?
            .ok_or(ProgressError::NotEnrolled)?;

        if !course.contains_lesson(lesson) {
            return Err(ProgressError::LessonNotFound {
                lesson,
                course: course.id,
            });
        }

        let now = Utc::now().to_rfc3339();
        let mut set = doc! {
            "completed": true,
            "completed_at": now.as_str(),
        };
        if let Some(seconds) = watched_seconds {
            set.insert("watched_seconds", seconds as i64);
        }

        self.collection::<LessonProgress>(LESSON_PROGRESS_COLLECTION_NAME)
            .update_one(
                doc! {
                    "learner_id": learner.to_string(),
                    "lesson_id": lesson.to_string(),
                },
                doc! {
                    "$set": set,
                    "$setOnInsert": {
                        "learner_id": learner.to_string(),
                        "lesson_id": lesson.to_string(),
                        "course_id": course.id.to_string(),
                    },
                },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;

        let completed = self.completed_lesson_ids(learner, course.id).await?;
        let percent = course_progress(&course.modules, &completed);

        let (enrollment, newly_completed) =
            self.apply_progress(enrollment.id, percent).await?;

        Ok(ProgressUpdate {
            enrollment,
            newly_completed,
        })
    }
}

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<LessonProgress>(LESSON_PROGRESS_COLLECTION_NAME)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "learner_id": 1, "lesson_id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;
    Ok(())
}

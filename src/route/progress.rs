use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mongodb::Database;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::course::db::CourseDbExt;
use crate::data::course::{Course, Lesson, LessonKind};
use crate::data::enrollment::db::EnrollmentDbExt;
use crate::data::enrollment::Enrollment;
use crate::data::progress::db::{ProgressDbExt, ProgressError};
use crate::data::progress::{course_progress, module_progress, next_incomplete_lesson};
use crate::notify::{Notification, NotificationDispatcher};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModuleProgressResponse {
    pub module: Uuid,
    pub name: String,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NextLessonResponse {
    pub id: Uuid,
    pub title: String,
    pub kind: LessonKind,
    pub duration_minutes: u32,
}

impl From<&Lesson> for NextLessonResponse {
    fn from(value: &Lesson) -> Self {
        Self {
            id: value.id,
            title: value.title.clone(),
            kind: value.kind,
            duration_minutes: value.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseProgressResponse {
    pub course: Uuid,
    pub percent: u8,
    pub modules: Vec<ModuleProgressResponse>,
    /// Where "continue learning" should land; `None` only for a course with
    /// no lessons.
    pub next_lesson: Option<NextLessonResponse>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn progress_response(
    course: &Course,
    enrollment: &Enrollment,
    completed: &HashSet<Uuid>,
) -> CourseProgressResponse {
    CourseProgressResponse {
        course: course.id,
        percent: course_progress(&course.modules, completed),
        modules: course
            .modules
            .iter()
            .map(|m| ModuleProgressResponse {
                module: m.id,
                name: m.name.clone(),
                percent: module_progress(&m.lessons, completed),
            })
            .collect(),
        next_lesson: next_incomplete_lesson(&course.modules, completed).map(Into::into),
        completed_at: enrollment.completed_at,
    }
}

#[inline]
fn course_not_found(id: Uuid) -> Problem {
    Problem::new_untyped(rocket::http::Status::NotFound, "Course doesn't exist.")
        .insert_str("id", id)
        .clone()
}

/// Aggregated progress for a course
#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Course, module and next-lesson progress", body = CourseProgressResponse),
        (status = 403, description = "No approved enrollment", body = Problem),
        (status = 404, description = "Course doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>/progress")]
#[tracing::instrument]
pub async fn course_progress_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<CourseProgressResponse>, Problem> {
    let course = db
        .get_course(id)
        .await
        .map_err(Problem::from)?
        .ok_or_else(|| course_not_found(id))?;

    let enrollment = db
        .approved_enrollment(auth.user, id)
        .await
        .map_err(Problem::from)?
        .ok_or(ProgressError::NotEnrolled)?;

    let completed = db
        .completed_lesson_ids(auth.user, id)
        .await
        .map_err(Problem::from)?;

    Ok(Json(progress_response(&course, &enrollment, &completed)))
}

/// Progress for a single module
#[utoipa::path(
    params(
        ("id", description = "module ID"),
        ("course", description = "course ID"),
    ),
    responses(
        (status = 200, description = "Module completion percentage", body = ModuleProgressResponse),
        (status = 403, description = "No approved enrollment", body = Problem),
        (status = 404, description = "Course or module doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/module/<id>/progress?<course>")]
#[tracing::instrument]
pub async fn module_progress_get(
    id: Uuid,
    course: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<ModuleProgressResponse>, Problem> {
    let course = db
        .get_course(course)
        .await
        .map_err(Problem::from)?
        .ok_or_else(|| course_not_found(course))?;

    db.approved_enrollment(auth.user, course.id)
        .await
        .map_err(Problem::from)?
        .ok_or(ProgressError::NotEnrolled)?;

    let module = course.modules.iter().find(|m| m.id == id).ok_or_else(|| {
        Problem::new_untyped(rocket::http::Status::NotFound, "Module doesn't exist.")
            .insert_str("id", id)
            .clone()
    })?;

    let completed = db
        .completed_lesson_ids(auth.user, course.id)
        .await
        .map_err(Problem::from)?;

    Ok(Json(ModuleProgressResponse {
        module: module.id,
        name: module.name.clone(),
        percent: module_progress(&module.lessons, &completed),
    }))
}

/// Where "continue learning" should resume
#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "First unlocked, uncompleted lesson", body = NextLessonResponse),
        (status = 403, description = "No approved enrollment", body = Problem),
        (status = 404, description = "Course doesn't exist, or it has no lessons"),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>/next-lesson")]
#[tracing::instrument]
pub async fn next_lesson_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Option<Json<NextLessonResponse>>, Problem> {
    let course = db
        .get_course(id)
        .await
        .map_err(Problem::from)?
        .ok_or_else(|| course_not_found(id))?;

    db.approved_enrollment(auth.user, id)
        .await
        .map_err(Problem::from)?
        .ok_or(ProgressError::NotEnrolled)?;

    let completed = db
        .completed_lesson_ids(auth.user, id)
        .await
        .map_err(Problem::from)?;

    Ok(next_incomplete_lesson(&course.modules, &completed).map(|l| Json(l.into())))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LessonCompletionData {
    pub course: Uuid,
    pub watched_seconds: Option<u32>,
}

/// Mark a lesson complete
#[utoipa::path(
    request_body = LessonCompletionData,
    params(("id", description = "lesson ID")),
    responses(
        (status = 200, description = "Refreshed aggregate progress", body = CourseProgressResponse),
        (status = 403, description = "No approved enrollment", body = Problem),
        (status = 404, description = "Course or lesson doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/lesson/<id>/complete", format = "application/json", data = "<completion>")]
#[tracing::instrument(skip(dispatcher))]
pub async fn lesson_complete(
    id: Uuid,
    completion: Json<LessonCompletionData>,
    auth: UserRoleToken,
    db: &State<Database>,
    dispatcher: &State<Box<dyn NotificationDispatcher>>,
) -> Result<Json<CourseProgressResponse>, Problem> {
    let course = db
        .get_course(completion.course)
        .await
        .map_err(Problem::from)?
        .ok_or_else(|| course_not_found(completion.course))?;

    let update = db
        .complete_lesson(auth.user, &course, id, completion.watched_seconds)
        .await?;

    if update.newly_completed {
        dispatcher.dispatch(Notification::CourseCompleted {
            learner: auth.user,
            course: course.id,
        });
    }

    let completed = db
        .completed_lesson_ids(auth.user, course.id)
        .await
        .map_err(Problem::from)?;

    Ok(Json(progress_response(
        &course,
        &update.enrollment,
        &completed,
    )))
}

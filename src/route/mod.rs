use std::collections::BTreeMap;

use rocket::{Build, Rocket, Route};

pub mod certificate;
pub mod enrollment;
pub mod progress;
pub mod users;

use certificate::*;
use enrollment::*;
use progress::*;
use users::*;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    data::{
        certificate as cd,
        course::{CourseModule, Lesson, LessonKind},
        enrollment as ed,
        user::db::{UserLoginData, UserSignupData},
        user::UserResponse,
    },
    resp::{jwt::doc::JWTAuth, problem::Problem},
    role::Role,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        user_create,
        login_submit,
        enrollment_request,
        enrollment_decide,
        enrollment_state,
        course_progress_get,
        module_progress_get,
        next_lesson_get,
        lesson_complete,
        certificate_issue,
        certificate_by_code,
        certificate_by_identity,
        certificate_public_claim
    ),
    components(schemas(
        Role,
        UserResponse,
        UserSignupData,
        UserLoginData,
        ed::EnrollmentStatus,
        ed::DecisionOutcome,
        EnrollmentRequestData,
        DecisionData,
        EnrollmentResponse,
        LessonKind,
        Lesson,
        CourseModule,
        ModuleProgressResponse,
        NextLessonResponse,
        CourseProgressResponse,
        LessonCompletionData,
        cd::SubjectKind,
        CertificateIssueData,
        CertificateResponse,
        IssuedCertificateResponse,
        PublicClaimData,
        Problem
    )),
    modifiers(&JWTAuth, &V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

pub fn api_v1() -> Vec<Route> {
    routes![
        user_create,
        login_submit,
        enrollment_request,
        enrollment_decide,
        enrollment_state,
        course_progress_get,
        module_progress_get,
        next_lesson_get,
        lesson_complete,
        certificate_issue,
        certificate_by_code,
        certificate_by_identity,
        certificate_public_claim
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/api/v1", api_v1()).mount(
        "/",
        SwaggerUi::new("/swagger/<_..>").url("/api/v1/openapi.json", ApiDocV1::openapi()),
    )
}

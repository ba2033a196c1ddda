use chrono::{DateTime, Utc};
use mongodb::Database;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::enrollment::db::EnrollmentDbExt;
use crate::data::enrollment::{DecisionOutcome, Enrollment, EnrollmentStatus};
use crate::notify::{Notification, NotificationDispatcher};
use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::Problem;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EnrollmentRequestData {
    pub course: Uuid,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DecisionData {
    pub outcome: DecisionOutcome,
    pub reason: Option<String>,
}

/// Client-facing view of an enrollment. Pending and rejected states are both
/// access-denying but rendered differently, so the raw status and the stored
/// rejection reason travel alongside the derived access flag.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnrollmentResponse {
    pub id: Uuid,
    pub course: Uuid,
    pub status: EnrollmentStatus,
    pub rejection_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub progress_percent: u8,
    pub completed_at: Option<DateTime<Utc>>,
    pub has_access: bool,
}

impl From<Enrollment> for EnrollmentResponse {
    fn from(value: Enrollment) -> Self {
        let has_access = value.has_course_access();
        Self {
            id: value.id,
            course: value.course_id,
            status: value.status,
            rejection_reason: value.rejection_reason,
            requested_at: value.requested_at,
            decided_at: value.decided_at,
            progress_percent: value.progress_percent,
            completed_at: value.completed_at,
            has_access,
        }
    }
}

/// Request enrollment in a course
#[utoipa::path(
    request_body = EnrollmentRequestData,
    responses(
        (status = 200, description = "Pending enrollment created", body = EnrollmentResponse),
        (status = 404, description = "Course doesn't exist", body = Problem),
        (status = 409, description = "An open enrollment already exists", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/enrollment", format = "application/json", data = "<request>")]
#[tracing::instrument]
pub async fn enrollment_request(
    request: Json<EnrollmentRequestData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<EnrollmentResponse>, Problem> {
    let enrollment = db.request_enrollment(auth.user, request.course).await?;
    Ok(Json(enrollment.into()))
}

/// Approve or reject a pending enrollment
#[utoipa::path(
    request_body = DecisionData,
    params(("id", description = "enrollment ID")),
    responses(
        (status = 200, description = "Decided enrollment", body = EnrollmentResponse),
        (status = 400, description = "Rejection without a reason", body = Problem),
        (status = 401, description = "Caller can't decide enrollments", body = Problem),
        (status = 404, description = "Enrollment doesn't exist", body = Problem),
        (status = 409, description = "Enrollment was already decided", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/enrollment/<id>/decision", format = "application/json", data = "<decision>")]
#[tracing::instrument(skip(dispatcher))]
pub async fn enrollment_decide(
    id: Uuid,
    decision: Json<DecisionData>,
    auth: UserRoleToken,
    db: &State<Database>,
    dispatcher: &State<Box<dyn NotificationDispatcher>>,
) -> Result<Json<EnrollmentResponse>, Problem> {
    if !auth.role.can_decide() {
        return Err(auth_problem("Permission level too low."));
    }

    let decision = decision.into_inner();
    let enrollment = db
        .decide_enrollment(id, decision.outcome, decision.reason, auth.user)
        .await?;

    // Delivery is fire-and-forget; the decision stands regardless.
    match enrollment.status {
        EnrollmentStatus::Approved => dispatcher.dispatch(Notification::EnrollmentApproved {
            learner: enrollment.learner_id,
            course: enrollment.course_id,
        }),
        EnrollmentStatus::Rejected => dispatcher.dispatch(Notification::EnrollmentRejected {
            learner: enrollment.learner_id,
            course: enrollment.course_id,
            reason: enrollment
                .rejection_reason
                .clone()
                .unwrap_or_default(),
        }),
        EnrollmentStatus::Pending => {}
    }

    Ok(Json(enrollment.into()))
}

/// Look up the caller's enrollment state for a course
#[utoipa::path(
    params(("course", description = "course ID")),
    responses(
        (status = 200, description = "Most recent enrollment for the pair", body = EnrollmentResponse),
        (status = 404, description = "Never enrolled"),
    ),
    security(("jwt" = []))
)]
#[get("/enrollment?<course>")]
#[tracing::instrument]
pub async fn enrollment_state(
    course: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Option<Json<EnrollmentResponse>>, Problem> {
    let enrollment = db
        .find_enrollment(auth.user, course)
        .await
        .map_err(Problem::from)?;

    Ok(enrollment.map(|e| Json(e.into())))
}

///////////////////////
//       TESTS
///////////////////////

#[cfg(test)]
pub(crate) mod enrollment_endpoints {
    use mongodb::Database;
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use uuid::Uuid;

    use crate::data::course::{Course, CourseModule, Lesson, LessonKind, COURSE_COLLECTION_NAME};
    use crate::data::enrollment::EnrollmentStatus;
    use crate::data::user::db::{UserDbExt, UserSignupData};
    use crate::data::user::User;
    use crate::resp::jwt::UserRoleToken;
    use crate::security::Security;

    use super::EnrollmentResponse;

    pub async fn client() -> Client {
        let rocket = crate::create(None).await.expect("invalid backend");
        Client::tracked(rocket).await.expect("invalid backend")
    }

    pub async fn seed_course(db: &Database, lessons_per_module: &[usize]) -> Course {
        let modules = lessons_per_module
            .iter()
            .enumerate()
            .map(|(m, count)| CourseModule {
                id: Uuid::new_v4(),
                name: format!("Module {}", m + 1),
                lessons: (0..*count)
                    .map(|l| Lesson {
                        id: Uuid::new_v4(),
                        title: format!("Lesson {}.{}", m + 1, l + 1),
                        kind: LessonKind::Video,
                        duration_minutes: 10,
                        locked: false,
                    })
                    .collect(),
            })
            .collect();

        let course = Course {
            id: Uuid::new_v4(),
            name: "Seeded Course".to_string(),
            certificate_enabled: true,
            modules,
        };

        db.collection(COURSE_COLLECTION_NAME)
            .insert_one(
                bson::to_document(&course).expect("Course must be serializable to BSON"),
                None,
            )
            .await
            .expect("unable to seed course");

        course
    }

    pub async fn account(
        client: &Client,
        name: &str,
        document: &str,
        admin: bool,
    ) -> (User, Cookie<'static>) {
        let db: &Database = client.rocket().state().expect("no database");
        let security: &Security = client.rocket().state().expect("no security");

        let admin_names = if admin {
            vec![name.to_string()]
        } else {
            vec![]
        };

        let user = db
            .create_user(
                UserSignupData {
                    name: name.to_string(),
                    email: None,
                    id_document: document.to_string(),
                    password: "p4ssw0rd-long-enough".to_string(),
                },
                &admin_names,
                &security.salt,
            )
            .await
            .expect("unable to create test account");

        let cookie = UserRoleToken::new(&user)
            .cookie(&security.jwt_keys.private)
            .expect("unable to encode session cookie");

        (user, cookie)
    }

    pub fn request_body(course: Uuid) -> String {
        format!(r#"{{"course":"{}"}}"#, course)
    }

    fn decision_body(outcome: &str, reason: Option<&str>) -> String {
        match reason {
            Some(reason) => format!(r#"{{"outcome":"{}","reason":"{}"}}"#, outcome, reason),
            None => format!(r#"{{"outcome":"{}"}}"#, outcome),
        }
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_enrollment_happy_path_grants_access() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let course = seed_course(db, &[2, 2]).await;
        let (_, learner) = account(&client, "happy_path_learner", "100000000001", false).await;
        let (_, decider) = account(&client, "happy_path_decider", "100000000002", true).await;

        let response = client
            .post("/api/v1/enrollment")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(request_body(course.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok, "an ok response");

        let pending: EnrollmentResponse =
            response.into_json().await.expect("invalid response json");
        assert_eq!(pending.status, EnrollmentStatus::Pending);
        assert!(!pending.has_access, "pending must deny access");

        let response = client
            .post(format!("/api/v1/enrollment/{}/decision", pending.id))
            .header(ContentType::JSON)
            .cookie(decider)
            .body(decision_body("Approve", None))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok, "an ok response");

        let approved: EnrollmentResponse =
            response.into_json().await.expect("invalid response json");
        assert_eq!(approved.status, EnrollmentStatus::Approved);
        assert!(approved.has_access, "approval must grant access");
        assert!(approved.decided_at.is_some());

        let response = client
            .get(format!("/api/v1/enrollment?course={}", course.id))
            .cookie(learner)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok, "an ok response");

        let state: EnrollmentResponse =
            response.into_json().await.expect("invalid response json");
        assert!(state.has_access);
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_second_request_conflicts_while_pending() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let course = seed_course(db, &[1]).await;
        let (_, learner) = account(&client, "double_request_learner", "100000000003", false).await;

        let first = client
            .post("/api/v1/enrollment")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(request_body(course.id))
            .dispatch()
            .await;
        assert_eq!(first.status(), Status::Ok);

        let second = client
            .post("/api/v1/enrollment")
            .header(ContentType::JSON)
            .cookie(learner)
            .body(request_body(course.id))
            .dispatch()
            .await;
        assert_eq!(
            second.status(),
            Status::Conflict,
            "one open enrollment per pair"
        );
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_rejection_needs_reason_and_surfaces_it() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let course = seed_course(db, &[1]).await;
        let (_, learner) = account(&client, "rejected_learner", "100000000004", false).await;
        let (_, decider) = account(&client, "rejecting_decider", "100000000005", true).await;

        let response = client
            .post("/api/v1/enrollment")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(request_body(course.id))
            .dispatch()
            .await;
        let pending: EnrollmentResponse =
            response.into_json().await.expect("invalid response json");

        let missing_reason = client
            .post(format!("/api/v1/enrollment/{}/decision", pending.id))
            .header(ContentType::JSON)
            .cookie(decider.clone())
            .body(decision_body("Reject", None))
            .dispatch()
            .await;
        assert_eq!(missing_reason.status(), Status::BadRequest);

        let response = client
            .post(format!("/api/v1/enrollment/{}/decision", pending.id))
            .header(ContentType::JSON)
            .cookie(decider.clone())
            .body(decision_body("Reject", Some("cadastro incompleto")))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let rejected: EnrollmentResponse =
            response.into_json().await.expect("invalid response json");
        assert_eq!(rejected.status, EnrollmentStatus::Rejected);
        assert!(!rejected.has_access);
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some("cadastro incompleto")
        );

        // Terminal state: any further decision conflicts.
        let again = client
            .post(format!("/api/v1/enrollment/{}/decision", pending.id))
            .header(ContentType::JSON)
            .cookie(decider)
            .body(decision_body("Approve", None))
            .dispatch()
            .await;
        assert_eq!(again.status(), Status::Conflict);
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_learners_cannot_decide() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let course = seed_course(db, &[1]).await;
        let (_, learner) = account(&client, "plain_learner", "100000000006", false).await;

        let response = client
            .post("/api/v1/enrollment")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(request_body(course.id))
            .dispatch()
            .await;
        let pending: EnrollmentResponse =
            response.into_json().await.expect("invalid response json");

        let response = client
            .post(format!("/api/v1/enrollment/{}/decision", pending.id))
            .header(ContentType::JSON)
            .cookie(learner)
            .body(decision_body("Approve", None))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}

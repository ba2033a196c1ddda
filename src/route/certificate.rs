use chrono::{DateTime, Utc};
use mongodb::Database;
use rocket::form::Form;
use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::certificate::db::CertificateDbExt;
use crate::data::certificate::{Certificate, CertificateError, IssuedCertificate, SubjectKind};
use crate::data::course::db::CourseDbExt;
use crate::data::course::{Course, Event};
use crate::data::enrollment::db::EnrollmentDbExt;
use crate::data::user::db::{
    problem as user_problem, validate_document, validate_name, validate_password, UserDbExt,
};
use crate::data::user::User;
use crate::notify::{Notification, NotificationDispatcher};
use crate::render::CertificateRenderer;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::security::Security;

/// Publicly shareable view of a certificate; everything a verifier page
/// needs, nothing bound to the internal account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CertificateResponse {
    pub verification_code: String,
    pub subject_kind: SubjectKind,
    pub subject: Uuid,
    pub holder_name: String,
    pub holder_id_document: String,
    pub issued_at: DateTime<Utc>,
    /// Rendered certificate document, base64 (URL-safe alphabet).
    pub artifact: String,
}

impl From<Certificate> for CertificateResponse {
    fn from(value: Certificate) -> Self {
        Self {
            verification_code: value.verification_code,
            subject_kind: value.subject_kind,
            subject: value.subject_id,
            holder_name: value.holder_name,
            holder_id_document: value.holder_id_document,
            issued_at: value.issued_at,
            artifact: value.artifact,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssuedCertificateResponse {
    pub certificate: CertificateResponse,
    /// False when the idempotent path returned an existing certificate.
    pub is_new: bool,
}

impl From<IssuedCertificate> for IssuedCertificateResponse {
    fn from(value: IssuedCertificate) -> Self {
        Self {
            certificate: value.certificate.into(),
            is_new: value.is_new,
        }
    }
}

enum Subject {
    Course(Course),
    Event(Event),
}

impl Subject {
    fn certificate_enabled(&self) -> bool {
        match self {
            Subject::Course(c) => c.certificate_enabled,
            Subject::Event(e) => e.certificate_enabled,
        }
    }
}

async fn load_subject(
    db: &Database,
    kind: SubjectKind,
    id: Uuid,
) -> Result<Subject, CertificateError> {
    match kind {
        SubjectKind::Course => db
            .get_course(id)
            .await?
            .map(Subject::Course)
            .ok_or(CertificateError::SubjectNotFound(id)),
        SubjectKind::Event => db
            .get_event(id)
            .await?
            .map(Subject::Event)
            .ok_or(CertificateError::SubjectNotFound(id)),
    }
}

/// Issuance on behalf of an account, with the account's stored identity as
/// the holder identity.
async fn issue_for(
    db: &Database,
    subject: &Subject,
    account: &User,
    renderer: &dyn CertificateRenderer,
) -> Result<IssuedCertificate, CertificateError> {
    match subject {
        Subject::Course(course) => {
            let enrollment = db.approved_enrollment(account.id, course.id).await?;
            db.issue_for_course(
                course,
                enrollment.as_ref(),
                &account.name,
                &account.id_document,
                Some(account.id),
                renderer,
            )
            .await
        }
        Subject::Event(event) => {
            db.issue_for_event(
                event,
                &account.name,
                &account.id_document,
                Some(account.id),
                renderer,
            )
            .await
        }
    }
}

fn announce_if_new(dispatcher: &dyn NotificationDispatcher, issued: &IssuedCertificate) {
    if issued.is_new {
        dispatcher.dispatch(Notification::CertificateReady {
            holder_name: issued.certificate.holder_name.clone(),
            verification_code: issued.certificate.verification_code.clone(),
        });
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CertificateIssueData {
    pub subject_kind: SubjectKind,
    pub subject: Uuid,
}

/// Issue a certificate from the session identity
#[utoipa::path(
    request_body = CertificateIssueData,
    responses(
        (status = 200, description = "Issued or existing certificate", body = IssuedCertificateResponse),
        (status = 404, description = "Unknown subject, or certificates not enabled", body = Problem),
        (status = 409, description = "Not eligible yet", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/certificate", format = "application/json", data = "<issue_data>")]
#[tracing::instrument(skip(renderer, dispatcher))]
pub async fn certificate_issue(
    issue_data: Json<CertificateIssueData>,
    auth: UserRoleToken,
    db: &State<Database>,
    renderer: &State<Box<dyn CertificateRenderer>>,
    dispatcher: &State<Box<dyn NotificationDispatcher>>,
) -> Result<Json<IssuedCertificateResponse>, Problem> {
    let account = db
        .get_user(auth.user)
        .await?
        .ok_or_else(|| user_problem::not_found(auth.user))?;

    let subject = load_subject(db, issue_data.subject_kind, issue_data.subject).await?;
    let issued = issue_for(db, &subject, &account, renderer.inner().as_ref()).await?;

    announce_if_new(dispatcher.inner().as_ref(), &issued);

    Ok(Json(issued.into()))
}

/// Verify a certificate by its code
#[utoipa::path(
    params(("code", description = "verification code")),
    responses(
        (status = 200, description = "Certificate bound to the code", body = CertificateResponse),
        (status = 404, description = "Unknown code"),
    )
)]
#[get("/certificate/<code>")]
#[tracing::instrument]
pub async fn certificate_by_code(
    code: &str,
    db: &State<Database>,
) -> Result<Option<Json<CertificateResponse>>, Problem> {
    let found = db
        .find_certificate_by_code(code)
        .await
        .map_err(Problem::from)?;

    Ok(found.map(|c| Json(c.into())))
}

/// Look up a certificate by holder identity
#[utoipa::path(
    params(
        ("subject_kind", description = "course or event"),
        ("subject", description = "subject ID"),
        ("document", description = "holder's ID document number"),
    ),
    responses(
        (status = 200, description = "Certificate for the identity", body = CertificateResponse),
        (status = 404, description = "No certificate for this identity"),
    )
)]
#[get("/certificate?<subject_kind>&<subject>&<document>")]
#[tracing::instrument]
pub async fn certificate_by_identity(
    subject_kind: SubjectKind,
    subject: Uuid,
    document: &str,
    db: &State<Database>,
) -> Result<Option<Json<CertificateResponse>>, Problem> {
    let normalized = validate_document(document)?;

    let found = db
        .find_certificate_by_identity(subject_kind, subject, &normalized)
        .await
        .map_err(Problem::from)?;

    Ok(found.map(|c| Json(c.into())))
}

#[derive(Clone, FromForm, ToSchema)]
pub struct PublicClaimData {
    pub subject_kind: SubjectKind,
    pub subject: Uuid,
    pub name: String,
    pub id_document: String,
    #[schema(format = "password")]
    pub password: String,
    #[schema(format = "password")]
    pub confirm_password: String,
}

impl std::fmt::Debug for PublicClaimData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicClaimData:{}", self.subject)
    }
}

/// Claim a certificate without a session
///
/// The visitor proves identity with name + ID document and chooses a
/// password; a minimal account is provisioned (or reused when the password
/// matches) and issuance proceeds idempotently, so a double submit converges
/// on one certificate. Visitors with a session skip the identity form.
#[utoipa::path(
    request_body(content = PublicClaimData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Issued or existing certificate", body = IssuedCertificateResponse),
        (status = 400, description = "Malformed identity claim", body = Problem),
        (status = 404, description = "Unknown subject, or certificates not enabled", body = Problem),
        (status = 409, description = "Not eligible, or document bound to another password", body = Problem),
    )
)]
#[post("/certificate/claim", data = "<claim>")]
#[tracing::instrument(skip(security, renderer, dispatcher))]
pub async fn certificate_public_claim<'a>(
    claim: Form<PublicClaimData>,
    session: Option<UserRoleToken>,
    cookies: &'a CookieJar<'_>,
    db: &State<Database>,
    security: &State<Security>,
    renderer: &State<Box<dyn CertificateRenderer>>,
    dispatcher: &State<Box<dyn NotificationDispatcher>>,
) -> Result<Json<IssuedCertificateResponse>, Problem> {
    let subject = load_subject(db, claim.subject_kind, claim.subject).await?;
    if !subject.certificate_enabled() {
        return Err(CertificateError::Unavailable.into());
    }

    // Authenticated-holder flow: the account's stored identity wins over the
    // submitted form fields.
    if let Some(session) = &session {
        if let Some(account) = db.get_user(session.user).await? {
            let issued = issue_for(db, &subject, &account, renderer.inner().as_ref()).await?;
            announce_if_new(dispatcher.inner().as_ref(), &issued);
            return Ok(Json(issued.into()));
        }
    }

    // Public flow: validate the claim, then provision-or-reuse the account
    // bound to the document.
    validate_name(&claim.name)?;
    let normalized = validate_document(&claim.id_document)?;
    validate_password(&claim.password)?;
    if claim.password != claim.confirm_password {
        return Err(user_problem::bad_password(
            "Password confirmation doesn't match.",
        ));
    }

    let account = db
        .provision_by_document(&claim.name, &normalized, &claim.password, &security.salt)
        .await?;

    let issued = issue_for(db, &subject, &account, renderer.inner().as_ref()).await?;
    announce_if_new(dispatcher.inner().as_ref(), &issued);

    // The freshly proven identity doubles as a session so the redirect to the
    // verification page doesn't ask the visitor to log in.
    let urt = UserRoleToken::new(&account);
    cookies.add(urt.cookie(&security.jwt_keys.private)?);

    Ok(Json(issued.into()))
}

///////////////////////
//       TESTS
///////////////////////

#[cfg(test)]
mod certificate_endpoints {
    use chrono::Utc;
    use mongodb::Database;
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use uuid::Uuid;

    use crate::data::course::db::CourseDbExt;
    use crate::data::course::{Course, Event, EventAttendance, EVENT_COLLECTION_NAME};
    use crate::route::enrollment::enrollment_endpoints::{
        account, client, request_body, seed_course,
    };
    use crate::route::enrollment::EnrollmentResponse;
    use crate::route::progress::CourseProgressResponse;
    use crate::util::normalize_id_document;

    use super::{CertificateResponse, IssuedCertificateResponse};

    async fn seed_event(db: &Database, certificate_enabled: bool) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            name: "Community Workshop".to_string(),
            starts_on: Utc::now(),
            certificate_enabled,
        };

        db.collection(EVENT_COLLECTION_NAME)
            .insert_one(
                bson::to_document(&event).expect("Event must be serializable to BSON"),
                None,
            )
            .await
            .expect("unable to seed event");

        event
    }

    /// Enroll, approve and complete every lesson for the learner.
    async fn complete_course(
        client: &Client,
        course: &Course,
        learner: &Cookie<'static>,
        decider: &Cookie<'static>,
    ) {
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
            .cookie(decider.clone())
            .body(r#"{"outcome":"Approve"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let lesson_ids: Vec<Uuid> = course.lessons().map(|l| l.id).collect();
        let mut last_percent = 0;
        for lesson in &lesson_ids {
            let response = client
                .post(format!("/api/v1/lesson/{}/complete", lesson))
                .header(ContentType::JSON)
                .cookie(learner.clone())
                .body(format!(r#"{{"course":"{}"}}"#, course.id))
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok);

            let progress: CourseProgressResponse =
                response.into_json().await.expect("invalid response json");
            assert!(progress.percent >= last_percent, "progress is monotonic");
            last_percent = progress.percent;
        }
        assert_eq!(last_percent, 100, "all lessons completed");
    }

    fn issue_body(course: Uuid) -> String {
        format!(
            r#"{{"subject_kind":"Course","subject":"{}"}}"#,
            course
        )
    }

    fn claim_body(event: Uuid, name: &str, document: &str, password: &str) -> String {
        format!(
            "subject_kind=event&subject={}&name={}&id_document={}&password={}&confirm_password={}",
            event, name, document, password, password
        )
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_completion_then_idempotent_issue() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let course = seed_course(db, &[2, 2]).await;
        let (_, learner) = account(&client, "graduating_learner", "200000000001", false).await;
        let (_, decider) = account(&client, "graduating_decider", "200000000002", true).await;

        // Premature request: nothing completed yet.
        let early = client
            .post("/api/v1/certificate")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(issue_body(course.id))
            .dispatch()
            .await;
        assert_eq!(early.status(), Status::Conflict, "not eligible yet");

        complete_course(&client, &course, &learner, &decider).await;

        let response = client
            .post("/api/v1/certificate")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(issue_body(course.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let first: IssuedCertificateResponse =
            response.into_json().await.expect("invalid response json");
        assert!(first.is_new);

        let response = client
            .post("/api/v1/certificate")
            .header(ContentType::JSON)
            .cookie(learner.clone())
            .body(issue_body(course.id))
            .dispatch()
            .await;
        let second: IssuedCertificateResponse =
            response.into_json().await.expect("invalid response json");
        assert!(!second.is_new, "idempotent reissue");
        assert_eq!(
            first.certificate.verification_code,
            second.certificate.verification_code
        );

        // Round trip through the public lookup.
        let response = client
            .get(format!(
                "/api/v1/certificate/{}",
                first.certificate.verification_code
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let verified: CertificateResponse =
            response.into_json().await.expect("invalid response json");
        assert_eq!(verified.holder_name, "graduating_learner");
        assert_eq!(verified.holder_id_document, "200000000001");
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_public_claim_provisions_account_once() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let event = seed_event(db, true).await;
        let document = "300.000.000-01";
        db.record_attendance(&EventAttendance {
            event_id: event.id,
            id_document: normalize_id_document(document),
            name: "Walk-in-Attendee".to_string(),
            user_id: None,
            recorded_at: Utc::now(),
        })
        .await
        .expect("unable to record attendance");

        let response = client
            .post("/api/v1/certificate/claim")
            .header(ContentType::Form)
            .body(claim_body(
                event.id,
                "Walk-in-Attendee",
                document,
                "chosen-password-1",
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let first: IssuedCertificateResponse =
            response.into_json().await.expect("invalid response json");
        assert!(first.is_new);

        // Same identity again (lost code, double submit): same certificate.
        let response = client
            .post("/api/v1/certificate/claim")
            .header(ContentType::Form)
            .body(claim_body(
                event.id,
                "Walk-in-Attendee",
                document,
                "chosen-password-1",
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let second: IssuedCertificateResponse =
            response.into_json().await.expect("invalid response json");
        assert!(!second.is_new);
        assert_eq!(
            first.certificate.verification_code,
            second.certificate.verification_code
        );

        // Identity lookup resolves without the code.
        let response = client
            .get(format!(
                "/api/v1/certificate?subject_kind=event&subject={}&document={}",
                event.id, "30000000001"
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    #[ignore = "requires a running MongoDB"]
    async fn v1_claim_rejects_bad_input_and_disabled_subjects() {
        let client = client().await;
        let db: &Database = client.rocket().state().expect("no database");

        let disabled = seed_event(db, false).await;
        let response = client
            .post("/api/v1/certificate/claim")
            .header(ContentType::Form)
            .body(claim_body(
                disabled.id,
                "Someone",
                "400.000.000-01",
                "chosen-password-1",
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound, "feature disabled");

        let enabled = seed_event(db, true).await;
        let mismatch = format!(
            "subject_kind=event&subject={}&name=Someone&id_document=400.000.000-01\
             &password=chosen-password-1&confirm_password=different-password",
            enabled.id
        );
        let response = client
            .post("/api/v1/certificate/claim")
            .header(ContentType::Form)
            .body(mismatch)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest, "confirmation mismatch");

        // Attendance was never recorded for this person.
        let response = client
            .post("/api/v1/certificate/claim")
            .header(ContentType::Form)
            .body(claim_body(
                enabled.id,
                "Someone",
                "400.000.000-01",
                "chosen-password-1",
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict, "not eligible");
    }
}

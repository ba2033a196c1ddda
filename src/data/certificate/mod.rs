use base64::Engine;
use chrono::{DateTime, Utc};
use rocket::http::Status;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::course::{Course, Event};
use crate::data::enrollment::Enrollment;
use crate::render::RenderError;
use crate::resp::problem::Problem;
use crate::util;

pub mod db;

pub static CERTIFICATE_COLLECTION_NAME: &str = "certificates";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, rocket::FromFormField,
)]
pub enum SubjectKind {
    Course,
    Event,
}

impl SubjectKind {
    /// Storage representation, matching the serde variant name.
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Course => "Course",
            SubjectKind::Event => "Event",
        }
    }
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificates aren't enabled for this subject")]
    Unavailable,
    #[error("subject '{0}' doesn't exist")]
    SubjectNotFound(Uuid),
    #[error("holder isn't eligible for this certificate: {detail}")]
    NotEligible { detail: String },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Storage(#[from] mongodb::error::Error),
}

impl From<CertificateError> for Problem {
    fn from(e: CertificateError) -> Self {
        match &e {
            CertificateError::Unavailable => Problem::new_untyped(
                Status::NotFound,
                "No certificate is available for this subject.",
            ),
            CertificateError::SubjectNotFound(id) => {
                Problem::new_untyped(Status::NotFound, "Subject doesn't exist.")
                    .insert_str("id", id)
                    .clone()
            }
            CertificateError::NotEligible { detail } => {
                Problem::new_untyped(Status::Conflict, "Not eligible for a certificate.")
                    .detail(format!("{} Refresh progress and try again.", detail))
                    .clone()
            }
            CertificateError::Render(err) => {
                tracing::error!("certificate render failure: {}", err);
                Problem::new_untyped(
                    Status::InternalServerError,
                    "Certificate document rendering failed.",
                )
                .detail("Nothing was issued; the request is safe to retry.")
                .clone()
            }
            CertificateError::Storage(err) => {
                tracing::error!("certificate storage error: {}", err);
                crate::resp::problem::problems::storage_problem()
            }
        }
    }
}

/// An immutable, independently verifiable proof of completion.
///
/// The verification code is the only externally shared key; anyone holding
/// it can retrieve the certificate without authentication, so it is generated
/// as a capability token rather than a display code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(
        default = "Uuid::new_v4",
        rename = "_id",
        with = "bson::serde_helpers::uuid_1_as_binary"
    )]
    pub id: Uuid,
    pub verification_code: String,

    pub subject_kind: SubjectKind,
    pub subject_id: Uuid,

    pub holder_name: String,
    pub holder_id_document: String,

    pub issued_at: DateTime<Utc>,
    /// Rendered document, base64 (URL-safe alphabet).
    pub artifact: String,
    #[serde(default)]
    pub source_user_id: Option<Uuid>,
}

/// Issuance result; `is_new` is false when the idempotent path returned an
/// already-existing certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub is_new: bool,
}

/// 160 bits from the thread RNG, URL-safe base64 without padding. Collisions
/// are backstopped by the unique index on `verification_code`.
pub fn new_verification_code() -> String {
    let bytes: [u8; 20] = rand::random();
    util::base64_engine()
        .encode(bytes)
        .trim_end_matches('=')
        .to_string()
}

/// Course certificates require an approved enrollment that reached 100%.
pub fn confirm_course_eligibility(
    course: &Course,
    enrollment: Option<&Enrollment>,
) -> Result<(), CertificateError> {
    if !course.certificate_enabled {
        return Err(CertificateError::Unavailable);
    }

    match enrollment {
        Some(e) if e.has_course_access() && e.progress_percent == 100 => Ok(()),
        Some(e) => Err(CertificateError::NotEligible {
            detail: format!(
                "course is at {}% with status {}.",
                e.progress_percent, e.status
            ),
        }),
        None => Err(CertificateError::NotEligible {
            detail: "no enrollment for this course.".to_string(),
        }),
    }
}

/// Event certificates require a confirmed attendance row.
pub fn confirm_event_eligibility(event: &Event, attended: bool) -> Result<(), CertificateError> {
    if !event.certificate_enabled {
        return Err(CertificateError::Unavailable);
    }
    if !attended {
        return Err(CertificateError::NotEligible {
            detail: "attendance wasn't confirmed for this event.".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::enrollment::{DecisionOutcome, EnrollmentStatus};
    use std::collections::HashSet;

    #[test]
    fn verification_codes_are_url_safe_and_unpredictable() {
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let code = new_verification_code();
            assert!(code.len() >= 26, "160 bits should encode to 27 chars");
            assert!(code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(code), "codes must not repeat");
        }
    }

    fn course(enabled: bool) -> Course {
        Course {
            id: Uuid::new_v4(),
            name: "Course".to_string(),
            certificate_enabled: enabled,
            modules: vec![],
        }
    }

    fn enrollment(status: EnrollmentStatus, percent: u8) -> Enrollment {
        let mut e = Enrollment::new(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        if status != EnrollmentStatus::Pending {
            let outcome = if status == EnrollmentStatus::Approved {
                DecisionOutcome::Approve
            } else {
                DecisionOutcome::Reject
            };
            e = e
                .decide(
                    outcome,
                    Some("because".to_string()),
                    Uuid::new_v4(),
                    Utc::now(),
                )
                .expect("pending enrollments accept a decision");
        }
        e.progress_percent = percent;
        e
    }

    #[test]
    fn course_eligibility_requires_approval_and_full_progress() {
        let c = course(true);

        let complete = enrollment(EnrollmentStatus::Approved, 100);
        assert!(confirm_course_eligibility(&c, Some(&complete)).is_ok());

        let partial = enrollment(EnrollmentStatus::Approved, 99);
        assert!(matches!(
            confirm_course_eligibility(&c, Some(&partial)),
            Err(CertificateError::NotEligible { .. })
        ));

        let unapproved = enrollment(EnrollmentStatus::Pending, 100);
        assert!(matches!(
            confirm_course_eligibility(&c, Some(&unapproved)),
            Err(CertificateError::NotEligible { .. })
        ));

        assert!(matches!(
            confirm_course_eligibility(&c, None),
            Err(CertificateError::NotEligible { .. })
        ));
    }

    #[test]
    fn disabled_subjects_short_circuit_to_unavailable() {
        let complete = enrollment(EnrollmentStatus::Approved, 100);
        assert!(matches!(
            confirm_course_eligibility(&course(false), Some(&complete)),
            Err(CertificateError::Unavailable)
        ));

        let event = Event {
            id: Uuid::new_v4(),
            name: "Event".to_string(),
            starts_on: Utc::now(),
            certificate_enabled: false,
        };
        assert!(matches!(
            confirm_event_eligibility(&event, true),
            Err(CertificateError::Unavailable)
        ));
    }

    #[test]
    fn event_eligibility_requires_attendance() {
        let event = Event {
            id: Uuid::new_v4(),
            name: "Event".to_string(),
            starts_on: Utc::now(),
            certificate_enabled: true,
        };

        assert!(confirm_event_eligibility(&event, true).is_ok());
        assert!(matches!(
            confirm_event_eligibility(&event, false),
            Err(CertificateError::NotEligible { .. })
        ));
    }
}

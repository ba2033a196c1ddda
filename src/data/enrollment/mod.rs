use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::resp::problem::Problem;
use rocket::http::Status;

pub mod db;

pub static ENROLLMENT_COLLECTION_NAME: &str = "enrollments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum EnrollmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentStatus::Pending => write!(f, "pending"),
            EnrollmentStatus::Approved => write!(f, "approved"),
            EnrollmentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("an open enrollment already exists for this learner and course")]
    AlreadyEnrolled { learner: Uuid, course: Uuid },
    #[error("enrollment is {status} and can no longer be decided")]
    InvalidTransition { status: EnrollmentStatus },
    #[error("rejecting an enrollment requires a reason")]
    MissingReason,
    #[error("enrollment '{0}' doesn't exist")]
    NotFound(Uuid),
    #[error("course '{0}' doesn't exist")]
    CourseNotFound(Uuid),
    #[error(transparent)]
    Storage(#[from] mongodb::error::Error),
}

impl From<EnrollmentError> for Problem {
    fn from(e: EnrollmentError) -> Self {
        match &e {
            EnrollmentError::AlreadyEnrolled { course, .. } => {
                Problem::new_untyped(Status::Conflict, "Already enrolled.")
                    .insert_str("course", course)
                    .detail("An enrollment for this course is already pending or approved.")
                    .clone()
            }
            EnrollmentError::InvalidTransition { status } => {
                Problem::new_untyped(Status::Conflict, "Enrollment already decided.")
                    .insert_str("status", status)
                    .detail(e.to_string())
                    .clone()
            }
            EnrollmentError::MissingReason => {
                Problem::new_untyped(Status::BadRequest, "Missing rejection reason.")
            }
            EnrollmentError::NotFound(id) => {
                Problem::new_untyped(Status::NotFound, "Enrollment doesn't exist.")
                    .insert_str("id", id)
                    .clone()
            }
            EnrollmentError::CourseNotFound(id) => {
                Problem::new_untyped(Status::NotFound, "Course doesn't exist.")
                    .insert_str("id", id)
                    .clone()
            }
            EnrollmentError::Storage(err) => {
                tracing::error!("enrollment storage error: {}", err);
                crate::resp::problem::problems::storage_problem()
            }
        }
    }
}

/// A learner's relationship to a course. Gates content access: only an
/// `Approved` enrollment grants it; `Pending` and `Rejected` deny it with
/// distinct user-facing states.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Enrollment {
    #[serde(
        default = "Uuid::new_v4",
        rename = "_id",
        with = "bson::serde_helpers::uuid_1_as_binary"
    )]
    pub id: Uuid,
    pub learner_id: Uuid,
    pub course_id: Uuid,

    pub status: EnrollmentStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,

    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<Uuid>,

    /// True while this record occupies the one-open-enrollment slot for the
    /// (learner, course) pair; cleared on rejection so a later brand-new
    /// request doesn't collide with the partial unique index.
    pub active: bool,

    pub progress_percent: u8,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(learner_id: Uuid, course_id: Uuid, now: DateTime<Utc>) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            learner_id,
            course_id,
            status: EnrollmentStatus::Pending,
            rejection_reason: None,
            requested_at: now,
            decided_at: None,
            decided_by: None,
            active: true,
            progress_percent: 0,
            completed_at: None,
            last_accessed_at: None,
        }
    }

    pub fn has_course_access(&self) -> bool {
        self.status == EnrollmentStatus::Approved
    }

    /// The one legal transition: `Pending -> {Approved, Rejected}`.
    ///
    /// Pure; the storage layer replays the result against an optimistic
    /// `status == Pending` filter so a concurrent double-decide loses with
    /// `InvalidTransition` instead of silently overwriting.
    pub fn decide(
        &self,
        outcome: DecisionOutcome,
        reason: Option<String>,
        decider: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, EnrollmentError> {
        if self.status != EnrollmentStatus::Pending {
            return Err(EnrollmentError::InvalidTransition {
                status: self.status,
            });
        }

        match outcome {
            DecisionOutcome::Approve => Ok(Enrollment {
                status: EnrollmentStatus::Approved,
                decided_at: Some(now),
                decided_by: Some(decider),
                active: true,
                ..self.clone()
            }),
            DecisionOutcome::Reject => {
                let reason = reason
                    .filter(|r| !r.trim().is_empty())
                    .ok_or(EnrollmentError::MissingReason)?;

                Ok(Enrollment {
                    status: EnrollmentStatus::Rejected,
                    rejection_reason: Some(reason),
                    decided_at: Some(now),
                    decided_by: Some(decider),
                    active: false,
                    ..self.clone()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Enrollment {
        Enrollment::new(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn new_enrollment_is_pending_without_access() {
        let e = pending();

        assert_eq!(e.status, EnrollmentStatus::Pending);
        assert!(e.active);
        assert!(!e.has_course_access());
        assert_eq!(e.progress_percent, 0);
        assert!(e.decided_at.is_none());
    }

    #[test]
    fn approval_grants_access() {
        let decider = Uuid::new_v4();
        let now = Utc::now();

        let approved = pending()
            .decide(DecisionOutcome::Approve, None, decider, now)
            .expect("pending can be approved");

        assert_eq!(approved.status, EnrollmentStatus::Approved);
        assert!(approved.active);
        assert!(approved.has_course_access());
        assert_eq!(approved.decided_at, Some(now));
        assert_eq!(approved.decided_by, Some(decider));
        assert!(approved.rejection_reason.is_none());
    }

    #[test]
    fn rejection_requires_and_records_a_reason() {
        let e = pending();

        let no_reason = e.decide(DecisionOutcome::Reject, None, Uuid::new_v4(), Utc::now());
        assert!(matches!(no_reason, Err(EnrollmentError::MissingReason)));

        let blank = e.decide(
            DecisionOutcome::Reject,
            Some("   ".to_string()),
            Uuid::new_v4(),
            Utc::now(),
        );
        assert!(matches!(blank, Err(EnrollmentError::MissingReason)));

        let rejected = e
            .decide(
                DecisionOutcome::Reject,
                Some("cadastro incompleto".to_string()),
                Uuid::new_v4(),
                Utc::now(),
            )
            .expect("pending can be rejected with a reason");

        assert_eq!(rejected.status, EnrollmentStatus::Rejected);
        assert!(!rejected.active);
        assert!(!rejected.has_course_access());
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some("cadastro incompleto")
        );
    }

    #[test]
    fn decided_enrollments_reject_further_decisions() {
        let approved = pending()
            .decide(DecisionOutcome::Approve, None, Uuid::new_v4(), Utc::now())
            .expect("pending can be approved");

        for outcome in [DecisionOutcome::Approve, DecisionOutcome::Reject] {
            let again = approved.decide(
                outcome,
                Some("too late".to_string()),
                Uuid::new_v4(),
                Utc::now(),
            );
            assert!(matches!(
                again,
                Err(EnrollmentError::InvalidTransition {
                    status: EnrollmentStatus::Approved
                })
            ));
        }
    }
}

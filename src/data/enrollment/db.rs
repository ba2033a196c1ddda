use bson::doc;
use chrono::Utc;
use mongodb::options::{FindOneAndReplaceOptions, FindOneOptions, IndexOptions, ReturnDocument};
use mongodb::{Database, IndexModel};
use uuid::Uuid;

use crate::data::course::db::CourseDbExt;
use crate::data::{self, is_duplicate_key};

use super::{DecisionOutcome, Enrollment, EnrollmentError, ENROLLMENT_COLLECTION_NAME};

mod filter {
    use bson::{doc, Document};
    use uuid::Uuid;

    pub fn pair(learner: Uuid, course: Uuid) -> Document {
        doc! {
            "learner_id": learner.to_string(),
            "course_id": course.to_string(),
        }
    }

    pub fn approved_pair(learner: Uuid, course: Uuid) -> Document {
        let mut f = pair(learner, course);
        f.insert("status", "Approved");
        f.insert("active", true);
        f
    }

    pub fn pending_by_id(id: Uuid) -> Document {
        let mut f = crate::data::by_id(id);
        f.insert("status", "Pending");
        f
    }
}

pub trait EnrollmentDbExt {
    /// Creates a new `Pending` enrollment for the pair.
    ///
    /// The partial unique index on open (learner, course) pairs makes this an
    /// atomic claim: when two requests race, exactly one row is created and
    /// the loser gets `AlreadyEnrolled`.
    async fn request_enrollment(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<Enrollment, EnrollmentError>;

    /// Applies an approve/reject decision with an optimistic
    /// `status == Pending` write filter.
    async fn decide_enrollment(
        &self,
        enrollment_id: Uuid,
        outcome: DecisionOutcome,
        reason: Option<String>,
        decider: Uuid,
    ) -> Result<Enrollment, EnrollmentError>;

    /// The learner's most recent enrollment for the course, decided or not.
    async fn find_enrollment(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<Option<Enrollment>, mongodb::error::Error>;

    /// The enrollment that currently grants content access, if any.
    async fn approved_enrollment(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<Option<Enrollment>, mongodb::error::Error>;

    /// Writes a freshly aggregated progress percentage, stamping
    /// `completed_at` the first time the course reaches 100%. Returns the
    /// updated record and whether completion was newly reached.
    async fn apply_progress(
        &self,
        enrollment_id: Uuid,
        percent: u8,
    ) -> Result<(Enrollment, bool), EnrollmentError>;
}

impl EnrollmentDbExt for Database {
    async fn request_enrollment(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        if self.get_course(course).await?.is_none() {
            return Err(EnrollmentError::CourseNotFound(course));
        }

        let enrollment = Enrollment::new(learner, course, Utc::now());

        let insert = self
            .collection(ENROLLMENT_COLLECTION_NAME)
            .insert_one(
                bson::to_document(&enrollment)
                    .expect("Enrollment must be serializable to BSON"),
                None,
            )
            .await;

        match insert {
            Ok(_) => Ok(enrollment),
            Err(e) if is_duplicate_key(&e) => {
                Err(EnrollmentError::AlreadyEnrolled { learner, course })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn decide_enrollment(
        &self,
        enrollment_id: Uuid,
        outcome: DecisionOutcome,
        reason: Option<String>,
        decider: Uuid,
    ) -> Result<Enrollment, EnrollmentError> {
        let coll = self.collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME);

        let current = coll
            .find_one(data::by_id(enrollment_id), None)
            .await?
            .ok_or(EnrollmentError::NotFound(enrollment_id))?;

        // Validates the transition before touching storage.
        let decided = current.decide(outcome, reason, decider, Utc::now())?;

        let replaced = coll
            .find_one_and_replace(
                filter::pending_by_id(enrollment_id),
                &decided,
                FindOneAndReplaceOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?;

        match replaced {
            Some(enrollment) => Ok(enrollment),
            // Lost the race against another decider.
            None => {
                let now_current = coll
                    .find_one(data::by_id(enrollment_id), None)
                    .await?
                    .ok_or(EnrollmentError::NotFound(enrollment_id))?;
                Err(EnrollmentError::InvalidTransition {
                    status: now_current.status,
                })
            }
        }
    }

    async fn find_enrollment(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<Option<Enrollment>, mongodb::error::Error> {
        self.collection(ENROLLMENT_COLLECTION_NAME)
            .find_one(
                filter::pair(learner, course),
                FindOneOptions::builder()
                    .sort(doc! { "requested_at": -1 })
                    .build(),
            )
            .await
    }

    async fn approved_enrollment(
        &self,
        learner: Uuid,
        course: Uuid,
    ) -> Result<Option<Enrollment>, mongodb::error::Error> {
        self.collection(ENROLLMENT_COLLECTION_NAME)
            .find_one(filter::approved_pair(learner, course), None)
            .await
    }

    async fn apply_progress(
        &self,
        enrollment_id: Uuid,
        percent: u8,
    ) -> Result<(Enrollment, bool), EnrollmentError> {
        let coll = self.collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME);
        let now = Utc::now().to_rfc3339();

        if percent == 100 {
            // Only the write that first crosses 100% stamps completed_at.
            let mut first_completion = data::by_id(enrollment_id);
            first_completion.insert("status", "Approved");
            first_completion.insert("completed_at", bson::Bson::Null);

            let completed = coll
                .find_one_and_update(
                    first_completion,
                    doc! { "$set": {
                        "progress_percent": percent as i32,
                        "completed_at": now.as_str(),
                        "last_accessed_at": now.as_str(),
                    }},
                    mongodb::options::FindOneAndUpdateOptions::builder()
                        .return_document(ReturnDocument::After)
                        .build(),
                )
                .await?;

            if let Some(enrollment) = completed {
                return Ok((enrollment, true));
            }
        }

        let mut approved = data::by_id(enrollment_id);
        approved.insert("status", "Approved");

        let updated = coll
            .find_one_and_update(
                approved,
                doc! { "$set": {
                    "progress_percent": percent as i32,
                    "last_accessed_at": now.as_str(),
                }},
                mongodb::options::FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?;

        updated
            .map(|enrollment| (enrollment, false))
            .ok_or(EnrollmentError::NotFound(enrollment_id))
    }
}

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<Enrollment>(ENROLLMENT_COLLECTION_NAME)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "learner_id": 1, "course_id": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        // Rejected records drop out of the constraint so a new
                        // request can supersede them.
                        .partial_filter_expression(doc! { "active": true })
                        .build(),
                )
                .build(),
            None,
        )
        .await?;
    Ok(())
}

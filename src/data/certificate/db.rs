use base64::Engine;
use bson::doc;
use chrono::Utc;
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use uuid::Uuid;

use crate::data::course::db::CourseDbExt;
use crate::data::course::{Course, Event};
use crate::data::enrollment::Enrollment;
use crate::data::is_duplicate_key;
use crate::render::{CertificateFields, CertificateRenderer};
use crate::util;

use super::{
    confirm_course_eligibility, confirm_event_eligibility, new_verification_code, Certificate,
    CertificateError, IssuedCertificate, SubjectKind, CERTIFICATE_COLLECTION_NAME,
};

mod filter {
    use bson::{doc, Document};
    use uuid::Uuid;

    use crate::data::certificate::SubjectKind;

    pub fn by_code(code: &str) -> Document {
        doc! { "verification_code": code }
    }

    pub fn by_identity(kind: SubjectKind, subject: Uuid, normalized_document: &str) -> Document {
        doc! {
            "subject_kind": kind.as_str(),
            "subject_id": subject.to_string(),
            "holder_id_document": normalized_document,
        }
    }
}

/// Identity of one issuance: what is being certified, for whom.
struct IssueKey<'a> {
    kind: SubjectKind,
    subject_id: Uuid,
    subject_title: &'a str,
    holder_name: &'a str,
    normalized_document: &'a str,
    source_user: Option<Uuid>,
}

pub trait CertificateDbExt {
    /// Issues (or idempotently returns) the certificate for a completed
    /// course enrollment.
    async fn issue_for_course(
        &self,
        course: &Course,
        enrollment: Option<&Enrollment>,
        holder_name: &str,
        normalized_document: &str,
        source_user: Option<Uuid>,
        renderer: &dyn CertificateRenderer,
    ) -> Result<IssuedCertificate, CertificateError>;

    /// Issues (or idempotently returns) the certificate for a confirmed
    /// event attendance.
    async fn issue_for_event(
        &self,
        event: &Event,
        holder_name: &str,
        normalized_document: &str,
        source_user: Option<Uuid>,
        renderer: &dyn CertificateRenderer,
    ) -> Result<IssuedCertificate, CertificateError>;

    async fn find_certificate_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Certificate>, mongodb::error::Error>;

    /// Lookup by the issuance idempotency key, for returning holders who
    /// lost their verification code.
    async fn find_certificate_by_identity(
        &self,
        kind: SubjectKind,
        subject: Uuid,
        normalized_document: &str,
    ) -> Result<Option<Certificate>, mongodb::error::Error>;
}

impl CertificateDbExt for Database {
    async fn issue_for_course(
        &self,
        course: &Course,
        enrollment: Option<&Enrollment>,
        holder_name: &str,
        normalized_document: &str,
        source_user: Option<Uuid>,
        renderer: &dyn CertificateRenderer,
    ) -> Result<IssuedCertificate, CertificateError> {
        confirm_course_eligibility(course, enrollment)?;

        issue(
            self,
            IssueKey {
                kind: SubjectKind::Course,
                subject_id: course.id,
                subject_title: &course.name,
                holder_name,
                normalized_document,
                source_user,
            },
            renderer,
        )
        .await
    }

    async fn issue_for_event(
        &self,
        event: &Event,
        holder_name: &str,
        normalized_document: &str,
        source_user: Option<Uuid>,
        renderer: &dyn CertificateRenderer,
    ) -> Result<IssuedCertificate, CertificateError> {
        let attended = self
            .attendance_confirmed(event.id, normalized_document)
            .await?;
        confirm_event_eligibility(event, attended)?;

        issue(
            self,
            IssueKey {
                kind: SubjectKind::Event,
                subject_id: event.id,
                subject_title: &event.name,
                holder_name,
                normalized_document,
                source_user,
            },
            renderer,
        )
        .await
    }

    async fn find_certificate_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Certificate>, mongodb::error::Error> {
        self.collection(CERTIFICATE_COLLECTION_NAME)
            .find_one(filter::by_code(code), None)
            .await
    }

    async fn find_certificate_by_identity(
        &self,
        kind: SubjectKind,
        subject: Uuid,
        normalized_document: &str,
    ) -> Result<Option<Certificate>, mongodb::error::Error> {
        self.collection(CERTIFICATE_COLLECTION_NAME)
            .find_one(filter::by_identity(kind, subject, normalized_document), None)
            .await
    }
}

/// Insert-or-fetch against the `(subject, holder document)` unique index.
///
/// The artifact is rendered before anything touches storage, so a render
/// failure leaves no partial certificate. A duplicate key on insert means
/// either a concurrent issuance for the same holder (fetch and return
/// theirs) or a verification-code collision (regenerate and retry).
async fn issue(
    db: &Database,
    key: IssueKey<'_>,
    renderer: &dyn CertificateRenderer,
) -> Result<IssuedCertificate, CertificateError> {
    if let Some(existing) = db
        .find_certificate_by_identity(key.kind, key.subject_id, key.normalized_document)
        .await?
    {
        return Ok(IssuedCertificate {
            certificate: existing,
            is_new: false,
        });
    }

    let issued_at = Utc::now();

    for _ in 0..3 {
        let verification_code = new_verification_code();

        let artifact_bytes = renderer.render(&CertificateFields {
            holder_name: key.holder_name,
            subject_title: key.subject_title,
            issued_at,
            verification_code: &verification_code,
        })?;

        let certificate = Certificate {
            id: Uuid::new_v4(),
            verification_code,
            subject_kind: key.kind,
            subject_id: key.subject_id,
            holder_name: key.holder_name.to_string(),
            holder_id_document: key.normalized_document.to_string(),
            issued_at,
            artifact: util::base64_engine().encode(&artifact_bytes),
            source_user_id: key.source_user,
        };

        let insert = db
            .collection(CERTIFICATE_COLLECTION_NAME)
            .insert_one(
                bson::to_document(&certificate)
                    .expect("Certificate must be serializable to BSON"),
                None,
            )
            .await;

        match insert {
            Ok(_) => {
                return Ok(IssuedCertificate {
                    certificate,
                    is_new: true,
                })
            }
            Err(e) if is_duplicate_key(&e) => {
                if let Some(existing) = db
                    .find_certificate_by_identity(
                        key.kind,
                        key.subject_id,
                        key.normalized_document,
                    )
                    .await?
                {
                    // A concurrent request won; converge on its certificate.
                    return Ok(IssuedCertificate {
                        certificate: existing,
                        is_new: false,
                    });
                }
                // Otherwise the fresh code collided with another holder's.
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(CertificateError::Storage(
        std::io::Error::new(
            std::io::ErrorKind::Other,
            "verification code generation kept colliding",
        )
        .into(),
    ))
}

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let coll = db.collection::<Certificate>(CERTIFICATE_COLLECTION_NAME);

    coll.create_index(
        IndexModel::builder()
            .keys(doc! { "verification_code": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build(),
        None,
    )
    .await?;

    coll.create_index(
        IndexModel::builder()
            .keys(doc! { "subject_kind": 1, "subject_id": 1, "holder_id_document": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build(),
        None,
    )
    .await?;

    Ok(())
}

use bson::{doc, Document};
use mongodb::Database;
use uuid::Uuid;

pub mod certificate;
pub mod course;
pub mod enrollment;
pub mod progress;
pub mod user;

/// Filter matching a document by its binary-UUID `_id`.
#[inline]
pub fn by_id(id: Uuid) -> Document {
    doc! { "_id": bson::Uuid::from_uuid_1(id) }
}

/// MongoDB duplicate key violations surface either as write errors or
/// command errors carrying code 11000. The uniqueness-backed flows
/// (enrollment requests, certificate issuance, account provisioning) branch
/// on this instead of pre-checking, closing the check-then-act race.
pub fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}

/// Creates every unique index the core's invariants rely on. Called from
/// `create()` before the server accepts requests.
pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    user::db::ensure_indexes(db).await?;
    course::db::ensure_indexes(db).await?;
    progress::db::ensure_indexes(db).await?;
    enrollment::db::ensure_indexes(db).await?;
    certificate::db::ensure_indexes(db).await?;
    Ok(())
}

use bson::spec::BinarySubtype;
use bson::{Binary, Bson};
use crypto::bcrypt::bcrypt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::convert::{TryFrom, TryInto};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::resp::problem::Problem;
use crate::role::Role;
use crate::security::Salt;
use crate::util::normalize_id_document;

pub mod db;

pub static USER_COLLECTION_NAME: &str = "users";

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PasswordHash([u8; 24]);

impl PasswordHash {
    pub fn new(password: impl AsRef<str>, salt: &Salt) -> PasswordHash {
        let mut pw_hash: [u8; 24] = [0; 24];

        // Passwords are pre-hashed so bcrypt's 72-byte input cap can't be hit.
        let mut sha = Sha256::new();
        sha2::Digest::update(&mut sha, password.as_ref().as_bytes());

        bcrypt(12, salt, sha.finalize().as_slice(), &mut pw_hash);

        PasswordHash(pw_hash)
    }
}

impl From<PasswordHash> for Bson {
    fn from(pw_hash: PasswordHash) -> Self {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: pw_hash.0.to_vec(),
        })
    }
}

impl TryFrom<Bson> for PasswordHash {
    type Error = Problem;

    fn try_from(bson: Bson) -> Result<Self, Self::Error> {
        match bson {
            Bson::Binary(bin) => {
                if let Ok(array) = bin.bytes.try_into() {
                    Ok(PasswordHash(array))
                } else {
                    Err(password_lost_err())
                }
            }
            _ => Err(password_lost_err()),
        }
    }
}

fn password_lost_err() -> Problem {
    Problem::new_untyped(
        rocket::http::Status::InternalServerError,
        "Unable to check password.",
    )
}

/// A learner/instructor account.
///
/// Accounts are keyed by the holder's normalized government ID document; the
/// `_id` is derived from it so two concurrent provisioning attempts for the
/// same person collapse onto one document at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub id_document: String,
    pub pw_hash: PasswordHash,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn new(
        name: impl Into<String>,
        email: Option<String>,
        id_document: impl AsRef<str>,
        password: impl AsRef<str>,
        salt: &Salt,
    ) -> User {
        let id_document = normalize_id_document(id_document);

        User {
            id: Self::id_for_document(&id_document),
            name: name.into(),
            email,
            id_document,
            pw_hash: PasswordHash::new(password, salt),
            role: Role::Learner,
        }
    }

    pub fn id_for_document(normalized_document: impl AsRef<str>) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            normalized_document.as_ref().as_bytes(),
        )
    }
}

/// Account fields safe to hand back to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            role: user.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_is_stable_per_document() {
        let a = User::new("Ana", None, "123.456.789-00", "hunter2hunter2", &[0; 16]);
        let b = User::new("Ana Maria", None, "12345678900", "other-password", &[0; 16]);

        // Same person (same document) always lands on the same account id.
        assert_eq!(a.id, b.id);
        assert_eq!(a.id_document, "12345678900");
    }

    #[test]
    fn password_hash_depends_on_salt_and_password() {
        let h1 = PasswordHash::new("correct horse", &[0; 16]);
        let h2 = PasswordHash::new("correct horse", &[0; 16]);
        let h3 = PasswordHash::new("correct horse", &[1; 16]);
        let h4 = PasswordHash::new("wrong horse", &[0; 16]);

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_ne!(h1, h4);
    }
}

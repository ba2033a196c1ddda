use bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use rocket::FromForm;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::{self, is_duplicate_key};
use crate::resp::problem::Problem;
use crate::security::Salt;
use crate::util::normalize_id_document;

use super::{PasswordHash, User, USER_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn bad_name(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad name.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_email(email: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad email.")
            .insert_str("email", email)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_document(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad ID document.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_password(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad password.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn document_taken() -> Problem {
        Problem::new_untyped(
            Status::Conflict,
            "ID document already bound to another account.",
        )
    }

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        Problem::new_untyped(Status::NotFound, "User doesn't exist.")
            .insert("id", id.to_string())
            .clone()
    }

    #[inline]
    pub fn bad_login() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Bad identifier or password.")
    }
}

mod filter {
    use bson::{doc, Document};

    pub fn by_document(normalized: &str) -> Document {
        doc! { "id_document": normalized }
    }

    pub fn by_email(email: &str) -> Document {
        doc! { "email": email }
    }
}

#[derive(Clone, FromForm, ToSchema)]
pub struct UserSignupData {
    pub name: String,
    #[schema(format = "email")]
    pub email: Option<String>,
    pub id_document: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for UserSignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserSignupData:{}", self.name)
    }
}

pub fn validate_name(name: &str) -> Result<(), Problem> {
    if name.trim().len() < 2 {
        return Err(problem::bad_name("Name must be at least 2 characters."));
    }
    if name.len() > 120 {
        return Err(problem::bad_name("Name can't be longer than 120 bytes."));
    }
    Ok(())
}

pub fn validate_document(raw: &str) -> Result<String, Problem> {
    let normalized = normalize_id_document(raw);
    if !(6..=14).contains(&normalized.len()) {
        return Err(problem::bad_document(
            "ID document must contain between 6 and 14 digits.",
        ));
    }
    Ok(normalized)
}

pub fn validate_password(password: &str) -> Result<(), Problem> {
    if password.len() < 8 {
        return Err(problem::bad_password(
            "Password must be at least 8 characters (bytes) long.",
        ));
    }
    if password.len() > 1024 {
        return Err(problem::bad_password(
            "Passwords longer than 1024 characters aren't supported.",
        ));
    }
    Ok(())
}

impl UserSignupData {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_name(&self.name)?;

        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(problem::bad_email(email, "Not a valid e-mail address."));
            }
        }

        validate_document(&self.id_document)?;
        validate_password(&self.password)?;

        Ok(())
    }
}

#[derive(Clone, FromForm, ToSchema)]
pub struct UserLoginData {
    /// Either the registered e-mail address or the ID document number.
    pub identifier: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for UserLoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserLoginData")
    }
}

impl UserLoginData {
    pub fn is_email(&self) -> bool {
        self.identifier.contains('@')
    }
}

pub trait UserDbExt {
    async fn create_user(
        &self,
        create_user: UserSignupData,
        admin_names: impl AsRef<[String]>,
        salt: &Salt,
    ) -> Result<User, Problem>;

    /// Creates a minimal account bound to an ID document, or returns the
    /// existing one when the supplied password matches it. The public
    /// certificate claim goes through here.
    async fn provision_by_document(
        &self,
        name: &str,
        normalized_document: &str,
        password: &str,
        salt: &Salt,
    ) -> Result<User, Problem>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
    async fn find_user_by_document(&self, normalized: &str) -> Result<Option<User>, Problem>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Problem>;
}

impl UserDbExt for Database {
    async fn create_user(
        &self,
        create_user: UserSignupData,
        admin_names: impl AsRef<[String]>,
        salt: &Salt,
    ) -> Result<User, Problem> {
        if let Some(email) = &create_user.email {
            if self.find_user_by_email(email).await?.is_some() {
                return Err(problem::bad_email(email, "Email already registered."));
            }
        }

        let mut user = User::new(
            create_user.name,
            create_user.email,
            &create_user.id_document,
            &create_user.password,
            salt,
        );

        if admin_names.as_ref().contains(&user.name) {
            user.role = crate::role::Role::Admin;
        }

        let insert = self
            .collection(USER_COLLECTION_NAME)
            .insert_one(
                bson::to_document(&user).expect("User must be serializable to BSON"),
                None,
            )
            .await;

        match insert {
            Ok(_) => Ok(user),
            Err(e) if is_duplicate_key(&e) => {
                // Lost a race, or the document is already registered. Reuse is
                // only allowed when the caller holds the account password.
                let existing = self
                    .find_user_by_document(&user.id_document)
                    .await?
                    .ok_or_else(problem::document_taken)?;
                if existing.pw_hash == user.pw_hash {
                    Ok(existing)
                } else {
                    Err(problem::document_taken())
                }
            }
            Err(e) => Err(Problem::from(e)),
        }
    }

    async fn provision_by_document(
        &self,
        name: &str,
        normalized_document: &str,
        password: &str,
        salt: &Salt,
    ) -> Result<User, Problem> {
        if let Some(existing) = self.find_user_by_document(normalized_document).await? {
            return if existing.pw_hash == PasswordHash::new(password, salt) {
                Ok(existing)
            } else {
                Err(problem::document_taken())
            };
        }

        self.create_user(
            UserSignupData {
                name: name.to_string(),
                email: None,
                id_document: normalized_document.to_string(),
                password: password.to_string(),
            },
            &[],
            salt,
        )
        .await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(data::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn find_user_by_document(&self, normalized: &str) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_document(normalized), None)
            .await
            .map_err(Problem::from)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_email(email), None)
            .await
            .map_err(Problem::from)
    }
}

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<User>(USER_COLLECTION_NAME)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "id_document": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;
    Ok(())
}

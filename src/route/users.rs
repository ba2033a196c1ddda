use mongodb::Database;
use rocket::form::Form;
use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::State;

use crate::config::Config;
use crate::data::user::db::problem as user_problem;
use crate::data::user::db::{UserDbExt, UserLoginData, UserSignupData};
use crate::data::user::{PasswordHash, UserResponse};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::security::Security;
use crate::util::normalize_id_document;

/// Create an account
#[utoipa::path(
    request_body(content = UserSignupData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Created account", body = UserResponse),
        (status = 400, description = "Malformed signup fields", body = Problem),
        (status = 409, description = "ID document already registered", body = Problem),
    )
)]
#[post("/user", data = "<create_user>")]
#[tracing::instrument(skip(security))]
pub async fn user_create<'a>(
    create_user: Form<UserSignupData>,
    cookies: &'a CookieJar<'_>,
    db: &State<Database>,
    c: &State<Config>,
    security: &State<Security>,
) -> Result<Json<UserResponse>, Problem> {
    create_user.validate()?;

    let user = db
        .create_user(
            create_user.into_inner(),
            &c.admin_usernames,
            &security.salt,
        )
        .await?;

    let urt = UserRoleToken::new(&user);
    cookies.add(urt.cookie(&security.jwt_keys.private)?);

    Ok(Json(UserResponse::from(user)))
}

/// Log in with e-mail or ID document
#[utoipa::path(
    request_body(content = UserLoginData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Session established", body = UserResponse),
        (status = 401, description = "Bad identifier or password", body = Problem),
    )
)]
#[post("/login", data = "<login_user>")]
#[tracing::instrument(skip(security))]
pub async fn login_submit<'a>(
    login_user: Form<UserLoginData>,
    cookies: &'a CookieJar<'_>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<Json<UserResponse>, Problem> {
    let found = match login_user.is_email() {
        true => db.find_user_by_email(&login_user.identifier).await,
        false => {
            db.find_user_by_document(&normalize_id_document(&login_user.identifier))
                .await
        }
    }?;

    let user = found.ok_or_else(user_problem::bad_login)?;

    if user.pw_hash != PasswordHash::new(&login_user.password, &security.salt) {
        return Err(user_problem::bad_login());
    }

    let urt = UserRoleToken::new(&user);
    cookies.add(urt.cookie(&security.jwt_keys.private)?);

    Ok(Json(UserResponse::from(user)))
}

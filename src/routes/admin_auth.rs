use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::db::admin_repo;
use crate::error::AppError;
use crate::security::{jwt, password};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    /// Accepted as an alias for `email`.
    pub username: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
}

/// POST /admin/login
#[post("/admin/login")]
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();

    let email = body
        .email
        .or(body.username)
        .ok_or_else(|| AppError::BadRequest("email is required".into()))?;

    let admin = admin_repo::find_by_email(&state.db, &email)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !password::verify_password(&body.password, &admin.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let access_token = jwt::issue_access_token(&state.config.jwt_secret, &admin)?;

    Ok(HttpResponse::Ok().json(LoginResponse {
        access_token,
        token_type: "Bearer",
        expires_in: jwt::ACCESS_TOKEN_TTL_HOURS * 3600,
    }))
}

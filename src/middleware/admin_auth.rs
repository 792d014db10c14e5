use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use uuid::Uuid;

use crate::error::AppError;
use crate::security::jwt;
use crate::state::AppState;

/// Authenticated admin extracted from a Bearer access token. Every admin
/// handler takes this guard; admin queries are scoped to objects the
/// authenticated admin owns.
#[derive(Debug, Clone)]
pub struct AdminClaims {
    pub admin_id: Uuid,
    pub email: String,
}

impl FromRequest for AdminClaims {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract(req).map_err(Into::into))
    }
}

fn extract(req: &HttpRequest) -> Result<AdminClaims, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AppError::Internal)?;

    let token = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let claims = jwt::decode_access_token(&state.config.jwt_secret, token)?;

    Ok(AdminClaims {
        admin_id: claims.sub,
        email: claims.email,
    })
}

use std::future::Future;
use std::pin::Pin;

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use serde::Deserialize;

use crate::db::project_repo;
use crate::error::AppError;
use crate::models::Project;
use crate::state::AppState;

/// Project resolved from the caller's API key, taken from the `X-API-Key`
/// header or the `api_key` query parameter. Missing or unknown keys are
/// rejected before the handler runs.
#[derive(Debug, Clone)]
pub struct ApiProject(pub Project);

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

impl FromRequest for ApiProject {
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();

        let header_key = req
            .headers()
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query_key = web::Query::<ApiKeyQuery>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.into_inner().api_key);

        Box::pin(async move {
            let state = state.ok_or(AppError::Internal)?;
            let api_key = header_key.or(query_key).ok_or(AppError::InvalidApiKey)?;

            let project = project_repo::find_by_api_key(&state.db, &api_key)
                .await
                .map_err(AppError::from)?
                .ok_or(AppError::InvalidApiKey)?;

            Ok(ApiProject(project))
        })
    }
}

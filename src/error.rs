use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::experiment::ExperimentStatus;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("at least one identifier (device_id, email, or external_id) must be provided")]
    NoIdentifier,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("experiment is not running")]
    ExperimentNotRunning { status: ExperimentStatus },

    #[error("experiment has no variants")]
    NoVariants,

    #[error("total rollout cannot exceed 1.0 (got {total})")]
    RolloutOverflow { total: f64 },

    #[error("{0}")]
    ToggleConstraint(String),

    #[error("{0}")]
    UniquenessViolation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error")]
    Internal,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::NoIdentifier
            | AppError::ExperimentNotRunning { .. }
            | AppError::RolloutOverflow { .. }
            | AppError::ToggleConstraint(_)
            | AppError::UniquenessViolation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidApiKey | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::NoVariants
            | AppError::Database(_)
            | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::ExperimentNotRunning { status } => {
                json!({ "error": "Experiment is not running", "status": status })
            }
            // Internal faults stay opaque to clients.
            AppError::Database(_) | AppError::Internal | AppError::StartServer(_) => {
                json!({ "error": "internal server error" })
            }
            other => json!({ "error": other.to_string() }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // 23505 = unique_violation
            if db.code().as_deref() == Some("23505") {
                return AppError::UniquenessViolation(db.message().to_string());
            }
        }
        AppError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(e.to_string())
    }
}

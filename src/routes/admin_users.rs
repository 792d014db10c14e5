use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{distribution_repo, user_repo};
use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::models::{ExperimentBrief, VariantSummary};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub email: Option<String>,
    pub external_id: Option<String>,
}

/// Read-only: users are created and mutated by the library surface only.
#[get("/admin/users")]
pub async fn list_users(
    state: web::Data<AppState>,
    admin: AdminClaims,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let users = user_repo::list_owned(
        &state.db,
        admin.admin_id,
        query.project_id,
        query.device_id.as_deref(),
        query.email.as_deref(),
        query.external_id.as_deref(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(users))
}

#[get("/admin/users/{id}")]
pub async fn get_user(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user = user_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::Ok().json(user))
}

#[derive(Serialize)]
struct UserDistributionEntry {
    experiment: ExperimentBrief,
    variant: VariantSummary,
}

/// GET /admin/users/{id}/distributions
#[get("/admin/users/{id}/distributions")]
pub async fn user_distributions(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user = user_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let rows = distribution_repo::list_for_user_with_details(&state.db, user.id).await?;

    let entries: Vec<UserDistributionEntry> = rows
        .into_iter()
        .map(
            |(experiment_id, experiment_key, experiment_name, variant_id, variant_key, payload)| {
                UserDistributionEntry {
                    experiment: ExperimentBrief {
                        id: experiment_id,
                        key: experiment_key,
                        name: experiment_name,
                    },
                    variant: VariantSummary {
                        id: variant_id,
                        key: variant_key,
                        payload,
                    },
                }
            },
        )
        .collect();

    Ok(HttpResponse::Ok().json(entries))
}

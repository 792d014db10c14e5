use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::distribution_repo;
use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub experiment_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
}

/// Read-only: distributions are written by the assignment path and the
/// recalculator only.
#[get("/admin/distributions")]
pub async fn list_distributions(
    state: web::Data<AppState>,
    admin: AdminClaims,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let distributions = distribution_repo::list_owned(
        &state.db,
        admin.admin_id,
        query.experiment_id,
        query.user_id,
        query.variant_id,
    )
    .await?;

    Ok(HttpResponse::Ok().json(distributions))
}

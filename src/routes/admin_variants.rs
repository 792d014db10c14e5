use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::{experiment_repo, variant_repo};
use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::models::Experiment;
use crate::services::distribution::propagate_variant_change;
use crate::services::rollout;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub experiment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVariantRequest {
    pub experiment_id: Uuid,
    pub key: String,
    pub payload: Option<JsonValue>,
    pub rollout: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVariantRequest {
    pub key: Option<String>,
    pub payload: Option<JsonValue>,
    pub rollout: Option<f64>,
}

#[get("/admin/variants")]
pub async fn list_variants(
    state: web::Data<AppState>,
    admin: AdminClaims,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let variants = variant_repo::list_owned(&state.db, admin.admin_id, query.experiment_id).await?;
    Ok(HttpResponse::Ok().json(variants))
}

#[post("/admin/variants")]
pub async fn create_variant(
    state: web::Data<AppState>,
    admin: AdminClaims,
    body: web::Json<CreateVariantRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.key.trim().is_empty() {
        return Err(AppError::BadRequest("key must not be empty".into()));
    }
    rollout::ensure_rollout_in_range(body.rollout)?;

    let experiment = experiment_repo::find_owned(&state.db, body.experiment_id, admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;
    rollout::ensure_toggle_variant_key(experiment.kind, &body.key)?;

    let mut tx = state.db.begin().await?;
    experiment_repo::lock_for_write(&mut *tx, experiment.id).await?;

    let sibling_sum = variant_repo::rollout_sum(&mut *tx, experiment.id, None).await?;
    rollout::ensure_rollout_capacity(sibling_sum, body.rollout)?;

    let variant = variant_repo::insert(
        &mut *tx,
        experiment.id,
        &body.key,
        body.payload.as_ref(),
        body.rollout,
    )
    .await?;
    tx.commit().await?;

    propagate_variant_change(&state, &experiment, variant.summary()).await;

    Ok(HttpResponse::Created().json(variant))
}

#[get("/admin/variants/{id}")]
pub async fn get_variant(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let variant = variant_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(HttpResponse::Ok().json(variant))
}

#[put("/admin/variants/{id}")]
pub async fn update_variant(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
    body: web::Json<UpdateVariantRequest>,
) -> Result<HttpResponse, AppError> {
    let current = variant_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let experiment = experiment_of(&state, current.experiment_id).await?;

    let body = body.into_inner();
    let key = body.key.as_deref().unwrap_or(&current.key);
    let rollout = body.rollout.unwrap_or(current.rollout);
    let payload = body.payload.or_else(|| current.payload.clone());

    rollout::ensure_toggle_variant_key(experiment.kind, key)?;
    rollout::ensure_rollout_in_range(rollout)?;

    let mut tx = state.db.begin().await?;
    experiment_repo::lock_for_write(&mut *tx, experiment.id).await?;

    let sibling_sum = variant_repo::rollout_sum(&mut *tx, experiment.id, Some(current.id)).await?;
    rollout::ensure_rollout_capacity(sibling_sum, rollout)?;

    let updated =
        variant_repo::update(&mut *tx, current.id, key, payload.as_ref(), rollout).await?;
    tx.commit().await?;

    propagate_variant_change(&state, &experiment, updated.summary()).await;

    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/admin/variants/{id}")]
pub async fn delete_variant(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let variant = variant_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let experiment = experiment_of(&state, variant.experiment_id).await?;

    rollout::ensure_toggle_delete_allowed(experiment.kind)?;

    let mut tx = state.db.begin().await?;
    experiment_repo::lock_for_write(&mut *tx, experiment.id).await?;
    variant_repo::delete(&mut *tx, variant.id).await?;
    tx.commit().await?;

    // The deleted variant is the affected one on the update event.
    propagate_variant_change(&state, &experiment, variant.summary()).await;

    Ok(HttpResponse::NoContent().finish())
}

async fn experiment_of(state: &AppState, experiment_id: Uuid) -> Result<Experiment, AppError> {
    experiment_repo::find(&state.db, experiment_id)
        .await?
        .ok_or(AppError::Internal)
}

use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{experiment_repo, project_repo, variant_repo};
use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::models::{Experiment, ExperimentKind, ExperimentStatus, Variant};
use crate::services::distribution;
use crate::services::experiments;
use crate::services::notifier::ChangeEvent;
use crate::services::rollout::{self, VariantPatch};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_id: Option<Uuid>,
    pub status: Option<ExperimentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExperimentRequest {
    pub project_id: Uuid,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: Option<ExperimentKind>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExperimentRequest {
    pub key: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ExperimentStatus>,
    pub kind: Option<ExperimentKind>,
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateRequest {
    pub variants: Vec<VariantPatch>,
}

#[derive(Serialize)]
struct ExperimentDetail {
    #[serde(flatten)]
    experiment: Experiment,
    variants: Vec<Variant>,
}

#[get("/admin/experiments")]
pub async fn list_experiments(
    state: web::Data<AppState>,
    admin: AdminClaims,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let experiments =
        experiment_repo::list_owned(&state.db, admin.admin_id, query.project_id, query.status)
            .await?;
    Ok(HttpResponse::Ok().json(experiments))
}

/// POST /admin/experiments
///
/// Experiments start in `draft`. Creating a toggle experiment seeds its
/// fixed `enabled`/`control` pair in the same transaction; the pair is the
/// only variant set a toggle experiment can ever have.
#[post("/admin/experiments")]
pub async fn create_experiment(
    state: web::Data<AppState>,
    admin: AdminClaims,
    body: web::Json<CreateExperimentRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.key.trim().is_empty() || body.name.trim().is_empty() {
        return Err(AppError::BadRequest("key and name must not be empty".into()));
    }

    let project = project_repo::find_owned(&state.db, body.project_id, admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let kind = body.kind.unwrap_or(ExperimentKind::Toggle);

    let (experiment, variants) = experiments::create_experiment(
        &state.db,
        project.id,
        &body.key,
        &body.name,
        body.description.as_deref().unwrap_or(""),
        kind,
    )
    .await?;

    Ok(HttpResponse::Created().json(ExperimentDetail {
        experiment,
        variants,
    }))
}

#[get("/admin/experiments/{id}")]
pub async fn get_experiment(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let experiment = experiment_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let variants = variant_repo::list_for_experiment(&state.db, experiment.id).await?;

    Ok(HttpResponse::Ok().json(ExperimentDetail {
        experiment,
        variants,
    }))
}

#[put("/admin/experiments/{id}")]
pub async fn update_experiment(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
    body: web::Json<UpdateExperimentRequest>,
) -> Result<HttpResponse, AppError> {
    let experiment = experiment_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let body = body.into_inner();

    if body.kind.is_some_and(|kind| kind != experiment.kind) {
        return Err(AppError::BadRequest(
            "experiment kind is immutable after creation".into(),
        ));
    }

    let status = body.status.unwrap_or(experiment.status);
    if !experiment.status.can_transition_to(status) {
        return Err(AppError::BadRequest(format!(
            "cannot move a {} experiment to {}",
            experiment.status.as_str(),
            status.as_str(),
        )));
    }

    let updated = experiment_repo::update(
        &state.db,
        experiment.id,
        body.key.as_deref().unwrap_or(&experiment.key),
        body.name.as_deref().unwrap_or(&experiment.name),
        body.description.as_deref().unwrap_or(&experiment.description),
        status,
    )
    .await?;

    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/admin/experiments/{id}")]
pub async fn delete_experiment(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let experiment = experiment_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    experiment_repo::delete(&state.db, experiment.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Serialize)]
struct StatsResponse {
    experiment: crate::models::ExperimentBrief,
    stats: std::collections::BTreeMap<String, f64>,
}

/// GET /admin/experiments/{id}/stats
#[get("/admin/experiments/{id}/stats")]
pub async fn experiment_stats(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let experiment = experiment_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let stats = distribution::stats(&state.db, experiment.id).await?;

    Ok(HttpResponse::Ok().json(StatsResponse {
        experiment: experiment.brief(),
        stats,
    }))
}

#[derive(Serialize)]
struct RecalculateResponse {
    message: String,
    experiment: crate::models::ExperimentBrief,
    stats: std::collections::BTreeMap<String, f64>,
}

/// POST /admin/experiments/{id}/recalculate
#[post("/admin/experiments/{id}/recalculate")]
pub async fn recalculate_experiment(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let experiment = experiment_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let (changed, events) = distribution::recalculate(&state.db, &experiment).await?;
    if experiment.is_running() {
        state.notifier.publish_all(&events).await;
    }

    let stats = distribution::stats(&state.db, experiment.id).await?;

    Ok(HttpResponse::Ok().json(RecalculateResponse {
        message: format!("Recalculation completed. Updated {changed} distributions."),
        experiment: experiment.brief(),
        stats,
    }))
}

#[derive(Serialize)]
struct BulkUpdateResponse {
    experiment: crate::models::ExperimentBrief,
    updated_variants: Vec<Variant>,
}

/// POST /admin/experiments/{id}/bulk_update_variants
///
/// Applies the whole batch atomically: the aggregate rollout of the
/// resulting variant set is validated before any row is written, and a
/// failing row rolls back the entire batch.
#[post("/admin/experiments/{id}/bulk_update_variants")]
pub async fn bulk_update_variants(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
    body: web::Json<BulkUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let experiment = experiment_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let patches = body.into_inner().variants;

    let mut tx = state.db.begin().await?;
    experiment_repo::lock_for_write(&mut *tx, experiment.id).await?;

    let current = variant_repo::list_for_experiment(&mut *tx, experiment.id).await?;
    let patched = rollout::apply_patches(experiment.kind, current, &patches)?;

    let patched_ids: std::collections::HashSet<Uuid> = patches.iter().map(|p| p.id).collect();
    let mut updated = Vec::new();
    for variant in patched.iter().filter(|v| patched_ids.contains(&v.id)) {
        let written = variant_repo::update(
            &mut *tx,
            variant.id,
            &variant.key,
            variant.payload.as_ref(),
            variant.rollout,
        )
        .await?;
        updated.push(written);
    }
    tx.commit().await?;

    if experiment.is_running() {
        for variant in &updated {
            state
                .notifier
                .publish(&ChangeEvent::ExperimentUpdate {
                    experiment: experiment.summary(),
                    variant: variant.summary(),
                })
                .await;
        }
        match distribution::recalculate(&state.db, &experiment).await {
            Ok((_, events)) => state.notifier.publish_all(&events).await,
            Err(e) => tracing::error!(
                experiment = %experiment.key,
                error = %e,
                "post-commit recalculation failed"
            ),
        }
    }

    Ok(HttpResponse::Ok().json(BulkUpdateResponse {
        experiment: experiment.brief(),
        updated_variants: updated,
    }))
}

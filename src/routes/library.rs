use actix_web::{get, post, web, HttpResponse};
use serde::Serialize;

use crate::db::experiment_repo;
use crate::error::AppError;
use crate::middleware::ApiProject;
use crate::models::user::{IdentifyPayload, UserSummary};
use crate::models::{ExperimentBrief, VariantSummary};
use crate::services::distribution::{self, distribution_event};
use crate::services::identity;
use crate::state::AppState;

#[derive(Serialize)]
struct AssignmentResponse {
    experiment: ExperimentBrief,
    variant: VariantSummary,
}

#[derive(Serialize)]
struct UserExperimentsResponse {
    user: UserSummary,
    experiments: Vec<AssignmentResponse>,
}

/// GET /experiments/{key}/variant
/// Returns (and on first request creates) the caller's assignment for one
/// experiment.
#[get("/experiments/{key}/variant")]
pub async fn experiment_variant(
    state: web::Data<AppState>,
    project: ApiProject,
    key: web::Path<String>,
    query: web::Query<IdentifyPayload>,
) -> Result<HttpResponse, AppError> {
    let project = project.0;
    let key = key.into_inner();

    let experiment = experiment_repo::find_by_key(&state.db, project.id, &key)
        .await?
        .ok_or(AppError::NotFound)?;

    if !experiment.is_running() {
        return Err(AppError::ExperimentNotRunning {
            status: experiment.status,
        });
    }

    let mut tx = state.db.begin().await?;
    let user = identity::resolve(&mut tx, project.id, query.into_inner()).await?;
    let assignment = distribution::get_or_create(&mut tx, &user, &experiment).await?;
    tx.commit().await?;

    if assignment.created {
        state
            .notifier
            .publish(&distribution_event(&experiment, user.id, &assignment.variant))
            .await;
    }

    Ok(HttpResponse::Ok().json(AssignmentResponse {
        experiment: experiment.brief(),
        variant: assignment.variant.summary(),
    }))
}

/// GET /experiments
/// Resolves the caller and returns assignments for every running experiment
/// of the project, materializing missing ones. The whole read runs in one
/// transaction.
#[get("/experiments")]
pub async fn user_experiments(
    state: web::Data<AppState>,
    project: ApiProject,
    query: web::Query<IdentifyPayload>,
) -> Result<HttpResponse, AppError> {
    let project = project.0;

    let mut tx = state.db.begin().await?;
    let user = identity::resolve(&mut tx, project.id, query.into_inner()).await?;
    let running = experiment_repo::list_running_for_project(&mut *tx, project.id).await?;

    let mut experiments = Vec::with_capacity(running.len());
    let mut events = Vec::new();
    for experiment in &running {
        let assignment = distribution::get_or_create(&mut tx, &user, experiment).await?;
        if assignment.created {
            events.push(distribution_event(experiment, user.id, &assignment.variant));
        }
        experiments.push(AssignmentResponse {
            experiment: experiment.brief(),
            variant: assignment.variant.summary(),
        });
    }
    tx.commit().await?;

    state.notifier.publish_all(&events).await;

    Ok(HttpResponse::Ok().json(UserExperimentsResponse {
        user: UserSummary::from(&user),
        experiments,
    }))
}

/// POST /users/identify
/// Creates, updates or merges the user the supplied identifiers point at.
#[post("/users/identify")]
pub async fn identify_user(
    state: web::Data<AppState>,
    project: ApiProject,
    body: web::Json<IdentifyPayload>,
) -> Result<HttpResponse, AppError> {
    let project = project.0;
    let user = identity::identify(&state.db, project.id, body.into_inner()).await?;

    Ok(HttpResponse::Ok().json(UserSummary::from(&user)))
}

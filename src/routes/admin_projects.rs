use actix_web::{delete, get, post, put, web, HttpResponse};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::project_repo;
use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::state::AppState;

/// 16 random bytes, hex-encoded: the 32-char key client libraries present.
fn generate_api_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

#[derive(Debug, Deserialize)]
pub struct ProjectRequest {
    pub title: String,
    pub description: Option<String>,
}

#[get("/admin/projects")]
pub async fn list_projects(
    state: web::Data<AppState>,
    admin: AdminClaims,
) -> Result<HttpResponse, AppError> {
    let projects = project_repo::list_owned(&state.db, admin.admin_id).await?;
    Ok(HttpResponse::Ok().json(projects))
}

#[post("/admin/projects")]
pub async fn create_project(
    state: web::Data<AppState>,
    admin: AdminClaims,
    body: web::Json<ProjectRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".into()));
    }

    let project = project_repo::insert(
        &state.db,
        admin.admin_id,
        &generate_api_key(),
        &body.title,
        body.description.as_deref(),
    )
    .await?;

    Ok(HttpResponse::Created().json(project))
}

#[get("/admin/projects/{id}")]
pub async fn get_project(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let project = project_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(HttpResponse::Ok().json(project))
}

#[put("/admin/projects/{id}")]
pub async fn update_project(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
    body: web::Json<ProjectRequest>,
) -> Result<HttpResponse, AppError> {
    let project = project_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let body = body.into_inner();
    let updated =
        project_repo::update(&state.db, project.id, &body.title, body.description.as_deref())
            .await?;

    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/admin/projects/{id}")]
pub async fn delete_project(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let project = project_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    project_repo::delete(&state.db, project.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /admin/projects/{id}/regenerate_api_key
#[post("/admin/projects/{id}/regenerate_api_key")]
pub async fn regenerate_api_key(
    state: web::Data<AppState>,
    admin: AdminClaims,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let project = project_repo::find_owned(&state.db, path.into_inner(), admin.admin_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let updated = project_repo::set_api_key(&state.db, project.id, &generate_api_key()).await?;

    Ok(HttpResponse::Ok().json(json!({ "api_key": updated.api_key })))
}

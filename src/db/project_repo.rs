use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::Project;

pub async fn find_by_api_key(
    ex: impl PgExecutor<'_>,
    api_key: &str,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE api_key = $1")
        .bind(api_key)
        .fetch_optional(ex)
        .await
}

pub async fn find_owned(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1 AND owner_id = $2")
        .bind(project_id)
        .bind(owner_id)
        .fetch_optional(ex)
        .await
}

pub async fn list_owned(
    ex: impl PgExecutor<'_>,
    owner_id: Uuid,
) -> Result<Vec<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(ex)
    .await
}

pub async fn insert(
    ex: impl PgExecutor<'_>,
    owner_id: Uuid,
    api_key: &str,
    title: &str,
    description: Option<&str>,
) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        r#"
        INSERT INTO projects (id, owner_id, api_key, title, description)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(api_key)
    .bind(title)
    .bind(description)
    .fetch_one(ex)
    .await
}

pub async fn update(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    title: &str,
    description: Option<&str>,
) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        r#"
        UPDATE projects
        SET title = $2, description = $3, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(project_id)
    .bind(title)
    .bind(description)
    .fetch_one(ex)
    .await
}

pub async fn set_api_key(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    api_key: &str,
) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET api_key = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(project_id)
    .bind(api_key)
    .fetch_one(ex)
    .await
}

pub async fn delete(ex: impl PgExecutor<'_>, project_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(project_id)
        .execute(ex)
        .await?;
    Ok(())
}

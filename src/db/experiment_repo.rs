use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Experiment, ExperimentKind, ExperimentStatus};

pub async fn find(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
) -> Result<Option<Experiment>, sqlx::Error> {
    sqlx::query_as::<_, Experiment>("SELECT * FROM experiments WHERE id = $1")
        .bind(experiment_id)
        .fetch_optional(ex)
        .await
}

pub async fn find_by_key(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    key: &str,
) -> Result<Option<Experiment>, sqlx::Error> {
    sqlx::query_as::<_, Experiment>(
        "SELECT * FROM experiments WHERE project_id = $1 AND key = $2",
    )
    .bind(project_id)
    .bind(key)
    .fetch_optional(ex)
    .await
}

pub async fn find_owned(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Experiment>, sqlx::Error> {
    sqlx::query_as::<_, Experiment>(
        r#"
        SELECT e.* FROM experiments e
        JOIN projects p ON p.id = e.project_id
        WHERE e.id = $1 AND p.owner_id = $2
        "#,
    )
    .bind(experiment_id)
    .bind(owner_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_owned(
    ex: impl PgExecutor<'_>,
    owner_id: Uuid,
    project_id: Option<Uuid>,
    status: Option<ExperimentStatus>,
) -> Result<Vec<Experiment>, sqlx::Error> {
    sqlx::query_as::<_, Experiment>(
        r#"
        SELECT e.* FROM experiments e
        JOIN projects p ON p.id = e.project_id
        WHERE p.owner_id = $1
          AND ($2::uuid IS NULL OR e.project_id = $2)
          AND ($3::experiment_status IS NULL OR e.status = $3)
        ORDER BY e.created_at DESC
        "#,
    )
    .bind(owner_id)
    .bind(project_id)
    .bind(status)
    .fetch_all(ex)
    .await
}

pub async fn list_running_for_project(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
) -> Result<Vec<Experiment>, sqlx::Error> {
    sqlx::query_as::<_, Experiment>(
        r#"
        SELECT * FROM experiments
        WHERE project_id = $1 AND status = 'running'
        ORDER BY created_at ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(ex)
    .await
}

/// Takes a row lock on the experiment so concurrent variant writes validate
/// their rollout budget against a stable sibling set.
pub async fn lock_for_write(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1 FROM experiments WHERE id = $1 FOR UPDATE")
        .bind(experiment_id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn insert(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    key: &str,
    name: &str,
    description: &str,
    kind: ExperimentKind,
) -> Result<Experiment, sqlx::Error> {
    sqlx::query_as::<_, Experiment>(
        r#"
        INSERT INTO experiments (id, project_id, key, name, description, status, kind)
        VALUES ($1, $2, $3, $4, $5, 'draft', $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(key)
    .bind(name)
    .bind(description)
    .bind(kind)
    .fetch_one(ex)
    .await
}

pub async fn update(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
    key: &str,
    name: &str,
    description: &str,
    status: ExperimentStatus,
) -> Result<Experiment, sqlx::Error> {
    sqlx::query_as::<_, Experiment>(
        r#"
        UPDATE experiments
        SET key = $2, name = $3, description = $4, status = $5, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(experiment_id)
    .bind(key)
    .bind(name)
    .bind(description)
    .bind(status)
    .fetch_one(ex)
    .await
}

pub async fn delete(ex: impl PgExecutor<'_>, experiment_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM experiments WHERE id = $1")
        .bind(experiment_id)
        .execute(ex)
        .await?;
    Ok(())
}

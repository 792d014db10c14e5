use serde_json::Value as JsonValue;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::Variant;

/// Variants are always fetched in stable id order; the allocator depends on
/// a stable ordering for its range layout.
pub async fn list_for_experiment(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
) -> Result<Vec<Variant>, sqlx::Error> {
    sqlx::query_as::<_, Variant>(
        "SELECT * FROM variants WHERE experiment_id = $1 ORDER BY id ASC",
    )
    .bind(experiment_id)
    .fetch_all(ex)
    .await
}

pub async fn find(
    ex: impl PgExecutor<'_>,
    variant_id: Uuid,
) -> Result<Option<Variant>, sqlx::Error> {
    sqlx::query_as::<_, Variant>("SELECT * FROM variants WHERE id = $1")
        .bind(variant_id)
        .fetch_optional(ex)
        .await
}

pub async fn find_owned(
    ex: impl PgExecutor<'_>,
    variant_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Variant>, sqlx::Error> {
    sqlx::query_as::<_, Variant>(
        r#"
        SELECT v.* FROM variants v
        JOIN experiments e ON e.id = v.experiment_id
        JOIN projects p ON p.id = e.project_id
        WHERE v.id = $1 AND p.owner_id = $2
        "#,
    )
    .bind(variant_id)
    .bind(owner_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_owned(
    ex: impl PgExecutor<'_>,
    owner_id: Uuid,
    experiment_id: Option<Uuid>,
) -> Result<Vec<Variant>, sqlx::Error> {
    sqlx::query_as::<_, Variant>(
        r#"
        SELECT v.* FROM variants v
        JOIN experiments e ON e.id = v.experiment_id
        JOIN projects p ON p.id = e.project_id
        WHERE p.owner_id = $1
          AND ($2::uuid IS NULL OR v.experiment_id = $2)
        ORDER BY v.id ASC
        "#,
    )
    .bind(owner_id)
    .bind(experiment_id)
    .fetch_all(ex)
    .await
}

/// Sum of sibling rollouts, optionally excluding the variant under edit.
pub async fn rollout_sum(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
    exclude: Option<Uuid>,
) -> Result<f64, sqlx::Error> {
    let (total,): (f64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(rollout), 0)
        FROM variants
        WHERE experiment_id = $1 AND ($2::uuid IS NULL OR id <> $2)
        "#,
    )
    .bind(experiment_id)
    .bind(exclude)
    .fetch_one(ex)
    .await?;

    Ok(total)
}

pub async fn insert(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
    key: &str,
    payload: Option<&JsonValue>,
    rollout: f64,
) -> Result<Variant, sqlx::Error> {
    sqlx::query_as::<_, Variant>(
        r#"
        INSERT INTO variants (id, experiment_id, key, payload, rollout)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(experiment_id)
    .bind(key)
    .bind(payload.cloned())
    .bind(rollout)
    .fetch_one(ex)
    .await
}

pub async fn update(
    ex: impl PgExecutor<'_>,
    variant_id: Uuid,
    key: &str,
    payload: Option<&JsonValue>,
    rollout: f64,
) -> Result<Variant, sqlx::Error> {
    sqlx::query_as::<_, Variant>(
        r#"
        UPDATE variants
        SET key = $2, payload = $3, rollout = $4, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(variant_id)
    .bind(key)
    .bind(payload.cloned())
    .bind(rollout)
    .fetch_one(ex)
    .await
}

pub async fn delete(ex: impl PgExecutor<'_>, variant_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM variants WHERE id = $1")
        .bind(variant_id)
        .execute(ex)
        .await?;
    Ok(())
}

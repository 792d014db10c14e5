use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::Distribution;

pub async fn find(
    ex: impl PgExecutor<'_>,
    user_id: Uuid,
    experiment_id: Uuid,
) -> Result<Option<Distribution>, sqlx::Error> {
    sqlx::query_as::<_, Distribution>(
        "SELECT * FROM distributions WHERE user_id = $1 AND experiment_id = $2",
    )
    .bind(user_id)
    .bind(experiment_id)
    .fetch_optional(ex)
    .await
}

/// Inserts unless the (user, experiment) pair already has a distribution.
/// Returns None when another writer won the race; the caller re-reads the
/// winning row. The uniqueness index is the only serialization point here.
pub async fn insert_if_absent(
    ex: impl PgExecutor<'_>,
    user_id: Uuid,
    experiment_id: Uuid,
    variant_id: Uuid,
) -> Result<Option<Distribution>, sqlx::Error> {
    sqlx::query_as::<_, Distribution>(
        r#"
        INSERT INTO distributions (id, user_id, experiment_id, variant_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, experiment_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(experiment_id)
    .bind(variant_id)
    .fetch_optional(ex)
    .await
}

pub async fn update_variant(
    ex: impl PgExecutor<'_>,
    distribution_id: Uuid,
    variant_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE distributions SET variant_id = $2, updated_at = now() WHERE id = $1")
        .bind(distribution_id)
        .bind(variant_id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn list_for_experiment(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
) -> Result<Vec<Distribution>, sqlx::Error> {
    sqlx::query_as::<_, Distribution>("SELECT * FROM distributions WHERE experiment_id = $1")
        .bind(experiment_id)
        .fetch_all(ex)
        .await
}

pub async fn list_owned(
    ex: impl PgExecutor<'_>,
    owner_id: Uuid,
    experiment_id: Option<Uuid>,
    user_id: Option<Uuid>,
    variant_id: Option<Uuid>,
) -> Result<Vec<Distribution>, sqlx::Error> {
    sqlx::query_as::<_, Distribution>(
        r#"
        SELECT d.* FROM distributions d
        JOIN experiments e ON e.id = d.experiment_id
        JOIN projects p ON p.id = e.project_id
        WHERE p.owner_id = $1
          AND ($2::uuid IS NULL OR d.experiment_id = $2)
          AND ($3::uuid IS NULL OR d.user_id = $3)
          AND ($4::uuid IS NULL OR d.variant_id = $4)
        ORDER BY d.created_at DESC
        "#,
    )
    .bind(owner_id)
    .bind(experiment_id)
    .bind(user_id)
    .bind(variant_id)
    .fetch_all(ex)
    .await
}

/// A user's assignments joined with their experiment and variant, for the
/// admin per-user view.
pub async fn list_for_user_with_details(
    ex: impl PgExecutor<'_>,
    user_id: Uuid,
) -> Result<Vec<(Uuid, String, String, Uuid, String, Option<serde_json::Value>)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT e.id, e.key, e.name, v.id, v.key, v.payload
        FROM distributions d
        JOIN experiments e ON e.id = d.experiment_id
        JOIN variants v ON v.id = d.variant_id
        WHERE d.user_id = $1
        ORDER BY d.created_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(ex)
    .await
}

/// Per-variant distribution counts, including variants nobody is on yet.
pub async fn counts_by_variant(
    ex: impl PgExecutor<'_>,
    experiment_id: Uuid,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT v.key, COUNT(d.id)
        FROM variants v
        LEFT JOIN distributions d ON d.variant_id = v.id
        WHERE v.experiment_id = $1
        GROUP BY v.key
        "#,
    )
    .bind(experiment_id)
    .fetch_all(ex)
    .await
}

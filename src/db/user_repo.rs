use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::user::{IdentifyPayload, ProjectUser};

/// All users of a project matching any supplied identifier, ordered so the
/// first row is the deterministic merge primary (oldest first_seen, then id).
/// Rows are locked so concurrent identify calls over the same identifiers
/// serialize instead of producing two merge survivors.
pub async fn find_matching_for_update(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    payload: &IdentifyPayload,
) -> Result<Vec<ProjectUser>, sqlx::Error> {
    sqlx::query_as::<_, ProjectUser>(
        r#"
        SELECT * FROM project_users
        WHERE project_id = $1
          AND ((($2::uuid IS NOT NULL) AND id = $2)
            OR (($3::text IS NOT NULL) AND device_id = $3)
            OR (($4::text IS NOT NULL) AND email = $4)
            OR (($5::text IS NOT NULL) AND external_id = $5))
        ORDER BY first_seen ASC, id ASC
        FOR UPDATE
        "#,
    )
    .bind(project_id)
    .bind(payload.id)
    .bind(payload.device_id.as_deref())
    .bind(payload.email.as_deref())
    .bind(payload.external_id.as_deref())
    .fetch_all(ex)
    .await
}

pub async fn insert(
    ex: impl PgExecutor<'_>,
    project_id: Uuid,
    payload: &IdentifyPayload,
) -> Result<ProjectUser, sqlx::Error> {
    let properties = payload
        .properties
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));

    sqlx::query_as::<_, ProjectUser>(
        r#"
        INSERT INTO project_users
            (id, project_id, device_id, email, external_id,
             latest_current_url, latest_os, latest_os_version, latest_device_type,
             properties)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(payload.device_id.as_deref())
    .bind(payload.email.as_deref())
    .bind(payload.external_id.as_deref())
    .bind(payload.latest_current_url.as_deref())
    .bind(payload.latest_os.as_deref())
    .bind(payload.latest_os_version.as_deref())
    .bind(payload.latest_device_type.as_deref())
    .bind(properties)
    .fetch_one(ex)
    .await
}

/// Writes back every mutable column and bumps last_seen.
pub async fn update(
    ex: impl PgExecutor<'_>,
    user: &ProjectUser,
) -> Result<ProjectUser, sqlx::Error> {
    sqlx::query_as::<_, ProjectUser>(
        r#"
        UPDATE project_users
        SET device_id = $2, email = $3, external_id = $4,
            latest_current_url = $5, latest_os = $6,
            latest_os_version = $7, latest_device_type = $8,
            properties = $9, last_seen = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(user.device_id.as_deref())
    .bind(user.email.as_deref())
    .bind(user.external_id.as_deref())
    .bind(user.latest_current_url.as_deref())
    .bind(user.latest_os.as_deref())
    .bind(user.latest_os_version.as_deref())
    .bind(user.latest_device_type.as_deref())
    .bind(user.properties.clone())
    .fetch_one(ex)
    .await
}

pub async fn delete(ex: impl PgExecutor<'_>, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM project_users WHERE id = $1")
        .bind(user_id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn find_owned(
    ex: impl PgExecutor<'_>,
    user_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<ProjectUser>, sqlx::Error> {
    sqlx::query_as::<_, ProjectUser>(
        r#"
        SELECT u.* FROM project_users u
        JOIN projects p ON p.id = u.project_id
        WHERE u.id = $1 AND p.owner_id = $2
        "#,
    )
    .bind(user_id)
    .bind(owner_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_owned(
    ex: impl PgExecutor<'_>,
    owner_id: Uuid,
    project_id: Option<Uuid>,
    device_id: Option<&str>,
    email: Option<&str>,
    external_id: Option<&str>,
) -> Result<Vec<ProjectUser>, sqlx::Error> {
    sqlx::query_as::<_, ProjectUser>(
        r#"
        SELECT u.* FROM project_users u
        JOIN projects p ON p.id = u.project_id
        WHERE p.owner_id = $1
          AND ($2::uuid IS NULL OR u.project_id = $2)
          AND ($3::text IS NULL OR u.device_id = $3)
          AND ($4::text IS NULL OR u.email = $4)
          AND ($5::text IS NULL OR u.external_id = $5)
        ORDER BY u.first_seen DESC
        "#,
    )
    .bind(owner_id)
    .bind(project_id)
    .bind(device_id)
    .bind(email)
    .bind(external_id)
    .fetch_all(ex)
    .await
}

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::AdminUser;

pub async fn find_by_email(
    ex: impl PgExecutor<'_>,
    email: &str,
) -> Result<Option<AdminUser>, sqlx::Error> {
    sqlx::query_as::<_, AdminUser>("SELECT * FROM admin_users WHERE email = $1")
        .bind(email)
        .fetch_optional(ex)
        .await
}

pub async fn insert(
    ex: impl PgExecutor<'_>,
    email: &str,
    password_hash: &str,
    is_superuser: bool,
) -> Result<AdminUser, sqlx::Error> {
    sqlx::query_as::<_, AdminUser>(
        r#"
        INSERT INTO admin_users (id, email, password_hash, is_superuser)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(is_superuser)
    .fetch_one(ex)
    .await
}

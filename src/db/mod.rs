use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::AppError;

pub mod admin_repo;
pub mod distribution_repo;
pub mod experiment_repo;
pub mod project_repo;
pub mod user_repo;
pub mod variant_repo;

pub async fn init_pool(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

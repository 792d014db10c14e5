//! Experiment creation.

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{experiment_repo, variant_repo};
use crate::error::AppResult;
use crate::models::{Experiment, ExperimentKind, Variant};
use crate::services::rollout::{TOGGLE_DEFAULT_ROLLOUT, TOGGLE_KEYS};

/// Creates an experiment in `draft`. A toggle experiment is seeded with its
/// fixed `enabled`/`control` pair in the same transaction; that pair is the
/// only variant set it can ever have, and the kind is immutable afterwards.
pub async fn create_experiment(
    pool: &PgPool,
    project_id: Uuid,
    key: &str,
    name: &str,
    description: &str,
    kind: ExperimentKind,
) -> AppResult<(Experiment, Vec<Variant>)> {
    let mut tx = pool.begin().await?;

    let experiment =
        experiment_repo::insert(&mut *tx, project_id, key, name, description, kind).await?;

    let mut variants = Vec::new();
    if kind == ExperimentKind::Toggle {
        for toggle_key in TOGGLE_KEYS {
            let variant = variant_repo::insert(
                &mut *tx,
                experiment.id,
                toggle_key,
                Some(&serde_json::json!({})),
                TOGGLE_DEFAULT_ROLLOUT,
            )
            .await?;
            variants.push(variant);
        }
    }

    tx.commit().await?;

    Ok((experiment, variants))
}

//! Distribution lifecycle: get-or-create, recalculation and stats.

use std::collections::BTreeMap;

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::{distribution_repo, variant_repo};
use crate::error::{AppError, AppResult};
use crate::models::{Distribution, Experiment, ProjectUser, Variant};
use crate::services::allocation;
use crate::services::notifier::ChangeEvent;
use crate::state::AppState;

/// A user's materialized assignment for one experiment.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub distribution: Distribution,
    pub variant: Variant,
    pub created: bool,
}

/// Returns the persisted assignment for (user, experiment), creating it on
/// first request. Existing assignments are returned untouched; only the
/// recalculator rewrites them. Concurrent first requests are serialized by
/// the (user, experiment) uniqueness index: the loser re-reads the winner.
pub async fn get_or_create(
    tx: &mut Transaction<'_, Postgres>,
    user: &ProjectUser,
    experiment: &Experiment,
) -> AppResult<Assignment> {
    if let Some(existing) = distribution_repo::find(&mut **tx, user.id, experiment.id).await? {
        let variant = variant_repo::find(&mut **tx, existing.variant_id)
            .await?
            .ok_or(AppError::Internal)?;
        return Ok(Assignment {
            distribution: existing,
            variant,
            created: false,
        });
    }

    let variants = variant_repo::list_for_experiment(&mut **tx, experiment.id).await?;
    let chosen = allocation::select_variant(&variants, user.id, experiment.id)?.clone();

    match distribution_repo::insert_if_absent(&mut **tx, user.id, experiment.id, chosen.id).await? {
        Some(distribution) => Ok(Assignment {
            distribution,
            variant: chosen,
            created: true,
        }),
        None => {
            // Lost the insert race; the winning row is authoritative.
            let distribution = distribution_repo::find(&mut **tx, user.id, experiment.id)
                .await?
                .ok_or(AppError::Internal)?;
            let variant = variant_repo::find(&mut **tx, distribution.variant_id)
                .await?
                .ok_or(AppError::Internal)?;
            Ok(Assignment {
                distribution,
                variant,
                created: false,
            })
        }
    }
}

pub fn distribution_event(experiment: &Experiment, user_id: Uuid, variant: &Variant) -> ChangeEvent {
    ChangeEvent::DistributionUpdate {
        user_id,
        experiment: experiment.summary(),
        variant: variant.summary(),
    }
}

/// Sweeps every distribution of the experiment in one transaction and
/// rewrites those whose assignment no longer matches the current variant
/// configuration. Returns the change count and the (not yet published)
/// events for the rewritten rows; the caller publishes after this commit.
pub async fn recalculate(
    pool: &PgPool,
    experiment: &Experiment,
) -> AppResult<(usize, Vec<ChangeEvent>)> {
    let mut tx = pool.begin().await?;

    let variants = variant_repo::list_for_experiment(&mut *tx, experiment.id).await?;
    let distributions = distribution_repo::list_for_experiment(&mut *tx, experiment.id).await?;

    let mut events = Vec::new();
    for distribution in &distributions {
        let expected = allocation::select_variant(&variants, distribution.user_id, experiment.id)?;
        if expected.id != distribution.variant_id {
            distribution_repo::update_variant(&mut *tx, distribution.id, expected.id).await?;
            events.push(distribution_event(experiment, distribution.user_id, expected));
        }
    }

    tx.commit().await?;

    tracing::info!(
        experiment = %experiment.key,
        swept = distributions.len(),
        changed = events.len(),
        "recalculated distributions"
    );

    Ok((events.len(), events))
}

/// Publishes the variant-change event for a running experiment and brings
/// its distributions back in line. Runs after the variant write committed,
/// so failures here are logged rather than surfaced to the caller.
pub async fn propagate_variant_change(
    state: &AppState,
    experiment: &Experiment,
    variant: crate::models::VariantSummary,
) {
    if !experiment.is_running() {
        return;
    }

    state
        .notifier
        .publish(&ChangeEvent::ExperimentUpdate {
            experiment: experiment.summary(),
            variant,
        })
        .await;

    match recalculate(&state.db, experiment).await {
        Ok((_, events)) => state.notifier.publish_all(&events).await,
        Err(e) => tracing::error!(
            experiment = %experiment.key,
            error = %e,
            "post-commit recalculation failed"
        ),
    }
}

/// Per-variant share of the experiment's population, in percent rounded to
/// two decimals. Variants nobody is assigned to report 0.0; an experiment
/// with no distributions reports an empty map.
pub async fn stats(pool: &PgPool, experiment_id: Uuid) -> AppResult<BTreeMap<String, f64>> {
    let counts = distribution_repo::counts_by_variant(pool, experiment_id).await?;
    let total: i64 = counts.iter().map(|(_, count)| count).sum();

    if total == 0 {
        return Ok(BTreeMap::new());
    }

    Ok(counts
        .into_iter()
        .map(|(key, count)| (key, round2(count as f64 / total as f64 * 100.0)))
        .collect())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_round_to_two_decimals() {
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(100.0), 100.0);
        assert_eq!(round2(0.0), 0.0);
    }
}

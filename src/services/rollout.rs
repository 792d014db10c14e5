//! Rollout budget validation and the toggle experiment policy.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ExperimentKind, Variant};

pub const TOGGLE_KEYS: [&str; 2] = ["enabled", "control"];
pub const TOGGLE_DEFAULT_ROLLOUT: f64 = 0.5;

/// One entry of a bulk variant update.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantPatch {
    pub id: Uuid,
    pub key: Option<String>,
    pub payload: Option<JsonValue>,
    pub rollout: Option<f64>,
}

pub fn ensure_rollout_in_range(rollout: f64) -> AppResult<()> {
    if !(0.0..=1.0).contains(&rollout) {
        return Err(AppError::BadRequest(format!(
            "rollout must be between 0.0 and 1.0 (got {rollout})"
        )));
    }
    Ok(())
}

/// Rejects a single-variant write that would push the experiment's total
/// rollout above 1.0. `sibling_sum` excludes the variant under edit.
pub fn ensure_rollout_capacity(sibling_sum: f64, new_rollout: f64) -> AppResult<()> {
    let total = sibling_sum + new_rollout;
    if total > 1.0 {
        return Err(AppError::RolloutOverflow { total });
    }
    Ok(())
}

/// Variant keys on a toggle experiment are fixed.
pub fn ensure_toggle_variant_key(kind: ExperimentKind, key: &str) -> AppResult<()> {
    if kind == ExperimentKind::Toggle && !TOGGLE_KEYS.contains(&key) {
        return Err(AppError::ToggleConstraint(format!(
            "toggle experiment variants must be 'enabled' or 'control', not '{key}'"
        )));
    }
    Ok(())
}

/// Deleting either variant of a toggle experiment would leave fewer than the
/// required pair, so deletes are rejected outright.
pub fn ensure_toggle_delete_allowed(kind: ExperimentKind) -> AppResult<()> {
    if kind == ExperimentKind::Toggle {
        return Err(AppError::ToggleConstraint(
            "toggle experiments must keep both 'enabled' and 'control' variants".into(),
        ));
    }
    Ok(())
}

/// Applies a batch of patches to an experiment's current variant set,
/// validating the result as a whole: every patch must target a variant of
/// the experiment, toggle key constraints must hold for the resulting set,
/// and the aggregate rollout must stay within budget.
pub fn apply_patches(
    kind: ExperimentKind,
    mut variants: Vec<Variant>,
    patches: &[VariantPatch],
) -> AppResult<Vec<Variant>> {
    if patches.is_empty() {
        return Err(AppError::BadRequest("variants must not be empty".into()));
    }

    for patch in patches {
        let variant = variants
            .iter_mut()
            .find(|v| v.id == patch.id)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "variant {} does not exist in this experiment",
                    patch.id
                ))
            })?;

        if let Some(key) = &patch.key {
            variant.key = key.clone();
        }
        if let Some(payload) = &patch.payload {
            variant.payload = Some(payload.clone());
        }
        if let Some(rollout) = patch.rollout {
            ensure_rollout_in_range(rollout)?;
            variant.rollout = rollout;
        }
    }

    if kind == ExperimentKind::Toggle {
        for variant in &variants {
            ensure_toggle_variant_key(kind, &variant.key)?;
        }
        for required in TOGGLE_KEYS {
            if !variants.iter().any(|v| v.key == required) {
                return Err(AppError::ToggleConstraint(format!(
                    "toggle experiments must keep both 'enabled' and 'control' variants \
                     (missing '{required}')"
                )));
            }
        }
    }

    let total: f64 = variants.iter().map(|v| v.rollout).sum();
    if total > 1.0 {
        return Err(AppError::RolloutOverflow { total });
    }

    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn variant(key: &str, rollout: f64) -> Variant {
        Variant {
            id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            key: key.to_string(),
            payload: None,
            rollout,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn capacity_check_rejects_overflow() {
        assert!(ensure_rollout_capacity(0.5, 0.5).is_ok());
        let err = ensure_rollout_capacity(0.7, 0.4).unwrap_err();
        assert!(matches!(err, AppError::RolloutOverflow { .. }));
    }

    #[test]
    fn toggle_keys_are_fixed() {
        assert!(ensure_toggle_variant_key(ExperimentKind::Toggle, "enabled").is_ok());
        assert!(ensure_toggle_variant_key(ExperimentKind::Toggle, "control").is_ok());
        assert!(ensure_toggle_variant_key(ExperimentKind::Toggle, "treatment").is_err());
        assert!(ensure_toggle_variant_key(ExperimentKind::Multi, "treatment").is_ok());
    }

    #[test]
    fn toggle_variants_cannot_be_deleted() {
        assert!(ensure_toggle_delete_allowed(ExperimentKind::Toggle).is_err());
        assert!(ensure_toggle_delete_allowed(ExperimentKind::Multi).is_ok());
    }

    #[test]
    fn bulk_patch_reweights_atomically() {
        let variants = vec![variant("a", 0.5), variant("b", 0.5)];
        let patches = vec![
            VariantPatch {
                id: variants[0].id,
                key: None,
                payload: None,
                rollout: Some(1.0),
            },
            VariantPatch {
                id: variants[1].id,
                key: None,
                payload: None,
                rollout: Some(0.0),
            },
        ];

        let patched = apply_patches(ExperimentKind::Multi, variants, &patches).unwrap();
        assert_eq!(patched[0].rollout, 1.0);
        assert_eq!(patched[1].rollout, 0.0);
    }

    #[test]
    fn bulk_patch_validates_the_aggregate_not_each_item() {
        // Each item alone is within budget; the aggregate is not.
        let variants = vec![variant("a", 0.5), variant("b", 0.5)];
        let patches = vec![
            VariantPatch {
                id: variants[0].id,
                key: None,
                payload: None,
                rollout: Some(0.8),
            },
            VariantPatch {
                id: variants[1].id,
                key: None,
                payload: None,
                rollout: Some(0.8),
            },
        ];

        let err = apply_patches(ExperimentKind::Multi, variants, &patches).unwrap_err();
        assert!(matches!(err, AppError::RolloutOverflow { total } if total > 1.0));
    }

    #[test]
    fn bulk_patch_rejects_foreign_variant_ids() {
        let variants = vec![variant("a", 0.5)];
        let patches = vec![VariantPatch {
            id: Uuid::new_v4(),
            key: None,
            payload: None,
            rollout: Some(0.1),
        }];

        assert!(matches!(
            apply_patches(ExperimentKind::Multi, variants, &patches),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn bulk_patch_keeps_the_toggle_pair_intact() {
        let variants = vec![variant("enabled", 0.5), variant("control", 0.5)];
        let patches = vec![VariantPatch {
            id: variants[0].id,
            key: Some("treatment".into()),
            payload: None,
            rollout: None,
        }];

        assert!(matches!(
            apply_patches(ExperimentKind::Toggle, variants, &patches),
            Err(AppError::ToggleConstraint(_))
        ));
    }
}

//! Deterministic variant allocation.
//!
//! The bucket function is a compatibility contract shared with the client
//! libraries: the same (user, experiment) pair must land in the same bucket
//! on every process and every release.

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Variant;

const BUCKETS: u128 = 10_000;

/// Maps a (user id, experiment id) pair to a bucket in [0, 1).
///
/// MD5 of "user:experiment", full 128-bit digest taken as an unsigned
/// integer, reduced mod 10000. Resolution is 1e-4 by contract.
pub fn hash_bucket(user_id: &str, experiment_id: &str) -> f64 {
    let digest = md5::compute(format!("{user_id}:{experiment_id}"));
    let n = u128::from_be_bytes(digest.0);
    (n % BUCKETS) as f64 / BUCKETS as f64
}

/// Picks the variant for a user from an experiment's variant set.
///
/// `variants` must be in stable id order; the caller fetches them ordered.
/// Half-open rollout ranges are normalized over the total so they always
/// cover [0, 1); exact range boundaries are not part of the behavioral
/// contract, and the final fallback absorbs float drift.
pub fn select_variant<'a>(
    variants: &'a [Variant],
    user_id: Uuid,
    experiment_id: Uuid,
) -> AppResult<&'a Variant> {
    if variants.is_empty() {
        return Err(AppError::NoVariants);
    }

    // A single live variant gets everyone, independent of float boundaries.
    let mut live = variants.iter().filter(|v| v.rollout > 0.0);
    if let (Some(only), None) = (live.next(), live.next()) {
        return Ok(only);
    }

    let total: f64 = variants.iter().map(|v| v.rollout).sum();
    let h = hash_bucket(&user_id.to_string(), &experiment_id.to_string());

    let mut accumulated = 0.0;
    for variant in variants {
        let end = accumulated + variant.rollout / total;
        if (accumulated..end).contains(&h) {
            return Ok(variant);
        }
        accumulated = end;
    }

    // Only reachable under numeric drift (or an all-zero rollout set).
    Ok(variants.last().expect("variants checked non-empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn variant(key: &str, rollout: f64) -> Variant {
        Variant {
            id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            key: key.to_string(),
            payload: Some(json!({})),
            rollout,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn bucket_matches_reference_values() {
        // Pinned values for the cross-language hashing contract
        // (md5 of "user:experiment", full digest mod 10000 over 10000).
        assert_eq!(hash_bucket("user-1", "exp-1"), 0.9983);
        assert_eq!(hash_bucket("user-2", "exp-1"), 0.0964);
        assert_eq!(hash_bucket("alpha", "beta"), 0.4768);
        assert_eq!(
            hash_bucket(
                "00000000-0000-0000-0000-000000000001",
                "00000000-0000-0000-0000-0000000000aa"
            ),
            0.945
        );
        assert_eq!(
            hash_bucket(
                "6a7b0e6c-9a3e-4d1f-8f2a-1c9d1b2e3f40",
                "0f8fad5b-d9cb-469f-a165-70867728950e"
            ),
            0.4143
        );
    }

    #[test]
    fn bucket_is_deterministic_and_in_range() {
        for i in 0..100 {
            let user = format!("user-{i}");
            let a = hash_bucket(&user, "exp");
            let b = hash_bucket(&user, "exp");
            assert_eq!(a, b);
            assert!((0.0..1.0).contains(&a));
        }
    }

    #[test]
    fn empty_variant_set_is_an_error() {
        let err = select_variant(&[], Uuid::new_v4(), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::NoVariants));
    }

    #[test]
    fn single_live_variant_takes_every_user() {
        let variants = vec![variant("a", 1.0), variant("b", 0.0)];
        for _ in 0..50 {
            let chosen = select_variant(&variants, Uuid::new_v4(), Uuid::new_v4()).unwrap();
            assert_eq!(chosen.key, "a");
        }
    }

    #[test]
    fn single_live_variant_wins_regardless_of_position() {
        let variants = vec![variant("a", 0.0), variant("b", 0.3)];
        let chosen = select_variant(&variants, Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(chosen.key, "b");
    }

    #[test]
    fn selection_is_stable_for_a_given_pair() {
        let variants = vec![variant("a", 0.5), variant("b", 0.5)];
        let user = Uuid::new_v4();
        let experiment = Uuid::new_v4();
        let first = select_variant(&variants, user, experiment).unwrap().key.clone();
        for _ in 0..10 {
            let again = select_variant(&variants, user, experiment).unwrap();
            assert_eq!(again.key, first);
        }
    }

    #[test]
    fn known_bucket_lands_in_expected_range() {
        // hash_bucket for this pair is 0.4143: below 0.5, so the first of
        // two equally weighted variants must win.
        let user: Uuid = "6a7b0e6c-9a3e-4d1f-8f2a-1c9d1b2e3f40".parse().unwrap();
        let experiment: Uuid = "0f8fad5b-d9cb-469f-a165-70867728950e".parse().unwrap();
        let mut variants = vec![variant("a", 0.5), variant("b", 0.5)];
        variants[0].experiment_id = experiment;
        variants[1].experiment_id = experiment;

        let chosen = select_variant(&variants, user, experiment).unwrap();
        assert_eq!(chosen.key, "a");
    }

    #[test]
    fn partial_rollouts_are_normalized() {
        // 0.2 / 0.2 normalizes to an even split; both variants are reachable.
        let variants = vec![variant("a", 0.2), variant("b", 0.2)];
        let mut seen_a = false;
        let mut seen_b = false;
        for i in 0..200 {
            let user = Uuid::from_u128(i);
            match select_variant(&variants, user, variants[0].experiment_id)
                .unwrap()
                .key
                .as_str()
            {
                "a" => seen_a = true,
                "b" => seen_b = true,
                other => panic!("unexpected variant {other}"),
            }
        }
        assert!(seen_a && seen_b);
    }

    #[test]
    fn all_zero_rollouts_fall_back_to_last() {
        let variants = vec![variant("a", 0.0), variant("b", 0.0)];
        let chosen = select_variant(&variants, Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(chosen.key, "b");
    }
}

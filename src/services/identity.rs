//! Identity resolution and user merging.
//!
//! A project sees a user through any of device_id, email and external_id.
//! Resolution collapses whatever the identifiers match onto exactly one
//! persisted user: creating, updating in place, or merging several records
//! when the identifiers span more than one. Callers run resolution inside a
//! transaction; matched rows are locked for its duration so concurrent
//! resolvers cannot produce two merge survivors.
//!
//! Precedence is deliberate and asymmetric: an identify call overwrites
//! stored properties with incoming ones, while a merge keeps the primary's
//! properties over a merged-away user's.

use serde_json::Value as JsonValue;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::user_repo;
use crate::error::{AppError, AppResult};
use crate::models::user::{IdentifyPayload, ProjectUser};

/// Resolves an identify payload in its own transaction. Paths that also
/// materialize distributions run [`resolve`] inside their own transaction
/// instead.
pub async fn identify(
    pool: &sqlx::PgPool,
    project_id: Uuid,
    payload: IdentifyPayload,
) -> AppResult<ProjectUser> {
    let mut tx = pool.begin().await?;
    let user = resolve(&mut tx, project_id, payload).await?;
    tx.commit().await?;
    Ok(user)
}

/// Resolves an identify payload to a single user of the project.
pub async fn resolve(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
    payload: IdentifyPayload,
) -> AppResult<ProjectUser> {
    let payload = payload.normalized();
    if !payload.has_identifier() {
        return Err(AppError::NoIdentifier);
    }

    let mut matches = user_repo::find_matching_for_update(&mut **tx, project_id, &payload).await?;

    match matches.len() {
        0 => Ok(user_repo::insert(&mut **tx, project_id, &payload).await?),
        1 => {
            let user = matches.pop().expect("one match");
            apply_identify(tx, user, &payload).await
        }
        n => {
            tracing::info!(
                project_id = %project_id,
                matched = n,
                "identifiers span multiple users, merging"
            );
            let survivor = merge_users(tx, matches).await?;
            apply_identify(tx, survivor, &payload).await
        }
    }
}

async fn apply_identify(
    tx: &mut Transaction<'_, Postgres>,
    user: ProjectUser,
    payload: &IdentifyPayload,
) -> AppResult<ProjectUser> {
    let (updated, changed) = absorb_payload(user, payload);
    if changed {
        Ok(user_repo::update(&mut **tx, &updated).await?)
    } else {
        Ok(updated)
    }
}

/// Collapses an ordered match set onto its first row (the primary), deleting
/// the rest. Deleting a merged-away user cascades its distributions; the
/// survivor's assignments are recomputed lazily on next request.
async fn merge_users(
    tx: &mut Transaction<'_, Postgres>,
    users: Vec<ProjectUser>,
) -> AppResult<ProjectUser> {
    let survivor = merged_primary(&users);
    for merged_away in &users[1..] {
        user_repo::delete(&mut **tx, merged_away.id).await?;
    }
    Ok(user_repo::update(&mut **tx, &survivor).await?)
}

/// Folds an identify payload into a user record.
///
/// Missing identifiers are filled, supplied metadata overwrites stored
/// metadata, and supplied property keys win over stored ones. Returns the
/// updated record and whether anything actually changed.
pub fn absorb_payload(mut user: ProjectUser, payload: &IdentifyPayload) -> (ProjectUser, bool) {
    let mut changed = false;

    fn fill_missing(target: &mut Option<String>, supplied: &Option<String>, changed: &mut bool) {
        if target.is_none() && supplied.is_some() {
            *target = supplied.clone();
            *changed = true;
        }
    }

    fn overwrite(target: &mut Option<String>, supplied: &Option<String>, changed: &mut bool) {
        if supplied.is_some() && target != supplied {
            *target = supplied.clone();
            *changed = true;
        }
    }

    fill_missing(&mut user.device_id, &payload.device_id, &mut changed);
    fill_missing(&mut user.email, &payload.email, &mut changed);
    fill_missing(&mut user.external_id, &payload.external_id, &mut changed);

    overwrite(
        &mut user.latest_current_url,
        &payload.latest_current_url,
        &mut changed,
    );
    overwrite(&mut user.latest_os, &payload.latest_os, &mut changed);
    overwrite(
        &mut user.latest_os_version,
        &payload.latest_os_version,
        &mut changed,
    );
    overwrite(
        &mut user.latest_device_type,
        &payload.latest_device_type,
        &mut changed,
    );

    if let Some(incoming) = &payload.properties {
        let merged = union_properties(&user.properties, incoming);
        if merged != user.properties {
            user.properties = merged;
            changed = true;
        }
    }

    (user, changed)
}

/// Builds the surviving record for a merge: the first user wins every
/// conflict, missing fields are taken from later users in order.
pub fn merged_primary(users: &[ProjectUser]) -> ProjectUser {
    let mut primary = users[0].clone();

    for user in &users[1..] {
        fn fill(target: &mut Option<String>, source: &Option<String>) {
            if target.is_none() && source.is_some() {
                *target = source.clone();
            }
        }

        fill(&mut primary.device_id, &user.device_id);
        fill(&mut primary.email, &user.email);
        fill(&mut primary.external_id, &user.external_id);
        fill(&mut primary.latest_current_url, &user.latest_current_url);
        fill(&mut primary.latest_os, &user.latest_os);
        fill(&mut primary.latest_os_version, &user.latest_os_version);
        fill(&mut primary.latest_device_type, &user.latest_device_type);

        // Primary wins on property conflicts.
        primary.properties = union_properties(&user.properties, &primary.properties);
    }

    primary
}

/// Key-wise union of two JSON objects; keys of `overlay` win.
fn union_properties(base: &JsonValue, overlay: &JsonValue) -> JsonValue {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    if let Some(overlay) = overlay.as_object() {
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }
    JsonValue::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn user(device_id: Option<&str>, email: Option<&str>, properties: JsonValue) -> ProjectUser {
        ProjectUser {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            device_id: device_id.map(String::from),
            email: email.map(String::from),
            external_id: None,
            latest_current_url: None,
            latest_os: None,
            latest_os_version: None,
            latest_device_type: None,
            properties,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn identify_fills_missing_identifiers() {
        let stored = user(Some("d1"), None, json!({}));
        let payload = IdentifyPayload {
            email: Some("a@b.test".into()),
            ..Default::default()
        };

        let (updated, changed) = absorb_payload(stored, &payload);
        assert!(changed);
        assert_eq!(updated.device_id.as_deref(), Some("d1"));
        assert_eq!(updated.email.as_deref(), Some("a@b.test"));
    }

    #[test]
    fn identify_never_rewrites_an_existing_identifier() {
        let stored = user(Some("d1"), None, json!({}));
        let payload = IdentifyPayload {
            device_id: Some("d2".into()),
            ..Default::default()
        };

        let (updated, changed) = absorb_payload(stored, &payload);
        assert!(!changed);
        assert_eq!(updated.device_id.as_deref(), Some("d1"));
    }

    #[test]
    fn identify_overwrites_metadata() {
        let mut stored = user(Some("d1"), None, json!({}));
        stored.latest_os = Some("ios".into());
        let payload = IdentifyPayload {
            latest_os: Some("android".into()),
            ..Default::default()
        };

        let (updated, changed) = absorb_payload(stored, &payload);
        assert!(changed);
        assert_eq!(updated.latest_os.as_deref(), Some("android"));
    }

    #[test]
    fn identify_properties_incoming_wins() {
        let stored = user(Some("d1"), None, json!({"plan": "free", "lang": "en"}));
        let payload = IdentifyPayload {
            properties: Some(json!({"plan": "pro", "beta": true})),
            ..Default::default()
        };

        let (updated, changed) = absorb_payload(stored, &payload);
        assert!(changed);
        assert_eq!(
            updated.properties,
            json!({"plan": "pro", "lang": "en", "beta": true})
        );
    }

    #[test]
    fn unchanged_identify_reports_no_change() {
        let stored = user(Some("d1"), None, json!({"plan": "free"}));
        let payload = IdentifyPayload {
            device_id: Some("d1".into()),
            properties: Some(json!({"plan": "free"})),
            ..Default::default()
        };

        let (_, changed) = absorb_payload(stored, &payload);
        assert!(!changed);
    }

    #[test]
    fn merge_unions_identifiers_primary_first() {
        let primary = user(Some("d1"), None, json!({}));
        let secondary = user(None, Some("a@b.test"), json!({}));

        let survivor = merged_primary(&[primary.clone(), secondary]);
        assert_eq!(survivor.id, primary.id);
        assert_eq!(survivor.device_id.as_deref(), Some("d1"));
        assert_eq!(survivor.email.as_deref(), Some("a@b.test"));
    }

    #[test]
    fn merge_properties_primary_wins() {
        let primary = user(Some("d1"), None, json!({"plan": "pro"}));
        let secondary = user(None, Some("a@b.test"), json!({"plan": "free", "lang": "en"}));

        let survivor = merged_primary(&[primary, secondary]);
        assert_eq!(survivor.properties, json!({"plan": "pro", "lang": "en"}));
    }

    #[test]
    fn merge_folds_every_non_primary_in_order() {
        let primary = user(Some("d1"), None, json!({}));
        let second = user(None, Some("a@b.test"), json!({"a": 1}));
        let mut third = user(None, None, json!({"a": 2, "b": 3}));
        third.external_id = Some("x1".into());

        let survivor = merged_primary(&[primary, second, third]);
        assert_eq!(survivor.device_id.as_deref(), Some("d1"));
        assert_eq!(survivor.email.as_deref(), Some("a@b.test"));
        assert_eq!(survivor.external_id.as_deref(), Some("x1"));
        // Earlier users win over later ones.
        assert_eq!(survivor.properties, json!({"a": 1, "b": 3}));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A project-scoped end user. Identified by any of device_id, email or
/// external_id; at least one is always set.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectUser {
    pub id: Uuid,
    pub project_id: Uuid,
    pub device_id: Option<String>,
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub latest_current_url: Option<String>,
    pub latest_os: Option<String>,
    pub latest_os_version: Option<String>,
    pub latest_device_type: Option<String>,
    pub properties: JsonValue,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Identification payload accepted by the library surface and the realtime
/// handshake. All fields are optional; identification requires at least one
/// of id, device_id, email or external_id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentifyPayload {
    pub id: Option<Uuid>,
    pub device_id: Option<String>,
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub latest_current_url: Option<String>,
    pub latest_os: Option<String>,
    pub latest_os_version: Option<String>,
    pub latest_device_type: Option<String>,
    pub properties: Option<JsonValue>,
}

impl IdentifyPayload {
    /// Blank identifiers are treated as absent.
    pub fn normalized(mut self) -> Self {
        fn scrub(field: &mut Option<String>) {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        scrub(&mut self.device_id);
        scrub(&mut self.email);
        scrub(&mut self.external_id);
        self
    }

    pub fn has_identifier(&self) -> bool {
        self.id.is_some()
            || self.device_id.is_some()
            || self.email.is_some()
            || self.external_id.is_some()
    }
}

/// User shape returned by identify and the batch assignment endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub device_id: Option<String>,
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub latest_current_url: Option<String>,
    pub latest_os: Option<String>,
    pub latest_os_version: Option<String>,
    pub latest_device_type: Option<String>,
    pub properties: JsonValue,
}

impl From<&ProjectUser> for UserSummary {
    fn from(user: &ProjectUser) -> Self {
        UserSummary {
            id: user.id,
            device_id: user.device_id.clone(),
            email: user.email.clone(),
            external_id: user.external_id.clone(),
            first_seen: user.first_seen,
            last_seen: user.last_seen,
            latest_current_url: user.latest_current_url.clone(),
            latest_os: user.latest_os.clone(),
            latest_os_version: user.latest_os_version.clone(),
            latest_device_type: user.latest_device_type.clone(),
            properties: user.properties.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identifiers_are_dropped() {
        let payload = IdentifyPayload {
            device_id: Some("  ".into()),
            email: Some("a@b.test".into()),
            ..Default::default()
        }
        .normalized();

        assert!(payload.device_id.is_none());
        assert_eq!(payload.email.as_deref(), Some("a@b.test"));
        assert!(payload.has_identifier());
    }

    #[test]
    fn empty_payload_has_no_identifier() {
        let payload = IdentifyPayload::default().normalized();
        assert!(!payload.has_identifier());
    }
}

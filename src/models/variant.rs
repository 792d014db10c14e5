use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Variant {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub key: String,
    pub payload: Option<JsonValue>,
    pub rollout: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub id: Uuid,
    pub key: String,
    pub payload: Option<JsonValue>,
}

impl Variant {
    pub fn summary(&self) -> VariantSummary {
        VariantSummary {
            id: self.id,
            key: self.key.clone(),
            payload: self.payload.clone(),
        }
    }
}

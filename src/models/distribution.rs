use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Maps a user to one variant of one experiment. Unique per (user, experiment).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Distribution {
    pub id: Uuid,
    pub user_id: Uuid,
    pub experiment_id: Uuid,
    pub variant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

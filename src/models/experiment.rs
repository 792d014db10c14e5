use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "experiment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
        }
    }

    /// Experiments move forward only: draft -> running -> completed.
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        matches!(
            (self, next),
            (ExperimentStatus::Draft, ExperimentStatus::Draft)
                | (ExperimentStatus::Draft, ExperimentStatus::Running)
                | (ExperimentStatus::Running, ExperimentStatus::Running)
                | (ExperimentStatus::Running, ExperimentStatus::Completed)
                | (ExperimentStatus::Completed, ExperimentStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "experiment_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExperimentKind {
    Toggle,
    Multi,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Experiment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub key: String,
    pub name: String,
    pub description: String,
    pub status: ExperimentStatus,
    pub kind: ExperimentKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short form used in HTTP assignment responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentBrief {
    pub id: Uuid,
    pub key: String,
    pub name: String,
}

/// Form carried on channel events and websocket pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub kind: ExperimentKind,
}

impl Experiment {
    pub fn brief(&self) -> ExperimentBrief {
        ExperimentBrief {
            id: self.id,
            key: self.key.clone(),
            name: self.name.clone(),
        }
    }

    pub fn summary(&self) -> ExperimentSummary {
        ExperimentSummary {
            id: self.id,
            key: self.key.clone(),
            name: self.name.clone(),
            status: self.status,
            kind: self.kind,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }
}

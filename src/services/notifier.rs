//! Post-commit change notification.
//!
//! Mutation paths collect [`ChangeEvent`]s while their transaction is open
//! and hand them to the notifier only after the commit succeeds; a rolled
//! back transaction therefore publishes nothing. Publication failures never
//! propagate back into the triggering request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ExperimentSummary, VariantSummary};
use crate::websocket::GroupRegistry;

/// An event addressed to one pub/sub group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A variant of a running experiment was mutated.
    ExperimentUpdate {
        experiment: ExperimentSummary,
        variant: VariantSummary,
    },
    /// A distribution was created or moved to a different variant.
    DistributionUpdate {
        user_id: Uuid,
        experiment: ExperimentSummary,
        variant: VariantSummary,
    },
}

impl ChangeEvent {
    pub fn group(&self) -> String {
        match self {
            ChangeEvent::ExperimentUpdate { experiment, .. } => {
                format!("experiment:{}", experiment.id)
            }
            ChangeEvent::DistributionUpdate { user_id, .. } => format!("user:{user_id}"),
        }
    }
}

#[derive(Clone)]
pub struct ChangeNotifier {
    registry: GroupRegistry,
}

impl ChangeNotifier {
    pub fn new(registry: GroupRegistry) -> Self {
        Self { registry }
    }

    pub async fn publish(&self, event: &ChangeEvent) {
        let group = event.group();
        match serde_json::to_string(event) {
            Ok(payload) => self.registry.broadcast(&group, payload).await,
            Err(e) => tracing::warn!(error = %e, group, "failed to encode change event"),
        }
    }

    /// Publishes in order; per-session delivery order follows emission order.
    pub async fn publish_all(&self, events: &[ChangeEvent]) {
        for event in events {
            self.publish(event).await;
        }
    }
}

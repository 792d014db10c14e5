use serde::{Deserialize, Serialize};

use crate::models::{ExperimentSummary, VariantSummary};

/// Inbound websocket commands from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeExperiment { experiment_key: String },
    UnsubscribeExperiment { experiment_key: String },
    /// Anything with an unrecognized discriminator; ignored.
    #[serde(other)]
    Unknown,
}

/// Outbound websocket messages from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current assignment for a subscribed experiment.
    ExperimentState {
        experiment: ExperimentSummary,
        variant: VariantSummary,
    },
    /// A variant of a subscribed experiment changed.
    ExperimentUpdated {
        experiment: ExperimentSummary,
        variant: VariantSummary,
    },
    /// This user's assignment changed.
    DistributionUpdated {
        experiment: ExperimentSummary,
        variant: VariantSummary,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::experiment::{ExperimentKind, ExperimentStatus};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn subscribe_command_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe_experiment","experiment_key":"checkout"}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SubscribeExperiment { experiment_key } if experiment_key == "checkout"
        ));
    }

    #[test]
    fn unknown_command_types_map_to_unknown() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn experiment_state_wire_shape() {
        let msg = ServerMessage::ExperimentState {
            experiment: ExperimentSummary {
                id: Uuid::nil(),
                key: "checkout".into(),
                name: "Checkout".into(),
                status: ExperimentStatus::Running,
                kind: ExperimentKind::Toggle,
            },
            variant: VariantSummary {
                id: Uuid::nil(),
                key: "enabled".into(),
                payload: Some(json!({})),
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "experiment_state");
        assert_eq!(value["experiment"]["key"], "checkout");
        assert_eq!(value["experiment"]["status"], "running");
        assert_eq!(value["experiment"]["kind"], "toggle");
        assert_eq!(value["variant"]["key"], "enabled");
    }

    #[test]
    fn update_messages_use_past_tense_discriminators() {
        let experiment = ExperimentSummary {
            id: Uuid::nil(),
            key: "k".into(),
            name: "n".into(),
            status: ExperimentStatus::Running,
            kind: ExperimentKind::Multi,
        };
        let variant = VariantSummary {
            id: Uuid::nil(),
            key: "a".into(),
            payload: None,
        };

        let updated = serde_json::to_value(ServerMessage::ExperimentUpdated {
            experiment: experiment.clone(),
            variant: variant.clone(),
        })
        .unwrap();
        assert_eq!(updated["type"], "experiment_updated");

        let moved = serde_json::to_value(ServerMessage::DistributionUpdated { experiment, variant })
            .unwrap();
        assert_eq!(moved["type"], "distribution_updated");
    }
}

use std::collections::HashSet;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web_actors::ws;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::db::experiment_repo;
use crate::error::AppResult;
use crate::models::{Project, ProjectUser};
use crate::services::distribution::{self, distribution_event};
use crate::services::notifier::ChangeEvent;
use crate::state::AppState;
use crate::websocket::messages::{ClientMessage, ServerMessage};
use crate::websocket::SessionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw group broadcast payload forwarded from the registry channel.
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct GroupPayload(pub String);

/// A fully formed server message to push to the client.
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct Outbound(pub ServerMessage);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Joined(String);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Left(String);

/// One connected realtime client.
///
/// The session tracks which groups it joined so it can leave all of them on
/// termination, whatever path the termination takes.
pub struct ExperimentSession {
    session_id: SessionId,
    project: Project,
    user: ProjectUser,
    state: AppState,
    sender: UnboundedSender<String>,
    joined: HashSet<String>,
    hb: Instant,
}

impl ExperimentSession {
    pub fn new(
        session_id: SessionId,
        project: Project,
        user: ProjectUser,
        state: AppState,
        sender: UnboundedSender<String>,
        joined: HashSet<String>,
    ) -> Self {
        Self {
            session_id,
            project,
            user,
            state,
            sender,
            joined,
            hb: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user = %act.user.id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_command(&self, command: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match command {
            ClientMessage::SubscribeExperiment { experiment_key } => {
                let state = self.state.clone();
                let project_id = self.project.id;
                let user = self.user.clone();
                let session_id = self.session_id;
                let sender = self.sender.clone();
                let addr = ctx.address();

                actix::spawn(async move {
                    match subscribe_experiment(&state, project_id, &user, &experiment_key, session_id, sender)
                        .await
                    {
                        Ok(Some(subscribed)) => {
                            addr.do_send(Joined(subscribed.group));
                            if let Some(message) = subscribed.state_message {
                                addr.do_send(Outbound(message));
                            }
                            state.notifier.publish_all(&subscribed.events).await;
                        }
                        // Unknown experiment keys are silently ignored.
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(error = %e, experiment_key, "subscribe failed");
                        }
                    }
                });
            }
            ClientMessage::UnsubscribeExperiment { experiment_key } => {
                let state = self.state.clone();
                let project_id = self.project.id;
                let session_id = self.session_id;
                let addr = ctx.address();

                actix::spawn(async move {
                    match experiment_repo::find_by_key(&state.db, project_id, &experiment_key).await {
                        Ok(Some(experiment)) => {
                            let group = format!("experiment:{}", experiment.id);
                            state.registry.leave(&group, session_id).await;
                            addr.do_send(Left(group));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(error = %e, experiment_key, "unsubscribe failed");
                        }
                    }
                });
            }
            ClientMessage::Unknown => {}
        }
    }

    /// Translates an internal channel event into its client-facing message.
    fn translate(event: ChangeEvent) -> ServerMessage {
        match event {
            ChangeEvent::ExperimentUpdate {
                experiment,
                variant,
            } => ServerMessage::ExperimentUpdated {
                experiment,
                variant,
            },
            ChangeEvent::DistributionUpdate {
                experiment,
                variant,
                ..
            } => ServerMessage::DistributionUpdated {
                experiment,
                variant,
            },
        }
    }
}

struct Subscribed {
    group: String,
    state_message: Option<ServerMessage>,
    events: Vec<ChangeEvent>,
}

/// Resolves an experiment key, joins its group and materializes the current
/// assignment for running experiments. Returns None for unknown keys.
async fn subscribe_experiment(
    state: &AppState,
    project_id: Uuid,
    user: &ProjectUser,
    experiment_key: &str,
    session_id: SessionId,
    sender: UnboundedSender<String>,
) -> AppResult<Option<Subscribed>> {
    let Some(experiment) = experiment_repo::find_by_key(&state.db, project_id, experiment_key).await?
    else {
        return Ok(None);
    };

    let group = format!("experiment:{}", experiment.id);
    state.registry.join(&group, session_id, sender).await;

    if !experiment.is_running() {
        return Ok(Some(Subscribed {
            group,
            state_message: None,
            events: Vec::new(),
        }));
    }

    let mut tx = state.db.begin().await?;
    let assignment = distribution::get_or_create(&mut tx, user, &experiment).await?;
    tx.commit().await?;

    let events = if assignment.created {
        vec![distribution_event(&experiment, user.id, &assignment.variant)]
    } else {
        Vec::new()
    };

    Ok(Some(Subscribed {
        group,
        state_message: Some(ServerMessage::ExperimentState {
            experiment: experiment.summary(),
            variant: assignment.variant.summary(),
        }),
        events,
    }))
}

impl Actor for ExperimentSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user = %self.user.id,
            project = %self.project.id,
            "realtime session started"
        );
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            user = %self.user.id,
            project = %self.project.id,
            "realtime session stopped"
        );

        // Leave every joined group, whatever caused the stop.
        let registry = self.state.registry.clone();
        let session_id = self.session_id;
        let joined = std::mem::take(&mut self.joined);

        actix::spawn(async move {
            for group in joined {
                registry.leave(&group, session_id).await;
            }
        });
    }
}

impl Handler<GroupPayload> for ExperimentSession {
    type Result = ();

    fn handle(&mut self, msg: GroupPayload, ctx: &mut Self::Context) {
        match serde_json::from_str::<ChangeEvent>(&msg.0) {
            Ok(event) => {
                let outbound = Self::translate(event);
                match serde_json::to_string(&outbound) {
                    Ok(text) => ctx.text(text),
                    Err(e) => tracing::error!(error = %e, "failed to encode outbound message"),
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping unrecognized group payload");
            }
        }
    }
}

impl Handler<Outbound> for ExperimentSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg.0) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(error = %e, "failed to encode outbound message"),
        }
    }
}

impl Handler<Joined> for ExperimentSession {
    type Result = ();

    fn handle(&mut self, msg: Joined, _ctx: &mut Self::Context) {
        self.joined.insert(msg.0);
    }
}

impl Handler<Left> for ExperimentSession {
    type Result = ();

    fn handle(&mut self, msg: Left, _ctx: &mut Self::Context) {
        self.joined.remove(&msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ExperimentSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(command) => self.handle_command(command, ctx),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse websocket command");
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary websocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

use actix::{Actor, ActorContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{experiment_repo, project_repo};
use crate::error::AppError;
use crate::models::user::IdentifyPayload;
use crate::services::distribution::{self, distribution_event};
use crate::services::identity;
use crate::state::AppState;
use crate::websocket::messages::ServerMessage;
use crate::websocket::session::{ExperimentSession, GroupPayload, Outbound};
use crate::websocket::{GroupRegistry, SessionId};

// Handshake close codes.
const CLOSE_MISSING_API_KEY: u16 = 4000;
const CLOSE_INVALID_API_KEY: u16 = 4001;
const CLOSE_NO_IDENTIFIER: u16 = 4002;
const CLOSE_IDENTIFY_FAILED: u16 = 4003;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub api_key: Option<String>,
    pub user_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub email: Option<String>,
    pub external_id: Option<String>,
    /// Comma-separated experiment keys to subscribe on connect.
    pub experiments: Option<String>,
}

/// Completes the websocket handshake, then immediately closes with the
/// given application close code. Rejections happen after the upgrade so the
/// client library can read the code.
struct RejectSession {
    code: u16,
}

impl Actor for RejectSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Other(self.code),
            description: None,
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RejectSession {
    fn handle(&mut self, _msg: Result<ws::Message, ws::ProtocolError>, _ctx: &mut Self::Context) {}
}

fn reject(req: &HttpRequest, stream: web::Payload, code: u16) -> Result<HttpResponse, Error> {
    ws::start(RejectSession { code }, req, stream)
}

#[get("/ws/experiments/")]
pub async fn experiments_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, Error> {
    let q = query.into_inner();

    let Some(api_key) = q.api_key else {
        return reject(&req, stream, CLOSE_MISSING_API_KEY);
    };
    let project = match project_repo::find_by_api_key(&state.db, &api_key).await {
        Ok(Some(project)) => project,
        _ => return reject(&req, stream, CLOSE_INVALID_API_KEY),
    };

    let payload = IdentifyPayload {
        id: q.user_id,
        device_id: q.device_id,
        email: q.email,
        external_id: q.external_id,
        ..Default::default()
    }
    .normalized();
    if !payload.has_identifier() {
        return reject(&req, stream, CLOSE_NO_IDENTIFIER);
    }

    let user = match identity::identify(&state.db, project.id, payload).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, project = %project.id, "handshake identify failed");
            return reject(&req, stream, CLOSE_IDENTIFY_FAILED);
        }
    };

    // Resolve requested experiment keys; unknown keys are silently ignored.
    let keys: Vec<&str> = q
        .experiments
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .collect();

    let mut resolved = Vec::new();
    for key in keys {
        if let Some(experiment) = experiment_repo::find_by_key(&state.db, project.id, key)
            .await
            .map_err(AppError::from)?
        {
            resolved.push(experiment);
        }
    }

    // Materialize initial assignments for running experiments in one
    // transaction, so the client never sees a mixed pre/post-change state.
    let mut initial = Vec::new();
    let mut events = Vec::new();
    {
        let mut tx = state.db.begin().await.map_err(AppError::from)?;
        for experiment in resolved.iter().filter(|e| e.is_running()) {
            let assignment = distribution::get_or_create(&mut tx, &user, experiment).await?;
            initial.push(ServerMessage::ExperimentState {
                experiment: experiment.summary(),
                variant: assignment.variant.summary(),
            });
            if assignment.created {
                events.push(distribution_event(experiment, user.id, &assignment.variant));
            }
        }
        tx.commit().await.map_err(AppError::from)?;
    }

    // Group membership: the user's own channel, the project channel, and one
    // channel per resolved experiment.
    let session_id = SessionId::new();
    let (sender, mut receiver) = GroupRegistry::channel();

    let mut groups = vec![format!("user:{}", user.id), format!("project:{}", project.id)];
    groups.extend(resolved.iter().map(|e| format!("experiment:{}", e.id)));
    for group in &groups {
        state.registry.join(group, session_id, sender.clone()).await;
    }

    let session = ExperimentSession::new(
        session_id,
        project,
        user,
        state.get_ref().clone(),
        sender,
        groups.into_iter().collect(),
    );

    let (addr, resp) = ws::WsResponseBuilder::new(session, &req, stream).start_with_addr()?;

    // Bridge group broadcasts into the session actor.
    {
        let addr = addr.clone();
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                addr.do_send(GroupPayload(payload));
            }
        });
    }

    // Initial state push, then the creation events (post-commit).
    for message in initial {
        addr.do_send(Outbound(message));
    }
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.publish_all(&events).await;
    });

    Ok(resp)
}

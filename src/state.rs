use std::sync::Arc;

use sqlx::PgPool;

use crate::{config::Config, services::notifier::ChangeNotifier, websocket::GroupRegistry};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub registry: GroupRegistry,
    pub notifier: ChangeNotifier,
    pub config: Arc<Config>,
}

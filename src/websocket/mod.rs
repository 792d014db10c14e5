use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod messages;
pub mod session;

/// Unique identifier for a connected realtime session.
///
/// Each websocket connection gets one id at registration time so it can be
/// removed precisely from every group it joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

struct Member {
    session: SessionId,
    sender: UnboundedSender<String>,
}

/// Group-addressed fanout registry.
///
/// Groups are named channels (`user:{id}`, `project:{id}`, `experiment:{id}`);
/// a session joins any number of them and receives every payload published to
/// each. Membership is scoped to the session: sessions leave all their groups
/// on disconnect, and dead senders are swept on broadcast.
#[derive(Default, Clone)]
pub struct GroupRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<Member>>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fanout channel for a session. The sender half is handed to
    /// `join` for every group the session enters.
    pub fn channel() -> (UnboundedSender<String>, UnboundedReceiver<String>) {
        unbounded_channel()
    }

    pub async fn join(&self, group: &str, session: SessionId, sender: UnboundedSender<String>) {
        let mut guard = self.inner.write().await;
        let members = guard.entry(group.to_string()).or_default();

        if members.iter().any(|m| m.session == session) {
            return;
        }
        members.push(Member { session, sender });

        tracing::debug!(group, ?session, total = members.len(), "session joined group");
    }

    pub async fn leave(&self, group: &str, session: SessionId) {
        let mut guard = self.inner.write().await;

        if let Some(members) = guard.get_mut(group) {
            members.retain(|m| m.session != session);
            if members.is_empty() {
                guard.remove(group);
            }
            tracing::debug!(group, ?session, "session left group");
        }
    }

    /// Delivers a payload to every member of a group, sweeping senders whose
    /// receiving session is gone.
    pub async fn broadcast(&self, group: &str, payload: String) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.get_mut(group) {
            let before = members.len();
            members.retain(|m| m.sender.send(payload.clone()).is_ok());
            let after = members.len();

            if before != after {
                tracing::debug!(
                    group,
                    swept = before - after,
                    active = after,
                    "swept dead senders during broadcast"
                );
            }
            if members.is_empty() {
                guard.remove(group);
            }
        }
    }

    pub async fn member_count(&self, group: &str) -> usize {
        let guard = self.inner.read().await;
        guard.get(group).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let registry = GroupRegistry::new();
        let (tx_a, mut rx_a) = GroupRegistry::channel();
        let (tx_b, mut rx_b) = GroupRegistry::channel();
        let a = SessionId::new();
        let b = SessionId::new();

        registry.join("experiment:1", a, tx_a).await;
        registry.join("experiment:1", b, tx_b).await;

        registry.broadcast("experiment:1", "hello".into()).await;

        assert_eq!(rx_a.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let registry = GroupRegistry::new();
        let (tx, mut rx) = GroupRegistry::channel();
        let session = SessionId::new();

        registry.join("user:1", session, tx).await;
        registry.leave("user:1", session).await;
        registry.broadcast("user:1", "gone".into()).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.member_count("user:1").await, 0);
    }

    #[tokio::test]
    async fn joining_twice_registers_once() {
        let registry = GroupRegistry::new();
        let (tx, mut rx) = GroupRegistry::channel();
        let session = SessionId::new();

        registry.join("project:1", session, tx.clone()).await;
        registry.join("project:1", session, tx).await;

        registry.broadcast("project:1", "once".into()).await;
        assert_eq!(rx.recv().await.as_deref(), Some("once"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_members_are_swept() {
        let registry = GroupRegistry::new();
        let (tx, rx) = GroupRegistry::channel();
        registry.join("user:2", SessionId::new(), tx).await;
        drop(rx);

        registry.broadcast("user:2", "anyone".into()).await;
        assert_eq!(registry.member_count("user:2").await, 0);
    }

    #[tokio::test]
    async fn groups_are_isolated() {
        let registry = GroupRegistry::new();
        let (tx, mut rx) = GroupRegistry::channel();
        registry.join("experiment:a", SessionId::new(), tx).await;

        registry.broadcast("experiment:b", "other".into()).await;
        assert!(rx.try_recv().is_err());
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use safecampus_types::events::GatewayEvent;

/// Outbound queue of one open connection. Frames are pre-serialized JSON.
pub type ConnectionSender = mpsc::UnboundedSender<String>;

/// Registry of open real-time connections, keyed by user.
///
/// One instance is created at server start and shared by cloning the handle.
/// A user may hold several connections at once (one per tab); a user with no
/// open connection has no entry at all.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> sender)
    connections: RwLock<HashMap<Uuid, HashMap<Uuid, ConnectionSender>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for an already-authenticated user. Returns the
    /// connection id (needed to unregister) and the receiving end of its queue.
    pub async fn register_connection(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Remove one connection. The user entry goes away with its last connection.
    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(user_conns) = connections.get_mut(&user_id) {
            user_conns.remove(&conn_id);
            if user_conns.is_empty() {
                connections.remove(&user_id);
            }
        }
    }

    /// Send `event` to every open connection of `user_id`. Connections whose
    /// receiver is gone are skipped. Returns how many connections took it.
    pub async fn push_to_user(&self, user_id: Uuid, event: &GatewayEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let connections = self.inner.connections.read().await;
        deliver(&connections, user_id, &frame)
    }

    /// Like `push_to_user` for several recipients; duplicates are sent once.
    pub async fn push_to_users<I>(&self, user_ids: I, event: &GatewayEvent) -> usize
    where
        I: IntoIterator<Item = Uuid>,
    {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let recipients: HashSet<Uuid> = user_ids.into_iter().collect();
        let connections = self.inner.connections.read().await;
        recipients
            .into_iter()
            .map(|user_id| deliver(&connections, user_id, &frame))
            .sum()
    }

    pub async fn push_to_all(&self, event: &GatewayEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let connections = self.inner.connections.read().await;
        connections
            .keys()
            .map(|&user_id| deliver(&connections, user_id, &frame))
            .sum()
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    pub async fn online_user_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

fn encode(event: &GatewayEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            None
        }
    }
}

fn deliver(connections: &HashMap<Uuid, HashMap<Uuid, ConnectionSender>>, user_id: Uuid, frame: &str) -> usize {
    let Some(user_conns) = connections.get(&user_id) else {
        return 0;
    };
    let mut delivered = 0;
    for (conn_id, tx) in user_conns {
        if tx.send(frame.to_owned()).is_ok() {
            delivered += 1;
        } else {
            debug!("Skipping closed connection {} of {}", conn_id, user_id);
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use safecampus_types::models::AlertStatus;

    fn update_event() -> GatewayEvent {
        GatewayEvent::AlertUpdated {
            alert_id: Uuid::new_v4(),
            status: AlertStatus::Acknowledged,
        }
    }

    #[tokio::test]
    async fn both_connections_of_a_user_receive_push() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_, mut tab_a) = dispatcher.register_connection(user).await;
        let (_, mut tab_b) = dispatcher.register_connection(user).await;

        assert_eq!(dispatcher.push_to_user(user, &update_event()).await, 2);

        let a: serde_json::Value = serde_json::from_str(&tab_a.recv().await.unwrap()).unwrap();
        let b: serde_json::Value = serde_json::from_str(&tab_b.recv().await.unwrap()).unwrap();
        assert_eq!(a["type"], "alert_updated");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unregistering_last_connection_drops_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = dispatcher.register_connection(user).await;
        let (second, _rx2) = dispatcher.register_connection(user).await;

        dispatcher.unregister_connection(user, first).await;
        assert_eq!(dispatcher.connection_count(user).await, 1);
        assert_eq!(dispatcher.online_user_count().await, 1);

        dispatcher.unregister_connection(user, second).await;
        assert_eq!(dispatcher.connection_count(user).await, 0);
        assert_eq!(dispatcher.online_user_count().await, 0);
        assert_eq!(dispatcher.push_to_user(user, &update_event()).await, 0);
    }

    #[tokio::test]
    async fn closed_connection_is_skipped_silently() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_, closed) = dispatcher.register_connection(user).await;
        let (_, mut open) = dispatcher.register_connection(user).await;
        drop(closed);

        assert_eq!(dispatcher.push_to_user(user, &update_event()).await, 1);
        assert!(open.recv().await.is_some());
    }

    #[tokio::test]
    async fn push_to_users_dedupes_and_ignores_offline() {
        let dispatcher = Dispatcher::new();
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (_, mut rx) = dispatcher.register_connection(online).await;

        let delivered = dispatcher.push_to_users([online, offline, online], &update_event()).await;
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_to_all_reaches_every_user() {
        let dispatcher = Dispatcher::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (_, rx) = dispatcher.register_connection(Uuid::new_v4()).await;
            receivers.push(rx);
        }

        assert_eq!(dispatcher.push_to_all(&update_event()).await, 3);
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }
    }
}

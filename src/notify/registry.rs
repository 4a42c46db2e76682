use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use crate::{
    challenge::models::SessionOwner,
    notify::{ExecutionEvent, Notifier},
};

const OUTBOX_CAPACITY: usize = 32;

/// Process-local map from session key to its single live connection.
pub struct ConnectionRegistry {
    connections: DashMap<String, LiveConnection>,
    next_id: AtomicU64,
}

struct LiveConnection {
    id: u64,
    outbox: Sender<String>,
}

pub struct Registration {
    pub id: u64,
    pub inbox: Receiver<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Takes the session's slot. A previous connection loses its outbox and winds down.
    pub fn register(&self, key: &str) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);
        if self
            .connections
            .insert(key.to_string(), LiveConnection { id, outbox })
            .is_some()
        {
            tracing::debug!(session = key, connection_id = id, "replaced live connection");
        }
        Registration { id, inbox }
    }

    /// Frees the slot unless a newer connection already holds it.
    pub fn release(&self, key: &str, id: u64) {
        self.connections.remove_if(key, |_, conn| conn.id == id);
    }

    pub fn deliver(&self, key: &str, payload: String) -> bool {
        let Some(conn) = self.connections.get(key) else {
            return false;
        };
        match conn.outbox.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = key, "live connection outbox full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConnectionRegistry {
    async fn publish(&self, owner: &SessionOwner, event: &ExecutionEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode execution event");
                return;
            }
        };
        let key = owner.channel_key();
        let delivered = self.deliver(&key, payload);
        tracing::debug!(session = %key, delivered, "published execution event");
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionRegistry;
    use crate::{
        challenge::models::SessionOwner,
        notify::{ExecutionEvent, Notifier},
    };

    #[test]
    fn delivery_without_connection_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.deliver("interview:1", "{}".into()));
    }

    #[tokio::test]
    async fn reconnect_replaces_previous_connection() {
        let registry = ConnectionRegistry::new();
        let mut first = registry.register("interview:1");
        let mut second = registry.register("interview:1");

        assert_eq!(registry.len(), 1);
        assert!(first.inbox.recv().await.is_none());

        assert!(registry.deliver("interview:1", "hello".into()));
        assert_eq!(second.inbox.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn stale_release_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let first = registry.register("test:5");
        let second = registry.register("test:5");

        registry.release("test:5", first.id);
        assert_eq!(registry.len(), 1);
        registry.release("test:5", second.id);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn publishes_serialized_event_to_owner_session() {
        let registry = ConnectionRegistry::new();
        let mut conn = registry.register("interview:7");

        registry
            .publish(&SessionOwner::Interview(7), &ExecutionEvent::passed(2))
            .await;
        registry
            .publish(&SessionOwner::StaffTest(7), &ExecutionEvent::passed(9))
            .await;

        let payload = conn.inbox.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["passed_count"], 2);
        assert!(conn.inbox.try_recv().is_err());
    }
}

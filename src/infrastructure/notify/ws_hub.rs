use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Notifier;

/// In-process registry of open websocket connections.
#[derive(Clone, Default)]
pub struct WsHub {
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns its id with the receiving end of
    /// its outbox.
    pub async fn register(&self) -> (String, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(id.clone(), tx);
        debug!("Connection {} registered", id);
        (id, rx)
    }

    pub async fn unregister(&self, id: &str) {
        self.connections.write().await.remove(id);
        debug!("Connection {} unregistered", id);
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Notifier for WsHub {
    async fn notify(&self, connections: &[String], message: &str) {
        let hub = self.connections.read().await;
        for id in connections {
            match hub.get(id) {
                Some(tx) => {
                    if tx.send(message.to_string()).is_err() {
                        warn!("Connection {} closed before notification", id);
                    }
                }
                None => warn!("Connection {} is gone", id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifies_registered_connections_only() {
        let hub = WsHub::new();
        let (first, mut first_rx) = hub.register().await;
        let (second, second_rx) = hub.register().await;
        drop(second_rx);

        hub.notify(&[first.clone(), second, "unknown".into()], "{\"msg\":\"hi\"}")
            .await;

        assert_eq!(first_rx.recv().await.as_deref(), Some("{\"msg\":\"hi\"}"));
        hub.unregister(&first).await;
        assert_eq!(hub.len().await, 1);
    }
}

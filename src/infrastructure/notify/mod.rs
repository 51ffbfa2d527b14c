use async_trait::async_trait;

pub mod ws_hub;

pub use ws_hub::WsHub;

/// Fire-and-forget text push to client connections.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `message` to every id in `connections`. Failures for single
    /// connections are logged and otherwise ignored.
    async fn notify(&self, connections: &[String], message: &str);
}

use crate::{error::ChimeError, message::Notification};
use async_trait::async_trait;

/// Messaging collaborator — the seam to the chat transport.
///
/// The scheduling core never talks to a chat protocol directly; it hands
/// composed notifications to whatever implements this trait. Send failures
/// are logged by the caller and never retried.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Human-readable transport name, for logs.
    fn name(&self) -> &str;

    /// Deliver a notification to its room.
    async fn send(&self, notification: Notification) -> Result<(), ChimeError>;
}

//! Messaging collaborators for the daemon binary.

use async_trait::async_trait;
use chime_core::{error::ChimeError, message::Notification, traits::Messenger};
use tracing::info;

/// Logs notifications instead of delivering them.
///
/// Stands where a real chat transport plugs in; running the daemon without
/// one attached still exercises the full scheduling path.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: Notification) -> Result<(), ChimeError> {
        let target = notification
            .mention_user
            .as_deref()
            .unwrap_or("@room");
        info!(
            "notify [{}] {}: {}",
            notification.room_id, target, notification.body
        );
        Ok(())
    }
}

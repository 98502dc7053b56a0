use serde::{Deserialize, Serialize};

/// A notification to deliver to a room.
///
/// Composition happens in the fire handlers; the transport decides how the
/// mention fields are rendered on its platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub room_id: String,
    /// Pre-composed message body.
    pub body: String,
    /// Mention the whole room rather than a single user.
    pub mention_room: bool,
    /// User to mention, when the reminder targets one person.
    pub mention_user: Option<String>,
}

//! Room and payload domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RoomId, UserId};

/// A conversation room (DM or group).
///
/// Owned by the room state store; after creation it is only mutated by
/// server-confirmed updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub is_group: bool,
    pub member_ids: Vec<UserId>,
    pub admin_ids: Vec<UserId>,
    /// Unread count for the current user, server-supplied.
    pub unread_count: u32,
    pub last_activity_at: DateTime<Utc>,
}

impl Room {
    /// Validate a room record arriving from the server.
    ///
    /// Rejects nameless or memberless rooms so malformed inbound data never
    /// reaches UI state.
    pub fn validated(self) -> Result<Self, String> {
        if self.name.trim().is_empty() {
            return Err(format!("room {} has an empty name", self.id));
        }
        if self.member_ids.is_empty() {
            return Err(format!("room {} has no members", self.id));
        }
        Ok(self)
    }
}

/// Partial room update pushed by the server.
///
/// `unread_counts` maps user id -> that user's unread counter; the client
/// only ever reads its own entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    pub room_id: RoomId,
    pub name: Option<String>,
    pub member_ids: Option<Vec<UserId>>,
    pub admin_ids: Option<Vec<UserId>>,
    pub unread_counts: Vec<(UserId, u32)>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Plaintext fields of a message, serialized to canonical JSON and carried
/// only inside the encrypted envelope.  The media URL is opaque here; file
/// content encryption is a separate concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub text: String,
    pub media_url: Option<String>,
}

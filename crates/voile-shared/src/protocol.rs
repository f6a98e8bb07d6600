//! Push-channel wire protocol.
//!
//! The transport is consumed as an opaque bidirectional event channel; these
//! are the frames it carries.  Delivery is at-least-once, ordered per room.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::RoomUpdate;
use crate::types::{MessageId, RoomId, TempId, UserId};

/// An encrypted message record as it travels over the wire or rests on the
/// server.  `encrypted_content` is base64(nonce || ciphertext) of the
/// canonical payload JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub encrypted_content: String,
    /// Echo of the sender's correlation id, present on confirmations of our
    /// own optimistic sends.
    pub temp_id: Option<TempId>,
    pub created_at: DateTime<Utc>,
}

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerEvent {
    /// The channel is established; the client answers with
    /// [`ClientIntent::RequestPresence`].
    Connected,

    /// Full presence snapshot; replaces the local presence set.
    PresenceSnapshot { online: Vec<UserId> },

    /// A confirmed message (peer-originated or an echo of our own send).
    NewMessage(WireMessage),

    /// Server-confirmed room mutation.
    RoomUpdated(RoomUpdate),

    /// A single message was read by its recipient.
    MessageRead { message_id: MessageId },

    /// A batch of messages reached their recipients.
    MessagesDelivered { message_ids: Vec<MessageId> },

    UserTyping {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },

    UserOnline(UserId),
    UserOffline(UserId),

    /// Transport-reported error; non-fatal, surfaced as a notice.
    ChannelError { message: String },
}

/// Fire-and-forget intents emitted by the client.  Confirmation arrives
/// asynchronously on the inbound event path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientIntent {
    RequestPresence,

    SendMessage {
        room_id: RoomId,
        encrypted_content: String,
        temp_id: TempId,
    },

    JoinRoom(RoomId),
    LeaveRoom(RoomId),

    TypingStart(RoomId),
    TypingStop(RoomId),

    MarkAsRead {
        room_id: RoomId,
        message_ids: Vec<MessageId>,
    },
}

impl ServerEvent {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ClientIntent {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_server_event_roundtrip() {
        let event = ServerEvent::NewMessage(WireMessage {
            id: MessageId(Uuid::new_v4()),
            room_id: RoomId::new(),
            sender_id: UserId(Uuid::new_v4()),
            encrypted_content: "AAECAwQ=".to_string(),
            temp_id: Some(TempId::new()),
            created_at: Utc::now(),
        });

        let bytes = event.to_bytes().unwrap();
        let restored = ServerEvent::from_bytes(&bytes).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_client_intent_roundtrip() {
        let intent = ClientIntent::MarkAsRead {
            room_id: RoomId::new(),
            message_ids: vec![MessageId(Uuid::new_v4()), MessageId(Uuid::new_v4())],
        };

        let bytes = intent.to_bytes().unwrap();
        assert_eq!(intent, ClientIntent::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn test_garbage_frame_rejected() {
        assert!(ServerEvent::from_bytes(&[0xFF; 3]).is_err());
    }
}

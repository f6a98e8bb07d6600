//! Optimistic message reconciliation.
//!
//! Maintains the active room's ordered message list and merges three
//! origins: locally sent (optimistic), server-confirmed echoes of local
//! sends, and peer-originated pushes.  Reconciliation replaces an optimistic
//! entry in place, so an entry's position (and the user's scroll position)
//! never changes when its confirmation arrives.

use chrono::{DateTime, Utc};

use voile_shared::protocol::WireMessage;
use voile_shared::room::MessagePayload;
use voile_shared::types::{DeliveryStatus, MessageId, RoomId, TempId, UserId};

/// Placeholder text for a message that failed to decrypt.
pub const PLACEHOLDER_UNDECRYPTABLE: &str = "[contenu indéchiffrable]";

/// Placeholder text when no shared key exists for the room.
pub const PLACEHOLDER_NO_KEY: &str = "[clé de salon absente]";

/// Identity of a timeline entry.  Exactly one of the two forms holds at any
/// time: a pending entry carries only its correlation id, a confirmed entry
/// only its server-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    Pending(TempId),
    Confirmed(MessageId),
}

/// A decrypted message as shown in the active room's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineMessage {
    pub key: MessageKey,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub text: String,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl TimelineMessage {
    /// A confirmed entry built from a wire record and its decrypted payload.
    pub fn confirmed(wire: &WireMessage, payload: MessagePayload) -> Self {
        Self {
            key: MessageKey::Confirmed(wire.id),
            room_id: wire.room_id,
            sender_id: wire.sender_id,
            text: payload.text,
            media_url: payload.media_url,
            created_at: wire.created_at,
            status: DeliveryStatus::Sent,
        }
    }

    /// A confirmed entry whose content could not be decrypted.  The entry
    /// stays visible so the failure is not mistaken for a dropped message.
    pub fn placeholder(wire: &WireMessage, text: &str) -> Self {
        Self {
            key: MessageKey::Confirmed(wire.id),
            room_id: wire.room_id,
            sender_id: wire.sender_id,
            text: text.to_string(),
            media_url: None,
            created_at: wire.created_at,
            status: DeliveryStatus::Sent,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }
}

/// Outcome of [`MessageReconciler::reconcile_incoming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// An optimistic entry was replaced in place.
    Replaced,
    /// A new confirmed entry was appended.
    Appended,
    /// The server id was already present; at-least-once redelivery, no-op.
    Duplicate,
}

/// Ordered message list for the active room.
#[derive(Default)]
pub struct MessageReconciler {
    messages: Vec<TimelineMessage>,
}

impl MessageReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a locally-sent message before any network confirmation.
    /// Returns the correlation id tying the entry to its eventual echo.
    pub fn append_optimistic(
        &mut self,
        room_id: RoomId,
        sender_id: UserId,
        payload: &MessagePayload,
    ) -> TempId {
        let temp_id = TempId::new();
        self.messages.push(TimelineMessage {
            key: MessageKey::Pending(temp_id),
            room_id,
            sender_id,
            text: payload.text.clone(),
            media_url: payload.media_url.clone(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
        });
        temp_id
    }

    /// Merge a decrypted inbound message.
    ///
    /// If an optimistic entry matches the echoed correlation id it is
    /// replaced at the same index; otherwise the message is appended unless
    /// its server id is already present.
    pub fn reconcile_incoming(
        &mut self,
        incoming: TimelineMessage,
        temp_id: Option<TempId>,
    ) -> Reconciliation {
        if let Some(temp_id) = temp_id {
            if let Some(index) = self
                .messages
                .iter()
                .position(|m| m.key == MessageKey::Pending(temp_id))
            {
                self.messages[index] = incoming;
                return Reconciliation::Replaced;
            }
        }

        if self.messages.iter().any(|m| m.key == incoming.key) {
            return Reconciliation::Duplicate;
        }

        self.messages.push(incoming);
        Reconciliation::Appended
    }

    /// Remove a failed optimistic entry outright; a send that failed must
    /// not linger as a permanent "sending" placeholder.  Returns whether an
    /// entry was removed so the caller can surface a retry notice.
    pub fn mark_failed(&mut self, temp_id: TempId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.key != MessageKey::Pending(temp_id));
        self.messages.len() != before
    }

    /// Install page 1 of history, replacing the window.
    pub fn replace_history(&mut self, messages: Vec<TimelineMessage>) {
        self.messages = messages;
    }

    /// Prepend an older page, preserving chronological order.
    pub fn prepend_history(&mut self, mut older: Vec<TimelineMessage>) {
        older.append(&mut self.messages);
        self.messages = older;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Snapshot of the window.
    pub fn messages(&self) -> Vec<TimelineMessage> {
        self.messages.clone()
    }
}

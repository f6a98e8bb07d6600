//! Session context: the single entry point binding identity, key cache,
//! room state, the message window and the server seams together.
//!
//! All mutable state lives behind one mutex and no lock is ever held
//! across an await.  After any suspension the handlers re-read the active
//! room before applying results, so a stale fetch can never clobber the
//! room the user switched to meanwhile.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voile_shared::constants::HISTORY_PAGE_SIZE;
use voile_shared::crypto::{self, KeyPair, SharedKey};
use voile_shared::protocol::{ClientIntent, ServerEvent, WireMessage};
use voile_shared::room::{MessagePayload, Room};
use voile_shared::types::{DeliveryStatus, MessageId, RoomId, TempId, UserId};
use voile_store::KeyVault;

use crate::channel;
use crate::error::SessionError;
use crate::events::{emit_notice, NoticeKind, NoticeSender};
use crate::keys::SharedKeyCache;
use crate::reconcile::{
    MessageReconciler, TimelineMessage, PLACEHOLDER_NO_KEY, PLACEHOLDER_UNDECRYPTABLE,
};
use crate::rest::ServerApi;
use crate::rooms::RoomStateStore;

/// Everything the event pump and the command surface mutate, guarded as one
/// unit so a snapshot is always internally consistent.
pub(crate) struct SessionState {
    pub rooms: RoomStateStore,
    pub timeline: MessageReconciler,
    pub keys: SharedKeyCache,
}

pub struct SessionContext<A: ServerApi> {
    user_id: UserId,
    identity: KeyPair,
    api: A,
    state: Mutex<SessionState>,
    outbound: Mutex<Option<mpsc::Sender<ClientIntent>>>,
    notices: NoticeSender,
}

impl<A: ServerApi + 'static> SessionContext<A> {
    /// Build a session from a persisted vault.  Room keys cached in the
    /// vault are loaded eagerly so history decrypts on first render.
    pub fn new(
        user_id: UserId,
        vault: KeyVault,
        api: A,
        notices: NoticeSender,
    ) -> Result<Self, SessionError> {
        let identity = vault.identity().clone();
        let mut keys = SharedKeyCache::new(Arc::new(Mutex::new(vault)));
        let loaded = keys.load_all()?;
        tracing::info!(user = %user_id, room_keys = loaded, "session initialised");

        Ok(Self {
            user_id,
            identity,
            api,
            state: Mutex::new(SessionState {
                rooms: RoomStateStore::new(),
                timeline: MessageReconciler::new(),
                keys,
            }),
            outbound: Mutex::new(None),
            notices,
        })
    }

    /// Attach the push channel and spawn the event pump.  The returned
    /// handle resolves when the transport closes its event sender.
    pub fn connect(
        self: &Arc<Self>,
        inbound: mpsc::Receiver<ServerEvent>,
        outbound: mpsc::Sender<ClientIntent>,
    ) -> Result<JoinHandle<()>, SessionError> {
        *self.lock_outbound()? = Some(outbound);
        let ctx = Arc::clone(self);
        Ok(tokio::spawn(channel::event_loop(ctx, inbound)))
    }

    /// Detach the push channel.  Presence is cleared because nothing keeps
    /// it fresh once the channel is gone; rooms and keys stay.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        *self.lock_outbound()? = None;
        self.lock_state()?.rooms.replace_presence(Vec::new());
        tracing::info!("session disconnected");
        Ok(())
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Hex public half of the session identity, for sharing with peers.
    pub fn public_key(&self) -> String {
        self.identity.export_public()
    }

    pub(crate) fn notices(&self) -> &NoticeSender {
        &self.notices
    }

    // ---- rooms -----------------------------------------------------------

    /// Fetch the room list.  Malformed rooms are dropped with a warning
    /// instead of poisoning the whole list.
    pub async fn load_rooms(&self) -> Result<Vec<Room>, SessionError> {
        let fetched = self.api.list_rooms().await?;
        let rooms: Vec<Room> = fetched
            .into_iter()
            .filter_map(|room| match room.validated() {
                Ok(room) => Some(room),
                Err(reason) => {
                    tracing::warn!(%reason, "dropping malformed room from listing");
                    None
                }
            })
            .collect();

        self.lock_state()?.rooms.set_rooms(rooms.clone());
        tracing::debug!(count = rooms.len(), "room list refreshed");
        Ok(rooms)
    }

    pub async fn create_room(
        &self,
        name: &str,
        member_ids: Vec<UserId>,
        is_group: bool,
    ) -> Result<Room, SessionError> {
        let room = self.api.create_room(name, &member_ids, is_group).await?;
        self.lock_state()?.rooms.upsert_room(room.clone());
        tracing::info!(room = %room.id, is_group, "room created");
        Ok(room)
    }

    /// Enter a room: it becomes active, its unread counter drops and the
    /// first history page replaces the message window.
    pub async fn join_room(&self, room_id: RoomId) -> Result<Vec<TimelineMessage>, SessionError> {
        {
            let mut state = self.lock_state()?;
            if !state.rooms.set_active_room(room_id) {
                return Err(SessionError::RoomNotFound(room_id));
            }
            state.timeline.clear();
        }

        if let Err(e) = self.send_intent(ClientIntent::JoinRoom(room_id)) {
            tracing::warn!(error = %e, "join intent not sent, continuing offline");
        }

        self.load_messages(room_id, 1).await
    }

    /// Leave the active room, if any.  The message window is dropped; the
    /// room itself stays in the list.
    pub fn leave_room(&self) -> Result<(), SessionError> {
        let room_id = {
            let mut state = self.lock_state()?;
            let Some(room_id) = state.rooms.active_room() else {
                return Ok(());
            };
            state.rooms.clear_active_room();
            state.timeline.clear();
            room_id
        };

        if let Err(e) = self.send_intent(ClientIntent::LeaveRoom(room_id)) {
            tracing::warn!(error = %e, "leave intent not sent");
        }
        Ok(())
    }

    // ---- history ---------------------------------------------------------

    /// Fetch and decrypt one history page (page 1 is the most recent).
    /// Page 1 replaces the window and marks peer messages read; older pages
    /// prepend.  If the user switched rooms during the fetch the result is
    /// returned but not applied.
    pub async fn load_messages(
        &self,
        room_id: RoomId,
        page: u32,
    ) -> Result<Vec<TimelineMessage>, SessionError> {
        let key = self.lock_state()?.keys.get(room_id);

        let wires = self
            .api
            .fetch_messages(room_id, page, HISTORY_PAGE_SIZE)
            .await?;

        let unread: Vec<MessageId> = if page == 1 {
            wires
                .iter()
                .filter(|w| w.sender_id != self.user_id)
                .map(|w| w.id)
                .collect()
        } else {
            Vec::new()
        };

        let messages: Vec<TimelineMessage> = wires
            .iter()
            .map(|wire| decrypt_wire(wire, key.as_ref()))
            .collect();

        {
            let mut state = self.lock_state()?;
            if state.rooms.active_room() != Some(room_id) {
                tracing::debug!(room = %room_id, "history page for inactive room, not applied");
                return Ok(messages);
            }
            if page == 1 {
                state.timeline.replace_history(messages.clone());
            } else {
                state.timeline.prepend_history(messages.clone());
            }
        }

        if !unread.is_empty() {
            if let Err(e) = self.mark_read(room_id, &unread).await {
                tracing::warn!(error = %e, room = %room_id, "failed to mark history read");
            }
        }

        Ok(messages)
    }

    // ---- sending ---------------------------------------------------------

    /// Send into the active room.  The message appears immediately with
    /// status `Sending`; the server echo carrying the returned correlation
    /// id later confirms it in place.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        media_url: Option<String>,
    ) -> Result<TempId, SessionError> {
        let payload = MessagePayload {
            text: text.into(),
            media_url,
        };

        let (room_id, key, temp_id) = {
            let mut state = self.lock_state()?;
            let room_id = state.rooms.active_room().ok_or(SessionError::NoActiveRoom)?;
            let key = state
                .keys
                .get(room_id)
                .ok_or(SessionError::KeyNotEstablished(room_id))?;
            let temp_id = state.timeline.append_optimistic(room_id, self.user_id, &payload);
            (room_id, key, temp_id)
        };

        let sent = crypto::encrypt_payload(&payload, &key)
            .map_err(SessionError::from)
            .and_then(|encrypted_content| {
                self.send_intent(ClientIntent::SendMessage {
                    room_id,
                    encrypted_content,
                    temp_id,
                })
            });

        if let Err(e) = sent {
            self.lock_state()?.timeline.mark_failed(temp_id);
            emit_notice(&self.notices, NoticeKind::Error, "Failed to send message");
            return Err(e);
        }

        tracing::debug!(%temp_id, room = %room_id, "message sent optimistically");
        Ok(temp_id)
    }

    // ---- keys ------------------------------------------------------------

    /// Derive, cache and persist the shared key for a room from a peer's
    /// hex public key.
    pub fn establish_room_key(
        &self,
        room_id: RoomId,
        peer_public_hex: &str,
    ) -> Result<(), SessionError> {
        let peer = crypto::import_public_key(peer_public_hex)?;
        self.lock_state()?.keys.establish(room_id, &peer)?;
        tracing::info!(room = %room_id, "shared key established");
        Ok(())
    }

    // ---- ephemeral intents ----------------------------------------------

    pub fn typing_start(&self) -> Result<(), SessionError> {
        let Some(room_id) = self.lock_state()?.rooms.active_room() else {
            return Ok(());
        };
        self.send_intent(ClientIntent::TypingStart(room_id))
    }

    pub fn typing_stop(&self) -> Result<(), SessionError> {
        let Some(room_id) = self.lock_state()?.rooms.active_room() else {
            return Ok(());
        };
        self.send_intent(ClientIntent::TypingStop(room_id))
    }

    /// Persist read receipts server-side, then broadcast them so senders
    /// see their ticks move.
    pub async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
    ) -> Result<(), SessionError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        self.api.mark_read(room_id, message_ids).await?;
        self.send_intent(ClientIntent::MarkAsRead {
            room_id,
            message_ids: message_ids.to_vec(),
        })
    }

    // ---- membership ------------------------------------------------------

    pub async fn add_members(
        &self,
        room_id: RoomId,
        member_ids: Vec<UserId>,
    ) -> Result<Room, SessionError> {
        let room = self.api.add_members(room_id, &member_ids).await?;
        self.lock_state()?.rooms.upsert_room(room.clone());
        emit_notice(&self.notices, NoticeKind::Info, "Members added to the group");
        Ok(room)
    }

    pub async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Room, SessionError> {
        let room = self.api.remove_member(room_id, user_id).await?;
        self.lock_state()?.rooms.upsert_room(room.clone());
        emit_notice(&self.notices, NoticeKind::Info, "Member removed from the group");
        Ok(room)
    }

    pub async fn promote_admin(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Room, SessionError> {
        let room = self.api.promote_admin(room_id, user_id).await?;
        self.lock_state()?.rooms.upsert_room(room.clone());
        emit_notice(&self.notices, NoticeKind::Info, "User promoted to admin");
        Ok(room)
    }

    /// Leave a group permanently: the room disappears from the list and its
    /// shared key is forgotten, in memory and in the vault.
    pub async fn leave_group(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.api.leave_room(room_id).await?;

        let mut state = self.lock_state()?;
        let was_active = state.rooms.active_room() == Some(room_id);
        state.rooms.remove_room(room_id);
        if was_active {
            state.rooms.clear_active_room();
            state.timeline.clear();
        }
        if let Err(e) = state.keys.forget(room_id) {
            tracing::warn!(room = %room_id, error = %e, "could not forget room key");
        }
        drop(state);

        tracing::info!(room = %room_id, "left group");
        Ok(())
    }

    // ---- snapshots -------------------------------------------------------

    pub fn rooms(&self) -> Result<Vec<Room>, SessionError> {
        Ok(self.lock_state()?.rooms.rooms())
    }

    pub fn messages(&self) -> Result<Vec<TimelineMessage>, SessionError> {
        Ok(self.lock_state()?.timeline.messages())
    }

    pub fn active_room(&self) -> Result<Option<RoomId>, SessionError> {
        Ok(self.lock_state()?.rooms.active_room())
    }

    pub fn unread_count(&self, room_id: RoomId) -> Result<u32, SessionError> {
        Ok(self.lock_state()?.rooms.unread_count(room_id))
    }

    pub fn message_status(&self, message_id: MessageId) -> Result<DeliveryStatus, SessionError> {
        Ok(self.lock_state()?.rooms.message_status(message_id))
    }

    pub fn typing_users(&self, room_id: RoomId) -> Result<Vec<UserId>, SessionError> {
        Ok(self.lock_state()?.rooms.typing_users(room_id))
    }

    pub fn online_users(&self) -> Result<Vec<UserId>, SessionError> {
        Ok(self.lock_state()?.rooms.online_users().into_iter().collect())
    }

    pub fn is_online(&self, user_id: UserId) -> Result<bool, SessionError> {
        Ok(self.lock_state()?.rooms.is_online(user_id))
    }

    #[cfg(test)]
    pub(crate) fn api_for_tests(&self) -> &A {
        &self.api
    }

    // ---- internals -------------------------------------------------------

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        self.state
            .lock()
            .map_err(|_| SessionError::Internal("session state lock poisoned".to_string()))
    }

    fn lock_outbound(
        &self,
    ) -> Result<MutexGuard<'_, Option<mpsc::Sender<ClientIntent>>>, SessionError> {
        self.outbound
            .lock()
            .map_err(|_| SessionError::Internal("outbound lock poisoned".to_string()))
    }

    /// Fire-and-forget push to the server.  Fails when the channel is not
    /// attached or its buffer is full.
    pub(crate) fn send_intent(&self, intent: ClientIntent) -> Result<(), SessionError> {
        let guard = self.lock_outbound()?;
        let Some(tx) = guard.as_ref() else {
            return Err(SessionError::Channel("not connected".to_string()));
        };
        tx.try_send(intent)
            .map_err(|e| SessionError::Channel(format!("push channel unavailable: {e}")))
    }
}

/// History decryption: no key at all makes every row a placeholder, a bad
/// row becomes a placeholder on its own.
pub(crate) fn decrypt_wire(wire: &WireMessage, key: Option<&SharedKey>) -> TimelineMessage {
    let Some(key) = key else {
        return TimelineMessage::placeholder(wire, PLACEHOLDER_NO_KEY);
    };
    match crypto::decrypt_payload(&wire.encrypted_content, key) {
        Ok(payload) => TimelineMessage::confirmed(wire, payload),
        Err(e) => {
            tracing::warn!(msg = %wire.id, error = %e, "history row failed to decrypt");
            TimelineMessage::placeholder(wire, PLACEHOLDER_UNDECRYPTABLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encrypt_for, session_with_rooms, test_room, wire_message};
    use uuid::Uuid;
    use voile_shared::crypto::KeyPair;

    #[tokio::test]
    async fn test_send_without_active_room_fails() {
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![]).await;

        let err = ctx.send_message("hello", None).await.unwrap_err();
        assert!(matches!(err, SessionError::NoActiveRoom));
        assert!(ctx.messages().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_key_fails_cleanly() {
        let room = test_room("duo");
        let room_id = room.id;
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![room]).await;
        ctx.join_room(room_id).await.unwrap();

        let err = ctx.send_message("hello", None).await.unwrap_err();
        assert!(matches!(err, SessionError::KeyNotEstablished(r) if r == room_id));
        assert!(ctx.messages().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_unknown_room_fails() {
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![]).await;

        let err = ctx.join_room(RoomId::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::RoomNotFound(_)));
        assert_eq!(ctx.active_room().unwrap(), None);
    }

    #[tokio::test]
    async fn test_history_decrypts_with_placeholder_for_corrupt_row() {
        let room = test_room("duo");
        let room_id = room.id;
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![room]).await;

        let peer = KeyPair::generate().unwrap();
        ctx.establish_room_key(room_id, &peer.export_public()).unwrap();

        let sender = voile_shared::types::UserId(Uuid::new_v4());
        let mut history = vec![
            wire_message(room_id, sender, encrypt_for(&peer, &ctx, "un"), None),
            wire_message(room_id, sender, encrypt_for(&peer, &ctx, "deux"), None),
            wire_message(room_id, sender, "!!not base64!!".to_string(), None),
            wire_message(room_id, sender, encrypt_for(&peer, &ctx, "trois"), None),
        ];
        history.sort_by_key(|w| w.created_at);
        ctx.api_for_tests().set_messages(room_id, history);

        let msgs = ctx.join_room(room_id).await.unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].text, "un");
        assert_eq!(msgs[1].text, "deux");
        assert_eq!(msgs[2].text, PLACEHOLDER_UNDECRYPTABLE);
        assert_eq!(msgs[3].text, "trois");

        // Page 1 marks all peer messages read, corrupt row included.
        let calls = ctx.api_for_tests().read_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, room_id);
        assert_eq!(calls[0].1.len(), 4);
    }

    #[tokio::test]
    async fn test_history_without_key_is_all_placeholders() {
        let room = test_room("duo");
        let room_id = room.id;
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![room]).await;

        let peer = KeyPair::generate().unwrap();
        let sender = voile_shared::types::UserId(Uuid::new_v4());
        let history = vec![wire_message(
            room_id,
            sender,
            encrypt_for(&peer, &ctx, "salut"),
            None,
        )];
        ctx.api_for_tests().set_messages(room_id, history);

        let msgs = ctx.join_room(room_id).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, PLACEHOLDER_NO_KEY);
    }

    #[tokio::test]
    async fn test_join_room_resets_unread() {
        let mut room = test_room("duo");
        room.unread_count = 7;
        let room_id = room.id;
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![room]).await;

        assert_eq!(ctx.unread_count(room_id).unwrap(), 7);
        ctx.join_room(room_id).await.unwrap();
        assert_eq!(ctx.unread_count(room_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_leave_group_forgets_key_and_room() {
        let room = test_room("groupe");
        let room_id = room.id;
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![room]).await;

        let peer = KeyPair::generate().unwrap();
        ctx.establish_room_key(room_id, &peer.export_public()).unwrap();
        ctx.join_room(room_id).await.unwrap();

        ctx.leave_group(room_id).await.unwrap();

        assert!(ctx.rooms().unwrap().is_empty());
        assert_eq!(ctx.active_room().unwrap(), None);
        assert!(ctx.lock_state().unwrap().keys.get(room_id).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_clears_presence_and_channel() {
        let (ctx, _notices, _dir, _intents) = session_with_rooms(vec![]).await;
        let user = voile_shared::types::UserId(Uuid::new_v4());

        crate::channel::handle_event(&ctx, ServerEvent::UserOnline(user)).await;
        assert!(ctx.is_online(user).unwrap());

        ctx.disconnect().unwrap();
        assert!(!ctx.is_online(user).unwrap());
        assert!(matches!(
            ctx.send_intent(ClientIntent::RequestPresence),
            Err(SessionError::Channel(_))
        ));
    }
}

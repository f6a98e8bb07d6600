//! In-memory fakes and builders shared by the engine's tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use voile_shared::crypto::{self, KeyPair};
use voile_shared::protocol::{ClientIntent, WireMessage};
use voile_shared::room::{MessagePayload, Room};
use voile_shared::types::{MessageId, RoomId, TempId, UserId};
use voile_store::KeyVault;

use crate::context::SessionContext;
use crate::error::SessionError;
use crate::events::{notice_channel, NoticeReceiver};
use crate::rest::ServerApi;

/// In-memory [`ServerApi`] recording the calls the engine makes.
pub(crate) struct FakeApi {
    rooms: Mutex<Vec<Room>>,
    messages: Mutex<HashMap<RoomId, Vec<WireMessage>>>,
    read_calls: Mutex<Vec<(RoomId, Vec<MessageId>)>>,
}

impl FakeApi {
    pub(crate) fn new(rooms: Vec<Room>) -> Self {
        Self {
            rooms: Mutex::new(rooms),
            messages: Mutex::new(HashMap::new()),
            read_calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_messages(&self, room_id: RoomId, messages: Vec<WireMessage>) {
        self.messages.lock().unwrap().insert(room_id, messages);
    }

    pub(crate) fn read_calls(&self) -> Vec<(RoomId, Vec<MessageId>)> {
        self.read_calls.lock().unwrap().clone()
    }

    fn with_room<R>(
        &self,
        room_id: RoomId,
        f: impl FnOnce(&mut Room) -> R,
    ) -> Result<Room, SessionError> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or_else(|| SessionError::RequestFailed("Room not found".to_string()))?;
        f(room);
        Ok(room.clone())
    }
}

#[async_trait]
impl ServerApi for FakeApi {
    async fn list_rooms(&self) -> Result<Vec<Room>, SessionError> {
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn create_room(
        &self,
        name: &str,
        member_ids: &[UserId],
        is_group: bool,
    ) -> Result<Room, SessionError> {
        let room = Room {
            id: RoomId::new(),
            name: name.to_string(),
            is_group,
            member_ids: member_ids.to_vec(),
            admin_ids: Vec::new(),
            unread_count: 0,
            last_activity_at: Utc::now(),
        };
        self.rooms.lock().unwrap().push(room.clone());
        Ok(room)
    }

    async fn fetch_messages(
        &self,
        room_id: RoomId,
        _page: u32,
        _limit: u32,
    ) -> Result<Vec<WireMessage>, SessionError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
    ) -> Result<(), SessionError> {
        self.read_calls
            .lock()
            .unwrap()
            .push((room_id, message_ids.to_vec()));
        Ok(())
    }

    async fn add_members(
        &self,
        room_id: RoomId,
        member_ids: &[UserId],
    ) -> Result<Room, SessionError> {
        self.with_room(room_id, |room| {
            for id in member_ids {
                if !room.member_ids.contains(id) {
                    room.member_ids.push(*id);
                }
            }
        })
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        member_id: UserId,
    ) -> Result<Room, SessionError> {
        self.with_room(room_id, |room| {
            room.member_ids.retain(|id| *id != member_id);
            room.admin_ids.retain(|id| *id != member_id);
        })
    }

    async fn promote_admin(&self, room_id: RoomId, user_id: UserId) -> Result<Room, SessionError> {
        self.with_room(room_id, |room| {
            if !room.admin_ids.contains(&user_id) {
                room.admin_ids.push(user_id);
            }
        })
    }

    async fn leave_room(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.rooms.lock().unwrap().retain(|r| r.id != room_id);
        Ok(())
    }
}

pub(crate) fn test_room(name: &str) -> Room {
    Room {
        id: RoomId::new(),
        name: name.to_string(),
        is_group: true,
        member_ids: vec![UserId(Uuid::new_v4())],
        admin_ids: Vec::new(),
        unread_count: 0,
        last_activity_at: Utc::now(),
    }
}

pub(crate) fn wire_message(
    room_id: RoomId,
    sender_id: UserId,
    encrypted_content: String,
    temp_id: Option<TempId>,
) -> WireMessage {
    WireMessage {
        id: MessageId(Uuid::new_v4()),
        room_id,
        sender_id,
        encrypted_content,
        temp_id,
        created_at: Utc::now(),
    }
}

/// Encrypt `text` as the peer would: the peer derives its own copy of the
/// shared key from the session's public half.
pub(crate) fn encrypt_for(peer: &KeyPair, ctx: &SessionContext<FakeApi>, text: &str) -> String {
    let ours = crypto::import_public_key(&ctx.public_key()).unwrap();
    let key = crypto::derive_shared_key(peer, &ours);
    let payload = MessagePayload {
        text: text.to_string(),
        media_url: None,
    };
    crypto::encrypt_payload(&payload, &key).unwrap()
}

/// Fully wired session over a throwaway vault and a [`FakeApi`] seeded with
/// `rooms` (the session user is added to each room's membership).  The
/// returned receivers observe notices and outbound intents; the temp dir
/// keeps the vault alive for the test's duration.
pub(crate) async fn session_with_rooms(
    mut rooms: Vec<Room>,
) -> (
    Arc<SessionContext<FakeApi>>,
    NoticeReceiver,
    TempDir,
    mpsc::Receiver<ClientIntent>,
) {
    let user_id = UserId(Uuid::new_v4());
    for room in &mut rooms {
        room.member_ids.push(user_id);
    }

    let dir = tempfile::tempdir().unwrap();
    let vault = KeyVault::open_at(&dir.path().join("voile.db")).unwrap();

    let (notice_tx, notice_rx) = notice_channel();
    let ctx = Arc::new(SessionContext::new(user_id, vault, FakeApi::new(rooms), notice_tx).unwrap());

    let (_event_tx, event_rx) = mpsc::channel(64);
    let (intent_tx, intent_rx) = mpsc::channel(64);
    ctx.connect(event_rx, intent_tx).unwrap();
    ctx.load_rooms().await.unwrap();

    (ctx, notice_rx, dir, intent_rx)
}

//! Room and ephemeral-state store.
//!
//! Holds the room list, the active room, typing indicators, the presence
//! set and per-message delivery status.  All mutation happens behind the
//! session lock; observers only ever receive cloned snapshots, so partial
//! in-place mutation is never visible outside the engine.

use std::collections::{HashMap, HashSet};

use voile_shared::room::{Room, RoomUpdate};
use voile_shared::types::{DeliveryStatus, MessageId, RoomId, UserId};

#[derive(Default)]
pub struct RoomStateStore {
    rooms: Vec<Room>,
    active_room: Option<RoomId>,
    typing: HashMap<RoomId, HashSet<UserId>>,
    online: HashSet<UserId>,
    /// Kept separately from the message window so status updates for
    /// messages outside the loaded window are not lost.
    statuses: HashMap<MessageId, DeliveryStatus>,
}

impl RoomStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Replace the whole room list (initial REST load).
    pub fn set_rooms(&mut self, rooms: Vec<Room>) {
        self.rooms = rooms;
    }

    /// Insert a newly created room at the head of the list, or replace the
    /// existing entry with the server-confirmed copy.
    pub fn upsert_room(&mut self, room: Room) {
        if let Some(existing) = self.rooms.iter_mut().find(|r| r.id == room.id) {
            *existing = room;
        } else {
            self.rooms.insert(0, room);
        }
    }

    pub fn remove_room(&mut self, room_id: RoomId) {
        self.rooms.retain(|r| r.id != room_id);
        self.typing.remove(&room_id);
        if self.active_room == Some(room_id) {
            self.active_room = None;
        }
    }

    /// Merge a server-confirmed update into the matching room.
    ///
    /// The unread count comes strictly from the server's per-user counter;
    /// it is never incremented locally, so client and server totals cannot
    /// drift apart.
    pub fn apply_room_update(&mut self, update: RoomUpdate, current_user: UserId) {
        let Some(room) = self.rooms.iter_mut().find(|r| r.id == update.room_id) else {
            tracing::debug!(room = %update.room_id, "update for unknown room, ignoring");
            return;
        };

        if let Some(name) = update.name {
            room.name = name;
        }
        if let Some(members) = update.member_ids {
            room.member_ids = members;
        }
        if let Some(admins) = update.admin_ids {
            room.admin_ids = admins;
        }
        if let Some(at) = update.last_activity_at {
            room.last_activity_at = at;
        }
        if let Some((_, count)) = update
            .unread_counts
            .iter()
            .find(|(user, _)| *user == current_user)
        {
            room.unread_count = *count;
        }
    }

    /// Activate a room, optimistically resetting its unread count.  The
    /// caller clears the message window and triggers the history fetch.
    /// Returns `false` when the room is unknown.
    pub fn set_active_room(&mut self, room_id: RoomId) -> bool {
        let Some(room) = self.rooms.iter_mut().find(|r| r.id == room_id) else {
            return false;
        };
        room.unread_count = 0;
        self.active_room = Some(room_id);
        true
    }

    pub fn clear_active_room(&mut self) {
        self.active_room = None;
    }

    pub fn active_room(&self) -> Option<RoomId> {
        self.active_room
    }

    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    /// Snapshot of the room list.
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.clone()
    }

    pub fn unread_count(&self, room_id: RoomId) -> u32 {
        self.room(room_id).map(|r| r.unread_count).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    /// Add or remove a user from a room's typing set.  Idempotent; a new
    /// start/stop for the same user supersedes the previous state.
    pub fn record_typing(&mut self, room_id: RoomId, user_id: UserId, is_typing: bool) {
        let set = self.typing.entry(room_id).or_default();
        if is_typing {
            set.insert(user_id);
        } else {
            set.remove(&user_id);
        }
    }

    /// Snapshot of who is typing in a room.
    pub fn typing_users(&self, room_id: RoomId) -> Vec<UserId> {
        self.typing
            .get(&room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Apply an online/offline transition.  Events carry no sequence
    /// numbers, so arrival order wins.
    pub fn record_presence(&mut self, user_id: UserId, online: bool) {
        if online {
            self.online.insert(user_id);
        } else {
            self.online.remove(&user_id);
        }
    }

    /// Replace the whole presence set from a server snapshot.
    pub fn replace_presence(&mut self, online: Vec<UserId>) {
        self.online = online.into_iter().collect();
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online_users(&self) -> HashSet<UserId> {
        self.online.clone()
    }

    // ------------------------------------------------------------------
    // Delivery status
    // ------------------------------------------------------------------

    /// Bulk-apply a server-driven status.  Transitions are monotonic per
    /// message (`sent < delivered < read`); a stale lower-status update for
    /// a message already at a higher status is a no-op.
    pub fn record_delivery_status(&mut self, message_ids: &[MessageId], status: DeliveryStatus) {
        if !matches!(
            status,
            DeliveryStatus::Sent | DeliveryStatus::Delivered | DeliveryStatus::Read
        ) {
            tracing::warn!(?status, "ignoring non-server delivery status");
            return;
        }

        for &id in message_ids {
            let current = self.statuses.get(&id).copied();
            match current {
                Some(existing) if existing.rank() >= status.rank() => {}
                _ => {
                    self.statuses.insert(id, status);
                }
            }
        }
    }

    /// Status for a message; defaults to `Sent` once a server copy exists.
    pub fn message_status(&self, message_id: MessageId) -> DeliveryStatus {
        self.statuses
            .get(&message_id)
            .copied()
            .unwrap_or(DeliveryStatus::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    fn room(unread: u32) -> Room {
        Room {
            id: RoomId::new(),
            name: "salon".to_string(),
            is_group: false,
            member_ids: vec![user(), user()],
            admin_ids: vec![],
            unread_count: unread,
            last_activity_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut store = RoomStateStore::new();
        let id = MessageId(Uuid::new_v4());

        store.record_delivery_status(&[id], DeliveryStatus::Read);
        store.record_delivery_status(&[id], DeliveryStatus::Delivered);

        assert_eq!(store.message_status(id), DeliveryStatus::Read);
    }

    #[test]
    fn test_status_advances_forward() {
        let mut store = RoomStateStore::new();
        let id = MessageId(Uuid::new_v4());

        store.record_delivery_status(&[id], DeliveryStatus::Delivered);
        store.record_delivery_status(&[id], DeliveryStatus::Read);

        assert_eq!(store.message_status(id), DeliveryStatus::Read);
    }

    #[test]
    fn test_status_defaults_to_sent() {
        let store = RoomStateStore::new();
        assert_eq!(
            store.message_status(MessageId(Uuid::new_v4())),
            DeliveryStatus::Sent
        );
    }

    #[test]
    fn test_typing_is_idempotent() {
        let mut store = RoomStateStore::new();
        let r = RoomId::new();
        let u = user();

        store.record_typing(r, u, true);
        store.record_typing(r, u, true);
        assert_eq!(store.typing_users(r), vec![u]);

        store.record_typing(r, u, false);
        store.record_typing(r, u, false);
        assert!(store.typing_users(r).is_empty());
    }

    #[test]
    fn test_presence_last_write_wins() {
        let mut store = RoomStateStore::new();
        let u = user();

        store.record_presence(u, true);
        store.record_presence(u, false);
        assert!(!store.is_online(u));

        store.record_presence(u, false);
        store.record_presence(u, true);
        store.record_presence(u, true);
        assert!(store.is_online(u));
    }

    #[test]
    fn test_unread_comes_only_from_server_counter() {
        let mut store = RoomStateStore::new();
        let me = user();
        let other = user();
        let r = room(3);
        let id = r.id;
        store.set_rooms(vec![r]);

        store.apply_room_update(
            RoomUpdate {
                room_id: id,
                name: None,
                member_ids: None,
                admin_ids: None,
                unread_counts: vec![(other, 9), (me, 5)],
                last_activity_at: None,
            },
            me,
        );

        assert_eq!(store.unread_count(id), 5);
    }

    #[test]
    fn test_active_room_resets_unread() {
        let mut store = RoomStateStore::new();
        let r = room(7);
        let id = r.id;
        store.set_rooms(vec![r]);

        assert!(store.set_active_room(id));
        assert_eq!(store.unread_count(id), 0);
        assert_eq!(store.active_room(), Some(id));

        assert!(!store.set_active_room(RoomId::new()));
    }

    #[test]
    fn test_upsert_prepends_new_room() {
        let mut store = RoomStateStore::new();
        store.set_rooms(vec![room(0)]);
        let newest = room(0);
        let id = newest.id;
        store.upsert_room(newest);

        assert_eq!(store.rooms()[0].id, id);
        assert_eq!(store.rooms().len(), 2);
    }
}

//! Push-channel event pump.
//!
//! The transport hands the engine the inbound half of an opaque event
//! channel; a single spawned task dispatches each [`ServerEvent`] onto the
//! state stores.  Handlers run to completion in arrival order, so no state
//! mutation ever interleaves with another.  Delivery is at-least-once:
//! every handler is idempotent or deduplicates.

use std::sync::Arc;

use tokio::sync::mpsc;

use voile_shared::crypto;
use voile_shared::protocol::{ClientIntent, ServerEvent, WireMessage};
use voile_shared::types::DeliveryStatus;

use crate::context::{SessionContext, SessionState};
use crate::events::{emit_notice, NoticeKind};
use crate::reconcile::{TimelineMessage, PLACEHOLDER_UNDECRYPTABLE};
use crate::rest::ServerApi;

/// Receive loop driving the whole inbound side of the session.  Ends when
/// the transport drops its sender.
pub(crate) async fn event_loop<A: ServerApi + 'static>(
    ctx: Arc<SessionContext<A>>,
    mut inbound: mpsc::Receiver<ServerEvent>,
) {
    tracing::info!("sync channel pump started");

    while let Some(event) = inbound.recv().await {
        handle_event(&ctx, event).await;
    }

    tracing::info!("sync channel closed");
}

/// Dispatch a single inbound event.  Failures are contained to the event
/// they concern; this function never panics and never aborts the pump.
pub(crate) async fn handle_event<A: ServerApi + 'static>(ctx: &SessionContext<A>, event: ServerEvent) {
    match event {
        ServerEvent::Connected => {
            tracing::info!("connected to chat server");
            if let Err(e) = ctx.send_intent(ClientIntent::RequestPresence) {
                tracing::warn!(error = %e, "could not request presence snapshot");
            }
        }

        ServerEvent::PresenceSnapshot { online } => {
            with_state(ctx, |state| state.rooms.replace_presence(online));
        }

        ServerEvent::NewMessage(wire) => handle_new_message(ctx, wire).await,

        ServerEvent::RoomUpdated(update) => {
            let current_user = ctx.user_id();
            with_state(ctx, |state| {
                state.rooms.apply_room_update(update, current_user);
            });
        }

        ServerEvent::MessageRead { message_id } => {
            with_state(ctx, |state| {
                state
                    .rooms
                    .record_delivery_status(&[message_id], DeliveryStatus::Read);
            });
        }

        ServerEvent::MessagesDelivered { message_ids } => {
            with_state(ctx, |state| {
                state
                    .rooms
                    .record_delivery_status(&message_ids, DeliveryStatus::Delivered);
            });
        }

        ServerEvent::UserTyping {
            room_id,
            user_id,
            is_typing,
        } => {
            with_state(ctx, |state| {
                state.rooms.record_typing(room_id, user_id, is_typing);
            });
        }

        ServerEvent::UserOnline(user_id) => {
            with_state(ctx, |state| state.rooms.record_presence(user_id, true));
        }

        ServerEvent::UserOffline(user_id) => {
            with_state(ctx, |state| state.rooms.record_presence(user_id, false));
        }

        ServerEvent::ChannelError { message } => {
            tracing::warn!(message = %message, "channel reported an error");
            emit_notice(ctx.notices(), NoticeKind::Error, message);
        }
    }
}

fn with_state<A: ServerApi + 'static>(ctx: &SessionContext<A>, f: impl FnOnce(&mut SessionState)) {
    match ctx.lock_state() {
        Ok(mut state) => f(&mut state),
        Err(e) => tracing::warn!(error = %e, "dropping event: session state unavailable"),
    }
}

/// Decrypt and merge one pushed message.
///
/// A missing room key skips the message (that room only; nothing else is
/// touched).  A failed decryption becomes a visible placeholder rather than
/// a silent drop.
async fn handle_new_message<A: ServerApi + 'static>(ctx: &SessionContext<A>, wire: WireMessage) {
    let (key, room_name) = match ctx.lock_state() {
        Ok(state) => (
            state.keys.get(wire.room_id),
            state.rooms.room(wire.room_id).map(|r| r.name.clone()),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "dropping message: session state unavailable");
            return;
        }
    };

    let Some(key) = key else {
        tracing::warn!(room = %wire.room_id, "no shared key for room, cannot decrypt");
        return;
    };

    let message = match crypto::decrypt_payload(&wire.encrypted_content, &key) {
        Ok(payload) => TimelineMessage::confirmed(&wire, payload),
        Err(e) => {
            tracing::warn!(msg = %wire.id, room = %wire.room_id, error = %e, "decryption failed");
            TimelineMessage::placeholder(&wire, PLACEHOLDER_UNDECRYPTABLE)
        }
    };
    let preview = message.text.clone();

    // Re-read the active room under the lock; it may have changed since the
    // key lookup.
    let merged_into_active = match ctx.lock_state() {
        Ok(mut state) => {
            if state.rooms.active_room() == Some(wire.room_id) {
                let outcome = state.timeline.reconcile_incoming(message, wire.temp_id);
                tracing::debug!(msg = %wire.id, ?outcome, "message reconciled");
                true
            } else {
                false
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping message: session state unavailable");
            return;
        }
    };

    if merged_into_active {
        if wire.sender_id != ctx.user_id() {
            if let Err(e) = ctx.mark_read(wire.room_id, &[wire.id]).await {
                tracing::warn!(error = %e, "failed to mark incoming message as read");
            }
        }
    } else {
        // Cross-room preview; the unread counter follows via room-updated.
        let title = room_name.unwrap_or_else(|| wire.sender_id.to_string());
        emit_notice(ctx.notices(), NoticeKind::Info, format!("{title}: {preview}"));
    }
}

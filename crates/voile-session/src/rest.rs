//! REST collaborator seam.
//!
//! The server's room/message persistence is an external collaborator; the
//! engine consumes it through the [`ServerApi`] trait so tests can run
//! against an in-memory fake.  [`HttpApi`] is the production implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use voile_shared::protocol::WireMessage;
use voile_shared::room::Room;
use voile_shared::types::{MessageId, RoomId, UserId};

use crate::error::SessionError;

/// REST surface consumed from the server.  Every call resolves to structured
/// success data or [`SessionError::RequestFailed`] carrying a
/// user-displayable message.
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>, SessionError>;

    async fn create_room(
        &self,
        name: &str,
        member_ids: &[UserId],
        is_group: bool,
    ) -> Result<Room, SessionError>;

    /// Fetch one page of encrypted message records, chronologically
    /// ascending within the page; page 1 is the most recent window.
    async fn fetch_messages(
        &self,
        room_id: RoomId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<WireMessage>, SessionError>;

    async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
    ) -> Result<(), SessionError>;

    async fn add_members(
        &self,
        room_id: RoomId,
        member_ids: &[UserId],
    ) -> Result<Room, SessionError>;

    async fn remove_member(&self, room_id: RoomId, member_id: UserId)
        -> Result<Room, SessionError>;

    async fn promote_admin(&self, room_id: RoomId, user_id: UserId) -> Result<Room, SessionError>;

    async fn leave_room(&self, room_id: RoomId) -> Result<(), SessionError>;
}

/// HTTP implementation against the chat server's REST routes.
pub struct HttpApi {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RoomsResponse {
    rooms: Vec<Room>,
}

#[derive(Deserialize)]
struct RoomResponse {
    room: Room,
}

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomBody<'a> {
    name: &'a str,
    member_ids: &'a [UserId],
    is_group: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberIdsBody<'a> {
    member_ids: &'a [UserId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdsBody<'a> {
    message_ids: &'a [MessageId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserIdBody {
    user_id: UserId,
}

impl HttpApi {
    /// `base_url` is the API root (e.g. `https://chat.example.org/api`);
    /// `token` is the session bearer token issued by the auth collaborator.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Decode a success body, or surface the server's `message` field
    /// (generic fallback when the body is not the expected error shape).
    async fn handle<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SessionError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| SessionError::RequestFailed(format!("Malformed response: {e}")));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("Request failed (HTTP {status})"));
        Err(SessionError::RequestFailed(message))
    }
}

fn transport_err(e: reqwest::Error) -> SessionError {
    SessionError::RequestFailed(format!("Network error: {e}"))
}

#[async_trait]
impl ServerApi for HttpApi {
    async fn list_rooms(&self) -> Result<Vec<Room>, SessionError> {
        let response = self
            .client
            .get(self.url("/chat/rooms"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_err)?;
        Ok(Self::handle::<RoomsResponse>(response).await?.rooms)
    }

    async fn create_room(
        &self,
        name: &str,
        member_ids: &[UserId],
        is_group: bool,
    ) -> Result<Room, SessionError> {
        let response = self
            .client
            .post(self.url("/chat/rooms"))
            .bearer_auth(&self.token)
            .json(&CreateRoomBody {
                name,
                member_ids,
                is_group,
            })
            .send()
            .await
            .map_err(transport_err)?;
        Ok(Self::handle::<RoomResponse>(response).await?.room)
    }

    async fn fetch_messages(
        &self,
        room_id: RoomId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<WireMessage>, SessionError> {
        let response = self
            .client
            .get(self.url(&format!(
                "/chat/rooms/{room_id}/messages?page={page}&limit={limit}"
            )))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_err)?;
        Ok(Self::handle::<MessagesResponse>(response).await?.messages)
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
    ) -> Result<(), SessionError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/rooms/{room_id}/read")))
            .bearer_auth(&self.token)
            .json(&MessageIdsBody { message_ids })
            .send()
            .await
            .map_err(transport_err)?;
        Self::handle::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn add_members(
        &self,
        room_id: RoomId,
        member_ids: &[UserId],
    ) -> Result<Room, SessionError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/rooms/{room_id}/members")))
            .bearer_auth(&self.token)
            .json(&MemberIdsBody { member_ids })
            .send()
            .await
            .map_err(transport_err)?;
        Ok(Self::handle::<RoomResponse>(response).await?.room)
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        member_id: UserId,
    ) -> Result<Room, SessionError> {
        let response = self
            .client
            .delete(self.url(&format!("/chat/rooms/{room_id}/members/{member_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_err)?;
        Ok(Self::handle::<RoomResponse>(response).await?.room)
    }

    async fn promote_admin(&self, room_id: RoomId, user_id: UserId) -> Result<Room, SessionError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/rooms/{room_id}/admins")))
            .bearer_auth(&self.token)
            .json(&UserIdBody { user_id })
            .send()
            .await
            .map_err(transport_err)?;
        Ok(Self::handle::<RoomResponse>(response).await?.room)
    }

    async fn leave_room(&self, room_id: RoomId) -> Result<(), SessionError> {
        let response = self
            .client
            .delete(self.url(&format!("/chat/rooms/{room_id}/leave")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_err)?;
        Self::handle::<serde_json::Value>(response).await?;
        Ok(())
    }
}

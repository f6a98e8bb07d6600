use thiserror::Error;

use voile_shared::types::RoomId;
use voile_shared::CryptoError;
use voile_store::StoreError;

/// Session-level error taxonomy.
///
/// Every variant `Display`s a user-presentable message; intents return
/// `Result<T, SessionError>` as the uniform outcome shape.  Per-message and
/// per-room failures are contained to what they concern and never abort a
/// batch operation or the event pump.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The platform lacks a usable randomness source.  Fatal to session init.
    #[error("Cryptographic provider unavailable")]
    CryptoUnavailable,

    /// No shared key for a room; blocks send/decrypt for that room only.
    #[error("No encryption key established for room {0}")]
    KeyNotEstablished(RoomId),

    /// Per-message decryption failure; rendered as a placeholder.
    #[error("Could not decrypt message")]
    DecryptionFailed,

    /// Transport-reported failure; surfaced as a transient notice.
    #[error("Connection error: {0}")]
    Channel(String),

    /// REST call failed; carries the server-provided message or a fallback.
    #[error("{0}")]
    RequestFailed(String),

    #[error("Room {0} not found")]
    RoomNotFound(RoomId),

    #[error("No active room")]
    NoActiveRoom,

    /// Other cryptographic failure (e.g. encryption of an outgoing payload).
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Key storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal state error: {0}")]
    Internal(String),
}

impl From<CryptoError> for SessionError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Unavailable => Self::CryptoUnavailable,
            CryptoError::DecryptionFailed => Self::DecryptionFailed,
            other => Self::Crypto(other),
        }
    }
}

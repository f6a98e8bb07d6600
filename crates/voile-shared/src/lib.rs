//! # voile-shared
//!
//! Domain types, wire protocol and cryptographic primitives shared by the
//! Voile session engine.  Message content is only ever handled encrypted at
//! the protocol boundary; the plaintext [`room::MessagePayload`] exists solely
//! inside the client.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod room;
pub mod types;

pub use error::CryptoError;

//! # voile-store
//!
//! Durable local key vault for the Voile session engine, backed by SQLite.
//!
//! The vault persists the user's long-term x25519 key pair and the exported
//! per-room symmetric keys so that a session survives an application reload.
//! Room key material is sealed at rest under a key derived from the identity
//! secret; the storage layer itself treats it as opaque bytes.

pub mod migrations;
pub mod vault;

mod error;

pub use error::StoreError;
pub use vault::KeyVault;

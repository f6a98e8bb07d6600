//! # voile-session
//!
//! Client-side end-to-end-encrypted chat session engine: per-room key
//! caching, optimistic message reconciliation, and ephemeral-state sync
//! (presence, typing, delivery/read receipts) against a server push channel.
//!
//! The engine owns all mutable session state; the UI layer only ever sees
//! cloned snapshots and drives the engine through the intent methods on
//! [`SessionContext`].

pub mod context;
pub mod events;
pub mod keys;
pub mod reconcile;
pub mod rest;
pub mod rooms;

mod channel;
mod error;

#[cfg(test)]
mod test_support;

pub use context::SessionContext;
pub use error::SessionError;
pub use events::{Notice, NoticeKind};

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise tracing for the hosting application.
///
/// Honors `RUST_LOG`; falls back to a sensible per-crate default.  Safe to
/// call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voile_session=debug,voile_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

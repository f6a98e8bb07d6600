//! Vault schema versioning.
//!
//! The schema version lives in SQLite's `user_version` pragma.  Opening the
//! vault replays every migration above the stored version, so a database
//! created by an older build upgrades in place before any key is touched.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Version written by the newest migration.
const CURRENT_VERSION: u32 = 1;

/// Bring the vault schema up to [`CURRENT_VERSION`].  No-op when already
/// there; never downgrades.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if applied >= CURRENT_VERSION {
        tracing::debug!(version = applied, "vault schema up to date");
        return Ok(());
    }

    tracing::info!(from = applied, to = CURRENT_VERSION, "upgrading vault schema");

    if applied < 1 {
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}

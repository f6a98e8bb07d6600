//! Key vault connection management.
//!
//! The [`KeyVault`] struct owns a [`rusqlite::Connection`] and guarantees
//! that migrations have run and an identity key pair exists before any other
//! operation.  Room keys are sealed at rest with a key derived from the
//! identity secret via BLAKE3, so the table contents are opaque without the
//! identity row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use uuid::Uuid;

use voile_shared::constants::{KDF_CONTEXT_VAULT_KEY, SECRET_KEY_SIZE};
use voile_shared::crypto::{self, KeyPair, SharedKey};
use voile_shared::types::RoomId;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Durable storage for the identity key pair and per-room symmetric keys.
pub struct KeyVault {
    conn: Connection,
    identity: KeyPair,
    vault_key: SharedKey,
}

impl KeyVault {
    /// Open (or create) the default application vault.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/voile/voile.db`
    /// - macOS:   `~/Library/Application Support/com.voile.voile/voile.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\voile\voile\data\voile.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "voile", "voile").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("voile.db");

        tracing::info!(path = %db_path.display(), "opening key vault");

        Self::open_at(&db_path)
    }

    /// Open (or create) a vault at an explicit path.
    ///
    /// This is useful for tests and for embedding the vault inside custom
    /// directory layouts.  Generates and stores a fresh identity key pair on
    /// first open.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        let identity = load_or_create_identity(&conn)?;
        let vault_key = derive_vault_key(&identity);

        Ok(Self {
            conn,
            identity,
            vault_key,
        })
    }

    /// The user's long-term key pair.
    pub fn identity(&self) -> &KeyPair {
        &self.identity
    }

    /// Persist a room key, replacing any previous material for that room.
    ///
    /// The exported form must round-trip: a subsequent [`load_all_room_keys`]
    /// (also after reopening the vault) yields identical key material.
    ///
    /// [`load_all_room_keys`]: KeyVault::load_all_room_keys
    pub fn put_room_key(&self, room_id: RoomId, key: &SharedKey) -> Result<()> {
        let sealed = crypto::seal(&self.vault_key, key)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO room_keys (room_id, key_data) VALUES (?1, ?2)",
            params![room_id.to_string(), hex::encode(sealed)],
        )?;
        tracing::debug!(room = %room_id, "room key persisted");
        Ok(())
    }

    /// Load every persisted room key.
    ///
    /// A row that fails to parse or unseal is skipped with a warning so one
    /// corrupted room cannot block session start.
    pub fn load_all_room_keys(&self) -> Result<HashMap<RoomId, SharedKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT room_id, key_data FROM room_keys")?;
        let rows = stmt.query_map([], |row| {
            let room_id: String = row.get(0)?;
            let key_data: String = row.get(1)?;
            Ok((room_id, key_data))
        })?;

        let mut keys = HashMap::new();
        for row in rows {
            let (room_str, key_data) = row?;
            match unseal_room_key(&self.vault_key, &room_str, &key_data) {
                Some((room_id, key)) => {
                    keys.insert(room_id, key);
                }
                None => {
                    tracing::warn!(room = %room_str, "dropping corrupt room key entry");
                }
            }
        }
        Ok(keys)
    }

    /// Remove the key material for a single room (e.g. after leaving it).
    pub fn delete_room_key(&self, room_id: RoomId) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM room_keys WHERE room_id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Destroy the identity and every room key.  Called on logout; the vault
    /// is consumed because nothing can be sealed or unsealed afterwards.
    pub fn clear(self) -> Result<()> {
        self.conn.execute("DELETE FROM room_keys", [])?;
        self.conn.execute("DELETE FROM identity", [])?;
        tracing::info!("vault cleared: identity and room keys destroyed");
        Ok(())
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open vault (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

fn load_or_create_identity(conn: &Connection) -> Result<KeyPair> {
    let existing: Option<String> = conn
        .query_row("SELECT secret_hex FROM identity WHERE id = 1", [], |row| {
            row.get(0)
        })
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some(secret_hex) = existing {
        let bytes = hex::decode(&secret_hex)?;
        let secret: [u8; SECRET_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| StoreError::Crypto(voile_shared::CryptoError::InvalidKeyLength))?;
        return Ok(KeyPair::from_secret_bytes(secret));
    }

    let pair = KeyPair::generate()?;
    let export = pair.to_export();
    conn.execute(
        "INSERT INTO identity (id, secret_hex, public_hex, created_at)
         VALUES (1, ?1, ?2, ?3)",
        params![
            hex::encode(export.secret_key),
            hex::encode(export.public_key),
            Utc::now().to_rfc3339(),
        ],
    )?;
    tracing::info!("generated new identity key pair");
    Ok(pair)
}

// BLAKE3 KDF with domain separation, keyed by the identity secret.
fn derive_vault_key(identity: &KeyPair) -> SharedKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_VAULT_KEY);
    hasher.update(&identity.to_export().secret_key);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

fn unseal_room_key(
    vault_key: &SharedKey,
    room_str: &str,
    key_data: &str,
) -> Option<(RoomId, SharedKey)> {
    let room_id = RoomId(Uuid::parse_str(room_str).ok()?);
    let sealed = hex::decode(key_data).ok()?;
    let plain = crypto::open(vault_key, &sealed).ok()?;
    let key: SharedKey = plain.try_into().ok()?;
    Some((room_id, key))
}

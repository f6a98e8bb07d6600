//! In-memory room key cache backed by the durable vault.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use x25519_dalek::PublicKey;

use voile_shared::crypto::{self, SharedKey};
use voile_shared::types::RoomId;
use voile_store::KeyVault;

use crate::error::SessionError;

/// Mapping from room id to its derived symmetric key.
///
/// The cache is the only reader/writer of the vault's room-key table during
/// a session; the vault exists so keys survive an application reload.
pub struct SharedKeyCache {
    vault: Arc<Mutex<KeyVault>>,
    keys: HashMap<RoomId, SharedKey>,
}

impl SharedKeyCache {
    pub fn new(vault: Arc<Mutex<KeyVault>>) -> Self {
        Self {
            vault,
            keys: HashMap::new(),
        }
    }

    /// Repopulate the cache from durable storage.  Called once at session
    /// start; corrupt entries were already dropped by the vault.  Returns
    /// the number of keys loaded.
    pub fn load_all(&mut self) -> Result<usize, SessionError> {
        let loaded = self.lock_vault()?.load_all_room_keys()?;
        self.keys = loaded;
        tracing::info!(count = self.keys.len(), "room keys loaded from vault");
        Ok(self.keys.len())
    }

    pub fn get(&self, room_id: RoomId) -> Option<SharedKey> {
        self.keys.get(&room_id).copied()
    }

    /// Derive the shared key for a room from our identity and the peer's
    /// public key, cache it, and persist its exported form.
    ///
    /// On a persistence failure the in-memory key stays usable for this
    /// session; the error is returned so the caller can surface it.
    pub fn establish(
        &mut self,
        room_id: RoomId,
        peer_public: &PublicKey,
    ) -> Result<SharedKey, SessionError> {
        let (key, persisted) = {
            let vault = self.lock_vault()?;
            let key = crypto::derive_shared_key(vault.identity(), peer_public);
            (key, vault.put_room_key(room_id, &key))
        };
        self.keys.insert(room_id, key);
        if let Err(e) = persisted {
            tracing::warn!(room = %room_id, error = %e, "room key not persisted, kept in memory");
            return Err(e.into());
        }
        Ok(key)
    }

    /// Drop a room's key from memory and from the vault (e.g. after leaving
    /// the room).
    pub fn forget(&mut self, room_id: RoomId) -> Result<(), SessionError> {
        self.keys.remove(&room_id);
        self.lock_vault()?.delete_room_key(room_id)?;
        Ok(())
    }

    fn lock_vault(&self) -> Result<std::sync::MutexGuard<'_, KeyVault>, SessionError> {
        self.vault
            .lock()
            .map_err(|e| SessionError::Internal(format!("Vault lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voile_shared::crypto::KeyPair;

    fn vault() -> (tempfile::TempDir, Arc<Mutex<KeyVault>>) {
        let dir = tempfile::tempdir().unwrap();
        let vault = KeyVault::open_at(&dir.path().join("keys.db")).unwrap();
        (dir, Arc::new(Mutex::new(vault)))
    }

    #[test]
    fn test_establish_caches_and_persists() {
        let (_dir, vault) = vault();
        let mut cache = SharedKeyCache::new(vault.clone());
        let peer = KeyPair::generate().unwrap();
        let room = RoomId::new();

        let key = cache.establish(room, &peer.public()).unwrap();
        assert_eq!(cache.get(room), Some(key));

        // A fresh cache over the same vault sees the persisted key.
        let mut reloaded = SharedKeyCache::new(vault);
        assert_eq!(reloaded.load_all().unwrap(), 1);
        assert_eq!(reloaded.get(room), Some(key));
    }

    #[test]
    fn test_absent_key_is_none() {
        let (_dir, vault) = vault();
        let cache = SharedKeyCache::new(vault);
        assert_eq!(cache.get(RoomId::new()), None);
    }

    #[test]
    fn test_forget_removes_everywhere() {
        let (_dir, vault) = vault();
        let mut cache = SharedKeyCache::new(vault.clone());
        let peer = KeyPair::generate().unwrap();
        let room = RoomId::new();

        cache.establish(room, &peer.public()).unwrap();
        cache.forget(room).unwrap();

        assert_eq!(cache.get(room), None);
        let mut reloaded = SharedKeyCache::new(vault);
        assert_eq!(reloaded.load_all().unwrap(), 0);
    }
}

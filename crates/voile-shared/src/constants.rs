/// Application name
pub const APP_NAME: &str = "Voile";

/// ChaCha20-Poly1305 (IETF) nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// x25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// x25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for ChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum decrypted payload size in bytes (256 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 262_144;

/// Messages fetched per history page
pub const HISTORY_PAGE_SIZE: u32 = 50;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_ROOM_KEY: &str = "voile-room-key-v1";
pub const KDF_CONTEXT_VAULT_KEY: &str = "voile-vault-key-v1";

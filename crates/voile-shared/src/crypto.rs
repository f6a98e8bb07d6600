//! Session cryptography: x25519 key agreement and ChaCha20-Poly1305
//! authenticated encryption of message payloads.
//!
//! Two peers in a room derive the same symmetric key independently from
//! their own secret and the other's public key; the key itself is never
//! exchanged.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_ROOM_KEY, MAX_PAYLOAD_SIZE, NONCE_SIZE, PUBKEY_SIZE, SECRET_KEY_SIZE,
};
use crate::error::CryptoError;
use crate::room::MessagePayload;

/// Symmetric key for one room, shared by both parties.
pub type SharedKey = [u8; 32];

/// A user's long-term x25519 key pair for room key agreement.
///
/// The secret half has no cleartext accessor; it leaves this type only via
/// [`KeyPair::to_export`] for the local vault.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

/// Serializable format for storing the key pair in the local vault.
#[derive(Serialize, Deserialize)]
pub struct KeyPairExport {
    pub secret_key: [u8; SECRET_KEY_SIZE],
    pub public_key: [u8; PUBKEY_SIZE],
}

impl KeyPair {
    /// Generate a new random key pair.
    ///
    /// Fails with [`CryptoError::Unavailable`] if the OS randomness source
    /// cannot be read, in which case no session may start.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; SECRET_KEY_SIZE];
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|_| CryptoError::Unavailable)?;
        Ok(Self::from_secret_bytes(seed))
    }

    /// Restore a key pair from secret key bytes.
    pub fn from_secret_bytes(secret: [u8; SECRET_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restore a key pair from a serialized vault export.
    pub fn from_export(export: &KeyPairExport) -> Self {
        Self::from_secret_bytes(export.secret_key)
    }

    /// Transport-safe representation of the public key (hex).
    pub fn export_public(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Get the public half.
    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Export for vault persistence.
    pub fn to_export(&self) -> KeyPairExport {
        KeyPairExport {
            secret_key: self.secret.to_bytes(),
            public_key: *self.public.as_bytes(),
        }
    }
}

/// Parse a peer's public key from its hex wire form.
pub fn import_public_key(hex_str: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidKeyLength)?;
    let arr: [u8; PUBKEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(PublicKey::from(arr))
}

/// Derive the symmetric room key from our secret and the peer's public key.
///
/// x25519 Diffie-Hellman followed by a BLAKE3 KDF with domain separation.
/// Both parties derive the identical key: dh(a, B) == dh(b, A).
pub fn derive_shared_key(local: &KeyPair, remote: &PublicKey) -> SharedKey {
    let dh = local.secret.diffie_hellman(remote);
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_ROOM_KEY);
    hasher.update(dh.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

fn generate_nonce() -> Result<[u8; NONCE_SIZE], CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CryptoError::Unavailable)?;
    Ok(nonce)
}

// Returns nonce || ciphertext (12 bytes nonce prepended)
pub fn seal(key: &SharedKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce()?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open(key: &SharedKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a message payload for transport.
///
/// Canonical JSON bytes, fresh random nonce per call, returned as one base64
/// string of nonce || ciphertext.
pub fn encrypt_payload(payload: &MessagePayload, key: &SharedKey) -> Result<String, CryptoError> {
    let bytes = serde_json::to_vec(payload).map_err(|_| CryptoError::EncryptionFailed)?;
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(CryptoError::EncryptionFailed);
    }
    let sealed = seal(key, &bytes)?;
    Ok(BASE64.encode(sealed))
}

/// Decrypt a transport-encoded payload.
///
/// Every failure shape (bad base64, truncated input, tag mismatch, malformed
/// JSON) collapses to [`CryptoError::DecryptionFailed`]; callers substitute a
/// placeholder instead of propagating further.
pub fn decrypt_payload(encoded: &str, key: &SharedKey) -> Result<MessagePayload, CryptoError> {
    let data = BASE64
        .decode(encoded)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let plaintext = open(key, &data)?;
    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

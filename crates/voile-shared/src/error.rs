use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Cryptographic provider unavailable: no secure randomness source")]
    Unavailable,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

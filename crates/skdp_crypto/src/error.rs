use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch, possible tampering)")]
    AeadDecrypt,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Malformed key record: {0}")]
    MalformedRecord(String),

    #[error("The random generator failed")]
    RandomFailure,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry integrity check failed: tag mismatch")]
    TamperDetected,

    #[error("User registry decryption failed (wrong operator secret or corrupted file)")]
    DecryptFailed,

    #[error("Malformed registry content: {0}")]
    Malformed(String),

    #[error("Invalid name {0:?}: not usable as a registry component")]
    InvalidName(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] hearth_shared::CryptoError),
}

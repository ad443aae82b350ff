use thiserror::Error;

use crate::types::ResultCode;

#[derive(Error, Debug)]
pub enum HearthError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Key wrap failed")]
    WrapFailed,

    #[error("Key unwrap failed: wrong private key or corrupted blob")]
    UnwrapFailed,
}

/// What a not-found condition refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    User,
    Domain,
    Device,
    Data,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::User => "user",
            ResourceKind::Domain => "domain",
            ResourceKind::Device => "device",
            ResourceKind::Data => "data",
        };
        write!(f, "{s}")
    }
}

/// Single tagged error type for every verification and authorization
/// failure in the protocol. Each variant maps to exactly one wire code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Echoed nonce does not match the issued challenge")]
    NonceMismatch,

    #[error("Integrity check failed")]
    IntegrityMismatch,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("{0} not found")]
    NotFound(ResourceKind),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Device session already active")]
    AlreadyActive,
}

impl AuthError {
    /// Wire code reported to the peer for this failure.
    pub fn result_code(self) -> ResultCode {
        match self {
            AuthError::SignatureInvalid
            | AuthError::NonceMismatch
            | AuthError::KeyDerivationFailed => ResultCode::Error,
            AuthError::IntegrityMismatch => ResultCode::NokTested,
            AuthError::NotFound(ResourceKind::User) => ResultCode::NoUser,
            AuthError::NotFound(ResourceKind::Domain) => ResultCode::NoDomain,
            AuthError::NotFound(ResourceKind::Device) => ResultCode::NoId,
            AuthError::NotFound(ResourceKind::Data) => ResultCode::NoData,
            AuthError::PermissionDenied => ResultCode::NoPerm,
            AuthError::AlreadyActive => ResultCode::NokDevId,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Frame of {0} bytes exceeds the maximum")]
    FrameTooLarge(usize),

    #[error("Unexpected message: expected {expected}")]
    Unexpected { expected: &'static str },

    #[error("Peer closed the connection")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_codes() {
        assert_eq!(AuthError::SignatureInvalid.result_code(), ResultCode::Error);
        assert_eq!(AuthError::AlreadyActive.result_code(), ResultCode::NokDevId);
        assert_eq!(
            AuthError::NotFound(ResourceKind::Domain).result_code(),
            ResultCode::NoDomain
        );
        assert_eq!(AuthError::PermissionDenied.result_code(), ResultCode::NoPerm);
    }
}

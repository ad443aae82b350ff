use thiserror::Error;

use hearth_shared::types::ResultCode;
use hearth_shared::{CryptoError, ProtocolError};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Server rejected the request: {0}")]
    Rejected(ResultCode),

    #[error("Authentication rejected: {0}")]
    AuthRejected(ResultCode),

    #[error("Authentication aborted by the user")]
    Aborted,

    #[error("Device id rejected: a session for this user/device pair is already active")]
    SessionDenied,

    #[error("Executable attestation failed")]
    AttestationFailed,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Keyfile error: {0}")]
    Keyfile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

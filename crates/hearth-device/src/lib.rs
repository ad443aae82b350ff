//! Client library for hearth devices.
//!
//! Drives the device half of the authentication handshake and the domain
//! commands. All envelope cryptography happens here: wrapped domain keys are
//! unwrapped with the device's private key, payloads are encrypted once per
//! domain membership, and retrieved ciphertext is decrypted locally. The
//! server only ever sees wrapped keys and ciphertext.

pub mod auth;
pub mod commands;
pub mod error;
pub mod keystore;

pub use auth::{authenticate, OtpPrompt};
pub use commands::DeviceSession;
pub use error::DeviceError;

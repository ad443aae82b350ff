//! # hearth-server
//!
//! Central server for the hearth telemetry-sharing network.
//!
//! Each accepted connection runs the three-phase authentication handshake
//! (identity signature, out-of-band one-time code, device/executable
//! attestation) and then serves domain commands sequentially. Domain keys
//! and payloads only ever pass through as wrapped keys and ciphertext; the
//! server stores and forwards them without the means to decrypt either.

pub mod auth;
pub mod config;
pub mod error;
pub mod otp;
pub mod registry;
pub mod session;

pub use config::ServerConfig;
pub use error::ServerError;
pub use registry::SharedState;

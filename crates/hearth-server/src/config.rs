//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development; the operator secret must be set
//! explicitly for any real deployment.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the device protocol listener.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:7878`
    pub listen_addr: SocketAddr,

    /// Root directory for the persisted registries.
    /// Env: `DATA_DIR`
    /// Default: `./server_data`
    pub data_dir: PathBuf,

    /// Operator secret: derives the user-registry encryption key and keys
    /// the registry integrity tags.
    /// Env: `REGISTRY_SECRET`
    /// Default: `hearth-dev-secret` (development only).
    pub registry_secret: String,

    /// Base URL of the one-time-code delivery endpoint.
    /// Env: `OTP_ENDPOINT`
    pub otp_endpoint: String,

    /// Shared API key for the delivery endpoint.
    /// Env: `OTP_API_KEY`
    pub otp_api_key: String,

    /// Path to the reference copy of the device executable. Used only to
    /// create `localinfo.txt` when it does not exist yet.
    /// Env: `REFERENCE_EXEC`
    pub reference_exec: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 7878).into(),
            data_dir: PathBuf::from("./server_data"),
            registry_secret: "hearth-dev-secret".to_string(),
            otp_endpoint: "https://lmpinto.eu.pythonanywhere.com/2FA".to_string(),
            otp_api_key: String::new(),
            reference_exec: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid LISTEN_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(path);
        }

        if let Ok(secret) = std::env::var("REGISTRY_SECRET") {
            if !secret.is_empty() {
                config.registry_secret = secret;
            }
        } else {
            tracing::warn!("REGISTRY_SECRET not set, using the development default");
        }

        if let Ok(endpoint) = std::env::var("OTP_ENDPOINT") {
            config.otp_endpoint = endpoint;
        }

        if let Ok(key) = std::env::var("OTP_API_KEY") {
            config.otp_api_key = key;
        }

        if let Ok(path) = std::env::var("REFERENCE_EXEC") {
            if !path.is_empty() {
                config.reference_exec = Some(path);
            }
        }

        config
    }
}

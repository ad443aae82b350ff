//! On-disk key material and derivation-parameter cache.
//!
//! The keyfile holds the device's identity export as JSON, created on first
//! run. The parameter cache records `domain base64(salt) iterations` lines
//! so that repeat additions to the same domain derive the identical key.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::info;

use hearth_shared::identity::{export_to_json, DeviceIdentity, IdentityExport};

use crate::error::DeviceError;

/// Load the identity from `path`, generating and persisting a fresh one if
/// the file does not exist yet.
pub fn load_or_generate_identity(path: &Path) -> Result<DeviceIdentity, DeviceError> {
    if path.exists() {
        let json = fs::read_to_string(path)?;
        let export: IdentityExport = serde_json::from_str(&json)
            .map_err(|e| DeviceError::Keyfile(format!("unreadable keyfile: {e}")))?;
        return Ok(DeviceIdentity::from_export(&export));
    }

    let identity = DeviceIdentity::generate();
    let json = export_to_json(&identity.to_export())
        .map_err(|e| DeviceError::Keyfile(format!("serializing keyfile: {e}")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json.as_bytes())?;
    info!(path = %path.display(), "generated new device identity");
    Ok(identity)
}

/// File-backed cache of each domain's key-derivation parameters.
#[derive(Debug)]
pub struct KeyParamsStore {
    path: PathBuf,
}

impl KeyParamsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Previously recorded `(salt, iterations)` for `domain`, if any.
    pub fn lookup(&self, domain: &str) -> Result<Option<(Vec<u8>, u32)>, DeviceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(salt), Some(iterations)) =
                (parts.next(), parts.next(), parts.next())
            {
                if name == domain {
                    let salt = BASE64
                        .decode(salt)
                        .map_err(|e| DeviceError::Keyfile(format!("bad cached salt: {e}")))?;
                    let iterations = iterations
                        .parse()
                        .map_err(|e| DeviceError::Keyfile(format!("bad cached iterations: {e}")))?;
                    return Ok(Some((salt, iterations)));
                }
            }
        }
        Ok(None)
    }

    /// Record parameters for `domain` unless an entry already exists.
    pub fn record(&self, domain: &str, salt: &[u8], iterations: u32) -> Result<(), DeviceError> {
        if self.lookup(domain)?.is_some() {
            return Ok(());
        }
        let line = format!("{} {} {}\n", domain, BASE64.encode(salt), iterations);
        let mut content = if self.path.exists() {
            fs::read_to_string(&self.path)?
        } else {
            String::new()
        };
        content.push_str(&line);
        fs::write(&self.path, content)?;
        Ok(())
    }
}

//! Path map for the server data directory.
//!
//! Every name that becomes part of a filesystem path or a registry line is
//! validated first; rejecting separators here keeps the registry line format
//! parseable and prevents traversal out of the data directory.

use std::path::{Path, PathBuf};

use hearth_shared::types::{DeviceAddr, UserId};

use crate::error::{Result, StoreError};

/// Characters that would break the registry line format or the
/// `user:device` compound form.
const FORBIDDEN: &[char] = &[';', ',', ':', '/', '\\'];

/// Validate a user id, device id or domain name for use in registry lines
/// and file names.
pub fn validate_component(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains("..")
        || name.contains(FORBIDDEN)
        || name.chars().any(char::is_whitespace)
        || name.chars().any(char::is_control)
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn users_file(&self) -> PathBuf {
        self.root.join("users.txt")
    }

    pub fn user_params_dir(&self) -> PathBuf {
        self.root.join("user_params")
    }

    pub fn user_salt_file(&self) -> PathBuf {
        self.user_params_dir().join("salt.txt")
    }

    pub fn user_iterations_file(&self) -> PathBuf {
        self.user_params_dir().join("iterations.txt")
    }

    pub fn user_cipher_params_file(&self) -> PathBuf {
        self.user_params_dir().join("params.txt")
    }

    pub fn certificates_dir(&self) -> PathBuf {
        self.root.join("certificates")
    }

    pub fn certificate_file(&self, user: &UserId) -> Result<PathBuf> {
        validate_component(user.as_str())?;
        Ok(self.certificates_dir().join(format!("{user}.json")))
    }

    pub fn domains_file(&self) -> PathBuf {
        self.root.join("domains.txt")
    }

    pub fn domain_dir(&self, domain: &str) -> Result<PathBuf> {
        validate_component(domain)?;
        Ok(self.root.join("data").join(domain))
    }

    pub fn members_dir(&self, domain: &str) -> Result<PathBuf> {
        Ok(self.domain_dir(domain)?.join("members"))
    }

    pub fn member_key_file(&self, domain: &str, user: &UserId) -> Result<PathBuf> {
        validate_component(user.as_str())?;
        Ok(self.members_dir(domain)?.join(format!("{user}.key")))
    }

    pub fn device_dir(&self, domain: &str, addr: &DeviceAddr) -> Result<PathBuf> {
        validate_component(addr.user_id.as_str())?;
        validate_component(&addr.device_id)?;
        Ok(self.domain_dir(domain)?.join(addr.dir_name()))
    }

    pub fn localinfo_file(&self) -> PathBuf {
        self.root.join("localinfo.txt")
    }
}

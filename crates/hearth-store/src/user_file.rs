//! Encrypted user registry.
//!
//! The registry body is `user_id : certificate_filename` lines, encrypted as
//! one blob under a key derived from the operator secret (PBKDF2 with a salt
//! and iteration count persisted next to it) and stored base64-encoded. The
//! cipher nonce travels in a separate params file. Certificates live as
//! individual JSON files keyed by the filename recorded on each line.

use std::fs;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info};

use hearth_shared::crypto::{self, CipherParams, SymmetricKey};
use hearth_shared::identity::Certificate;
use hearth_shared::types::UserId;

use crate::error::{Result, StoreError};
use crate::layout::{validate_component, DataLayout};
use crate::models::UserRecord;

pub struct UserRegistryFile {
    layout: DataLayout,
    key: SymmetricKey,
}

impl UserRegistryFile {
    /// Open the registry, deriving the at-rest key from `operator_secret`.
    /// Salt and iteration count are read back if present, generated and
    /// persisted on first run.
    pub fn open(layout: DataLayout, operator_secret: &str) -> Result<Self> {
        fs::create_dir_all(layout.user_params_dir())?;
        fs::create_dir_all(layout.certificates_dir())?;

        let salt = Self::load_or_create_salt(&layout)?;
        let iterations = Self::load_or_create_iterations(&layout)?;
        let key = crypto::derive_key(operator_secret, &salt, iterations);

        Ok(Self { layout, key })
    }

    fn load_or_create_salt(layout: &DataLayout) -> Result<Vec<u8>> {
        let path = layout.user_salt_file();
        if path.exists() {
            let encoded = fs::read_to_string(&path)?;
            return BASE64
                .decode(encoded.trim())
                .map_err(|_| StoreError::Malformed("salt file is not base64".into()));
        }
        let salt = crypto::generate_salt();
        fs::write(&path, BASE64.encode(salt))?;
        Ok(salt.to_vec())
    }

    fn load_or_create_iterations(layout: &DataLayout) -> Result<u32> {
        let path = layout.user_iterations_file();
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            return text
                .trim()
                .parse()
                .map_err(|_| StoreError::Malformed("iterations file is not a number".into()));
        }
        let iterations = crypto::generate_iterations();
        fs::write(&path, iterations.to_string())?;
        Ok(iterations)
    }

    /// Load all users. A missing registry file means a first run and yields
    /// an empty set; a failed decryption is a hard error.
    pub fn load(&self) -> Result<Vec<UserRecord>> {
        let users_path = self.layout.users_file();
        if !users_path.exists() {
            debug!("user registry not present, starting empty");
            return Ok(Vec::new());
        }

        let encoded = fs::read_to_string(&users_path)?;
        let ciphertext = BASE64
            .decode(encoded.trim())
            .map_err(|_| StoreError::Malformed("user registry is not base64".into()))?;

        let params_bytes = fs::read(self.layout.user_cipher_params_file())
            .map_err(|_| StoreError::Malformed("user registry params missing".into()))?;
        let params = CipherParams::from_bytes(&params_bytes)
            .map_err(|_| StoreError::Malformed("user registry params corrupted".into()))?;

        let plaintext = crypto::decrypt(&self.key, &ciphertext, &params)
            .map_err(|_| StoreError::DecryptFailed)?;
        let content = String::from_utf8(plaintext)
            .map_err(|_| StoreError::Malformed("user registry is not UTF-8".into()))?;

        let mut users = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let (user_id, cert_file) = line
                .split_once(':')
                .ok_or_else(|| StoreError::Malformed(format!("bad registry line {line:?}")))?;
            let user_id = UserId(user_id.trim().to_string());
            let certificate = self.load_certificate(cert_file.trim())?;
            users.push(UserRecord {
                user_id,
                certificate,
            });
        }

        info!(count = users.len(), "loaded user registry");
        Ok(users)
    }

    fn load_certificate(&self, file_name: &str) -> Result<Certificate> {
        if file_name.contains(['/', '\\']) || file_name.contains("..") {
            return Err(StoreError::Malformed(format!(
                "bad certificate filename {file_name:?}"
            )));
        }
        let path = self.layout.certificates_dir().join(file_name);
        let json = fs::read_to_string(path)?;
        Certificate::from_json(&json).map_err(StoreError::Json)
    }

    /// Write all users back out: one certificate file per user plus the
    /// encrypted registry blob. Skipped entirely when there are no users,
    /// leaving any previous registry in place.
    pub fn backup(&self, users: &[UserRecord]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(self.layout.certificates_dir())?;

        let mut content = String::new();
        for user in users {
            validate_component(user.user_id.as_str())?;
            let cert_path = self.layout.certificate_file(&user.user_id)?;
            fs::write(&cert_path, user.certificate.to_json()?)?;

            let file_name = format!("{}.json", user.user_id);
            content.push_str(&format!("{}:{}\n", user.user_id, file_name));
        }

        let (ciphertext, params) = crypto::encrypt(&self.key, content.as_bytes())?;
        fs::write(self.layout.user_cipher_params_file(), params.as_bytes())?;
        fs::write(self.layout.users_file(), BASE64.encode(ciphertext))?;

        info!(count = users.len(), "user registry backed up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shared::identity::DeviceIdentity;
    use tempfile::TempDir;

    fn sample_users() -> Vec<UserRecord> {
        ["alice", "bob"]
            .iter()
            .map(|name| {
                let user_id = UserId::from(*name);
                let certificate = DeviceIdentity::generate().certificate(&user_id);
                UserRecord {
                    user_id,
                    certificate,
                }
            })
            .collect()
    }

    #[test]
    fn test_backup_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let registry = UserRegistryFile::open(layout.clone(), "operator-secret").unwrap();

        let users = sample_users();
        registry.backup(&users).unwrap();

        let loaded = registry.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].user_id, users[0].user_id);
        assert_eq!(loaded[0].certificate, users[0].certificate);
    }

    #[test]
    fn test_missing_registry_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry =
            UserRegistryFile::open(DataLayout::new(dir.path()), "operator-secret").unwrap();
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_secret_fails_closed() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());

        let registry = UserRegistryFile::open(layout.clone(), "operator-secret").unwrap();
        registry.backup(&sample_users()).unwrap();

        // same salt/iterations on disk, different secret -> different key
        let wrong = UserRegistryFile::open(layout, "not-the-secret").unwrap();
        assert!(matches!(wrong.load(), Err(StoreError::DecryptFailed)));
    }

    #[test]
    fn test_derivation_params_persist() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());

        let first = UserRegistryFile::open(layout.clone(), "operator-secret").unwrap();
        first.backup(&sample_users()).unwrap();
        drop(first);

        // a fresh open must re-derive the same key from persisted params
        let second = UserRegistryFile::open(layout, "operator-secret").unwrap();
        assert_eq!(second.load().unwrap().len(), 2);
    }
}

//! Reference-artifact integrity record.
//!
//! `localinfo.txt` names the reference copy of the device executable on its
//! first line. On first run the server seals the record by appending a hex
//! HMAC tag over that line; from then on the tag is re-verified before any
//! executable-attestation comparison is trusted.

use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use hearth_shared::crypto::TagBuilder;

use crate::error::{Result, StoreError};
use crate::layout::DataLayout;

pub struct LocalInfoFile {
    path: PathBuf,
    secret: Vec<u8>,
}

impl LocalInfoFile {
    pub fn new(layout: &DataLayout, operator_secret: &str) -> Self {
        Self {
            path: layout.localinfo_file(),
            secret: operator_secret.as_bytes().to_vec(),
        }
    }

    fn tag_for(&self, line: &str) -> [u8; 32] {
        let mut mac = TagBuilder::new(&self.secret);
        mac.update(line.as_bytes());
        mac.finish()
    }

    /// Create the record pointing at `reference_path`, already sealed.
    pub fn create(&self, reference_path: &str) -> Result<()> {
        let line = reference_path.trim();
        let tag = hex::encode(self.tag_for(line));
        fs::write(&self.path, format!("{line}\n{tag}"))?;
        Ok(())
    }

    /// Seal an unsealed record (a bare path line) by appending its tag.
    /// Already-sealed records are left untouched.
    pub fn seal_if_needed(&self) -> Result<()> {
        let content = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = content.lines().collect();
        match lines.as_slice() {
            [path_line] => {
                let line = path_line.trim();
                let tag = hex::encode(self.tag_for(line));
                fs::write(&self.path, format!("{line}\n{tag}"))?;
                info!(path = %self.path.display(), "sealed reference-integrity record");
                Ok(())
            }
            [_, _] => Ok(()),
            _ => Err(StoreError::Malformed(
                "reference-integrity record has unexpected shape".into(),
            )),
        }
    }

    /// Verify the record and return the reference artifact path.
    pub fn verify(&self) -> Result<PathBuf> {
        let content = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = content.lines().collect();
        let [path_line, tag_line] = lines.as_slice() else {
            return Err(StoreError::Malformed(
                "reference-integrity record has unexpected shape".into(),
            ));
        };

        let expected = hex::decode(tag_line.trim())
            .map_err(|_| StoreError::Malformed("reference-integrity tag is not hex".into()))?;

        let mut mac = TagBuilder::new(&self.secret);
        mac.update(path_line.trim().as_bytes());
        if mac.verify(&expected).is_err() {
            warn!(path = %self.path.display(), "reference-integrity record tag mismatch");
            return Err(StoreError::TamperDetected);
        }

        Ok(PathBuf::from(path_line.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_verify() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let record = LocalInfoFile::new(&layout, "operator-secret");

        record.create("/opt/hearth/device-reference").unwrap();
        assert_eq!(
            record.verify().unwrap(),
            PathBuf::from("/opt/hearth/device-reference")
        );
    }

    #[test]
    fn test_seal_bare_record() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        fs::write(layout.localinfo_file(), "/opt/hearth/device-reference\n").unwrap();

        let record = LocalInfoFile::new(&layout, "operator-secret");
        record.seal_if_needed().unwrap();
        assert!(record.verify().is_ok());

        // idempotent on a sealed record
        record.seal_if_needed().unwrap();
        assert!(record.verify().is_ok());
    }

    #[test]
    fn test_edited_path_fails_verification() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let record = LocalInfoFile::new(&layout, "operator-secret");
        record.create("/opt/hearth/device-reference").unwrap();

        let content = fs::read_to_string(layout.localinfo_file()).unwrap();
        let tampered = content.replace("device-reference", "malicious-binary");
        fs::write(layout.localinfo_file(), tampered).unwrap();

        assert!(matches!(record.verify(), Err(StoreError::TamperDetected)));
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        LocalInfoFile::new(&layout, "operator-secret")
            .create("/opt/hearth/device-reference")
            .unwrap();

        let other = LocalInfoFile::new(&layout, "other-secret");
        assert!(matches!(other.verify(), Err(StoreError::TamperDetected)));
    }
}

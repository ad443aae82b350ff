//! Domain registry with a keyed-hash integrity tag.
//!
//! `domains.txt` carries one line per domain
//! (`name;owner;dev1,dev2;member1,member2`) followed by a trailing line with
//! the hex HMAC-SHA256 tag computed over each preceding line's exact bytes.
//! Wrapped member keys and device ciphertexts are stored as individual files
//! under `data/<domain>/`. A tag mismatch on load aborts with
//! [`StoreError::TamperDetected`] and no domain is returned.

use std::fs;

use tracing::{info, warn};

use hearth_shared::crypto::{CipherParams, TagBuilder};
use hearth_shared::types::{DeviceAddr, UserId};

use crate::error::{Result, StoreError};
use crate::layout::{validate_component, DataLayout};
use crate::models::{DeviceData, DomainRecord};

pub struct DomainRegistryFile {
    layout: DataLayout,
    secret: Vec<u8>,
}

impl DomainRegistryFile {
    pub fn new(layout: DataLayout, operator_secret: &str) -> Self {
        Self {
            layout,
            secret: operator_secret.as_bytes().to_vec(),
        }
    }

    /// Load all domains, verifying the trailing tag over the exact line
    /// bytes. Fail closed: a mismatch yields no domains at all.
    pub fn load(&self) -> Result<Vec<DomainRecord>> {
        let path = self.layout.domains_file();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        let (tag_line, domain_lines) = lines
            .split_last()
            .ok_or_else(|| StoreError::Malformed("domain registry is empty".into()))?;

        let mut mac = TagBuilder::new(&self.secret);
        for line in domain_lines {
            mac.update(line.as_bytes());
        }
        let expected = hex::decode(tag_line.trim())
            .map_err(|_| StoreError::Malformed("domain registry tag is not hex".into()))?;
        if mac.verify(&expected).is_err() {
            warn!("domain registry tag mismatch");
            return Err(StoreError::TamperDetected);
        }

        let mut domains = Vec::new();
        for line in domain_lines {
            domains.push(self.parse_domain_line(line)?);
        }

        info!(count = domains.len(), "loaded domain registry");
        Ok(domains)
    }

    fn parse_domain_line(&self, line: &str) -> Result<DomainRecord> {
        let mut parts = line.split(';');
        let (name, owner, devices, members) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(n), Some(o), Some(d), Some(m), None) => (n, o, d, m),
            _ => return Err(StoreError::Malformed(format!("bad domain line {line:?}"))),
        };

        let mut domain = DomainRecord::new(name, UserId(owner.to_string()));

        for device in devices.split(',').filter(|s| !s.is_empty()) {
            let addr = DeviceAddr::parse(device)
                .ok_or_else(|| StoreError::Malformed(format!("bad device entry {device:?}")))?;
            let data = self.load_device_data(name, &addr)?;
            domain.devices.insert(addr, data);
        }

        for member in members.split(',').filter(|s| !s.is_empty()) {
            let user = UserId(member.to_string());
            let key_path = self.layout.member_key_file(name, &user)?;
            if key_path.exists() {
                domain.add_member(user, fs::read(key_path)?);
            }
        }

        Ok(domain)
    }

    fn load_device_data(&self, domain: &str, addr: &DeviceAddr) -> Result<DeviceData> {
        let dir = self.layout.device_dir(domain, addr)?;
        let mut data = DeviceData::default();

        let temp = dir.join("temp.bin");
        if temp.exists() {
            let ciphertext = fs::read(temp)?;
            let params = CipherParams::from_bytes(&fs::read(dir.join("temp_params.bin"))?)?;
            data.temperature = Some((ciphertext, params));
        }

        let image = dir.join("image.bin");
        if image.exists() {
            let ciphertext = fs::read(image)?;
            let params = CipherParams::from_bytes(&fs::read(dir.join("image_params.bin"))?)?;
            data.image = Some((ciphertext, params));
        }

        Ok(data)
    }

    /// Write all domains and their data files, finishing with the tag line.
    pub fn backup(&self, domains: &[DomainRecord]) -> Result<()> {
        if domains.is_empty() {
            return Ok(());
        }

        let mut mac = TagBuilder::new(&self.secret);
        let mut content = String::new();

        for domain in domains {
            validate_component(&domain.name)?;
            let line = Self::domain_line(domain);
            mac.update(line.as_bytes());
            content.push_str(&line);
            content.push('\n');

            self.backup_device_data(domain)?;
            self.backup_member_keys(domain)?;
        }

        content.push_str(&hex::encode(mac.finish()));
        fs::write(self.layout.domains_file(), content)?;

        info!(count = domains.len(), "domain registry backed up");
        Ok(())
    }

    fn domain_line(domain: &DomainRecord) -> String {
        let devices: Vec<String> = domain.devices.keys().map(DeviceAddr::to_string).collect();
        let members: Vec<String> = domain.members.keys().map(UserId::to_string).collect();
        format!(
            "{};{};{};{}",
            domain.name,
            domain.owner,
            devices.join(","),
            members.join(",")
        )
    }

    fn backup_device_data(&self, domain: &DomainRecord) -> Result<()> {
        for (addr, data) in &domain.devices {
            let dir = self.layout.device_dir(&domain.name, addr)?;
            fs::create_dir_all(&dir)?;

            if let Some((ciphertext, params)) = &data.temperature {
                fs::write(dir.join("temp.bin"), ciphertext)?;
                fs::write(dir.join("temp_params.bin"), params.as_bytes())?;
            }
            if let Some((ciphertext, params)) = &data.image {
                fs::write(dir.join("image.bin"), ciphertext)?;
                fs::write(dir.join("image_params.bin"), params.as_bytes())?;
            }
        }
        Ok(())
    }

    fn backup_member_keys(&self, domain: &DomainRecord) -> Result<()> {
        let members_dir = self.layout.members_dir(&domain.name)?;
        fs::create_dir_all(&members_dir)?;
        for (user, wrapped_key) in &domain.members {
            fs::write(self.layout.member_key_file(&domain.name, user)?, wrapped_key)?;
        }
        Ok(())
    }
}

//! In-memory records backed by the persistence layer.

use std::collections::BTreeMap;

use hearth_shared::crypto::CipherParams;
use hearth_shared::identity::Certificate;
use hearth_shared::types::{DeviceAddr, UserId};

/// A known user: stable id plus public-key certificate. Immutable after
/// creation; identity is the `user_id` alone.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    pub certificate: Certificate,
}

/// A device's latest submitted state. Each pair is independently optional
/// and overwritten in place; no history is kept.
#[derive(Debug, Clone, Default)]
pub struct DeviceData {
    pub temperature: Option<(Vec<u8>, CipherParams)>,
    pub image: Option<(Vec<u8>, CipherParams)>,
}

/// A sharing domain: owner, member wrapped keys, registered devices.
///
/// Ordered maps keep backup output and retrieval listings deterministic.
/// Owning a domain does not grant a member entry; data access always goes
/// through an explicit wrapped key.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub name: String,
    pub owner: UserId,
    pub members: BTreeMap<UserId, Vec<u8>>,
    pub devices: BTreeMap<DeviceAddr, DeviceData>,
}

impl DomainRecord {
    pub fn new(name: impl Into<String>, owner: UserId) -> Self {
        Self {
            name: name.into(),
            owner,
            members: BTreeMap::new(),
            devices: BTreeMap::new(),
        }
    }

    pub fn is_owner(&self, user: &UserId) -> bool {
        self.owner == *user
    }

    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains_key(user)
    }

    pub fn wrapped_key_for(&self, user: &UserId) -> Option<&[u8]> {
        self.members.get(user).map(Vec::as_slice)
    }

    pub fn add_member(&mut self, user: UserId, wrapped_key: Vec<u8>) {
        self.members.insert(user, wrapped_key);
    }

    pub fn has_device(&self, addr: &DeviceAddr) -> bool {
        self.devices.contains_key(addr)
    }

    /// Register a device with empty data; keeps existing data on re-register.
    pub fn register_device(&mut self, addr: DeviceAddr) {
        self.devices.entry(addr).or_default();
    }

    pub fn set_temperature(&mut self, addr: &DeviceAddr, ciphertext: Vec<u8>, params: CipherParams) {
        if let Some(data) = self.devices.get_mut(addr) {
            data.temperature = Some((ciphertext, params));
        }
    }

    pub fn set_image(&mut self, addr: &DeviceAddr, ciphertext: Vec<u8>, params: CipherParams) {
        if let Some(data) = self.devices.get_mut(addr) {
            data.image = Some((ciphertext, params));
        }
    }
}

//! Shared in-memory state: known users, domains, and active device sessions.
//!
//! One [`SharedState`] is constructed at startup from the persisted
//! registries and handed to every connection task behind an `Arc`. Each
//! collection sits behind its own mutex; guards are held only for the
//! duration of a single lookup or mutation, never across network I/O.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use hearth_shared::error::{AuthError, ResourceKind};
use hearth_shared::identity::Certificate;
use hearth_shared::protocol::{DeviceReading, DomainKeyEntry, EncryptedUpload};
use hearth_shared::types::{DeviceAddr, UserId};
use hearth_store::{DomainRecord, UserRecord};

pub struct SharedState {
    users: Mutex<BTreeMap<UserId, UserRecord>>,
    domains: Mutex<BTreeMap<String, DomainRecord>>,
    active_devices: Mutex<HashSet<DeviceAddr>>,
}

/// Lock acquisition that survives a poisoned mutex: connection tasks only
/// ever perform short, non-panicking mutations, and a single panicked task
/// must not wedge every other connection.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SharedState {
    pub fn new(users: Vec<UserRecord>, domains: Vec<DomainRecord>) -> Self {
        Self {
            users: Mutex::new(
                users
                    .into_iter()
                    .map(|u| (u.user_id.clone(), u))
                    .collect(),
            ),
            domains: Mutex::new(
                domains.into_iter().map(|d| (d.name.clone(), d)).collect(),
            ),
            active_devices: Mutex::new(HashSet::new()),
        }
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn lookup_user(&self, user_id: &UserId) -> Option<UserRecord> {
        lock(&self.users).get(user_id).cloned()
    }

    /// Insert a new user. Returns `false` (and keeps the existing record)
    /// if the id is already taken.
    pub fn add_user(&self, record: UserRecord) -> bool {
        let mut users = lock(&self.users);
        if users.contains_key(&record.user_id) {
            return false;
        }
        users.insert(record.user_id.clone(), record);
        true
    }

    pub fn certificate(&self, user_id: &UserId) -> Result<Certificate, AuthError> {
        self.lookup_user(user_id)
            .map(|u| u.certificate)
            .ok_or(AuthError::NotFound(ResourceKind::User))
    }

    // ------------------------------------------------------------------
    // Active device sessions
    // ------------------------------------------------------------------

    /// Atomically claim the `(user, device)` session slot. The returned
    /// guard releases the slot when dropped, covering every exit path of
    /// the owning connection, including cancellation.
    pub fn claim_device(self: &Arc<Self>, addr: DeviceAddr) -> Option<DeviceGuard> {
        let mut active = lock(&self.active_devices);
        if !active.insert(addr.clone()) {
            return None;
        }
        debug!(device = %addr, "device session claimed");
        Some(DeviceGuard {
            state: Arc::clone(self),
            addr,
        })
    }

    pub fn is_device_active(&self, addr: &DeviceAddr) -> bool {
        lock(&self.active_devices).contains(addr)
    }

    fn release_device(&self, addr: &DeviceAddr) {
        lock(&self.active_devices).remove(addr);
        debug!(device = %addr, "device session released");
    }

    // ------------------------------------------------------------------
    // Domains
    // ------------------------------------------------------------------

    /// Create a domain owned by `owner`. Returns `false` if the name is
    /// taken. No member entry is created for the owner.
    pub fn create_domain(&self, name: &str, owner: UserId) -> bool {
        let mut domains = lock(&self.domains);
        if domains.contains_key(name) {
            return false;
        }
        domains.insert(name.to_string(), DomainRecord::new(name, owner));
        true
    }

    /// Store `target`'s wrapped domain key. Only the domain owner may add
    /// members; the server never sees the unwrapped key.
    pub fn add_member(
        &self,
        caller: &UserId,
        target: &UserId,
        domain: &str,
        wrapped_key: Vec<u8>,
    ) -> Result<(), AuthError> {
        if self.lookup_user(target).is_none() {
            return Err(AuthError::NotFound(ResourceKind::User));
        }
        let mut domains = lock(&self.domains);
        let record = domains
            .get_mut(domain)
            .ok_or(AuthError::NotFound(ResourceKind::Domain))?;
        if !record.is_owner(caller) {
            return Err(AuthError::PermissionDenied);
        }
        record.add_member(target.clone(), wrapped_key);
        Ok(())
    }

    /// Register the caller's device into a domain the caller is a member of.
    pub fn register_device(
        &self,
        caller: &UserId,
        addr: &DeviceAddr,
        domain: &str,
    ) -> Result<(), AuthError> {
        let mut domains = lock(&self.domains);
        let record = domains
            .get_mut(domain)
            .ok_or(AuthError::NotFound(ResourceKind::Domain))?;
        if !record.has_member(caller) {
            return Err(AuthError::PermissionDenied);
        }
        record.register_device(addr.clone());
        Ok(())
    }

    /// Store the latest temperature ciphertext per `(domain, device)`.
    /// Entries for unknown domains or unregistered devices are dropped.
    pub fn store_temperatures(&self, addr: &DeviceAddr, entries: Vec<EncryptedUpload>) {
        let mut domains = lock(&self.domains);
        for entry in entries {
            match domains.get_mut(&entry.domain) {
                Some(record) if record.has_device(addr) => {
                    record.set_temperature(addr, entry.ciphertext, entry.params);
                }
                _ => warn!(domain = %entry.domain, device = %addr, "dropping stray temperature upload"),
            }
        }
    }

    /// Store the latest image ciphertext per `(domain, device)`.
    pub fn store_images(&self, addr: &DeviceAddr, entries: Vec<EncryptedUpload>) {
        let mut domains = lock(&self.domains);
        for entry in entries {
            match domains.get_mut(&entry.domain) {
                Some(record) if record.has_device(addr) => {
                    record.set_image(addr, entry.ciphertext, entry.params);
                }
                _ => warn!(domain = %entry.domain, device = %addr, "dropping stray image upload"),
            }
        }
    }

    /// Every device's latest temperature in `domain`, as ordered
    /// `(device, ciphertext, params)` triples, plus the caller's wrapped key.
    pub fn temperatures(
        &self,
        caller: &UserId,
        domain: &str,
    ) -> Result<(Vec<u8>, Vec<DeviceReading>), AuthError> {
        let domains = lock(&self.domains);
        let record = domains
            .get(domain)
            .ok_or(AuthError::NotFound(ResourceKind::Domain))?;
        if !record.has_member(caller) {
            return Err(AuthError::PermissionDenied);
        }

        let readings: Vec<DeviceReading> = record
            .devices
            .iter()
            .filter_map(|(addr, data)| {
                data.temperature.as_ref().map(|(ciphertext, params)| DeviceReading {
                    device: addr.to_string(),
                    ciphertext: ciphertext.clone(),
                    params: params.clone(),
                })
            })
            .collect();

        if readings.is_empty() {
            return Err(AuthError::NotFound(ResourceKind::Data));
        }

        let wrapped_key = record
            .wrapped_key_for(caller)
            .ok_or(AuthError::PermissionDenied)?
            .to_vec();
        Ok((wrapped_key, readings))
    }

    /// The latest image of `target`, from some domain shared between the
    /// target device and the caller.
    #[allow(clippy::type_complexity)]
    pub fn image(
        &self,
        caller: &UserId,
        target: &DeviceAddr,
    ) -> Result<(Vec<u8>, Vec<u8>, hearth_shared::crypto::CipherParams), AuthError> {
        let domains = lock(&self.domains);

        if !domains.values().any(|d| d.has_device(target)) {
            return Err(AuthError::NotFound(ResourceKind::Device));
        }

        for record in domains.values() {
            if record.has_device(target) && record.has_member(caller) {
                let data = &record.devices[target];
                let (ciphertext, params) = data
                    .image
                    .as_ref()
                    .ok_or(AuthError::NotFound(ResourceKind::Data))?;
                let wrapped_key = record
                    .wrapped_key_for(caller)
                    .ok_or(AuthError::PermissionDenied)?
                    .to_vec();
                return Ok((wrapped_key, ciphertext.clone(), params.clone()));
            }
        }

        Err(AuthError::PermissionDenied)
    }

    /// Domains containing the exact `user:device` pair, with the user's
    /// wrapped key in each.
    pub fn caller_domains(&self, addr: &DeviceAddr) -> Vec<DomainKeyEntry> {
        let domains = lock(&self.domains);
        domains
            .values()
            .filter(|d| d.has_device(addr))
            .filter_map(|d| {
                d.wrapped_key_for(&addr.user_id).map(|key| DomainKeyEntry {
                    domain: d.name.clone(),
                    wrapped_key: key.to_vec(),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Persistence handoff
    // ------------------------------------------------------------------

    /// Clone the current registries for backup.
    pub fn snapshot(&self) -> (Vec<UserRecord>, Vec<DomainRecord>) {
        let users = lock(&self.users).values().cloned().collect();
        let domains = lock(&self.domains).values().cloned().collect();
        (users, domains)
    }
}

/// Holds an active `(user, device)` session slot; dropping it releases the
/// slot so a reconnect is never blocked by a dead connection.
pub struct DeviceGuard {
    state: Arc<SharedState>,
    addr: DeviceAddr,
}

impl DeviceGuard {
    pub fn addr(&self) -> &DeviceAddr {
        &self.addr
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.state.release_device(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shared::crypto::CipherParams;
    use hearth_shared::identity::DeviceIdentity;

    fn user(name: &str) -> UserRecord {
        let user_id = UserId::from(name);
        UserRecord {
            certificate: DeviceIdentity::generate().certificate(&user_id),
            user_id,
        }
    }

    fn state_with_users(names: &[&str]) -> Arc<SharedState> {
        Arc::new(SharedState::new(
            names.iter().map(|n| user(n)).collect(),
            Vec::new(),
        ))
    }

    #[test]
    fn test_claim_is_exclusive_until_released() {
        let state = state_with_users(&["alice"]);
        let addr = DeviceAddr::new("alice", "phone1");

        let guard = state.claim_device(addr.clone()).unwrap();
        assert!(state.claim_device(addr.clone()).is_none());

        drop(guard);
        assert!(state.claim_device(addr).is_some());
    }

    #[test]
    fn test_create_domain_rejects_duplicates() {
        let state = state_with_users(&["alice"]);
        assert!(state.create_domain("home", UserId::from("alice")));
        assert!(!state.create_domain("home", UserId::from("alice")));
    }

    #[test]
    fn test_add_member_authorization() {
        let state = state_with_users(&["alice", "bob", "carol"]);
        state.create_domain("home", UserId::from("alice"));

        // not the owner
        assert_eq!(
            state.add_member(&UserId::from("bob"), &UserId::from("carol"), "home", vec![1]),
            Err(AuthError::PermissionDenied)
        );
        // unknown target
        assert_eq!(
            state.add_member(&UserId::from("alice"), &UserId::from("dave"), "home", vec![1]),
            Err(AuthError::NotFound(ResourceKind::User))
        );
        // unknown domain
        assert_eq!(
            state.add_member(&UserId::from("alice"), &UserId::from("bob"), "barn", vec![1]),
            Err(AuthError::NotFound(ResourceKind::Domain))
        );
        // owner adding a known user
        assert!(state
            .add_member(&UserId::from("alice"), &UserId::from("bob"), "home", vec![1])
            .is_ok());
    }

    #[test]
    fn test_register_device_requires_membership() {
        let state = state_with_users(&["alice", "bob"]);
        state.create_domain("home", UserId::from("alice"));
        let addr = DeviceAddr::new("bob", "sensor1");

        assert_eq!(
            state.register_device(&UserId::from("bob"), &addr, "home"),
            Err(AuthError::PermissionDenied)
        );

        state
            .add_member(&UserId::from("alice"), &UserId::from("bob"), "home", vec![1])
            .unwrap();
        assert!(state.register_device(&UserId::from("bob"), &addr, "home").is_ok());
    }

    #[test]
    fn test_temperatures_codes() {
        let state = state_with_users(&["alice", "bob"]);
        state.create_domain("home", UserId::from("alice"));
        state
            .add_member(&UserId::from("alice"), &UserId::from("bob"), "home", vec![7; 8])
            .unwrap();

        assert_eq!(
            state.temperatures(&UserId::from("bob"), "barn"),
            Err(AuthError::NotFound(ResourceKind::Domain))
        );
        assert_eq!(
            state.temperatures(&UserId::from("alice"), "home"),
            Err(AuthError::PermissionDenied)
        );
        // member, but nothing submitted yet
        assert_eq!(
            state.temperatures(&UserId::from("bob"), "home"),
            Err(AuthError::NotFound(ResourceKind::Data))
        );

        let addr = DeviceAddr::new("bob", "sensor1");
        state.register_device(&UserId::from("bob"), &addr, "home").unwrap();
        state.store_temperatures(
            &addr,
            vec![EncryptedUpload {
                domain: "home".into(),
                ciphertext: vec![1, 2, 3],
                params: CipherParams::random(),
            }],
        );

        let (wrapped, readings) = state.temperatures(&UserId::from("bob"), "home").unwrap();
        assert_eq!(wrapped, vec![7; 8]);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].device, "bob:sensor1");
    }

    #[test]
    fn test_image_codes() {
        let state = state_with_users(&["alice", "bob", "carol"]);
        state.create_domain("home", UserId::from("alice"));
        state
            .add_member(&UserId::from("alice"), &UserId::from("bob"), "home", vec![7; 8])
            .unwrap();
        let addr = DeviceAddr::new("bob", "cam1");

        // device registered nowhere
        assert_eq!(
            state.image(&UserId::from("bob"), &addr),
            Err(AuthError::NotFound(ResourceKind::Device))
        );

        state.register_device(&UserId::from("bob"), &addr, "home").unwrap();

        // carol shares no domain with the device
        assert_eq!(
            state.image(&UserId::from("carol"), &addr),
            Err(AuthError::PermissionDenied)
        );
        // member but no image submitted
        assert_eq!(
            state.image(&UserId::from("bob"), &addr),
            Err(AuthError::NotFound(ResourceKind::Data))
        );

        state.store_images(
            &addr,
            vec![EncryptedUpload {
                domain: "home".into(),
                ciphertext: vec![9; 16],
                params: CipherParams::random(),
            }],
        );
        let (_, ciphertext, _) = state.image(&UserId::from("bob"), &addr).unwrap();
        assert_eq!(ciphertext, vec![9; 16]);
    }

    #[test]
    fn test_stray_upload_is_dropped() {
        let state = state_with_users(&["bob"]);
        let addr = DeviceAddr::new("bob", "sensor1");
        state.store_temperatures(
            &addr,
            vec![EncryptedUpload {
                domain: "nowhere".into(),
                ciphertext: vec![1],
                params: CipherParams::random(),
            }],
        );
        assert!(state.caller_domains(&addr).is_empty());
    }
}

//! Tamper-evident persistence for the hearth server.
//!
//! Two registries are persisted independently: the user registry (encrypted
//! at rest under a key derived from the operator secret) and the domain
//! registry (plaintext structure covered by a trailing keyed-hash tag).
//! Both fail closed: a bad tag or a failed decryption aborts the load, and
//! the server refuses to start on partial data.

pub mod attest_file;
pub mod domain_file;
pub mod error;
pub mod layout;
pub mod models;
pub mod user_file;

pub use attest_file::LocalInfoFile;
pub use domain_file::DomainRegistryFile;
pub use error::{Result, StoreError};
pub use layout::DataLayout;
pub use models::{DeviceData, DomainRecord, UserRecord};
pub use user_file::UserRegistryFile;

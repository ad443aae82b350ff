use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::AuthError;
use crate::types::UserId;

/// A device's long-term key material: an Ed25519 signing key for challenge
/// responses and an X25519 secret for receiving wrapped domain keys.
#[derive(Clone)]
pub struct DeviceIdentity {
    signing_key: SigningKey,
    exchange_secret: StaticSecret,
}

/// Serializable form for the on-disk keyfile.
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub signing_secret: [u8; 32],
    pub exchange_secret: [u8; 32],
}

impl DeviceIdentity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            exchange_secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_export(export: &IdentityExport) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&export.signing_secret),
            exchange_secret: StaticSecret::from(export.exchange_secret),
        }
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            signing_secret: *self.signing_key.as_bytes(),
            exchange_secret: self.exchange_secret.to_bytes(),
        }
    }

    /// Sign a challenge nonce (fixed-width big-endian bytes).
    pub fn sign_nonce(&self, nonce: u64) -> Vec<u8> {
        self.signing_key
            .sign(&nonce.to_be_bytes())
            .to_bytes()
            .to_vec()
    }

    pub fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange_secret
    }

    /// Public certificate binding this key material to `user_id`.
    pub fn certificate(&self, user_id: &UserId) -> Certificate {
        Certificate {
            user_id: user_id.clone(),
            signing_key: self.signing_key.verifying_key().to_bytes(),
            exchange_key: X25519Public::from(&self.exchange_secret).to_bytes(),
        }
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("signing_key", &"[REDACTED]")
            .field("exchange_secret", &"[REDACTED]")
            .finish()
    }
}

/// A user's public certificate: identity plus both public keys. Stored by
/// the server, handed out over `GetCertificate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub user_id: UserId,
    /// Ed25519 verifying key for challenge signatures.
    pub signing_key: [u8; 32],
    /// X25519 public key; wrap target for domain keys.
    pub exchange_key: [u8; 32],
}

impl Certificate {
    /// Verify a signature over the big-endian bytes of `nonce`.
    pub fn verify_nonce(&self, nonce: u64, signature: &[u8]) -> Result<(), AuthError> {
        let key = VerifyingKey::from_bytes(&self.signing_key)
            .map_err(|_| AuthError::SignatureInvalid)?;
        let sig = Signature::from_slice(signature).map_err(|_| AuthError::SignatureInvalid)?;
        key.verify(&nonce.to_be_bytes(), &sig)
            .map_err(|_| AuthError::SignatureInvalid)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Scrubbed buffer for a serialized identity export.
pub fn export_to_json(export: &IdentityExport) -> Result<Zeroizing<String>, serde_json::Error> {
    serde_json::to_string(export).map(Zeroizing::new)
}

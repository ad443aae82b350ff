use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::{
    CIPHER_NONCE_SIZE, ITERATION_FLOOR, ITERATION_SPREAD, KEY_SIZE, OTP_MODULUS, SALT_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; KEY_SIZE];

type HmacSha256 = Hmac<Sha256>;

/// Fresh 64-bit challenge nonce.
pub fn generate_nonce() -> u64 {
    rand::rngs::OsRng.next_u64()
}

/// Fresh 5-digit zero-padded one-time code.
pub fn generate_otp() -> String {
    let n = rand::rngs::OsRng.next_u32() % OTP_MODULUS;
    format!("{n:05}")
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Random PBKDF2 iteration count in the configured band.
pub fn generate_iterations() -> u32 {
    ITERATION_FLOOR + rand::rngs::OsRng.next_u32() % ITERATION_SPREAD
}

/// PBKDF2-HMAC-SHA256. Deterministic in (password, salt, iterations), so
/// every member of a domain derives the identical key material.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Externally-carried parameters of a symmetric encryption: the cipher
/// nonce. Stored and transmitted separately from the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CipherParams(pub [u8; CIPHER_NONCE_SIZE]);

impl CipherParams {
    pub fn random() -> Self {
        let mut nonce = [0u8; CIPHER_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self(nonce)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; CIPHER_NONCE_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self(arr))
    }
}

/// Encrypt `plaintext` under `key`, returning the ciphertext and the
/// freshly drawn parameters it must later be decrypted with.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<(Vec<u8>, CipherParams), CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let params = CipherParams::random();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&params.0), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok((ciphertext, params))
}

pub fn decrypt(
    key: &SymmetricKey,
    ciphertext: &[u8],
    params: &CipherParams,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(&params.0), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Incremental HMAC-SHA256 over registry content, keyed by the operator
/// secret's UTF-8 bytes.
pub struct TagBuilder {
    mac: HmacSha256,
}

impl TagBuilder {
    pub fn new(secret: &[u8]) -> Self {
        // HMAC accepts keys of any length
        let mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC key of any length");
        Self { mac }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    pub fn finish(self) -> [u8; 32] {
        self.mac.finalize().into_bytes().into()
    }

    /// Constant-time comparison against an expected tag.
    pub fn verify(self, expected: &[u8]) -> Result<(), CryptoError> {
        self.mac
            .verify_slice(expected)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// SHA-256 over the big-endian nonce followed by the artifact bytes.
pub fn attestation_digest(nonce: u64, artifact: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce.to_be_bytes());
    hasher.update(artifact);
    hasher.finalize().into()
}

/// Constant-time equality for one-time codes.
pub fn codes_match(submitted: &str, expected: &str) -> bool {
    submitted.len() == expected.len()
        && bool::from(submitted.as_bytes().ct_eq(expected.as_bytes()))
}

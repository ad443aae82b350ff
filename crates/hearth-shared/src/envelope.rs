//! Envelope key wrapping.
//!
//! A domain's symmetric key is wrapped once per member under that member's
//! X25519 public key: an ephemeral keypair is drawn, the DH shared secret is
//! run through BLAKE3 with a fixed context to produce a KEK, and the key is
//! sealed with XChaCha20-Poly1305. The blob is `eph_pub || nonce || ct`, so
//! only the holder of the matching X25519 secret can recover the key.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::constants::{CIPHER_NONCE_SIZE, KDF_CONTEXT_WRAP_KEK, KEY_SIZE};
use crate::crypto::SymmetricKey;
use crate::error::CryptoError;

const PUBKEY_SIZE: usize = 32;

fn derive_kek(shared: &[u8; 32], eph_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_WRAP_KEK);
    hasher.update(shared);
    hasher.update(eph_pub);
    hasher.update(recipient_pub);
    let hash = hasher.finalize();
    let mut kek = Zeroizing::new([0u8; 32]);
    kek.copy_from_slice(&hash.as_bytes()[..32]);
    kek
}

/// Wrap `key` for the holder of `recipient_pub`. Non-deterministic: a fresh
/// ephemeral keypair and nonce are drawn per call, so two wraps of the same
/// key differ byte-for-byte yet unwrap identically.
pub fn wrap_key(recipient_pub: &[u8; 32], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    let eph_secret = EphemeralSecret::random_from_rng(OsRng);
    let eph_pub = X25519Public::from(&eph_secret).to_bytes();

    let recipient = X25519Public::from(*recipient_pub);
    let shared = eph_secret.diffie_hellman(&recipient);
    let kek = derive_kek(shared.as_bytes(), &eph_pub, recipient_pub);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&*kek));
    let mut nonce = [0u8; CIPHER_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ct = cipher
        .encrypt(XNonce::from_slice(&nonce), key.as_slice())
        .map_err(|_| CryptoError::WrapFailed)?;

    let mut blob = Vec::with_capacity(PUBKEY_SIZE + CIPHER_NONCE_SIZE + ct.len());
    blob.extend_from_slice(&eph_pub);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ct);
    Ok(blob)
}

/// Recover a wrapped key with the recipient's X25519 secret.
pub fn unwrap_key(secret: &StaticSecret, blob: &[u8]) -> Result<SymmetricKey, CryptoError> {
    if blob.len() < PUBKEY_SIZE + CIPHER_NONCE_SIZE {
        return Err(CryptoError::UnwrapFailed);
    }

    let (eph_pub_bytes, rest) = blob.split_at(PUBKEY_SIZE);
    let (nonce, ct) = rest.split_at(CIPHER_NONCE_SIZE);

    let eph_pub: [u8; 32] = eph_pub_bytes
        .try_into()
        .map_err(|_| CryptoError::UnwrapFailed)?;
    let recipient_pub = X25519Public::from(secret).to_bytes();

    let shared = secret.diffie_hellman(&X25519Public::from(eph_pub));
    let kek = derive_kek(shared.as_bytes(), &eph_pub, &recipient_pub);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&*kek));
    let key = cipher
        .decrypt(XNonce::from_slice(nonce), ct)
        .map_err(|_| CryptoError::UnwrapFailed)?;

    let key: [u8; KEY_SIZE] = key.as_slice().try_into().map_err(|_| CryptoError::UnwrapFailed)?;
    Ok(key)
}

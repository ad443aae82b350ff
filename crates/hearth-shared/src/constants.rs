/// Symmetric key length (XChaCha20-Poly1305, PBKDF2 output).
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce length; carried as the external cipher parameter.
pub const CIPHER_NONCE_SIZE: usize = 24;

/// Salt length for password-based key derivation.
pub const SALT_SIZE: usize = 16;

/// PBKDF2 iteration counts are drawn from `[ITERATION_FLOOR, ITERATION_FLOOR + ITERATION_SPREAD)`.
pub const ITERATION_FLOOR: u32 = 10_000;
pub const ITERATION_SPREAD: u32 = 1_000;

/// One-time codes are 5 decimal digits, zero-padded.
pub const OTP_MODULUS: u32 = 100_000;

/// BLAKE3 derive_key context for the envelope wrap KEK.
pub const KDF_CONTEXT_WRAP_KEK: &str = "hearth 2025 envelope wrap kek v1";

/// Upper bound on a single wire frame. Image payloads ride inside frames,
/// so this is deliberately generous.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

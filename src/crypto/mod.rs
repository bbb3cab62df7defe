//! Cryptographic primitives for the tunnel channel
//!
//! This module provides:
//! - AES-256-GCM AEAD sealing/opening for the plugin-message channel
//! - SHA-256 session-key and masquerade-username derivation
//! - Secure random number generation

mod aead;
mod kdf;

pub use aead::Cipher;
pub use kdf::{derive_key, masquerade_username};

use thiserror::Error;

/// Length of the symmetric key in bytes
pub const KEY_LEN: usize = 32;

/// Length of the nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length")]
    InvalidKeyLength,

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,
}

/// Fill `buf` from the system CSPRNG. Every nonce in the channel comes
/// through here; an RNG failure is unrecoverable, so this aborts instead
/// of returning an error.
pub fn random_bytes(buf: &mut [u8]) {
    use ring::rand::{SecureRandom, SystemRandom};
    SystemRandom::new()
        .fill(buf)
        .expect("system RNG unavailable");
}

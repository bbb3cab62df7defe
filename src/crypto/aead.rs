//! AEAD encryption/decryption utilities
//!
//! Provides AES-256-GCM sealing in the channel's wire layout:
//! `12-byte nonce ‖ ciphertext ‖ 16-byte tag`.

use super::{random_bytes, CryptoError, KEY_LEN, NONCE_LEN, TAG_LEN};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};

/// AEAD cipher for a single session
pub struct Cipher {
    key: LessSafeKey,
}

impl Cipher {
    /// Create a new cipher from a 32-byte key
    pub fn new(key: &[u8; KEY_LEN]) -> Result<Self, CryptoError> {
        let unbound_key =
            UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self {
            key: LessSafeKey::new(unbound_key),
        })
    }

    /// Seal `plaintext` under a fresh random nonce, returning
    /// `nonce ‖ ciphertext ‖ tag`.
    ///
    /// Nonces are uniformly random with no counter fallback; sessions must
    /// stay short-lived enough that the 96-bit birthday bound is never
    /// approached.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        random_bytes(&mut nonce_bytes);

        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len() + TAG_LEN);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(plaintext);

        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut out[NONCE_LEN..])
            .map_err(|_| CryptoError::Encryption)?;
        out.extend_from_slice(tag.as_ref());
        Ok(out)
    }

    /// Open a `nonce ‖ ciphertext ‖ tag` payload produced by [`Cipher::seal`]
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption);
        }
        let nonce = Nonce::try_assume_unique_for_key(&payload[..NONCE_LEN])
            .map_err(|_| CryptoError::Decryption)?;

        let mut buf = payload[NONCE_LEN..].to_vec();
        let plaintext_len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| CryptoError::Decryption)?
            .len();
        buf.truncate(plaintext_len);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = Cipher::new(&[0x42u8; KEY_LEN]).unwrap();
        let sealed = cipher.seal(b"Hello, World!").unwrap();

        assert_eq!(sealed.len(), NONCE_LEN + 13 + TAG_LEN);
        assert_eq!(cipher.open(&sealed).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_nonces_are_fresh() {
        // Sealing the same plaintext twice must draw two different nonces,
        // and with them two different ciphertexts.
        let cipher = Cipher::new(&[0x42u8; KEY_LEN]).unwrap();
        let a = cipher.seal(b"x").unwrap();
        let b = cipher.seal(b"x").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a[NONCE_LEN..], b[NONCE_LEN..]);
        assert_eq!(cipher.open(&a).unwrap(), cipher.open(&b).unwrap());
    }

    #[test]
    fn test_tamper_detection() {
        let cipher = Cipher::new(&[0x42u8; KEY_LEN]).unwrap();
        let mut sealed = cipher.seal(b"Hello, World!").unwrap();
        sealed[NONCE_LEN] ^= 0xFF;
        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn test_short_payload_rejected() {
        let cipher = Cipher::new(&[0x42u8; KEY_LEN]).unwrap();
        assert!(cipher.open(&[0u8; NONCE_LEN + TAG_LEN - 1]).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let cipher = Cipher::new(&[0x42u8; KEY_LEN]).unwrap();
        let other = Cipher::new(&[0x43u8; KEY_LEN]).unwrap();
        let sealed = cipher.seal(b"secret").unwrap();
        assert!(other.open(&sealed).is_err());
    }
}

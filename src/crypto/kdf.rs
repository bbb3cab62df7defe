//! Key derivation
//!
//! The shared password is the only secret: its SHA-256 digest is the
//! session key, and the first hex characters of the same digest double as
//! the masquerade player name.

use super::KEY_LEN;
use ring::digest::{digest, SHA256};

/// Derive the session key from the shared password
pub fn derive_key(password: &str) -> [u8; KEY_LEN] {
    let hash = digest(&SHA256, password.as_bytes());
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(hash.as_ref());
    key
}

/// Derive the masquerade username: `Player` plus the first 8 hex characters
/// of the password digest
pub fn masquerade_username(password: &str) -> String {
    let digest = derive_key(password);
    format!("Player{}", &hex::encode(digest)[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let key = derive_key("hunter2");
        assert_eq!(&hex::encode(key)[..8], "f52fbd32");
    }

    #[test]
    fn test_masquerade_username() {
        assert_eq!(masquerade_username("hunter2"), "Playerf52fbd32");
        assert_eq!(masquerade_username("hunter2").len(), "Player".len() + 8);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(derive_key("pw"), derive_key("pw"));
        assert_ne!(derive_key("pw"), derive_key("pw2"));
    }
}

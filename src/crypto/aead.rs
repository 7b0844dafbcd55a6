//! XChaCha20-Poly1305 sealing with random 24-byte nonces.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, SealError};

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 24;
/// Key length in bytes.
pub const KEY_LEN: usize = 32;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Generates a random 256-bit key.
pub fn generate_key() -> SensitiveBytes32 {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    SensitiveBytes32::new(key)
}

/// Encrypts `plaintext` and returns `nonce || ciphertext || tag`.
pub fn seal(key: &SensitiveBytes32, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|error| SealError::Crypto(error.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| SealError::Crypto("encryption failed".to_owned()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts the output of [`seal`].
pub fn open(key: &SensitiveBytes32, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(SealError::InvalidFormat("ciphertext too short".to_owned()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|error| SealError::Crypto(error.to_string()))?;

    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| SealError::Crypto("decryption failed".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_key();
        let sealed = seal(&key, b"payload", b"aad").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"payload".len() + TAG_LEN);
        assert_eq!(open(&key, &sealed, b"aad").unwrap(), b"payload");
    }

    #[test]
    fn wrong_key_or_aad_fails() {
        let key = generate_key();
        let sealed = seal(&key, b"payload", b"aad").unwrap();
        assert!(open(&generate_key(), &sealed, b"aad").is_err());
        assert!(open(&key, &sealed, b"other").is_err());
    }

    #[test]
    fn short_input_is_a_format_error() {
        let key = generate_key();
        assert!(matches!(open(&key, &[0u8; 10], b""), Err(SealError::InvalidFormat(_))));
    }
}

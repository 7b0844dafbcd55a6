//! Envelope cryptography: keys, sealed secrets, wrapped keys, and content hashes.

/// XChaCha20-Poly1305 primitives.
pub mod aead;
/// Text encodings for serialized values.
pub mod encoding;
/// Ciphered envelopes, sealed secrets, and wrapped keys.
pub mod envelope;
/// Truncated memory-hard content hash.
pub mod hash;
/// X25519 and Kyber768 recipient sealing.
pub mod kem;
/// Public and secret keys.
pub mod keys;
/// Password-derived sealing.
pub mod password;
/// Zeroizing buffers.
pub mod sensitive;

pub use envelope::{Ciphered, SealedSecret, WrappedKey};
pub use keys::{KeyAlgorithm, KeyType, PublicKey, SecretKey};

use crate::error::{Result, SealError};

/// Prefix of every serialized key, envelope, and identifier.
pub const PREFIX: &str = "SEAL";
/// Current version of the binary key and envelope layouts.
pub const CRYPTO_VERSION: u8 = 1;

pub(crate) const PUBLIC_KEY_ABBREV: &str = "PK";
pub(crate) const SECRET_KEY_ABBREV: &str = "SK";
pub(crate) const WRAPPED_KEY_ABBREV: &str = "WK";
pub(crate) const SEALED_SECRET_ABBREV: &str = "SS";

/// Renders `SEAL_<kt><abbrev>_<part>_<part>...`.
pub(crate) fn format_tagged(key_type: KeyType, abbrev: &str, parts: &[&str]) -> String {
    let mut rendered = format!("{PREFIX}_{}{abbrev}", key_type.as_char());
    for part in parts {
        rendered.push('_');
        rendered.push_str(part);
    }
    rendered
}

/// Splits a tagged string and returns its key type plus the payload parts.
pub(crate) fn parse_tagged<'a>(
    text: &'a str,
    abbrev: &str,
    what: &str,
) -> Result<(KeyType, Vec<&'a str>)> {
    let invalid = || SealError::InvalidFormat(format!("not a {what} string"));
    let mut parts = text.trim().split('_');
    if parts.next() != Some(PREFIX) {
        return Err(invalid());
    }
    let tag = parts.next().ok_or_else(invalid)?;
    let mut tag_chars = tag.chars();
    let key_type_char = tag_chars.next().ok_or_else(invalid)?;
    if tag_chars.as_str() != abbrev {
        return Err(invalid());
    }
    let key_type = KeyType::from_char(key_type_char)?;
    let payload: Vec<&str> = parts.collect();
    if payload.is_empty() || payload.iter().any(|part| part.is_empty()) {
        return Err(invalid());
    }
    Ok((key_type, payload))
}

/// Rejects versions newer than [`CRYPTO_VERSION`].
pub(crate) fn check_version(version: u8) -> Result<()> {
    if version == 0 {
        return Err(SealError::InvalidFormat("version 0".to_owned()));
    }
    if version > CRYPTO_VERSION {
        return Err(SealError::UnsupportedVersion(version));
    }
    Ok(())
}

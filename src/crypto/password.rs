//! Password-derived sealing used by the password secret-binding provider.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::crypto::{aead, check_version, sensitive::SensitiveBytes32, CRYPTO_VERSION};
use crate::error::{Result, SealError};

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

const KDF_MEMORY_KIB: u32 = 19_456;
const KDF_TIME_COST: u32 = 2;
const KDF_PARALLELISM: u32 = 1;

fn derive_key(password: &[u8], salt: &[u8]) -> Result<SensitiveBytes32> {
    let params = Params::new(
        KDF_MEMORY_KIB,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(aead::KEY_LEN),
    )
    .map_err(|error| SealError::Crypto(error.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0_u8; aead::KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|error| SealError::Crypto(error.to_string()))?;
    let key = SensitiveBytes32::new(output);
    output.zeroize();
    Ok(key)
}

/// Seals `plaintext` under `password`: `[version] || salt || nonce || ciphertext`.
pub fn seal_with_password(password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0_u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt)?;
    let body = aead::seal(&key, plaintext, &[CRYPTO_VERSION])?;

    let mut sealed = Vec::with_capacity(1 + SALT_LEN + body.len());
    sealed.push(CRYPTO_VERSION);
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

/// Opens the output of [`seal_with_password`].
///
/// A wrong password surfaces as [`SealError::InvalidPassword`].
pub fn open_with_password(password: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < 1 + SALT_LEN + aead::NONCE_LEN + aead::TAG_LEN {
        return Err(SealError::InvalidFormat("password-sealed data too short".to_owned()));
    }
    let version = sealed[0];
    check_version(version)?;
    let (salt, body) = sealed[1..].split_at(SALT_LEN);
    let key = derive_key(password, salt)?;
    aead::open(&key, body, &[version]).map_err(|error| match error {
        SealError::Crypto(_) => SealError::InvalidPassword,
        other => other,
    })
}

//! Short content fingerprints for sealed secrets.
//!
//! The fingerprint lets a reader see whether a value changed without
//! decrypting it. It is only four bytes of Argon2id output over the
//! plaintext with a fixed salt, so low-entropy secrets can be recovered by
//! brute force from it. Vaults only store it when hashing is enabled.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{Result, SealError};

/// Fingerprint length in bytes.
pub const HASH_LEN: usize = 4;

const HASH_TIME_COST: u32 = 16;
const HASH_MEMORY_KIB: u32 = 64;
const HASH_PARALLELISM: u32 = 1;
const HASH_SALT: &[u8] = b"sealvault-content-hash";

/// Computes the fingerprint of `data`.
pub fn content_hash(data: &[u8]) -> Result<[u8; HASH_LEN]> {
    let params = Params::new(
        HASH_MEMORY_KIB,
        HASH_TIME_COST,
        HASH_PARALLELISM,
        Some(HASH_LEN),
    )
    .map_err(|error| SealError::Crypto(error.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0_u8; HASH_LEN];
    argon2
        .hash_password_into(data, HASH_SALT, &mut output)
        .map_err(|error| SealError::Crypto(error.to_string()))?;
    Ok(output)
}

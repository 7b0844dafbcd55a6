//! Public-key sealing for the two recipient algorithms.
//!
//! ECC recipients get an ephemeral X25519 exchange. Post-quantum recipients
//! additionally get a round-3 Kyber768 encapsulation; both shared secrets
//! feed one HKDF-SHA256 extraction, so the sealed payload stays confidential
//! as long as either primitive holds.

use hkdf::Hkdf;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::{aead, sensitive::SensitiveBytes32};
use crate::error::{Result, SealError};

/// X25519 key length.
pub const X25519_LEN: usize = 32;

const ECC_INFO: &[u8] = b"sealvault/envelope/x25519/v1";
const HYBRID_INFO: &[u8] = b"sealvault/envelope/x25519+mlkem768/v1";

/// Kyber768 public key length.
pub fn kem_public_key_len() -> usize {
    kyber768::public_key_bytes()
}

/// Kyber768 secret key length.
pub fn kem_secret_key_len() -> usize {
    kyber768::secret_key_bytes()
}

fn kem_ciphertext_len() -> usize {
    kyber768::ciphertext_bytes()
}

/// Generates a round-3 Kyber768 key pair as `(public, secret)` bytes.
pub fn generate_kem_keypair() -> (Vec<u8>, Vec<u8>) {
    let (public_key, secret_key) = kyber768::keypair();
    (
        public_key.as_bytes().to_vec(),
        secret_key.as_bytes().to_vec(),
    )
}

/// Generates a random X25519 secret.
pub fn generate_x25519_secret() -> StaticSecret {
    StaticSecret::random_from_rng(OsRng)
}

fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<SensitiveBytes32> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut output = [0_u8; aead::KEY_LEN];
    hkdf.expand(info, &mut output)
        .map_err(|error| SealError::Crypto(error.to_string()))?;
    let key = SensitiveBytes32::new(output);
    output.zeroize();
    Ok(key)
}

fn exchange(
    ephemeral: EphemeralSecret,
    recipient: &[u8; X25519_LEN],
) -> Result<(X25519PublicKey, [u8; X25519_LEN])> {
    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&X25519PublicKey::from(*recipient));
    if !shared.was_contributory() {
        return Err(SealError::Crypto("non-contributory x25519 exchange".to_owned()));
    }
    Ok((ephemeral_public, shared.to_bytes()))
}

fn salt_for(ephemeral: &[u8], recipient: &[u8]) -> Vec<u8> {
    let mut salt = Vec::with_capacity(ephemeral.len() + recipient.len());
    salt.extend_from_slice(ephemeral);
    salt.extend_from_slice(recipient);
    salt
}

/// Seals `plaintext` for an X25519 recipient: `ephemeral_pk || aead`.
pub fn seal_ecc(recipient: &[u8; X25519_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let (ephemeral_public, mut shared) =
        exchange(EphemeralSecret::random_from_rng(OsRng), recipient)?;
    let key = derive_key(
        &shared,
        &salt_for(ephemeral_public.as_bytes(), recipient),
        ECC_INFO,
    );
    shared.zeroize();
    let body = aead::seal(&key?, plaintext, aad)?;

    let mut sealed = Vec::with_capacity(X25519_LEN + body.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

/// Opens the output of [`seal_ecc`].
pub fn open_ecc(secret: &StaticSecret, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < X25519_LEN {
        return Err(SealError::InvalidFormat("ciphertext too short".to_owned()));
    }
    let (ephemeral, body) = sealed.split_at(X25519_LEN);
    let ephemeral: [u8; X25519_LEN] = ephemeral
        .try_into()
        .map_err(|_| SealError::InvalidFormat("ephemeral key".to_owned()))?;
    let recipient = X25519PublicKey::from(secret);
    let shared = secret.diffie_hellman(&X25519PublicKey::from(ephemeral));
    let key = derive_key(
        shared.as_bytes(),
        &salt_for(&ephemeral, recipient.as_bytes()),
        ECC_INFO,
    )?;
    aead::open(&key, body, aad)
}

/// Seals `plaintext` for a hybrid recipient: `kem_ct || ephemeral_pk || aead`.
pub fn seal_hybrid(
    recipient_x25519: &[u8; X25519_LEN],
    recipient_kem: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let kem_public = kyber768::PublicKey::from_bytes(recipient_kem)
        .map_err(|error| SealError::InvalidFormat(format!("Kyber768 public key: {error:?}")))?;
    let (kem_shared, kem_ciphertext) = kyber768::encapsulate(&kem_public);
    let (ephemeral_public, mut shared) =
        exchange(EphemeralSecret::random_from_rng(OsRng), recipient_x25519)?;

    let mut ikm = Vec::with_capacity(kem_shared.as_bytes().len() + shared.len());
    ikm.extend_from_slice(kem_shared.as_bytes());
    ikm.extend_from_slice(&shared);
    shared.zeroize();
    let key = derive_key(
        &ikm,
        &salt_for(ephemeral_public.as_bytes(), kem_ciphertext.as_bytes()),
        HYBRID_INFO,
    );
    ikm.zeroize();
    let body = aead::seal(&key?, plaintext, aad)?;

    let kem_ciphertext = kem_ciphertext.as_bytes();
    let mut sealed = Vec::with_capacity(kem_ciphertext.len() + X25519_LEN + body.len());
    sealed.extend_from_slice(kem_ciphertext);
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

/// Opens the output of [`seal_hybrid`].
pub fn open_hybrid(
    secret: &StaticSecret,
    kem_secret: &[u8],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let ciphertext_len = kem_ciphertext_len();
    if sealed.len() < ciphertext_len + X25519_LEN {
        return Err(SealError::InvalidFormat("ciphertext too short".to_owned()));
    }
    let (kem_ciphertext, rest) = sealed.split_at(ciphertext_len);
    let (ephemeral, body) = rest.split_at(X25519_LEN);
    let ephemeral: [u8; X25519_LEN] = ephemeral
        .try_into()
        .map_err(|_| SealError::InvalidFormat("ephemeral key".to_owned()))?;

    let kem_secret = kyber768::SecretKey::from_bytes(kem_secret)
        .map_err(|error| SealError::Crypto(format!("Kyber768 secret key: {error:?}")))?;
    let kem_ciphertext_value = kyber768::Ciphertext::from_bytes(kem_ciphertext)
        .map_err(|error| SealError::InvalidFormat(format!("Kyber768 ciphertext: {error:?}")))?;
    let kem_shared = kyber768::decapsulate(&kem_ciphertext_value, &kem_secret);
    let shared = secret.diffie_hellman(&X25519PublicKey::from(ephemeral));

    let mut ikm = Vec::with_capacity(kem_shared.as_bytes().len() + X25519_LEN);
    ikm.extend_from_slice(kem_shared.as_bytes());
    ikm.extend_from_slice(shared.as_bytes());
    let key = derive_key(&ikm, &salt_for(&ephemeral, kem_ciphertext), HYBRID_INFO);
    ikm.zeroize();
    aead::open(&key?, body, aad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_of(secret: &StaticSecret) -> [u8; X25519_LEN] {
        X25519PublicKey::from(secret).to_bytes()
    }

    #[test]
    fn ecc_roundtrip_and_wrong_key() {
        let secret = generate_x25519_secret();
        let sealed = seal_ecc(&public_of(&secret), b"hello", b"aad").unwrap();
        assert_eq!(open_ecc(&secret, &sealed, b"aad").unwrap(), b"hello");
        assert!(open_ecc(&generate_x25519_secret(), &sealed, b"aad").is_err());
    }

    #[test]
    fn kyber768_sizes() {
        assert_eq!(kem_public_key_len(), 1184);
        assert_eq!(kem_secret_key_len(), 2400);
        assert_eq!(kem_ciphertext_len(), 1088);
    }

    #[test]
    fn hybrid_roundtrip() {
        let secret = generate_x25519_secret();
        let (kem_public, kem_secret) = generate_kem_keypair();
        let sealed = seal_hybrid(&public_of(&secret), &kem_public, b"", b"aad").unwrap();
        assert_eq!(open_hybrid(&secret, &kem_secret, &sealed, b"aad").unwrap(), b"");
    }

    #[test]
    fn hybrid_needs_both_secrets() {
        let secret = generate_x25519_secret();
        let (kem_public, kem_secret) = generate_kem_keypair();
        let (_, other_kem_secret) = generate_kem_keypair();
        let sealed = seal_hybrid(&public_of(&secret), &kem_public, b"data", b"").unwrap();

        assert!(open_hybrid(&secret, &other_kem_secret, &sealed, b"").is_err());
        assert!(open_hybrid(&generate_x25519_secret(), &kem_secret, &sealed, b"").is_err());
    }

    #[test]
    fn truncated_hybrid_payload_is_rejected() {
        let secret = generate_x25519_secret();
        let (_, kem_secret) = generate_kem_keypair();
        assert!(matches!(
            open_hybrid(&secret, &kem_secret, &[0u8; 40], b""),
            Err(SealError::InvalidFormat(_))
        ));
    }
}

use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};

use crate::crypto::{
    check_version, encoding, format_tagged, hash, kem,
    keys::{KeyAlgorithm, KeyType, PublicKey, SecretKey},
    parse_tagged, CRYPTO_VERSION, SEALED_SECRET_ABBREV, WRAPPED_KEY_ABBREV,
};
use crate::error::{Result, SealError};
use crate::types::SecretValue;

const CIPHERED_HEADER_LEN: usize = 2 + 4 + 2;

/// Encrypted payload together with the public key it was encrypted for.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphered {
    version: u8,
    key_type: KeyType,
    encrypted_at: u32,
    encrypted_by: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Ciphered {
    /// Purpose of the recipient key.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Envelope layout version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// When the payload was encrypted, at second precision.
    pub fn encrypted_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.encrypted_at), 0)
            .single()
            .unwrap_or_default()
    }

    /// Returns `true` when the envelope was encrypted for `public_key`.
    pub fn is_encrypted_by(&self, public_key: &PublicKey) -> bool {
        self.encrypted_by == public_key.to_bytes()
    }

    /// Parses the recipient public key tag.
    pub fn encrypted_by_public_key(&self) -> Result<PublicKey> {
        PublicKey::from_bytes(&self.encrypted_by)
    }

    fn header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(CIPHERED_HEADER_LEN + self.encrypted_by.len());
        header.extend_from_slice(&[self.version, key_type_byte(self.key_type)]);
        header.extend_from_slice(&self.encrypted_at.to_be_bytes());
        header.extend_from_slice(&(self.encrypted_by.len() as u16).to_be_bytes());
        header.extend_from_slice(&self.encrypted_by);
        header
    }

    /// Binary form: `[version, keyType] || u32 time || u16 len || encryptedBy || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header();
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CIPHERED_HEADER_LEN {
            return Err(SealError::InvalidFormat("ciphered data too short".to_owned()));
        }
        let version = bytes[0];
        check_version(version)?;
        let key_type = KeyType::from_byte(bytes[1])?;
        let encrypted_at = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let encrypted_by_len = usize::from(u16::from_be_bytes([bytes[6], bytes[7]]));
        let rest = &bytes[CIPHERED_HEADER_LEN..];
        if rest.len() < encrypted_by_len {
            return Err(SealError::InvalidFormat(
                "ciphered data shorter than its key tag".to_owned(),
            ));
        }
        let (encrypted_by, ciphertext) = rest.split_at(encrypted_by_len);
        let recipient = PublicKey::from_bytes(encrypted_by)?;
        if recipient.key_type() != key_type {
            return Err(SealError::InvalidFormat("ciphered key type mismatch".to_owned()));
        }
        Ok(Self {
            version,
            key_type,
            encrypted_at,
            encrypted_by: encrypted_by.to_vec(),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

impl fmt::Debug for Ciphered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ciphered")
            .field("version", &self.version)
            .field("key_type", &self.key_type)
            .field("encrypted_at", &self.encrypted_at())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

fn key_type_byte(key_type: KeyType) -> u8 {
    key_type.as_char() as u8
}

/// Arbitrary bytes sealed for one public key, with an optional fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    ciphered: Ciphered,
    hash: Option<[u8; hash::HASH_LEN]>,
}

impl SealedSecret {
    /// Underlying envelope.
    pub fn ciphered(&self) -> &Ciphered {
        &self.ciphered
    }

    /// When the value was sealed.
    pub fn encrypted_at(&self) -> DateTime<Utc> {
        self.ciphered.encrypted_at()
    }

    /// Base32 fingerprint, when hashing was enabled.
    pub fn hash(&self) -> Option<String> {
        self.hash.map(|hash| encoding::encode(&hash))
    }

    /// Returns `true` when sealed for `public_key`.
    pub fn is_encrypted_by(&self, public_key: &PublicKey) -> bool {
        self.ciphered.is_encrypted_by(public_key)
    }
}

impl fmt::Display for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = encoding::encode(&self.ciphered.to_bytes());
        let rendered = match self.hash() {
            Some(hash) => format_tagged(
                self.ciphered.key_type,
                SEALED_SECRET_ABBREV,
                &[&hash, &data],
            ),
            None => format_tagged(self.ciphered.key_type, SEALED_SECRET_ABBREV, &[&data]),
        };
        f.write_str(&rendered)
    }
}

impl FromStr for SealedSecret {
    type Err = SealError;

    fn from_str(text: &str) -> Result<Self> {
        let (key_type, parts) = parse_tagged(text, SEALED_SECRET_ABBREV, "sealed secret")?;
        let (hash, data) = match parts.as_slice() {
            [data] => (None, *data),
            [hash, data] => {
                let hash: [u8; hash::HASH_LEN] = encoding::decode(hash)?
                    .try_into()
                    .map_err(|_| SealError::InvalidFormat("sealed secret hash".to_owned()))?;
                (Some(hash), *data)
            }
            _ => {
                return Err(SealError::InvalidFormat(
                    "not a sealed secret string".to_owned(),
                ))
            }
        };
        let ciphered = Ciphered::from_bytes(&encoding::decode(data)?)?;
        if ciphered.key_type != key_type {
            return Err(SealError::InvalidFormat("sealed secret type tag mismatch".to_owned()));
        }
        Ok(Self { ciphered, hash })
    }
}

/// A secret key's bytes sealed for one public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    ciphered: Ciphered,
}

impl WrappedKey {
    /// Underlying envelope.
    pub fn ciphered(&self) -> &Ciphered {
        &self.ciphered
    }

    /// Returns `true` when wrapped for `public_key`.
    pub fn is_encrypted_by(&self, public_key: &PublicKey) -> bool {
        self.ciphered.is_encrypted_by(public_key)
    }

    /// Public key the secret key was wrapped for.
    pub fn encrypted_by_public_key(&self) -> Result<PublicKey> {
        self.ciphered.encrypted_by_public_key()
    }
}

impl fmt::Display for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = encoding::encode(&self.ciphered.to_bytes());
        f.write_str(&format_tagged(
            self.ciphered.key_type,
            WRAPPED_KEY_ABBREV,
            &[&data],
        ))
    }
}

impl FromStr for WrappedKey {
    type Err = SealError;

    fn from_str(text: &str) -> Result<Self> {
        let (key_type, parts) = parse_tagged(text, WRAPPED_KEY_ABBREV, "wrapped key")?;
        let [data] = parts.as_slice() else {
            return Err(SealError::InvalidFormat("not a wrapped key string".to_owned()));
        };
        let ciphered = Ciphered::from_bytes(&encoding::decode(data)?)?;
        if ciphered.key_type != key_type {
            return Err(SealError::InvalidFormat("wrapped key type tag mismatch".to_owned()));
        }
        Ok(Self { ciphered })
    }
}

impl PublicKey {
    /// Encrypts `plaintext` for the holder of this key under a fresh session.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Ciphered> {
        let encrypted_by = self.to_bytes();
        if encrypted_by.len() > usize::from(u16::MAX) {
            return Err(SealError::Crypto("public key too large".to_owned()));
        }
        let encrypted_at = u32::try_from(Utc::now().timestamp())
            .map_err(|_| SealError::Crypto("clock outside the supported range".to_owned()))?;
        let mut ciphered = Ciphered {
            version: CRYPTO_VERSION,
            key_type: self.key_type(),
            encrypted_at,
            encrypted_by,
            ciphertext: Vec::new(),
        };
        let aad = ciphered.header();
        ciphered.ciphertext = match self.algorithm() {
            KeyAlgorithm::Ecc => kem::seal_ecc(self.x25519(), plaintext, &aad)?,
            KeyAlgorithm::PostQuantum => {
                let kem_public = self
                    .kem_public()
                    .ok_or_else(|| SealError::Crypto("missing Kyber public key".to_owned()))?;
                kem::seal_hybrid(self.x25519(), kem_public, plaintext, &aad)?
            }
        };
        Ok(ciphered)
    }

    /// Seals `data`, adding a content fingerprint when `hash_enabled`.
    pub fn encrypt_secret(&self, data: &[u8], hash_enabled: bool) -> Result<SealedSecret> {
        let hash = if hash_enabled {
            Some(hash::content_hash(data)?)
        } else {
            None
        };
        Ok(SealedSecret {
            ciphered: self.encrypt(data)?,
            hash,
        })
    }

    /// Wraps `secret_key` so the holder of this key's secret half can recover it.
    pub fn encrypt_key(&self, secret_key: &SecretKey) -> Result<WrappedKey> {
        let bytes = secret_key.to_bytes()?;
        Ok(WrappedKey {
            ciphered: self.encrypt(bytes.as_bytes())?,
        })
    }
}

impl SecretKey {
    /// Decrypts `ciphered`, failing with [`SealError::KeyMismatch`] when it was
    /// not encrypted for one of this key's public keys.
    pub fn decrypt(&self, ciphered: &Ciphered) -> Result<Vec<u8>> {
        let recipient = if ciphered.is_encrypted_by(self.public_key(false)) {
            KeyAlgorithm::Ecc
        } else if ciphered.is_encrypted_by(self.public_key(true)) {
            KeyAlgorithm::PostQuantum
        } else {
            return Err(SealError::KeyMismatch);
        };
        let aad = ciphered.header();
        match recipient {
            KeyAlgorithm::Ecc => kem::open_ecc(self.x25519(), &ciphered.ciphertext, &aad),
            KeyAlgorithm::PostQuantum => kem::open_hybrid(
                self.x25519(),
                self.kem_secret(),
                &ciphered.ciphertext,
                &aad,
            ),
        }
    }

    /// Opens a sealed secret.
    pub fn decrypt_secret(&self, sealed_secret: &SealedSecret) -> Result<SecretValue> {
        self.decrypt(&sealed_secret.ciphered).map(SecretValue::new)
    }

    /// Unwraps a wrapped secret key.
    pub fn decrypt_key(&self, wrapped_key: &WrappedKey) -> Result<SecretKey> {
        let bytes = crate::crypto::sensitive::SensitiveVec::new(self.decrypt(&wrapped_key.ciphered)?);
        SecretKey::from_bytes(bytes.as_bytes())
    }
}

use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto::{
    check_version, encoding, format_tagged, kem, parse_tagged, sensitive::SensitiveVec,
    CRYPTO_VERSION, PUBLIC_KEY_ABBREV, SECRET_KEY_ABBREV,
};
use crate::error::{Result, SealError};

const PUBLIC_MARKER: u8 = 1;
const SECRET_MARKER: u8 = 0;
const PUBLIC_HEADER_LEN: usize = 4;
const SECRET_HEADER_LEN: usize = 3;

/// Purpose of a key, carried through every serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyType {
    /// Identity key of a user or service environment.
    Environment,
    /// Envelope key owned by one vault.
    Vault,
}

impl KeyType {
    /// Single-character tag used in strings and bytes.
    pub fn as_char(self) -> char {
        match self {
            Self::Environment => 'E',
            Self::Vault => 'V',
        }
    }

    fn as_byte(self) -> u8 {
        self.as_char() as u8
    }

    /// Parses the single-character tag.
    pub fn from_char(tag: char) -> Result<Self> {
        match tag {
            'E' => Ok(Self::Environment),
            'V' => Ok(Self::Vault),
            other => Err(SealError::InvalidFormat(format!("unknown key type '{other}'"))),
        }
    }

    pub(crate) fn from_byte(tag: u8) -> Result<Self> {
        Self::from_char(char::from(tag))
    }
}

/// Recipient algorithm of a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// X25519 only.
    Ecc,
    /// X25519 combined with Kyber768.
    PostQuantum,
}

impl KeyAlgorithm {
    fn as_byte(self) -> u8 {
        match self {
            Self::Ecc => 0,
            Self::PostQuantum => 1,
        }
    }

    fn from_byte(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Ecc),
            1 => Ok(Self::PostQuantum),
            other => Err(SealError::InvalidFormat(format!("unknown key algorithm {other}"))),
        }
    }
}

/// A recipient key. Anything encrypted to it can be opened by the matching [`SecretKey`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key_type: KeyType,
    algorithm: KeyAlgorithm,
    x25519: [u8; kem::X25519_LEN],
    kem_public: Option<Vec<u8>>,
}

impl PublicKey {
    /// Purpose of the key.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Recipient algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Returns `true` for hybrid post-quantum keys.
    pub fn is_post_quantum(&self) -> bool {
        self.algorithm == KeyAlgorithm::PostQuantum
    }

    pub(crate) fn x25519(&self) -> &[u8; kem::X25519_LEN] {
        &self.x25519
    }

    pub(crate) fn kem_public(&self) -> Option<&[u8]> {
        self.kem_public.as_deref()
    }

    /// Binary form: `[version, 1, keyType, algorithm] || material`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let kem_len = self.kem_public.as_ref().map_or(0, Vec::len);
        let mut bytes = Vec::with_capacity(PUBLIC_HEADER_LEN + kem::X25519_LEN + kem_len);
        bytes.extend_from_slice(&[
            CRYPTO_VERSION,
            PUBLIC_MARKER,
            self.key_type.as_byte(),
            self.algorithm.as_byte(),
        ]);
        bytes.extend_from_slice(&self.x25519);
        if let Some(kem_public) = &self.kem_public {
            bytes.extend_from_slice(kem_public);
        }
        bytes
    }

    /// Parses the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PUBLIC_HEADER_LEN {
            return Err(SealError::InvalidFormat("public key too short".to_owned()));
        }
        check_version(bytes[0])?;
        if bytes[1] != PUBLIC_MARKER {
            return Err(SealError::InvalidFormat("not a public key".to_owned()));
        }
        let key_type = KeyType::from_byte(bytes[2])?;
        let algorithm = KeyAlgorithm::from_byte(bytes[3])?;
        let material = &bytes[PUBLIC_HEADER_LEN..];
        let expected_len = match algorithm {
            KeyAlgorithm::Ecc => kem::X25519_LEN,
            KeyAlgorithm::PostQuantum => kem::X25519_LEN + kem::kem_public_key_len(),
        };
        if material.len() != expected_len {
            return Err(SealError::InvalidFormat(format!(
                "public key material must be {expected_len} bytes, got {}",
                material.len()
            )));
        }
        let (x25519, kem_public) = material.split_at(kem::X25519_LEN);
        let x25519: [u8; kem::X25519_LEN] = x25519
            .try_into()
            .map_err(|_| SealError::InvalidFormat("x25519 public key".to_owned()))?;
        Ok(Self {
            key_type,
            algorithm,
            x25519,
            kem_public: (algorithm == KeyAlgorithm::PostQuantum).then(|| kem_public.to_vec()),
        })
    }

    /// Short stable identifier: the first 16 bytes of SHA-256 over the binary form.
    pub fn id(&self) -> [u8; 16] {
        let digest = Sha256::digest(self.to_bytes());
        let mut id = [0_u8; 16];
        id.copy_from_slice(&digest[..16]);
        id
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = encoding::encode(&self.to_bytes());
        f.write_str(&format_tagged(self.key_type, PUBLIC_KEY_ABBREV, &[&encoded]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_type", &self.key_type)
            .field("algorithm", &self.algorithm)
            .field("id", &encoding::encode(&self.id()))
            .finish()
    }
}

impl FromStr for PublicKey {
    type Err = SealError;

    fn from_str(text: &str) -> Result<Self> {
        let (key_type, parts) = parse_tagged(text, PUBLIC_KEY_ABBREV, "public key")?;
        let [payload] = parts.as_slice() else {
            return Err(SealError::InvalidFormat("not a public key string".to_owned()));
        };
        let key = Self::from_bytes(&encoding::decode(payload)?)?;
        if key.key_type != key_type {
            return Err(SealError::InvalidFormat("public key type tag mismatch".to_owned()));
        }
        Ok(key)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// A private key. Its material is zeroized on drop and never logged.
///
/// Both public keys are derived once at construction: the ECC key from the
/// X25519 secret, and the post-quantum key from the X25519 secret plus the
/// stored Kyber768 key pair.
#[derive(Clone)]
pub struct SecretKey {
    key_type: KeyType,
    x25519: StaticSecret,
    kem_public: Vec<u8>,
    kem_secret: SensitiveVec,
    restricted: bool,
    ecc_public: PublicKey,
    pq_public: PublicKey,
}

impl SecretKey {
    /// Generates a fresh random key for `key_type`.
    pub fn generate(key_type: KeyType) -> Self {
        let (kem_public, kem_secret) = kem::generate_kem_keypair();
        Self::assemble(
            key_type,
            kem::generate_x25519_secret(),
            kem_public,
            SensitiveVec::new(kem_secret),
        )
    }

    fn assemble(
        key_type: KeyType,
        x25519: StaticSecret,
        kem_public: Vec<u8>,
        kem_secret: SensitiveVec,
    ) -> Self {
        let x25519_public = X25519PublicKey::from(&x25519).to_bytes();
        let ecc_public = PublicKey {
            key_type,
            algorithm: KeyAlgorithm::Ecc,
            x25519: x25519_public,
            kem_public: None,
        };
        let pq_public = PublicKey {
            key_type,
            algorithm: KeyAlgorithm::PostQuantum,
            x25519: x25519_public,
            kem_public: Some(kem_public.clone()),
        };
        Self {
            key_type,
            x25519,
            kem_public,
            kem_secret,
            restricted: false,
            ecc_public,
            pq_public,
        }
    }

    /// Purpose of the key.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Returns the derived public key: hybrid when `post_quantum`, X25519 otherwise.
    pub fn public_key(&self, post_quantum: bool) -> &PublicKey {
        if post_quantum {
            &self.pq_public
        } else {
            &self.ecc_public
        }
    }

    /// Returns `true` when `public_key` is one of the two derived public keys.
    pub fn matches(&self, public_key: &PublicKey) -> bool {
        *public_key == self.ecc_public || *public_key == self.pq_public
    }

    pub(crate) fn x25519(&self) -> &StaticSecret {
        &self.x25519
    }

    pub(crate) fn kem_secret(&self) -> &[u8] {
        self.kem_secret.as_bytes()
    }

    /// Marks the key as non-serializable. Cannot be undone.
    pub fn restrict_serialization(&mut self) {
        self.restricted = true;
    }

    /// Returns `true` once [`Self::restrict_serialization`] was called.
    pub fn is_serialization_restricted(&self) -> bool {
        self.restricted
    }

    /// Binary form: `[version, 0, keyType] || x25519 || kem public || kem secret`.
    pub fn to_bytes(&self) -> Result<SensitiveVec> {
        if self.restricted {
            return Err(SealError::SerializationRestricted);
        }
        let secret = Zeroizing::new(self.x25519.to_bytes());
        let mut bytes = Vec::with_capacity(
            SECRET_HEADER_LEN + secret.len() + self.kem_public.len() + self.kem_secret.len(),
        );
        bytes.extend_from_slice(&[CRYPTO_VERSION, SECRET_MARKER, self.key_type.as_byte()]);
        bytes.extend_from_slice(secret.as_slice());
        bytes.extend_from_slice(&self.kem_public);
        bytes.extend_from_slice(self.kem_secret.as_bytes());
        Ok(SensitiveVec::new(bytes))
    }

    /// Parses the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SECRET_HEADER_LEN {
            return Err(SealError::InvalidFormat("secret key too short".to_owned()));
        }
        check_version(bytes[0])?;
        if bytes[1] != SECRET_MARKER {
            return Err(SealError::InvalidFormat("not a secret key".to_owned()));
        }
        let key_type = KeyType::from_byte(bytes[2])?;
        let material = &bytes[SECRET_HEADER_LEN..];
        let kem_public_len = kem::kem_public_key_len();
        let expected_len = kem::X25519_LEN + kem_public_len + kem::kem_secret_key_len();
        if material.len() != expected_len {
            return Err(SealError::InvalidFormat(format!(
                "secret key material must be {expected_len} bytes, got {}",
                material.len()
            )));
        }
        let (x25519, rest) = material.split_at(kem::X25519_LEN);
        let (kem_public, kem_secret) = rest.split_at(kem_public_len);
        let x25519: [u8; kem::X25519_LEN] = x25519
            .try_into()
            .map_err(|_| SealError::InvalidFormat("x25519 secret key".to_owned()))?;
        Ok(Self::assemble(
            key_type,
            StaticSecret::from(x25519),
            kem_public.to_vec(),
            SensitiveVec::new(kem_secret.to_vec()),
        ))
    }
}

/// Renders `SEAL_<kt>SK_<base32>`, or nothing when serialization is restricted.
impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bytes() {
            Ok(bytes) => {
                let encoded = encoding::encode(bytes.as_bytes());
                f.write_str(&format_tagged(self.key_type, SECRET_KEY_ABBREV, &[&encoded]))
            }
            Err(_) => Ok(()),
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("key_type", &self.key_type)
            .field("restricted", &self.restricted)
            .finish_non_exhaustive()
    }
}

impl FromStr for SecretKey {
    type Err = SealError;

    fn from_str(text: &str) -> Result<Self> {
        let (key_type, parts) = parse_tagged(text, SECRET_KEY_ABBREV, "secret key")?;
        let [payload] = parts.as_slice() else {
            return Err(SealError::InvalidFormat("not a secret key string".to_owned()));
        };
        let bytes = SensitiveVec::new(encoding::decode(payload)?);
        let key = Self::from_bytes(bytes.as_bytes())?;
        if key.key_type != key_type {
            return Err(SealError::InvalidFormat("secret key type tag mismatch".to_owned()));
        }
        Ok(key)
    }
}

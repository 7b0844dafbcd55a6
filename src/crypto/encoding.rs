//! Text encodings shared by keys, envelopes, and bindings.

use std::io::{Read, Write};

use data_encoding::BASE32_NOPAD;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, SealError};

/// Upper bound on the decompressed JSON behind a serialized string.
pub const MAX_SERIALIZED_LEN: u64 = 1024 * 1024;

/// Encodes bytes as unpadded RFC 4648 base32.
pub fn encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

/// Decodes unpadded RFC 4648 base32.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    BASE32_NOPAD
        .decode(text.as_bytes())
        .map_err(|error| SealError::InvalidFormat(format!("base32: {error}")))
}

/// Serializes a value as JSON, compresses it with zlib, and encodes it as base32.
pub fn serialize<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    Ok(encode(&encoder.finish()?))
}

/// Reverses [`serialize`].
pub fn deserialize<T: DeserializeOwned>(text: &str) -> Result<T> {
    let compressed = decode(text)?;
    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(MAX_SERIALIZED_LEN + 1)
        .read_to_end(&mut json)
        .map_err(|error| SealError::InvalidFormat(format!("zlib: {error}")))?;
    if json.len() as u64 > MAX_SERIALIZED_LEN {
        return Err(SealError::InvalidFormat(
            "serialized payload too large".to_owned(),
        ));
    }
    serde_json::from_slice(&json)
        .map_err(|error| SealError::InvalidFormat(format!("json: {error}")))
}

/// Serde adapter storing a `name -> bytes` map with base64 values.
pub mod base64_map {
    use std::collections::BTreeMap;

    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    /// Serializes byte values as base64 strings.
    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<&str, String> = map
            .iter()
            .map(|(key, value)| (key.as_str(), STANDARD.encode(value)))
            .collect();
        encoded.serialize(serializer)
    }

    /// Deserializes base64 strings back into bytes.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(key, value)| {
                STANDARD
                    .decode(value.as_bytes())
                    .map(|bytes| (key, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

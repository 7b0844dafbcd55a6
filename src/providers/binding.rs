use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::crypto::{encoding, PREFIX};
use crate::error::{Result, SealError};
use crate::providers::BindingRef;

const BINDING_ABBREV: &str = "ESB";

/// Serialized recipe for reproducing an environment's secret key:
/// `SEAL_ESB_<base32(zlib(json))>`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSecretBinding {
    #[serde(rename = "p")]
    provider: String,
    #[serde(rename = "r", with = "encoding::base64_map")]
    reference: BindingRef,
}

impl EnvSecretBinding {
    /// Creates a binding for `provider`.
    pub fn new(provider: impl Into<String>, reference: BindingRef) -> Self {
        Self {
            provider: provider.into(),
            reference,
        }
    }

    /// Provider id.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Provider reference.
    pub fn reference(&self) -> &BindingRef {
        &self.reference
    }
}

impl fmt::Debug for EnvSecretBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSecretBinding")
            .field("provider", &self.provider)
            .field("ref_keys", &self.reference.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for EnvSecretBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = encoding::serialize(self).map_err(|_| fmt::Error)?;
        write!(f, "{PREFIX}_{BINDING_ABBREV}_{data}")
    }
}

impl FromStr for EnvSecretBinding {
    type Err = SealError;

    fn from_str(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('_').collect();
        match parts.as_slice() {
            [prefix, abbrev, data] if *prefix == PREFIX && *abbrev == BINDING_ABBREV => {
                encoding::deserialize(data)
            }
            _ => Err(SealError::InvalidFormat(
                "invalid environment secret binding format".to_owned(),
            )),
        }
    }
}

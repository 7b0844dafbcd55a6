use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Validated vault item name (`\w+`, ASCII word characters).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ItemName(String);

impl ItemName {
    /// Creates a validated item name.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::InvalidName);
        }
        if !name.chars().all(is_word_character) {
            return Err(ValidationError::InvalidCharacter);
        }
        Ok(Self(name.to_owned()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ItemName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ItemName> for String {
    fn from(value: ItemName) -> Self {
        value.0
    }
}

/// Returns `true` for characters allowed in item names.
pub fn is_word_character(character: char) -> bool {
    character.is_ascii_alphanumeric() || character == '_'
}

/// Replaces every character that is not allowed in item names with `_`.
pub fn sanitize_item_name(raw: &str) -> String {
    raw.chars()
        .map(|character| {
            if is_word_character(character) {
                character
            } else {
                '_'
            }
        })
        .collect()
}

/// Secret value wrapper that avoids accidental logging.
pub struct SecretValue {
    inner: Secret<Vec<u8>>,
}

impl SecretValue {
    /// Constructs a secret value from bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Exposes the secret bytes to a closure.
    pub fn expose<F, R>(&self, function: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        function(self.inner.expose_secret())
    }

    /// Copies the secret bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.expose(|bytes| bytes.to_vec())
    }
}

impl Clone for SecretValue {
    fn clone(&self) -> Self {
        Self::new(self.to_vec())
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for SecretValue {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

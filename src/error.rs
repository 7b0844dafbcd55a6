use std::io;

use thiserror::Error;

/// Validation failures for vault item names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Item name is empty.
    #[error("invalid item name: must not be empty")]
    InvalidName,
    /// Item name contains characters outside the word class.
    #[error("invalid character in item name: use only A-Za-z0-9_")]
    InvalidCharacter,
}

/// Top-level errors for keys, vaults, and secret bindings.
#[derive(Debug, Error)]
pub enum SealError {
    /// Serialized key or envelope is malformed.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Serialized key or envelope was produced by a newer version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    /// Vault must be unlocked first.
    #[error("vault is locked")]
    VaultLocked,
    /// No wrapped key of the vault opens with the given secret key.
    #[error("vault is not accessible using the given secret key")]
    NotAccessible,
    /// Ciphertext was not encrypted for the given secret key.
    #[error("secret key does not match the encrypting public key")]
    KeyMismatch,
    /// Key came from a binding and must not be serialized.
    #[error("key serialization is restricted")]
    SerializationRestricted,
    /// Vault was loaded without a backing file.
    #[error("vault is not writable")]
    NotWritable,
    /// Resource was not found.
    #[error("not found")]
    NotFound,
    /// Resource already exists.
    #[error("exists already")]
    ExistsAlready,
    /// No provider is registered under the name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    /// A provider with the same name is already registered.
    #[error("provider already registered: {0}")]
    DuplicateProvider(String),
    /// Provider configuration is invalid or incomplete.
    #[error("service misconfigured: {0}")]
    ServiceMisconfigured(String),
    /// Remote service refused the operation.
    #[error("denied by remote service: {0}")]
    Denied(String),
    /// Remote service could not be reached or failed transiently.
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),
    /// Password did not open the sealed key.
    #[error("invalid password")]
    InvalidPassword,
    /// No password source was available.
    #[error("password not set: provide it through the environment or an interactive terminal")]
    PasswordNotSet,
    /// No secret binding given and no provider could unbind without one.
    #[error("environment secret binding unspecified")]
    BindingUnspecified,
    /// A required provider input is missing.
    #[error("missing required input: {0}")]
    MissingInput(String),
    /// Vault creation requires at least one recipient.
    #[error("at least one recipient public key is required")]
    NoRecipients,
    /// Vault would be left without wrapped keys.
    #[error("vault wrapped keys not found: vault would be inaccessible by any key")]
    NoWrappedKeys,
    /// Vault keys cannot be recipients of other vaults.
    #[error("vault cannot be shared with another vault key")]
    CannotShareWithVault,
    /// Input was syntactically valid but semantically unsupported.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// YAML serialization error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// UTF-8 conversion error.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    /// Cryptography failure.
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// A typed result used across the crate.
pub type Result<T> = std::result::Result<T, SealError>;

/// Generic invalid-input error.
pub const ERROR_CODE_INVALID_INPUT: &str = "E100";
/// Item name validation error.
pub const ERROR_CODE_ITEM_NAME: &str = "E101";
/// Malformed key, envelope, or binding string.
pub const ERROR_CODE_FORMAT: &str = "E102";
/// Serialized data from an unsupported version.
pub const ERROR_CODE_VERSION: &str = "E103";
/// Vault is locked.
pub const ERROR_CODE_LOCKED: &str = "E200";
/// Key cannot open the vault or ciphertext.
pub const ERROR_CODE_ACCESS: &str = "E201";
/// Key or vault cannot be used this way.
pub const ERROR_CODE_RESTRICTED: &str = "E202";
/// Resource lookup failed.
pub const ERROR_CODE_NOT_FOUND: &str = "E300";
/// Resource already exists.
pub const ERROR_CODE_ALREADY_EXISTS: &str = "E301";
/// Provider lookup or registration failed.
pub const ERROR_CODE_PROVIDER: &str = "E400";
/// Provider configuration is wrong.
pub const ERROR_CODE_MISCONFIGURED: &str = "E401";
/// Provider credentials were refused.
pub const ERROR_CODE_DENIED: &str = "E402";
/// Remote provider failed transiently.
pub const ERROR_CODE_UNAVAILABLE: &str = "E403";
/// Password problems.
pub const ERROR_CODE_PASSWORD: &str = "E404";
/// Vault recipient invariants were violated.
pub const ERROR_CODE_INVARIANT: &str = "E500";
/// Filesystem or stream I/O failed.
pub const ERROR_CODE_IO: &str = "E900";
/// Internal serialization/crypto/encoding failure.
pub const ERROR_CODE_INTERNAL: &str = "E999";

const ERROR_EXPLANATION_E100: &str = r#"E100 invalid input

The arguments are syntactically valid but semantically unsupported.

Common fixes:
  - Vault files must end with `.sealvault.yaml` or `.sealvault.yml`.
  - Check provider inputs against the provider argument list."#;
const ERROR_EXPLANATION_E101: &str = r#"E101 invalid item name

Item names must be non-empty and use only:
  A-Z a-z 0-9 _

Examples:
  - Valid: `db_password`, `API_KEY_2`
  - Invalid: `db password`, `api-key`, `db.pass`"#;
const ERROR_EXPLANATION_E102: &str = r#"E102 malformed serialized value

A key, wrapped key, sealed secret, or binding string could not be parsed.

Recovery:
  - Make sure the full string was copied, including the `SEAL_` prefix.
  - Check that a public key was not passed where a secret key is expected."#;
const ERROR_EXPLANATION_E103: &str = r#"E103 unsupported version

The value was written by a newer release.

Recovery:
  - Upgrade to the release that wrote the vault or key."#;
const ERROR_EXPLANATION_E200: &str = r#"E200 vault is locked

Reading secret items or changing access needs an unlocked vault.

Recovery:
  - Unlock the vault with a secret key it was shared with."#;
const ERROR_EXPLANATION_E201: &str = r#"E201 access denied by key

The supplied secret key is not an accessor of the vault, or the ciphertext
was encrypted for a different key.

Recovery:
  - List accessors and compare them with your public key.
  - Ask an accessor to share the vault with your public key."#;
const ERROR_EXPLANATION_E202: &str = r#"E202 restricted operation

The key was reproduced from a secret binding and must not be serialized,
or the vault was loaded without a backing file.

Recovery:
  - Use the environment public key instead of exporting the secret key.
  - Open the vault from its file to modify it."#;
const ERROR_EXPLANATION_E300: &str = r#"E300 resource not found

The referenced vault, item, or credential could not be located."#;
const ERROR_EXPLANATION_E301: &str = r#"E301 resource already exists

The target name is already present and overwrite was not requested.

Recovery:
  - Choose a different name.
  - Or retry with the force option."#;
const ERROR_EXPLANATION_E400: &str = r#"E400 provider error

The secret binding names a provider that is not registered, or a provider
was registered twice, or a required provider input is missing."#;
const ERROR_EXPLANATION_E401: &str = r#"E401 provider misconfigured

The key reference or client configuration is invalid. Fix the configuration;
retrying will not help.

Examples:
  - AWS: `arn:aws:kms:<region>:<account>:key/<key-id>`
  - GCP: `projects/<p>/locations/<l>/keyRings/<r>/cryptoKeys/<k>`
  - Azure: `https://<vault>.vault.azure.net/`"#;
const ERROR_EXPLANATION_E402: &str = r#"E402 denied by remote service

The remote key service rejected the credentials in use.

Recovery:
  - Refresh credentials for the key service.
  - Check that the identity may encrypt and decrypt with the key."#;
const ERROR_EXPLANATION_E403: &str = r#"E403 remote service unavailable

The remote key service could not be reached or failed transiently.

Recovery:
  - Retry later. Nothing was changed locally."#;
const ERROR_EXPLANATION_E404: &str = r#"E404 password error

The password was wrong, or no password source was available.

Recovery:
  - Set `SEALVAULT_ENV_SECRET_PASSWORD` for non-interactive use.
  - Run from an interactive terminal to be prompted."#;
const ERROR_EXPLANATION_E500: &str = r#"E500 vault invariant violated

A vault must keep at least one recipient and may not be shared with a
vault key.

Recovery:
  - Pass at least one environment public key when creating a vault.
  - Do not revoke every accessor."#;
const ERROR_EXPLANATION_E900: &str = r#"E900 I/O failure

Filesystem or stream operations failed.

Recovery:
  - Check file permissions and available disk space."#;
const ERROR_EXPLANATION_E999: &str = r#"E999 internal runtime failure

An internal serialization, decoding, or crypto error occurred.

Recovery:
  - Retry once with the same inputs.
  - If it persists, collect inputs and stderr for diagnosis."#;

const KNOWN_ERROR_CODES: [&str; 17] = [
    ERROR_CODE_INVALID_INPUT,
    ERROR_CODE_ITEM_NAME,
    ERROR_CODE_FORMAT,
    ERROR_CODE_VERSION,
    ERROR_CODE_LOCKED,
    ERROR_CODE_ACCESS,
    ERROR_CODE_RESTRICTED,
    ERROR_CODE_NOT_FOUND,
    ERROR_CODE_ALREADY_EXISTS,
    ERROR_CODE_PROVIDER,
    ERROR_CODE_MISCONFIGURED,
    ERROR_CODE_DENIED,
    ERROR_CODE_UNAVAILABLE,
    ERROR_CODE_PASSWORD,
    ERROR_CODE_INVARIANT,
    ERROR_CODE_IO,
    ERROR_CODE_INTERNAL,
];

/// Returns the stable error code for a runtime error.
pub fn classify_error_code(error: &SealError) -> &'static str {
    match error {
        SealError::Validation(_) => ERROR_CODE_ITEM_NAME,
        SealError::InvalidInput(message) => classify_invalid_input_code(message),
        SealError::InvalidFormat(_) => ERROR_CODE_FORMAT,
        SealError::UnsupportedVersion(_) => ERROR_CODE_VERSION,
        SealError::VaultLocked => ERROR_CODE_LOCKED,
        SealError::NotAccessible | SealError::KeyMismatch => ERROR_CODE_ACCESS,
        SealError::SerializationRestricted | SealError::NotWritable => ERROR_CODE_RESTRICTED,
        SealError::NotFound => ERROR_CODE_NOT_FOUND,
        SealError::ExistsAlready => ERROR_CODE_ALREADY_EXISTS,
        SealError::UnknownProvider(_)
        | SealError::DuplicateProvider(_)
        | SealError::BindingUnspecified
        | SealError::MissingInput(_) => ERROR_CODE_PROVIDER,
        SealError::ServiceMisconfigured(_) => ERROR_CODE_MISCONFIGURED,
        SealError::Denied(_) => ERROR_CODE_DENIED,
        SealError::RemoteUnavailable(_) => ERROR_CODE_UNAVAILABLE,
        SealError::InvalidPassword | SealError::PasswordNotSet => ERROR_CODE_PASSWORD,
        SealError::NoRecipients | SealError::NoWrappedKeys | SealError::CannotShareWithVault => {
            ERROR_CODE_INVARIANT
        }
        SealError::Io(_) => ERROR_CODE_IO,
        SealError::Json(_) | SealError::Yaml(_) | SealError::Utf8(_) | SealError::Crypto(_) => {
            ERROR_CODE_INTERNAL
        }
    }
}

fn classify_invalid_input_code(message: &str) -> &'static str {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not found") || lowered.contains("does not exist") {
        return ERROR_CODE_NOT_FOUND;
    }
    ERROR_CODE_INVALID_INPUT
}

/// Returns `true` when retrying the same call may succeed.
pub fn is_transient(error: &SealError) -> bool {
    matches!(error, SealError::RemoteUnavailable(_))
}

/// Normalizes a user-provided error code for lookups.
pub fn normalize_error_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Returns an explanation block for a known error code.
pub fn explain_error_code(raw: &str) -> Option<&'static str> {
    let normalized = normalize_error_code(raw);
    match normalized.as_str() {
        ERROR_CODE_INVALID_INPUT => Some(ERROR_EXPLANATION_E100),
        ERROR_CODE_ITEM_NAME => Some(ERROR_EXPLANATION_E101),
        ERROR_CODE_FORMAT => Some(ERROR_EXPLANATION_E102),
        ERROR_CODE_VERSION => Some(ERROR_EXPLANATION_E103),
        ERROR_CODE_LOCKED => Some(ERROR_EXPLANATION_E200),
        ERROR_CODE_ACCESS => Some(ERROR_EXPLANATION_E201),
        ERROR_CODE_RESTRICTED => Some(ERROR_EXPLANATION_E202),
        ERROR_CODE_NOT_FOUND => Some(ERROR_EXPLANATION_E300),
        ERROR_CODE_ALREADY_EXISTS => Some(ERROR_EXPLANATION_E301),
        ERROR_CODE_PROVIDER => Some(ERROR_EXPLANATION_E400),
        ERROR_CODE_MISCONFIGURED => Some(ERROR_EXPLANATION_E401),
        ERROR_CODE_DENIED => Some(ERROR_EXPLANATION_E402),
        ERROR_CODE_UNAVAILABLE => Some(ERROR_EXPLANATION_E403),
        ERROR_CODE_PASSWORD => Some(ERROR_EXPLANATION_E404),
        ERROR_CODE_INVARIANT => Some(ERROR_EXPLANATION_E500),
        ERROR_CODE_IO => Some(ERROR_EXPLANATION_E900),
        ERROR_CODE_INTERNAL => Some(ERROR_EXPLANATION_E999),
        _ => None,
    }
}

/// Stable list of explainable error codes.
pub fn known_error_codes() -> &'static [&'static str] {
    &KNOWN_ERROR_CODES
}

#[cfg(test)]
mod unit_tests {
    use super::{
        classify_error_code, explain_error_code, is_transient, known_error_codes, SealError,
        ERROR_CODE_ACCESS, ERROR_CODE_DENIED, ERROR_CODE_MISCONFIGURED, ERROR_CODE_NOT_FOUND,
        ERROR_CODE_UNAVAILABLE,
    };

    #[test]
    fn access_errors_share_one_code() {
        assert_eq!(classify_error_code(&SealError::KeyMismatch), ERROR_CODE_ACCESS);
        assert_eq!(classify_error_code(&SealError::NotAccessible), ERROR_CODE_ACCESS);
    }

    #[test]
    fn provider_failures_are_distinguishable() {
        let misconfigured = SealError::ServiceMisconfigured("bad arn".to_owned());
        let denied = SealError::Denied("403".to_owned());
        let unavailable = SealError::RemoteUnavailable("timeout".to_owned());
        assert_eq!(classify_error_code(&misconfigured), ERROR_CODE_MISCONFIGURED);
        assert_eq!(classify_error_code(&denied), ERROR_CODE_DENIED);
        assert_eq!(classify_error_code(&unavailable), ERROR_CODE_UNAVAILABLE);
        assert!(is_transient(&unavailable));
        assert!(!is_transient(&denied));
    }

    #[test]
    fn classify_not_found_message_from_invalid_input() {
        let error = SealError::InvalidInput("file `a.yaml` does not exist".to_owned());
        assert_eq!(classify_error_code(&error), ERROR_CODE_NOT_FOUND);
    }

    #[test]
    fn explain_misconfigured_code_lists_key_shapes() {
        let explanation = explain_error_code("e401").unwrap();
        assert!(explanation.contains("arn:aws:kms"));
        assert!(explanation.contains("vault.azure.net"));
    }

    #[test]
    fn explain_unknown_code_returns_none() {
        assert!(explain_error_code("e000").is_none());
    }

    #[test]
    fn every_known_code_is_explained() {
        for code in known_error_codes() {
            assert!(explain_error_code(code).is_some(), "missing explanation for {code}");
        }
    }
}

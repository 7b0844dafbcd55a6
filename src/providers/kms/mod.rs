//! Remote key-management providers (AWS KMS, Cloud KMS, Azure Key Vault).
//!
//! The secret key is sealed locally under a random data key, and only that
//! data key goes through the key-management service. Binding may instead
//! wrap the data key with a caller-supplied RSA public key so no network call
//! is needed; unbinding always goes through the service.

use std::{fmt, path::Path, sync::Arc};

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use regex::Regex;
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, Oaep, RsaPublicKey};
use sha2::Sha256;

use crate::crypto::{aead, sensitive::SensitiveBytes32, sensitive::SensitiveVec};
use crate::error::{Result, SealError};
use crate::providers::{
    optional_input, required_ref, BindingRef, ProviderArg, ProviderInputs, SecretBindingProvider,
    SEALED_KEY_REF,
};

#[cfg(feature = "aws-kms")]
mod aws;
#[cfg(feature = "azure-kms")]
mod azure;
#[cfg(feature = "gcp-kms")]
mod gcp;
#[cfg(any(feature = "gcp-kms", feature = "azure-kms"))]
mod http;
#[cfg(feature = "aws-kms")]
mod rt;

#[cfg(feature = "aws-kms")]
pub use aws::AwsKmsClient;
#[cfg(feature = "azure-kms")]
pub use azure::AzureKeyVaultClient;
#[cfg(feature = "gcp-kms")]
pub use gcp::GcpKmsClient;

/// Ref entry holding the service-wrapped data key.
pub const WRAPPED_DATA_KEY_REF: &str = "dek";

const RSA_PUBKEY_INPUT: &str = "rsa-pubkey";
const DATA_KEY_AAD: &[u8] = b"sealvault/kms-binding/v1";

const AWS_ARN: &str = "arn";
const AWS_ALG: &str = "alg";
const AWS_SYMMETRIC_ALGORITHM: &str = "SYMMETRIC_DEFAULT";
/// AWS algorithm recorded for local RSA wrapping.
pub const AWS_RSA_ALGORITHM: &str = "RSAES_OAEP_SHA_256";

const GCP_RESOURCE_NAME: &str = "resource-name";
const GCP_SYMMETRIC: &str = "sym";
const GCP_SYMMETRIC_ALGORITHM: &str = "GOOGLE_SYMMETRIC_ENCRYPTION";
const GCP_RSA_ALGORITHM: &str = "RSA_DECRYPT_OAEP_SHA256";

const AZURE_VAULT_URL: &str = "vault-url";
const AZURE_KEY_NAME: &str = "key-name";
const AZURE_KEY_VERSION: &str = "key-version";
/// Azure Key Vault algorithm used for wrapping.
pub const AZURE_ALGORITHM: &str = "RSA-OAEP-256";

static AWS_ARN_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^arn:aws:kms:[a-z0-9-]+:[0-9]+:key/[a-z0-9-]+$").ok());
static AZURE_VAULT_URL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^https://[a-z0-9-]+\.vault\.azure\.net/$").ok());

const RSA_ARG: ProviderArg = ProviderArg {
    id: RSA_PUBKEY_INPUT,
    name: "RSA public key",
    required: false,
    sensitive: false,
    description: "RSA public key (file path or PEM content) for offline binding; only RSA OAEP SHA-256 is used",
};

const AWS_ARGS: &[ProviderArg] = &[
    ProviderArg {
        id: AWS_ARN,
        name: "ARN",
        required: true,
        sensitive: false,
        description: "ARN of the AWS KMS key to use",
    },
    ProviderArg {
        id: AWS_ALG,
        name: "Algorithm",
        required: false,
        sensitive: false,
        description: "KMS encryption algorithm (defaults to SYMMETRIC_DEFAULT)",
    },
    RSA_ARG,
];

const GCP_ARGS: &[ProviderArg] = &[
    ProviderArg {
        id: GCP_RESOURCE_NAME,
        name: "Resource Name",
        required: true,
        sensitive: false,
        description: "Resource name of the Cloud KMS key to use",
    },
    RSA_ARG,
];

const AZURE_ARGS: &[ProviderArg] = &[
    ProviderArg {
        id: AZURE_VAULT_URL,
        name: "Vault URL",
        required: true,
        sensitive: false,
        description: "URL of the Azure Key Vault (e.g. https://myvault.vault.azure.net/)",
    },
    ProviderArg {
        id: AZURE_KEY_NAME,
        name: "Key Name",
        required: true,
        sensitive: false,
        description: "Name of the key in the Azure Key Vault",
    },
    ProviderArg {
        id: AZURE_KEY_VERSION,
        name: "Key Version",
        required: false,
        sensitive: false,
        description: "Key version (latest when omitted)",
    },
    RSA_ARG,
];

/// Supported key-management services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmsService {
    /// AWS Key Management Service.
    Aws,
    /// Google Cloud Key Management Service.
    Gcp,
    /// Azure Key Vault.
    Azure,
}

impl KmsService {
    /// Every service, in default registration order.
    pub const ALL: [Self; 3] = [Self::Aws, Self::Gcp, Self::Azure];

    /// Provider id.
    pub fn id(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Aws => "AWS KMS",
            Self::Gcp => "GCP KMS",
            Self::Azure => "Azure Key Vault",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Aws => "AWS Key Management Service",
            Self::Gcp => "Google Cloud Key Management Service",
            Self::Azure => "Azure Key Vault (RSA keys with RSA-OAEP-256)",
        }
    }

    fn args(self) -> &'static [ProviderArg] {
        match self {
            Self::Aws => AWS_ARGS,
            Self::Gcp => GCP_ARGS,
            Self::Azure => AZURE_ARGS,
        }
    }
}

impl fmt::Display for KmsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated reference to a remote key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsKeyRef {
    /// AWS KMS key.
    Aws {
        /// Key ARN.
        arn: String,
        /// Region parsed from the ARN.
        region: String,
    },
    /// Cloud KMS key or key version.
    Gcp {
        /// Full resource name.
        resource_name: String,
        /// Symmetric key (no `cryptoKeyVersions/` segment).
        symmetric: bool,
    },
    /// Azure Key Vault key.
    Azure {
        /// Vault URL with trailing slash.
        vault_url: String,
        /// Key name.
        key_name: String,
        /// Key version, latest when absent.
        key_version: Option<String>,
    },
}

impl KmsKeyRef {
    /// Validates an AWS KMS key ARN.
    pub fn aws(arn: &str) -> Result<Self> {
        let valid = AWS_ARN_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(arn));
        if !valid {
            return Err(SealError::ServiceMisconfigured(format!(
                "invalid AWS KMS ARN: {arn}"
            )));
        }
        let region = arn.split(':').nth(3).unwrap_or_default().to_owned();
        Ok(Self::Aws {
            arn: arn.to_owned(),
            region,
        })
    }

    /// Validates a Cloud KMS resource name for a symmetric or asymmetric key.
    pub fn gcp(resource_name: &str, symmetric: bool) -> Result<Self> {
        let well_formed = resource_name.starts_with("projects/")
            && resource_name.contains("locations/")
            && resource_name.contains("keyRings/")
            && resource_name.contains("cryptoKeys/");
        let versioned = resource_name.contains("cryptoKeyVersions/");
        if !well_formed || symmetric == versioned {
            return Err(SealError::ServiceMisconfigured(format!(
                "invalid Cloud KMS resource name: {resource_name}"
            )));
        }
        Ok(Self::Gcp {
            resource_name: resource_name.to_owned(),
            symmetric,
        })
    }

    /// Validates an Azure Key Vault key location.
    pub fn azure(vault_url: &str, key_name: &str, key_version: Option<&str>) -> Result<Self> {
        let valid_url = AZURE_VAULT_URL_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(vault_url));
        if !valid_url {
            return Err(SealError::ServiceMisconfigured(format!(
                "invalid Azure Key Vault URL: {vault_url}"
            )));
        }
        if key_name.is_empty() {
            return Err(SealError::MissingInput(AZURE_KEY_NAME.to_owned()));
        }
        Ok(Self::Azure {
            vault_url: vault_url.to_owned(),
            key_name: key_name.to_owned(),
            key_version: key_version
                .filter(|version| !version.is_empty())
                .map(str::to_owned),
        })
    }

    /// Service hosting the key.
    pub fn service(&self) -> KmsService {
        match self {
            Self::Aws { .. } => KmsService::Aws,
            Self::Gcp { .. } => KmsService::Gcp,
            Self::Azure { .. } => KmsService::Azure,
        }
    }
}

/// Remote encrypt/decrypt under a server-side key.
///
/// Calls block until the service answers. Implementations never retry.
pub trait KmsClient: Send + Sync {
    /// Encrypts `plaintext` under `key`.
    fn encrypt(&self, key: &KmsKeyRef, plaintext: &[u8], algorithm: &str) -> Result<Vec<u8>>;

    /// Decrypts `ciphertext` under `key`.
    fn decrypt(&self, key: &KmsKeyRef, ciphertext: &[u8], algorithm: &str) -> Result<Vec<u8>>;
}

/// Client used when no service client is compiled in or configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredKmsClient;

impl UnconfiguredKmsClient {
    fn unavailable(key: &KmsKeyRef) -> SealError {
        let feature = match key.service() {
            KmsService::Aws => "aws-kms",
            KmsService::Gcp => "gcp-kms",
            KmsService::Azure => "azure-kms",
        };
        SealError::ServiceMisconfigured(format!(
            "{} client is not available; build with the '{feature}' feature",
            key.service()
        ))
    }
}

impl KmsClient for UnconfiguredKmsClient {
    fn encrypt(&self, key: &KmsKeyRef, _plaintext: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        Err(Self::unavailable(key))
    }

    fn decrypt(&self, key: &KmsKeyRef, _ciphertext: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        Err(Self::unavailable(key))
    }
}

/// Dispatches each call to the client configured for the key's service.
#[derive(Default)]
pub struct ServiceKmsClient {
    aws: Option<Arc<dyn KmsClient>>,
    gcp: Option<Arc<dyn KmsClient>>,
    azure: Option<Arc<dyn KmsClient>>,
}

impl ServiceKmsClient {
    /// Router with every service compiled into this build.
    pub fn from_features() -> Self {
        #[allow(unused_mut)]
        let mut router = Self::default();
        #[cfg(feature = "aws-kms")]
        {
            router = router.with(KmsService::Aws, Arc::new(AwsKmsClient::new()));
        }
        #[cfg(feature = "gcp-kms")]
        {
            router = router.with(KmsService::Gcp, Arc::new(GcpKmsClient::from_env()));
        }
        #[cfg(feature = "azure-kms")]
        {
            router = router.with(KmsService::Azure, Arc::new(AzureKeyVaultClient::from_env()));
        }
        router
    }

    /// Routes `service` to `client`.
    pub fn with(mut self, service: KmsService, client: Arc<dyn KmsClient>) -> Self {
        match service {
            KmsService::Aws => self.aws = Some(client),
            KmsService::Gcp => self.gcp = Some(client),
            KmsService::Azure => self.azure = Some(client),
        }
        self
    }

    fn client(&self, key: &KmsKeyRef) -> Result<&dyn KmsClient> {
        let client = match key.service() {
            KmsService::Aws => self.aws.as_deref(),
            KmsService::Gcp => self.gcp.as_deref(),
            KmsService::Azure => self.azure.as_deref(),
        };
        client.ok_or_else(|| UnconfiguredKmsClient::unavailable(key))
    }
}

impl KmsClient for ServiceKmsClient {
    fn encrypt(&self, key: &KmsKeyRef, plaintext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        self.client(key)?.encrypt(key, plaintext, algorithm)
    }

    fn decrypt(&self, key: &KmsKeyRef, ciphertext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        self.client(key)?.decrypt(key, ciphertext, algorithm)
    }
}

/// Maps an HTTP status from a key-management service onto the error taxonomy.
pub fn error_for_status(service: KmsService, status: u16, body: &str) -> SealError {
    let message = format!("{service} returned {status}: {body}");
    match status {
        401 | 403 => SealError::Denied(message),
        404 => SealError::NotFound,
        400..=499 => SealError::ServiceMisconfigured(message),
        _ => SealError::RemoteUnavailable(message),
    }
}

/// Binds secret keys through one key-management service.
pub struct KmsProvider {
    service: KmsService,
    client: Arc<dyn KmsClient>,
}

impl KmsProvider {
    /// Creates the provider for `service`.
    pub fn new(service: KmsService, client: Arc<dyn KmsClient>) -> Self {
        Self { service, client }
    }

    /// Service this provider talks to.
    pub fn service(&self) -> KmsService {
        self.service
    }

    fn wrap_data_key(
        &self,
        data_key: &SensitiveBytes32,
        inputs: &ProviderInputs,
        reference: &mut BindingRef,
    ) -> Result<Vec<u8>> {
        let rsa_public_key = optional_input(inputs, RSA_PUBKEY_INPUT);
        match self.service {
            KmsService::Aws => {
                let key = KmsKeyRef::aws(inputs.get(AWS_ARN).map_or("", String::as_str))?;
                let (algorithm, wrapped) = match rsa_public_key {
                    Some(pem) => (AWS_RSA_ALGORITHM, rsa_encrypt(data_key.as_bytes(), pem)?),
                    None => {
                        let algorithm =
                            optional_input(inputs, AWS_ALG).unwrap_or(AWS_SYMMETRIC_ALGORITHM);
                        let wrapped = self.client.encrypt(&key, data_key.as_bytes(), algorithm)?;
                        (algorithm, wrapped)
                    }
                };
                if let KmsKeyRef::Aws { arn, .. } = key {
                    reference.insert(AWS_ARN.to_owned(), arn.into_bytes());
                }
                reference.insert(AWS_ALG.to_owned(), algorithm.as_bytes().to_vec());
                Ok(wrapped)
            }
            KmsService::Gcp => {
                let symmetric = rsa_public_key.is_none();
                let resource_name = inputs.get(GCP_RESOURCE_NAME).map_or("", String::as_str);
                let key = KmsKeyRef::gcp(resource_name, symmetric)?;
                let wrapped = match rsa_public_key {
                    Some(pem) => rsa_encrypt(data_key.as_bytes(), pem)?,
                    None => self
                        .client
                        .encrypt(&key, data_key.as_bytes(), GCP_SYMMETRIC_ALGORITHM)?,
                };
                reference.insert(
                    GCP_RESOURCE_NAME.to_owned(),
                    resource_name.as_bytes().to_vec(),
                );
                reference.insert(GCP_SYMMETRIC.to_owned(), vec![u8::from(symmetric)]);
                Ok(wrapped)
            }
            KmsService::Azure => {
                let key = KmsKeyRef::azure(
                    inputs.get(AZURE_VAULT_URL).map_or("", String::as_str),
                    inputs.get(AZURE_KEY_NAME).map_or("", String::as_str),
                    optional_input(inputs, AZURE_KEY_VERSION),
                )?;
                let wrapped = match rsa_public_key {
                    Some(pem) => rsa_encrypt(data_key.as_bytes(), pem)?,
                    None => self.client.encrypt(&key, data_key.as_bytes(), AZURE_ALGORITHM)?,
                };
                if let KmsKeyRef::Azure {
                    vault_url,
                    key_name,
                    key_version,
                } = key
                {
                    reference.insert(AZURE_VAULT_URL.to_owned(), vault_url.into_bytes());
                    reference.insert(AZURE_KEY_NAME.to_owned(), key_name.into_bytes());
                    if let Some(version) = key_version {
                        reference.insert(AZURE_KEY_VERSION.to_owned(), version.into_bytes());
                    }
                }
                Ok(wrapped)
            }
        }
    }

    fn key_from_reference(&self, reference: &BindingRef) -> Result<(KmsKeyRef, String)> {
        match self.service {
            KmsService::Aws => {
                let key = KmsKeyRef::aws(&ref_text(reference, AWS_ARN)?)?;
                let algorithm = ref_text(reference, AWS_ALG).map_err(|_| {
                    SealError::ServiceMisconfigured("invalid AWS KMS algorithm".to_owned())
                })?;
                Ok((key, algorithm))
            }
            KmsService::Gcp => {
                let symmetric = match reference.get(GCP_SYMMETRIC).map(Vec::as_slice) {
                    Some([flag]) => *flag == 1,
                    _ => {
                        return Err(SealError::ServiceMisconfigured(
                            "invalid Cloud KMS algorithm".to_owned(),
                        ))
                    }
                };
                let key = KmsKeyRef::gcp(&ref_text(reference, GCP_RESOURCE_NAME)?, symmetric)?;
                let algorithm = if symmetric {
                    GCP_SYMMETRIC_ALGORITHM
                } else {
                    GCP_RSA_ALGORITHM
                };
                Ok((key, algorithm.to_owned()))
            }
            KmsService::Azure => {
                let version = reference
                    .get(AZURE_KEY_VERSION)
                    .map(|version| String::from_utf8_lossy(version).into_owned());
                let key = KmsKeyRef::azure(
                    &ref_text(reference, AZURE_VAULT_URL)?,
                    &ref_text(reference, AZURE_KEY_NAME)?,
                    version.as_deref(),
                )?;
                Ok((key, AZURE_ALGORITHM.to_owned()))
            }
        }
    }
}

impl SecretBindingProvider for KmsProvider {
    fn id(&self) -> &str {
        self.service.id()
    }

    fn name(&self) -> &str {
        self.service.name()
    }

    fn description(&self) -> &str {
        self.service.description()
    }

    fn args(&self) -> &[ProviderArg] {
        self.service.args()
    }

    fn bind(&self, secret_key: &[u8], inputs: &ProviderInputs) -> Result<BindingRef> {
        let data_key = aead::generate_key();
        let mut reference = BindingRef::new();
        let wrapped = self.wrap_data_key(&data_key, inputs, &mut reference)?;
        let sealed = aead::seal(&data_key, secret_key, DATA_KEY_AAD)?;
        reference.insert(WRAPPED_DATA_KEY_REF.to_owned(), wrapped);
        reference.insert(SEALED_KEY_REF.to_owned(), sealed);
        tracing::debug!(service = %self.service, "secret key wrapped");
        Ok(reference)
    }

    fn unbind(&self, reference: &BindingRef) -> Result<SensitiveVec> {
        let (key, algorithm) = self.key_from_reference(reference)?;
        let sealed = required_ref(reference, SEALED_KEY_REF)?;
        let wrapped = required_ref(reference, WRAPPED_DATA_KEY_REF)?;

        let data_key = SensitiveVec::new(self.client.decrypt(&key, wrapped, &algorithm)?);
        let data_key = SensitiveBytes32::from_slice(data_key.as_bytes()).ok_or_else(|| {
            SealError::Crypto(format!("{} returned a malformed data key", self.service))
        })?;
        aead::open(&data_key, sealed, DATA_KEY_AAD).map(SensitiveVec::new)
    }
}

fn ref_text(reference: &BindingRef, key: &str) -> Result<String> {
    let bytes = required_ref(reference, key)?;
    String::from_utf8(bytes.to_vec()).map_err(SealError::from)
}

/// Encrypts `plaintext` with RSA-OAEP-SHA256 under a PEM public key, given
/// inline or as a path to a PEM file.
pub fn rsa_encrypt(plaintext: &[u8], rsa_public_key: &str) -> Result<Vec<u8>> {
    let pem = if Path::new(rsa_public_key).is_file() {
        std::fs::read_to_string(rsa_public_key).map_err(|error| {
            SealError::InvalidInput(format!(
                "failed to read RSA public key from {rsa_public_key}: {error}"
            ))
        })?
    } else {
        rsa_public_key.to_owned()
    };
    let public_key = RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|_| SealError::InvalidInput("invalid RSA public key".to_owned()))?;
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|error| SealError::Crypto(format!("RSA encryption failed: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_arn_validation_and_region() {
        let key = KmsKeyRef::aws("arn:aws:kms:eu-west-1:123456789012:key/0a1b-2c3d").unwrap();
        assert_eq!(
            key,
            KmsKeyRef::Aws {
                arn: "arn:aws:kms:eu-west-1:123456789012:key/0a1b-2c3d".to_owned(),
                region: "eu-west-1".to_owned(),
            }
        );
        for arn in [
            "",
            "arn:aws:kms:eu-west-1:123:alias/mine",
            "arn:aws:s3:eu-west-1:123:key/abc",
            "arn:aws:kms:eu-west-1:123:key/ABC",
        ] {
            assert!(matches!(
                KmsKeyRef::aws(arn),
                Err(SealError::ServiceMisconfigured(_))
            ));
        }
    }

    #[test]
    fn gcp_resource_name_must_match_key_kind() {
        let symmetric = "projects/p/locations/global/keyRings/r/cryptoKeys/k";
        let asymmetric = "projects/p/locations/global/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1";
        assert!(KmsKeyRef::gcp(symmetric, true).is_ok());
        assert!(KmsKeyRef::gcp(asymmetric, false).is_ok());
        assert!(KmsKeyRef::gcp(symmetric, false).is_err());
        assert!(KmsKeyRef::gcp(asymmetric, true).is_err());
        assert!(KmsKeyRef::gcp("locations/global/keyRings/r/cryptoKeys/k", true).is_err());
    }

    #[test]
    fn azure_vault_url_validation() {
        assert!(KmsKeyRef::azure("https://my-vault.vault.azure.net/", "key", None).is_ok());
        assert!(matches!(
            KmsKeyRef::azure("https://my-vault.vault.azure.net", "key", None),
            Err(SealError::ServiceMisconfigured(_))
        ));
        assert!(matches!(
            KmsKeyRef::azure("https://my-vault.vault.azure.net/", "", None),
            Err(SealError::MissingInput(_))
        ));
    }

    #[test]
    fn status_codes_map_to_error_families() {
        assert!(matches!(
            error_for_status(KmsService::Gcp, 403, ""),
            SealError::Denied(_)
        ));
        assert!(matches!(
            error_for_status(KmsService::Gcp, 404, ""),
            SealError::NotFound
        ));
        assert!(matches!(
            error_for_status(KmsService::Azure, 400, ""),
            SealError::ServiceMisconfigured(_)
        ));
        assert!(matches!(
            error_for_status(KmsService::Azure, 503, ""),
            SealError::RemoteUnavailable(_)
        ));
    }

    #[test]
    fn unconfigured_client_names_the_missing_feature() {
        let key = KmsKeyRef::gcp("projects/p/locations/l/keyRings/r/cryptoKeys/k", true).unwrap();
        let error = UnconfiguredKmsClient.encrypt(&key, b"x", "").unwrap_err();
        assert!(error.to_string().contains("gcp-kms"));
    }

    #[test]
    fn invalid_rsa_key_is_rejected() {
        assert!(matches!(
            rsa_encrypt(b"x", "-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----"),
            Err(SealError::InvalidInput(_))
        ));
    }
}

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::json;

use crate::error::{Result, SealError};
use crate::providers::kms::{
    http::{response_field, BearerClient},
    KmsClient, KmsKeyRef, KmsService,
};

const KEYS_API_VERSION: &str = "7.4";

/// Azure Key Vault keys REST client.
///
/// Reads its bearer token from `AZURE_KEYVAULT_ACCESS_TOKEN`.
pub struct AzureKeyVaultClient {
    http: BearerClient,
}

impl AzureKeyVaultClient {
    /// Client configured from the environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var("AZURE_KEYVAULT_ACCESS_TOKEN").ok())
    }

    /// Client with an explicit token.
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: BearerClient::new(KmsService::Azure, token),
        }
    }

    fn key_operation(
        &self,
        key: &KmsKeyRef,
        operation: &str,
        algorithm: &str,
        value: &[u8],
    ) -> Result<Vec<u8>> {
        let KmsKeyRef::Azure {
            vault_url,
            key_name,
            key_version,
        } = key
        else {
            return Err(SealError::ServiceMisconfigured(
                "Azure Key Vault client received a foreign key reference".to_owned(),
            ));
        };
        let key_path = match key_version {
            Some(version) => format!("{key_name}/{version}"),
            None => key_name.clone(),
        };
        let url = format!("{vault_url}keys/{key_path}/{operation}?api-version={KEYS_API_VERSION}");
        let payload = json!({
            "alg": algorithm,
            "value": URL_SAFE_NO_PAD.encode(value),
        });
        let response = self.http.post_json(&url, &payload)?;
        URL_SAFE_NO_PAD
            .decode(response_field(KmsService::Azure, &response, "value")?)
            .map_err(|error| SealError::RemoteUnavailable(format!("Azure Key Vault payload: {error}")))
    }
}

impl KmsClient for AzureKeyVaultClient {
    fn encrypt(&self, key: &KmsKeyRef, plaintext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        self.key_operation(key, "encrypt", algorithm, plaintext)
    }

    fn decrypt(&self, key: &KmsKeyRef, ciphertext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        self.key_operation(key, "decrypt", algorithm, ciphertext)
    }
}

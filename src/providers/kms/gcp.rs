use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};

use crate::error::{Result, SealError};
use crate::providers::kms::{
    http::{response_field, BearerClient},
    KmsClient, KmsKeyRef, KmsService,
};

const KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com/v1";

/// Cloud KMS REST client.
///
/// Reads its bearer token from `GOOGLE_OAUTH_ACCESS_TOKEN` and an optional
/// endpoint override from `SEALVAULT_GCP_KMS_ENDPOINT`.
pub struct GcpKmsClient {
    http: BearerClient,
    endpoint: String,
}

impl GcpKmsClient {
    /// Client configured from the environment.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("SEALVAULT_GCP_KMS_ENDPOINT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| KMS_ENDPOINT.to_owned());
        Self::new(std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok(), endpoint)
    }

    /// Client with an explicit token and endpoint.
    pub fn new(token: Option<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: BearerClient::new(KmsService::Gcp, token),
            endpoint: endpoint.into(),
        }
    }

    fn call(
        &self,
        key: &KmsKeyRef,
        action: &str,
        field: &str,
        input: &[u8],
        output: &str,
    ) -> Result<Vec<u8>> {
        let KmsKeyRef::Gcp { resource_name, .. } = key else {
            return Err(SealError::ServiceMisconfigured(
                "Cloud KMS client received a foreign key reference".to_owned(),
            ));
        };
        let url = format!(
            "{}/{resource_name}:{action}",
            self.endpoint.trim_end_matches('/')
        );
        let mut body = Map::new();
        body.insert(field.to_owned(), Value::String(STANDARD.encode(input)));
        let response = self.http.post_json(&url, &Value::Object(body))?;
        STANDARD
            .decode(response_field(KmsService::Gcp, &response, output)?)
            .map_err(|error| SealError::RemoteUnavailable(format!("Cloud KMS payload: {error}")))
    }
}

impl KmsClient for GcpKmsClient {
    fn encrypt(&self, key: &KmsKeyRef, plaintext: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        self.call(key, "encrypt", "plaintext", plaintext, "ciphertext")
    }

    fn decrypt(&self, key: &KmsKeyRef, ciphertext: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        let action = match key {
            KmsKeyRef::Gcp {
                symmetric: false, ..
            } => "asymmetricDecrypt",
            _ => "decrypt",
        };
        self.call(key, action, "ciphertext", ciphertext, "plaintext")
    }
}

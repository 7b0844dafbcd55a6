use aws_sdk_kms::{
    error::{DisplayErrorContext, ProvideErrorMetadata},
    primitives::Blob,
    types::EncryptionAlgorithmSpec,
    Client,
};

use crate::error::{Result, SealError};
use crate::providers::kms::{rt, KmsClient, KmsKeyRef};

/// AWS KMS client using the default credential chain, scoped to the ARN's region.
#[derive(Debug, Default, Clone, Copy)]
pub struct AwsKmsClient;

impl AwsKmsClient {
    /// Creates the client. Credentials are resolved on each call.
    pub fn new() -> Self {
        Self
    }
}

fn arn_and_region(key: &KmsKeyRef) -> Result<(String, String)> {
    match key {
        KmsKeyRef::Aws { arn, region } => Ok((arn.clone(), region.clone())),
        _ => Err(SealError::ServiceMisconfigured(
            "AWS KMS client received a foreign key reference".to_owned(),
        )),
    }
}

async fn client_for(region: String) -> Client {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region))
        .load()
        .await;
    Client::new(&config)
}

fn map_sdk_error<E>(operation: &str, error: &E) -> SealError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = format!("kms {operation}: {}", DisplayErrorContext(error));
    match error.code() {
        Some("AccessDeniedException" | "UnrecognizedClientException" | "ExpiredTokenException") => {
            SealError::Denied(message)
        }
        Some("NotFoundException") => SealError::NotFound,
        Some("KMSInternalException" | "DependencyTimeoutException" | "ThrottlingException") => {
            SealError::RemoteUnavailable(message)
        }
        Some(_) => SealError::ServiceMisconfigured(message),
        None => SealError::RemoteUnavailable(message),
    }
}

impl KmsClient for AwsKmsClient {
    fn encrypt(&self, key: &KmsKeyRef, plaintext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        let (arn, region) = arn_and_region(key)?;
        let plaintext = plaintext.to_vec();
        let algorithm = EncryptionAlgorithmSpec::from(algorithm);
        rt::sync_await(async move {
            let output = client_for(region)
                .await
                .encrypt()
                .key_id(arn)
                .plaintext(Blob::new(plaintext))
                .encryption_algorithm(algorithm)
                .send()
                .await
                .map_err(|error| map_sdk_error("encrypt", &error))?;
            output
                .ciphertext_blob()
                .map(|blob| blob.as_ref().to_vec())
                .ok_or_else(|| {
                    SealError::RemoteUnavailable("kms encrypt returned no ciphertext".to_owned())
                })
        })?
    }

    fn decrypt(&self, key: &KmsKeyRef, ciphertext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        let (arn, region) = arn_and_region(key)?;
        let ciphertext = ciphertext.to_vec();
        let algorithm = EncryptionAlgorithmSpec::from(algorithm);
        rt::sync_await(async move {
            let output = client_for(region)
                .await
                .decrypt()
                .key_id(arn)
                .ciphertext_blob(Blob::new(ciphertext))
                .encryption_algorithm(algorithm)
                .send()
                .await
                .map_err(|error| map_sdk_error("decrypt", &error))?;
            output
                .plaintext()
                .map(|blob| blob.as_ref().to_vec())
                .ok_or_else(|| {
                    SealError::RemoteUnavailable("kms decrypt returned no plaintext".to_owned())
                })
        })?
    }
}

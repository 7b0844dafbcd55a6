mod common;

use std::{
    collections::BTreeMap,
    sync::{atomic::Ordering, Arc},
};

use sealvault::{
    crypto::{encoding, KeyType, SecretKey},
    error::SealError,
    keystore::{CredentialCache, FileCredentialCache, MemoryCredentialCache},
    providers::{
        kms::{AWS_RSA_ALGORITHM, AZURE_ALGORITHM, WRAPPED_DATA_KEY_REF},
        password::PASSWORD_PROVIDER_ID,
        EnvSecretBinding, KmsClient, KmsProvider, KmsService, PasswordProvider, ProviderInputs,
        ProviderRegistry, SecretBindingProvider, SEALED_KEY_REF,
    },
};

use common::{FailingKmsClient, RsaKmsClient, ScriptedPrompt};

const AWS_KEY_ARN: &str = "arn:aws:kms:eu-west-1:123456789012:key/1234abcd-12ab-34cd-56ef-1234567890ab";
const GCP_KEY: &str = "projects/acme/locations/global/keyRings/ring/cryptoKeys/env";
const GCP_KEY_VERSION: &str =
    "projects/acme/locations/global/keyRings/ring/cryptoKeys/env/cryptoKeyVersions/1";
const AZURE_VAULT_URL: &str = "https://acme-secrets.vault.azure.net/";

fn inputs(pairs: &[(&str, &str)]) -> ProviderInputs {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

fn registry_with(password: PasswordProvider, client: Arc<dyn KmsClient>) -> ProviderRegistry {
    ProviderRegistry::with_default_providers(password, client).unwrap()
}

fn non_interactive_password(env_var: &str) -> PasswordProvider {
    PasswordProvider::new()
        .with_env_var(env_var)
        .with_prompt(Box::new(ScriptedPrompt::non_interactive()))
}

#[test]
fn default_registry_lists_providers_in_order() {
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_ORDER"),
        Arc::new(RsaKmsClient::new()),
    );
    assert_eq!(registry.ids(), vec!["password", "aws", "gcp", "azure"]);
    assert_eq!(registry.name("azure").unwrap(), "Azure Key Vault");
    assert!(registry
        .args("aws")
        .unwrap()
        .iter()
        .any(|arg| arg.id == "arn" && arg.required));
    assert!(matches!(
        registry.get("vault"),
        Err(SealError::UnknownProvider(_))
    ));
}

#[test]
fn duplicate_provider_ids_are_rejected() {
    let mut registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_DUP"),
        Arc::new(RsaKmsClient::new()),
    );
    let duplicate = KmsProvider::new(KmsService::Gcp, Arc::new(RsaKmsClient::new()));
    assert!(matches!(
        registry.register(Box::new(duplicate)),
        Err(SealError::DuplicateProvider(id)) if id == "gcp"
    ));
}

#[test]
fn password_binding_roundtrips_through_prompt() {
    let env_var = "SEALVAULT_TEST_PW_PROMPT";
    let prompt = ScriptedPrompt::new(&["correct horse"], false);
    let password = PasswordProvider::new()
        .with_env_var(env_var)
        .with_prompt(Box::new(prompt.clone()));
    let registry = registry_with(password, Arc::new(RsaKmsClient::new()));
    let secret_key = SecretKey::generate(KeyType::Environment);

    let binding = registry
        .bind(
            PASSWORD_PROVIDER_ID,
            &secret_key,
            &inputs(&[("password", "correct horse")]),
        )
        .unwrap();
    assert_eq!(binding.provider(), PASSWORD_PROVIDER_ID);
    assert!(binding.reference().contains_key(SEALED_KEY_REF));

    let text = binding.to_string();
    assert!(text.starts_with("SEAL_ESB_"));
    let recovered = registry.secret_key_from_binding(Some(text.as_str())).unwrap();
    assert_eq!(recovered.public_key(false), secret_key.public_key(false));
    assert!(recovered.is_serialization_restricted());
    assert!(matches!(
        recovered.to_bytes(),
        Err(SealError::SerializationRestricted)
    ));
    assert_eq!(prompt.reads(), 1);
}

#[test]
fn wrong_password_is_rejected() {
    let env_var = "SEALVAULT_TEST_PW_WRONG";
    let password = PasswordProvider::new()
        .with_env_var(env_var)
        .with_prompt(Box::new(ScriptedPrompt::new(&["nope"], false)));
    let registry = registry_with(password, Arc::new(RsaKmsClient::new()));
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "right")]))
        .unwrap();

    assert!(matches!(
        registry.unbind(&binding),
        Err(SealError::InvalidPassword)
    ));
}

#[test]
fn password_from_environment_skips_prompt() {
    let env_var = "SEALVAULT_TEST_PW_ENV";
    std::env::set_var(env_var, "from-env");
    let prompt = ScriptedPrompt::new(&["unused"], false);
    let password = PasswordProvider::new()
        .with_env_var(env_var)
        .with_prompt(Box::new(prompt.clone()));
    let registry = registry_with(password, Arc::new(RsaKmsClient::new()));
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "from-env")]))
        .unwrap();

    let recovered = registry.unbind(&binding).unwrap();
    std::env::remove_var(env_var);
    assert_eq!(recovered.public_key(true), secret_key.public_key(true));
    assert_eq!(prompt.reads(), 0);
}

#[test]
fn missing_password_source_fails_without_terminal() {
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_NONE"),
        Arc::new(RsaKmsClient::new()),
    );
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "pw")]))
        .unwrap();
    assert!(matches!(
        registry.unbind(&binding),
        Err(SealError::PasswordNotSet)
    ));
    assert!(matches!(
        registry.bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[])),
        Err(SealError::MissingInput(input)) if input == "password"
    ));
}

#[test]
fn confirmed_password_is_cached_for_next_unbind() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn CredentialCache> =
        Arc::new(FileCredentialCache::new(temp_dir.path().join("keystore")).unwrap());
    let prompt = ScriptedPrompt::new(&["cache me"], true);
    let password = PasswordProvider::new()
        .with_env_var("SEALVAULT_TEST_PW_CACHE")
        .with_cache(Arc::clone(&cache))
        .with_prompt(Box::new(prompt.clone()));
    let registry = registry_with(password, Arc::new(RsaKmsClient::new()));
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "cache me")]))
        .unwrap();

    registry.unbind(&binding).unwrap();
    registry.unbind(&binding).unwrap();
    assert_eq!(prompt.reads(), 1);

    let cache_id = encoding::encode(&binding.reference()[SEALED_KEY_REF]);
    assert_eq!(cache.get(&cache_id).unwrap(), b"cache me");
}

#[test]
fn stale_cached_password_is_replaced() {
    let cache = Arc::new(MemoryCredentialCache::new());
    let prompt = ScriptedPrompt::new(&["fresh"], true);
    let password = PasswordProvider::new()
        .with_env_var("SEALVAULT_TEST_PW_STALE")
        .with_cache(cache.clone())
        .with_prompt(Box::new(prompt.clone()));
    let registry = registry_with(password, Arc::new(RsaKmsClient::new()));
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "fresh")]))
        .unwrap();
    let cache_id = encoding::encode(&binding.reference()[SEALED_KEY_REF]);
    cache.put(&cache_id, b"outdated").unwrap();

    let recovered = registry.unbind(&binding).unwrap();
    assert_eq!(recovered.public_key(false), secret_key.public_key(false));
    assert_eq!(prompt.reads(), 1);
    assert_eq!(cache.get(&cache_id).unwrap(), b"fresh");
}

#[test]
fn declined_confirmation_leaves_cache_empty() {
    let cache = Arc::new(MemoryCredentialCache::new());
    let password = PasswordProvider::new()
        .with_env_var("SEALVAULT_TEST_PW_DECLINE")
        .with_cache(cache.clone())
        .with_prompt(Box::new(ScriptedPrompt::new(&["pw"], false)));
    let registry = registry_with(password, Arc::new(RsaKmsClient::new()));
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "pw")]))
        .unwrap();

    registry.unbind(&binding).unwrap();
    let cache_id = encoding::encode(&binding.reference()[SEALED_KEY_REF]);
    assert!(matches!(cache.get(&cache_id), Err(SealError::NotFound)));
}

#[test]
fn restricted_keys_cannot_be_bound_again() {
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_REBIND"),
        Arc::new(RsaKmsClient::new()),
    );
    let mut secret_key = SecretKey::generate(KeyType::Environment);
    secret_key.restrict_serialization();
    assert!(matches!(
        registry.bind(PASSWORD_PROVIDER_ID, &secret_key, &inputs(&[("password", "pw")])),
        Err(SealError::SerializationRestricted)
    ));
}

#[test]
fn missing_binding_is_unspecified() {
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_UNSPEC"),
        Arc::new(RsaKmsClient::new()),
    );
    assert!(matches!(
        registry.secret_key_from_binding(None),
        Err(SealError::BindingUnspecified)
    ));
    assert!(matches!(
        registry.secret_key_from_binding(Some("  ")),
        Err(SealError::BindingUnspecified)
    ));
    assert!(matches!(
        registry.secret_key_from_binding(Some("SEAL_ESB")),
        Err(SealError::InvalidFormat(_))
    ));
}

#[test]
fn binding_for_unregistered_provider_fails() {
    let registry = ProviderRegistry::new();
    let binding = EnvSecretBinding::new("hsm", BTreeMap::new());
    assert!(matches!(
        registry.unbind(&binding),
        Err(SealError::UnknownProvider(id)) if id == "hsm"
    ));
}

#[test]
fn each_kms_service_roundtrips_through_client() {
    let cases = [
        ("aws", inputs(&[("arn", AWS_KEY_ARN)])),
        ("gcp", inputs(&[("resource-name", GCP_KEY)])),
        (
            "azure",
            inputs(&[("vault-url", AZURE_VAULT_URL), ("key-name", "env-key")]),
        ),
    ];
    for (provider, provider_inputs) in cases {
        let client = Arc::new(RsaKmsClient::new());
        let registry = registry_with(
            non_interactive_password("SEALVAULT_TEST_PW_KMS"),
            client.clone(),
        );
        let secret_key = SecretKey::generate(KeyType::Environment);

        let binding = registry.bind(provider, &secret_key, &provider_inputs).unwrap();
        assert!(binding.reference().contains_key(WRAPPED_DATA_KEY_REF));
        assert!(binding.reference().contains_key(SEALED_KEY_REF));

        let parsed: EnvSecretBinding = binding.to_string().parse().unwrap();
        let recovered = registry.unbind(&parsed).unwrap();
        assert_eq!(recovered.public_key(false), secret_key.public_key(false));

        let operations: Vec<String> = client
            .calls()
            .into_iter()
            .map(|(operation, key, _)| {
                assert_eq!(key.service().id(), provider);
                operation
            })
            .collect();
        assert_eq!(operations, vec!["encrypt", "decrypt"], "{provider}");
    }
}

#[test]
fn azure_always_uses_rsa_oaep_256() {
    let client = Arc::new(RsaKmsClient::new());
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_AZURE"),
        client.clone(),
    );
    let secret_key = SecretKey::generate(KeyType::Environment);
    let binding = registry
        .bind(
            "azure",
            &secret_key,
            &inputs(&[
                ("vault-url", AZURE_VAULT_URL),
                ("key-name", "env-key"),
                ("key-version", "v2"),
            ]),
        )
        .unwrap();
    registry.unbind(&binding).unwrap();
    assert!(client
        .calls()
        .iter()
        .all(|(_, _, algorithm)| algorithm == AZURE_ALGORITHM));
}

#[test]
fn offline_rsa_binding_never_calls_remote_on_bind() {
    let client = Arc::new(RsaKmsClient::new());
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_OFFLINE"),
        client.clone(),
    );
    let secret_key = SecretKey::generate(KeyType::Environment);
    let pem = client.public_key_pem();

    let binding = registry
        .bind(
            "aws",
            &secret_key,
            &inputs(&[("arn", AWS_KEY_ARN), ("rsa-pubkey", &pem)]),
        )
        .unwrap();
    assert!(client.calls().is_empty());

    let recovered = registry.unbind(&binding).unwrap();
    assert_eq!(recovered.public_key(false), secret_key.public_key(false));
    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "decrypt");
    assert_eq!(calls[0].2, AWS_RSA_ALGORITHM);
}

#[test]
fn offline_gcp_binding_needs_key_version() {
    let client = Arc::new(RsaKmsClient::new());
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_GCP_RSA"),
        client.clone(),
    );
    let secret_key = SecretKey::generate(KeyType::Environment);
    let pem = client.public_key_pem();

    assert!(matches!(
        registry.bind(
            "gcp",
            &secret_key,
            &inputs(&[("resource-name", GCP_KEY), ("rsa-pubkey", &pem)])
        ),
        Err(SealError::ServiceMisconfigured(_))
    ));

    let binding = registry
        .bind(
            "gcp",
            &secret_key,
            &inputs(&[("resource-name", GCP_KEY_VERSION), ("rsa-pubkey", &pem)]),
        )
        .unwrap();
    let recovered = registry.unbind(&binding).unwrap();
    assert_eq!(recovered.public_key(true), secret_key.public_key(true));
}

#[test]
fn invalid_key_references_fail_before_any_remote_call() {
    let client = Arc::new(FailingKmsClient::new(|| {
        SealError::RemoteUnavailable("should not be reached".to_owned())
    }));
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_INVALID"),
        client.clone(),
    );
    let secret_key = SecretKey::generate(KeyType::Environment);

    assert!(matches!(
        registry.bind("aws", &secret_key, &inputs(&[("arn", "arn:aws:s3:::bucket")])),
        Err(SealError::ServiceMisconfigured(_))
    ));
    assert!(matches!(
        registry.bind(
            "gcp",
            &secret_key,
            &inputs(&[("resource-name", GCP_KEY_VERSION)])
        ),
        Err(SealError::ServiceMisconfigured(_))
    ));
    assert!(matches!(
        registry.bind(
            "azure",
            &secret_key,
            &inputs(&[("vault-url", "http://acme.example.com/"), ("key-name", "k")])
        ),
        Err(SealError::ServiceMisconfigured(_))
    ));
    assert!(matches!(
        registry.bind("azure", &secret_key, &inputs(&[("vault-url", AZURE_VAULT_URL)])),
        Err(SealError::MissingInput(input)) if input == "key-name"
    ));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn remote_failures_keep_their_kind() {
    let denied = Arc::new(FailingKmsClient::new(|| {
        SealError::Denied("AccessDeniedException".to_owned())
    }));
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_DENIED"),
        denied.clone(),
    );
    let secret_key = SecretKey::generate(KeyType::Environment);
    assert!(matches!(
        registry.bind("aws", &secret_key, &inputs(&[("arn", AWS_KEY_ARN)])),
        Err(SealError::Denied(_))
    ));
    assert_eq!(denied.calls.load(Ordering::SeqCst), 1);

    let unavailable = Arc::new(FailingKmsClient::new(|| {
        SealError::RemoteUnavailable("timeout".to_owned())
    }));
    let working = Arc::new(RsaKmsClient::new());
    let binding = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_UNAVAILABLE"),
        working,
    )
    .bind("gcp", &secret_key, &inputs(&[("resource-name", GCP_KEY)]))
    .unwrap();
    let registry = registry_with(
        non_interactive_password("SEALVAULT_TEST_PW_UNAVAILABLE"),
        unavailable,
    );
    assert!(matches!(
        registry.unbind(&binding),
        Err(SealError::RemoteUnavailable(_))
    ));
}

#[test]
fn kms_provider_rejects_tampered_reference() {
    let client = Arc::new(RsaKmsClient::new());
    let provider = KmsProvider::new(KmsService::Aws, client);
    let secret_key = SecretKey::generate(KeyType::Environment);
    let secret_key_bytes = secret_key.to_bytes().unwrap();

    let mut reference = provider
        .bind(secret_key_bytes.as_bytes(), &inputs(&[("arn", AWS_KEY_ARN)]))
        .unwrap();
    reference.remove(WRAPPED_DATA_KEY_REF);
    assert!(matches!(
        provider.unbind(&reference),
        Err(SealError::InvalidFormat(_))
    ));
}

//! Secret-binding providers: strategies that protect an environment's raw
//! secret key outside any vault.
//!
//! Providers are registered on an explicit [`ProviderRegistry`] value built at
//! startup. Registration order is kept, because providers that need no
//! persisted reference are tried in that order when no binding is supplied.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditLog};
use crate::crypto::{sensitive::SensitiveVec, SecretKey};
use crate::error::{Result, SealError};

/// Persisted binding strings.
pub mod binding;
/// Remote key-management providers.
pub mod kms;
/// Password provider.
pub mod password;

pub use binding::EnvSecretBinding;
pub use kms::{KmsClient, KmsKeyRef, KmsProvider, KmsService};
pub use password::{PasswordPrompt, PasswordProvider, TerminalPrompt};

/// Caller-supplied provider configuration.
pub type ProviderInputs = BTreeMap<String, String>;
/// Provider-specific recipe for reproducing a secret key.
pub type BindingRef = BTreeMap<String, Vec<u8>>;

/// Ref entry holding the protected secret key.
pub const SEALED_KEY_REF: &str = "ssk";

/// One configuration input a provider accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderArg {
    /// Input key.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Whether binding fails without it.
    pub required: bool,
    /// Sensitive inputs are never echoed or logged.
    pub sensitive: bool,
    /// Help text.
    pub description: &'static str,
}

/// A strategy that protects secret key bytes at rest.
pub trait SecretBindingProvider: Send + Sync {
    /// Registry id, also stored in bindings.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Short description.
    fn description(&self) -> &str;

    /// Accepted inputs.
    fn args(&self) -> &[ProviderArg];

    /// Whether unbinding needs a persisted reference.
    fn ref_required(&self) -> bool {
        true
    }

    /// Protects `secret_key` and returns what is needed to recover it.
    fn bind(&self, secret_key: &[u8], inputs: &ProviderInputs) -> Result<BindingRef>;

    /// Recovers the secret key bytes from `reference`.
    fn unbind(&self, reference: &BindingRef) -> Result<SensitiveVec>;
}

/// Ordered set of providers, keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn SecretBindingProvider>>,
    audit: Option<AuditLog>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the password provider and the three KMS providers.
    pub fn with_default_providers(
        password: PasswordProvider,
        kms_client: Arc<dyn KmsClient>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Box::new(password))?;
        for service in KmsService::ALL {
            registry.register(Box::new(KmsProvider::new(service, Arc::clone(&kms_client))))?;
        }
        Ok(registry)
    }

    /// Records successful binds in `audit`.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Audit log attached to the registry, if any.
    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Adds a provider. Ids must be unique.
    pub fn register(&mut self, provider: Box<dyn SecretBindingProvider>) -> Result<()> {
        if self.find(provider.id()).is_some() {
            return Err(SealError::DuplicateProvider(provider.id().to_owned()));
        }
        tracing::debug!(provider = provider.id(), "secret binding provider registered");
        self.providers.push(provider);
        Ok(())
    }

    fn find(&self, id: &str) -> Option<&dyn SecretBindingProvider> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .map(Box::as_ref)
    }

    /// Looks up a provider.
    pub fn get(&self, id: &str) -> Result<&dyn SecretBindingProvider> {
        self.find(id)
            .ok_or_else(|| SealError::UnknownProvider(id.to_owned()))
    }

    /// Provider ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.id()).collect()
    }

    /// Display name of a provider.
    pub fn name(&self, id: &str) -> Result<&str> {
        Ok(self.get(id)?.name())
    }

    /// Description of a provider.
    pub fn description(&self, id: &str) -> Result<&str> {
        Ok(self.get(id)?.description())
    }

    /// Inputs accepted by a provider.
    pub fn args(&self, id: &str) -> Result<&[ProviderArg]> {
        Ok(self.get(id)?.args())
    }

    /// Checks that every required input of `id` is present and non-empty.
    pub fn validate_inputs(&self, id: &str, inputs: &ProviderInputs) -> Result<()> {
        for arg in self.args(id)? {
            let present = inputs.get(arg.id).is_some_and(|value| !value.is_empty());
            if arg.required && !present {
                return Err(SealError::MissingInput(arg.id.to_owned()));
            }
        }
        Ok(())
    }

    /// Binds `secret_key` with provider `id`.
    pub fn bind(
        &self,
        id: &str,
        secret_key: &SecretKey,
        inputs: &ProviderInputs,
    ) -> Result<EnvSecretBinding> {
        let provider = self.get(id)?;
        self.validate_inputs(id, inputs)?;
        let secret_key_bytes = secret_key.to_bytes()?;
        let reference = provider.bind(secret_key_bytes.as_bytes(), inputs)?;
        tracing::info!(provider = id, "secret key bound");
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::SecretBound {
                provider: id.to_owned(),
            });
        }
        Ok(EnvSecretBinding::new(id, reference))
    }

    /// Recovers the secret key behind `binding`.
    ///
    /// The returned key has serialization restricted.
    pub fn unbind(&self, binding: &EnvSecretBinding) -> Result<SecretKey> {
        let provider = self.get(binding.provider())?;
        let bytes = provider.unbind(binding.reference())?;
        tracing::debug!(provider = binding.provider(), "secret key unbound");
        restricted_key(&bytes)
    }

    /// Recovers a secret key from a binding string, or from the first
    /// reference-free provider that succeeds when none is given.
    pub fn secret_key_from_binding(&self, binding: Option<&str>) -> Result<SecretKey> {
        if let Some(binding) = binding.filter(|text| !text.trim().is_empty()) {
            return self.unbind(&binding.parse()?);
        }
        let empty = BindingRef::new();
        for provider in self.providers.iter().filter(|provider| !provider.ref_required()) {
            match provider.unbind(&empty) {
                Ok(bytes) => return restricted_key(&bytes),
                Err(error) => {
                    tracing::debug!(provider = provider.id(), error = %error, "provider could not unbind")
                }
            }
        }
        Err(SealError::BindingUnspecified)
    }
}

fn restricted_key(bytes: &SensitiveVec) -> Result<SecretKey> {
    let mut secret_key = SecretKey::from_bytes(bytes.as_bytes())?;
    secret_key.restrict_serialization();
    Ok(secret_key)
}

pub(crate) fn required_ref<'a>(reference: &'a BindingRef, key: &str) -> Result<&'a [u8]> {
    reference
        .get(key)
        .map(Vec::as_slice)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SealError::InvalidFormat(format!("binding reference is missing '{key}'")))
}

pub(crate) fn optional_input<'a>(inputs: &'a ProviderInputs, key: &str) -> Option<&'a str> {
    inputs
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyType;

    struct AmbientProvider {
        key: Vec<u8>,
    }

    impl SecretBindingProvider for AmbientProvider {
        fn id(&self) -> &str {
            "ambient"
        }

        fn name(&self) -> &str {
            "Ambient"
        }

        fn description(&self) -> &str {
            "Key supplied by the host"
        }

        fn args(&self) -> &[ProviderArg] {
            &[]
        }

        fn ref_required(&self) -> bool {
            false
        }

        fn bind(&self, _secret_key: &[u8], _inputs: &ProviderInputs) -> Result<BindingRef> {
            Ok(BindingRef::new())
        }

        fn unbind(&self, _reference: &BindingRef) -> Result<SensitiveVec> {
            Ok(SensitiveVec::new(self.key.clone()))
        }
    }

    fn ambient(secret_key: &SecretKey) -> Box<AmbientProvider> {
        Box::new(AmbientProvider {
            key: secret_key.to_bytes().unwrap().as_bytes().to_vec(),
        })
    }

    #[test]
    fn duplicate_and_unknown_providers_are_rejected() {
        let secret_key = SecretKey::generate(KeyType::Environment);
        let mut registry = ProviderRegistry::new();
        registry.register(ambient(&secret_key)).unwrap();
        assert!(matches!(
            registry.register(ambient(&secret_key)),
            Err(SealError::DuplicateProvider(id)) if id == "ambient"
        ));
        assert!(matches!(
            registry.get("nope"),
            Err(SealError::UnknownProvider(_))
        ));
        assert_eq!(registry.ids(), vec!["ambient"]);
    }

    #[test]
    fn reference_free_providers_are_tried_without_binding() {
        let secret_key = SecretKey::generate(KeyType::Environment);
        let mut registry = ProviderRegistry::new();
        registry.register(ambient(&secret_key)).unwrap();

        let unbound = registry.secret_key_from_binding(None).unwrap();
        assert!(unbound.is_serialization_restricted());
        assert_eq!(unbound.public_key(false), secret_key.public_key(false));
    }

    #[test]
    fn no_binding_and_no_ambient_provider_is_unspecified() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.secret_key_from_binding(Some("  ")),
            Err(SealError::BindingUnspecified)
        ));
    }
}

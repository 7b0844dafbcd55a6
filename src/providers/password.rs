use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use secrecy::{ExposeSecret, SecretString};

use crate::crypto::{
    encoding,
    password::{open_with_password, seal_with_password},
    sensitive::SensitiveVec,
};
use crate::error::{Result, SealError};
use crate::keystore::CredentialCache;
use crate::providers::{
    required_ref, BindingRef, ProviderArg, ProviderInputs, SecretBindingProvider, SEALED_KEY_REF,
};

/// Registry id of the password provider.
pub const PASSWORD_PROVIDER_ID: &str = "password";
/// Environment variable consulted before any other password source.
pub const DEFAULT_PASSWORD_ENV_VAR: &str = "SEALVAULT_ENV_SECRET_PASSWORD";

const PASSWORD_INPUT: &str = "password";

const PASSWORD_ARGS: &[ProviderArg] = &[ProviderArg {
    id: PASSWORD_INPUT,
    name: "Password",
    required: true,
    sensitive: true,
    description: "Password to use",
}];

/// Interactive password source.
pub trait PasswordPrompt: Send + Sync {
    /// Whether a human can answer prompts right now.
    fn is_interactive(&self) -> bool;

    /// Reads a password without echoing it.
    fn read_password(&self, message: &str) -> Result<SecretString>;

    /// Asks a yes/no question. Defaults to yes on an empty answer.
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Prompt on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn is_interactive(&self) -> bool {
        atty::is(atty::Stream::Stdin)
    }

    fn read_password(&self, message: &str) -> Result<SecretString> {
        Ok(SecretString::new(rpassword::prompt_password(message)?))
    }

    fn confirm(&self, message: &str) -> Result<bool> {
        let mut stderr = io::stderr();
        stderr.write_all(message.as_bytes())?;
        stderr.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        let answer = answer.trim().to_ascii_lowercase();
        Ok(answer.is_empty() || answer == "y" || answer == "yes")
    }
}

/// Protects the secret key with a password-derived key.
///
/// Unbinding looks for the password in the configured environment variable,
/// then in the credential cache, then asks the prompt when it is interactive.
pub struct PasswordProvider {
    env_var: String,
    cache: Option<Arc<dyn CredentialCache>>,
    prompt: Option<Box<dyn PasswordPrompt>>,
}

impl PasswordProvider {
    /// Provider reading only [`DEFAULT_PASSWORD_ENV_VAR`].
    pub fn new() -> Self {
        Self {
            env_var: DEFAULT_PASSWORD_ENV_VAR.to_owned(),
            cache: None,
            prompt: None,
        }
    }

    /// Reads the password from `env_var` instead of the default variable.
    pub fn with_env_var(mut self, env_var: impl Into<String>) -> Self {
        self.env_var = env_var.into();
        self
    }

    /// Uses `cache` to remember passwords entered at the prompt.
    pub fn with_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Falls back to `prompt` when no other source has a password.
    pub fn with_prompt(mut self, prompt: Box<dyn PasswordPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Environment variable holding the password.
    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    fn env_password(&self) -> Option<SecretString> {
        std::env::var(&self.env_var)
            .ok()
            .filter(|value| !value.is_empty())
            .map(SecretString::new)
    }

    fn cached_unbind(&self, sealed: &[u8], cache_id: &str) -> Result<Option<SensitiveVec>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let password = match cache.get(cache_id) {
            Ok(password) => SensitiveVec::new(password),
            Err(SealError::NotFound) => return Ok(None),
            Err(error) => {
                tracing::warn!(error = %error, "credential cache unavailable");
                return Ok(None);
            }
        };
        match open_with_password(password.as_bytes(), sealed) {
            Ok(bytes) => Ok(Some(SensitiveVec::new(bytes))),
            Err(SealError::InvalidPassword) => {
                tracing::warn!("cached password was rejected; removing it");
                cache.delete(cache_id)?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

impl Default for PasswordProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretBindingProvider for PasswordProvider {
    fn id(&self) -> &str {
        PASSWORD_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Password"
    }

    fn description(&self) -> &str {
        "Password to set for the environment"
    }

    fn args(&self) -> &[ProviderArg] {
        PASSWORD_ARGS
    }

    fn bind(&self, secret_key: &[u8], inputs: &ProviderInputs) -> Result<BindingRef> {
        let password = inputs
            .get(PASSWORD_INPUT)
            .filter(|password| !password.is_empty())
            .ok_or_else(|| SealError::MissingInput(PASSWORD_INPUT.to_owned()))?;
        let sealed = seal_with_password(password.as_bytes(), secret_key)?;
        let mut reference = BindingRef::new();
        reference.insert(SEALED_KEY_REF.to_owned(), sealed);
        Ok(reference)
    }

    fn unbind(&self, reference: &BindingRef) -> Result<SensitiveVec> {
        let sealed = required_ref(reference, SEALED_KEY_REF)?;
        if let Some(password) = self.env_password() {
            return open_with_password(password.expose_secret().as_bytes(), sealed)
                .map(SensitiveVec::new);
        }

        let cache_id = encoding::encode(sealed);
        if let Some(bytes) = self.cached_unbind(sealed, &cache_id)? {
            return Ok(bytes);
        }

        let prompt = match &self.prompt {
            Some(prompt) if prompt.is_interactive() => prompt,
            _ => return Err(SealError::PasswordNotSet),
        };
        let password = prompt.read_password("Enter password: ")?;
        let bytes = open_with_password(password.expose_secret().as_bytes(), sealed)?;
        if let Some(cache) = &self.cache {
            if prompt.confirm("Save the password locally? (Y/n): ")? {
                cache.put(&cache_id, password.expose_secret().as_bytes())?;
            }
        }
        Ok(SensitiveVec::new(bytes))
    }
}

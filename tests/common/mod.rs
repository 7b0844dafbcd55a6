#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use rsa::{
    pkcs8::{EncodePublicKey, LineEnding},
    Oaep, RsaPrivateKey,
};
use secrecy::SecretString;
use sha2::Sha256;

use sealvault::{
    crypto::{KeyType, PublicKey, SecretKey},
    error::{Result, SealError},
    providers::{KmsClient, KmsKeyRef, PasswordPrompt},
    vault::{Vault, VaultOptions},
};

/// Environment secret key and its ECC public key.
pub fn environment_key() -> (SecretKey, PublicKey) {
    let secret_key = SecretKey::generate(KeyType::Environment);
    let public_key = secret_key.public_key(false).clone();
    (secret_key, public_key)
}

/// Environment secret key and its hybrid post-quantum public key.
pub fn quantum_environment_key() -> (SecretKey, PublicKey) {
    let secret_key = SecretKey::generate(KeyType::Environment);
    let public_key = secret_key.public_key(true).clone();
    (secret_key, public_key)
}

/// Path of a vault file named `name` under `root`.
pub fn vault_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.sealvault.yaml"))
}

/// Creates a vault shared with `recipients`.
pub fn create_vault(root: &Path, name: &str, recipients: &[PublicKey]) -> Vault {
    Vault::create(vault_path(root, name), VaultOptions::default(), recipients)
        .unwrap_or_else(|error| panic!("failed to create vault {name}: {error}"))
}

/// Prompt that replays scripted passwords and answers.
///
/// Clones share their script and counters, so a test can keep one copy
/// after boxing another into a provider.
#[derive(Clone)]
pub struct ScriptedPrompt {
    interactive: bool,
    passwords: Arc<Mutex<VecDeque<String>>>,
    confirm: bool,
    reads: Arc<AtomicUsize>,
}

impl ScriptedPrompt {
    /// Interactive prompt answering `passwords` in order.
    pub fn new(passwords: &[&str], confirm: bool) -> Self {
        Self {
            interactive: true,
            passwords: Arc::new(Mutex::new(
                passwords.iter().map(|value| (*value).to_owned()).collect(),
            )),
            confirm,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Prompt standing in for a non-terminal stdin.
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            ..Self::new(&[], false)
        }
    }

    /// Number of passwords read so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl PasswordPrompt for ScriptedPrompt {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn read_password(&self, _message: &str) -> Result<SecretString> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut passwords = self.passwords.lock().unwrap();
        passwords
            .pop_front()
            .map(SecretString::new)
            .ok_or(SealError::PasswordNotSet)
    }

    fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(self.confirm)
    }
}

/// In-process stand-in for a remote key service backed by one RSA key.
///
/// Every service, algorithm, and key reference shares the same key, so both
/// the remote and the offline `rsa-pubkey` bind paths can be unbound.
pub struct RsaKmsClient {
    private_key: RsaPrivateKey,
    calls: Mutex<Vec<(String, KmsKeyRef, String)>>,
}

impl RsaKmsClient {
    /// Generates a small test key.
    pub fn new() -> Self {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024)
            .unwrap_or_else(|error| panic!("failed to generate RSA key: {error}"));
        Self {
            private_key,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// SPKI PEM of the public half.
    pub fn public_key_pem(&self) -> String {
        self.private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap_or_else(|error| panic!("failed to encode RSA key: {error}"))
    }

    /// Operations seen so far as `(operation, key, algorithm)`.
    pub fn calls(&self) -> Vec<(String, KmsKeyRef, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, key: &KmsKeyRef, algorithm: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_owned(), key.clone(), algorithm.to_owned()));
    }
}

impl KmsClient for RsaKmsClient {
    fn encrypt(&self, key: &KmsKeyRef, plaintext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        self.record("encrypt", key, algorithm);
        self.private_key
            .to_public_key()
            .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|error| SealError::Crypto(error.to_string()))
    }

    fn decrypt(&self, key: &KmsKeyRef, ciphertext: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        self.record("decrypt", key, algorithm);
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| SealError::Denied("key service could not decrypt".to_owned()))
    }
}

/// Key service that fails every call with a fixed error.
pub struct FailingKmsClient {
    make_error: fn() -> SealError,
    pub calls: AtomicUsize,
}

impl FailingKmsClient {
    /// Client failing with `make_error()`.
    pub fn new(make_error: fn() -> SealError) -> Self {
        Self {
            make_error,
            calls: AtomicUsize::new(0),
        }
    }
}

impl KmsClient for FailingKmsClient {
    fn encrypt(&self, _key: &KmsKeyRef, _plaintext: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }

    fn decrypt(&self, _key: &KmsKeyRef, _ciphertext: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }
}

use std::collections::BTreeMap;

use crate::{
    audit::AuditEvent,
    error::{Result, SealError},
    types::{ItemName, SecretValue},
};

use super::{item::VaultItem, Vault};

impl Vault {
    /// Renders the stored form of `value`: sealed under the vault key, or
    /// verbatim when `encrypt` is off.
    pub(super) fn stored_value(&self, value: &[u8], encrypt: bool) -> Result<String> {
        if encrypt {
            Ok(self
                .public_key
                .encrypt_secret(value, self.hash_enabled())?
                .to_string())
        } else {
            Ok(String::from_utf8(value.to_vec())?)
        }
    }

    /// Stores one item and commits.
    pub fn put(&mut self, name: &str, value: &[u8], encrypt: bool) -> Result<()> {
        self.ensure_writable()?;
        let name = ItemName::new(name)?;
        let mut staged = self.document.clone();
        staged
            .spec
            .data
            .insert(name.to_string(), self.stored_value(value, encrypt)?);
        self.persist(&mut staged)?;
        self.document = staged;
        self.cache.evict(name.as_str());

        tracing::debug!(vault_id = self.id(), item = %name, encrypted = encrypt, "vault item put");
        self.record(AuditEvent::ItemPut {
            vault_id: self.id().to_owned(),
            item: name.into(),
            encrypted: encrypt,
        });
        Ok(())
    }

    /// Materializes one item, decrypting it when sealed.
    pub fn get(&mut self, name: &str) -> Result<VaultItem> {
        if let Some(item) = self.cache.get(name) {
            return Ok(item.clone());
        }
        let raw_value = self.document.spec.data.get(name).ok_or(SealError::NotFound)?;
        let item = VaultItem::materialize(raw_value, self.secret_key.as_ref())?;
        self.cache.put(name, item.clone());
        Ok(item)
    }

    /// Decrypted value of one item.
    pub fn get_value(&mut self, name: &str) -> Result<SecretValue> {
        Ok(self.get(name)?.value().clone())
    }

    /// Every item, keyed by name.
    pub fn get_all_items(&mut self) -> Result<BTreeMap<String, VaultItem>> {
        let mut items = BTreeMap::new();
        for name in self.item_names() {
            let item = self.get(&name)?;
            items.insert(name, item);
        }
        Ok(items)
    }

    /// Every decrypted value, keyed by name.
    pub fn get_all_values(&mut self) -> Result<BTreeMap<String, SecretValue>> {
        Ok(self
            .get_all_items()?
            .into_iter()
            .map(|(name, item)| (name, item.value().clone()))
            .collect())
    }

    /// Returns `true` when an item named `name` is stored.
    pub fn item_exists(&self, name: &str) -> bool {
        self.document.spec.data.contains_key(name)
    }

    /// Item names, sorted.
    pub fn item_names(&self) -> Vec<String> {
        self.document.spec.data.keys().cloned().collect()
    }

    /// Removes items and commits. Unknown names are ignored.
    pub fn delete<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.ensure_writable()?;
        let mut staged = self.document.clone();
        let removed: Vec<String> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| staged.spec.data.remove(*name).is_some())
            .map(str::to_owned)
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        self.persist(&mut staged)?;
        self.document = staged;
        for name in &removed {
            self.cache.evict(name);
        }

        tracing::debug!(vault_id = self.id(), items = removed.len(), "vault items deleted");
        self.record(AuditEvent::ItemsDeleted {
            vault_id: self.id().to_owned(),
            items: removed,
        });
        Ok(())
    }

    /// Stores every entry of a YAML/JSON `name: value` map or of dotenv
    /// `NAME=value` lines, then commits once. Returns the imported count.
    pub fn import(&mut self, data: &str, force: bool, encrypt: bool) -> Result<usize> {
        self.ensure_writable()?;
        let entries = parse_import(data)?;
        let mut staged = self.document.clone();
        let mut imported = Vec::with_capacity(entries.len());
        for (name, value) in entries {
            let name = ItemName::new(&name)?;
            if !force && staged.spec.data.contains_key(name.as_str()) {
                return Err(SealError::ExistsAlready);
            }
            staged
                .spec
                .data
                .insert(name.to_string(), self.stored_value(value.as_bytes(), encrypt)?);
            imported.push(name);
        }
        if imported.is_empty() {
            return Ok(0);
        }
        self.persist(&mut staged)?;
        self.document = staged;

        for name in &imported {
            self.cache.evict(name.as_str());
            self.record(AuditEvent::ItemPut {
                vault_id: self.id().to_owned(),
                item: name.to_string(),
                encrypted: encrypt,
            });
        }
        tracing::info!(vault_id = self.id(), items = imported.len(), "vault items imported");
        Ok(imported.len())
    }
}

fn parse_import(data: &str) -> Result<Vec<(String, String)>> {
    match serde_yaml::from_str::<serde_yaml::Value>(data) {
        Ok(serde_yaml::Value::Mapping(mapping)) => mapping
            .into_iter()
            .map(|(key, value)| Ok((scalar_text(&key)?, scalar_text(&value)?)))
            .collect(),
        _ => parse_dotenv(data),
    }
}

fn scalar_text(value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(text) => Ok(text.clone()),
        serde_yaml::Value::Number(number) => Ok(number.to_string()),
        serde_yaml::Value::Bool(flag) => Ok(flag.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        _ => Err(SealError::InvalidInput(
            "import values must be scalars".to_owned(),
        )),
    }
}

fn parse_dotenv(data: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for (index, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(SealError::InvalidInput(format!(
                "line {}: expected NAME=value",
                index + 1
            )));
        };
        entries.push((key.trim().to_owned(), unquote(value.trim()).to_owned()));
    }
    Ok(entries)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

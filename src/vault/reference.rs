use std::{fs, path::Path, str::FromStr};

use regex::Regex;
use serde_yaml::Value;

use crate::{
    audit::AuditEvent,
    error::{Result, SealError},
    fs_secure::{write_file_atomic, SHARED_FILE_MODE},
    types::{sanitize_item_name, ItemName},
};

use super::{document::VaultDocument, Vault};

const PATH_SEPARATOR: &str = "__";
const ANY_PLACEHOLDER: &str = r"\{\{\s*SEAL\.[^\s.{}]+\.\w+\s*\}\}";

/// Shape of the content handed to [`Vault::ref_content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// YAML document: every string scalar becomes a placeholder.
    Yaml,
    /// JSON document: every string scalar becomes a placeholder.
    Json,
    /// Opaque content stored as a single item.
    Blob,
}

impl FromStr for RefKind {
    type Err = SealError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "blob" | "" => Ok(Self::Blob),
            other => Err(SealError::InvalidInput(format!(
                "unsupported reference kind `{other}`"
            ))),
        }
    }
}

/// Result of moving values into the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefOutcome {
    /// Rewritten content, empty when `conflicting`.
    pub result: String,
    /// An item with the requested name exists and force was off.
    pub conflicting: bool,
}

struct RefPlan {
    outcome: RefOutcome,
    staged: VaultDocument,
    items: Vec<String>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|error| SealError::InvalidInput(error.to_string()))
}

impl Vault {
    /// Placeholder that references item `name` of this vault.
    pub fn placeholder(&self, name: &str) -> String {
        format!("{{{{SEAL.{}.{name}}}}}", self.name())
    }

    fn unused_name(staged: &VaultDocument, name: String) -> String {
        if !staged.spec.data.contains_key(&name) {
            return name;
        }
        let mut suffix = 1_usize;
        loop {
            let candidate = format!("{name}_{suffix}");
            if !staged.spec.data.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn plan_ref(
        &self,
        kind: RefKind,
        data: &[u8],
        name: Option<&str>,
        force: bool,
        encrypt: bool,
    ) -> Result<RefPlan> {
        let mut staged = self.document.clone();
        if kind == RefKind::Blob {
            let name = ItemName::new(name.unwrap_or_default())?;
            if !force && staged.spec.data.contains_key(name.as_str()) {
                return Ok(RefPlan {
                    outcome: RefOutcome {
                        result: String::new(),
                        conflicting: true,
                    },
                    staged,
                    items: Vec::new(),
                });
            }
            staged
                .spec
                .data
                .insert(name.to_string(), self.stored_value(data, encrypt)?);
            return Ok(RefPlan {
                outcome: RefOutcome {
                    result: self.placeholder(name.as_str()),
                    conflicting: false,
                },
                staged,
                items: vec![name.into()],
            });
        }

        let mut document: Value = serde_yaml::from_str(std::str::from_utf8(data).map_err(
            |error| SealError::InvalidInput(format!("content is not UTF-8: {error}")),
        )?)?;
        let mut walker = RefWalker {
            vault: self,
            staged: &mut staged,
            existing: compile(ANY_PLACEHOLDER)?,
            force,
            encrypt,
            items: Vec::new(),
        };
        let mut path: Vec<String> = name
            .filter(|name| !name.is_empty())
            .map(|name| vec![name.to_owned()])
            .unwrap_or_default();
        walker.walk(&mut document, &mut path)?;
        let items = walker.items;

        let result = match kind {
            RefKind::Json => serde_json::to_string_pretty(&document)?,
            _ => serde_yaml::to_string(&document)?,
        };
        Ok(RefPlan {
            outcome: RefOutcome {
                result,
                conflicting: false,
            },
            staged,
            items,
        })
    }

    fn apply_ref(&mut self, mut plan: RefPlan, encrypt: bool) -> Result<()> {
        self.persist(&mut plan.staged)?;
        self.document = plan.staged;
        for item in &plan.items {
            self.cache.evict(item);
            self.record(AuditEvent::ItemPut {
                vault_id: self.id().to_owned(),
                item: item.clone(),
                encrypted: encrypt,
            });
        }
        tracing::info!(vault_id = self.id(), items = plan.items.len(), "values moved into vault");
        Ok(())
    }

    /// Moves values out of `data` into the vault and returns the content
    /// with placeholders in their place. Commits unless conflicting.
    ///
    /// Structured kinds turn each string scalar into an item named after
    /// its path (`parent__child__0`), prefixed by `name` when given. Blob
    /// content is stored whole under `name`.
    pub fn ref_content(
        &mut self,
        kind: RefKind,
        data: &[u8],
        name: Option<&str>,
        force: bool,
        encrypt: bool,
    ) -> Result<RefOutcome> {
        self.ensure_writable()?;
        let plan = self.plan_ref(kind, data, name, force, encrypt)?;
        let outcome = plan.outcome.clone();
        if !outcome.conflicting && !plan.items.is_empty() {
            self.apply_ref(plan, encrypt)?;
        }
        Ok(outcome)
    }

    /// [`Vault::ref_content`] over a file, rewriting it in place.
    ///
    /// Nothing is written on a dry run, on a conflict, or when no value was
    /// found.
    pub fn ref_file(
        &mut self,
        kind: RefKind,
        path: impl AsRef<Path>,
        name: Option<&str>,
        force: bool,
        encrypt: bool,
        dry_run: bool,
    ) -> Result<RefOutcome> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        if !dry_run {
            self.ensure_writable()?;
        }
        let plan = self.plan_ref(kind, &data, name, force, encrypt)?;
        let outcome = plan.outcome.clone();
        if dry_run || outcome.conflicting || plan.items.is_empty() {
            return Ok(outcome);
        }
        self.apply_ref(plan, encrypt)?;
        write_file_atomic(path, outcome.result.as_bytes(), SHARED_FILE_MODE)?;
        Ok(outcome)
    }

    fn deref_pattern(&self) -> Result<Regex> {
        let mut targets = vec![regex::escape(self.id())];
        if !self.name().is_empty() {
            targets.push(regex::escape(self.name()));
        }
        compile(&[r"\{\{\s*SEAL\.(?:", &targets.join("|"), r")\.(\w+)\s*\}\}"].concat())
    }

    /// Replaces placeholders of this vault with item values.
    ///
    /// Content that is exactly one placeholder yields the raw item bytes;
    /// otherwise every placeholder is substituted inside the text.
    pub fn deref_content(&mut self, text: &str) -> Result<Vec<u8>> {
        if self.is_locked() {
            return Err(SealError::VaultLocked);
        }
        let pattern = self.deref_pattern()?;

        let trimmed = text.trim();
        if let Some(captures) = pattern.captures(trimmed) {
            if captures.get(0).map(|whole| whole.as_str().len()) == Some(trimmed.len()) {
                return Ok(self.get_value(&captures[1])?.to_vec());
            }
        }

        let mut rendered = String::with_capacity(text.len());
        let mut last = 0;
        for captures in pattern.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            rendered.push_str(&text[last..whole.start()]);
            rendered.push_str(&String::from_utf8(self.get_value(&captures[1])?.to_vec())?);
            last = whole.end();
        }
        rendered.push_str(&text[last..]);
        Ok(rendered.into_bytes())
    }

    /// [`Vault::deref_content`] over a file. Returns the content on preview,
    /// otherwise rewrites the file.
    pub fn deref_file(&mut self, path: impl AsRef<Path>, preview: bool) -> Result<Option<Vec<u8>>> {
        let path = path.as_ref();
        let content = self.deref_content(&fs::read_to_string(path)?)?;
        if preview {
            return Ok(Some(content));
        }
        write_file_atomic(path, &content, SHARED_FILE_MODE)?;
        tracing::debug!(vault_id = self.id(), path = %path.display(), "placeholders resolved");
        Ok(None)
    }
}

struct RefWalker<'a> {
    vault: &'a Vault,
    staged: &'a mut VaultDocument,
    existing: Regex,
    force: bool,
    encrypt: bool,
    items: Vec<String>,
}

impl RefWalker<'_> {
    fn walk(&mut self, value: &mut Value, path: &mut Vec<String>) -> Result<()> {
        match value {
            Value::Mapping(mapping) => {
                for (key, child) in mapping.iter_mut() {
                    path.push(key_segment(key));
                    let walked = self.walk(child, path);
                    path.pop();
                    walked?;
                }
            }
            Value::Sequence(sequence) => {
                for (index, child) in sequence.iter_mut().enumerate() {
                    path.push(index.to_string());
                    let walked = self.walk(child, path);
                    path.pop();
                    walked?;
                }
            }
            Value::Tagged(tagged) => self.walk(&mut tagged.value, path)?,
            Value::String(text) if !self.existing.is_match(text) => {
                let name = sanitize_item_name(&path.join(PATH_SEPARATOR));
                let name = if self.force {
                    name
                } else {
                    Vault::unused_name(self.staged, name)
                };
                let name = ItemName::new(&name)?;
                let stored = self.vault.stored_value(text.as_bytes(), self.encrypt)?;
                self.staged.spec.data.insert(name.to_string(), stored);
                *text = self.vault.placeholder(name.as_str());
                self.items.push(name.into());
            }
            _ => {}
        }
        Ok(())
    }
}

fn key_segment(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    }
}

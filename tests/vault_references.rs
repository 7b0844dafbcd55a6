mod common;

use std::fs;

use sealvault::{
    error::SealError,
    vault::{RefKind, Vault},
};

use common::{create_vault, environment_key, vault_path};

const APP_CONFIG: &str = "db:\n  user: admin\n  pass: s3cr3t\nport: 5432\nhosts:\n  - a.internal\n  - b.internal\n";

#[test]
fn yaml_strings_move_into_vault_as_placeholders() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "refs", &[alice]);

    let outcome = vault
        .ref_content(RefKind::Yaml, APP_CONFIG.as_bytes(), None, false, true)
        .unwrap();
    assert!(!outcome.conflicting);
    assert!(outcome.result.contains("{{SEAL.refs.db__user}}"));
    assert!(outcome.result.contains("{{SEAL.refs.db__pass}}"));
    assert!(outcome.result.contains("{{SEAL.refs.hosts__0}}"));
    assert!(outcome.result.contains("5432"));
    assert!(!outcome.result.contains("s3cr3t"));

    assert_eq!(
        vault.item_names(),
        vec!["db__pass", "db__user", "hosts__0", "hosts__1"]
    );
    assert_eq!(vault.get_value("db__pass").unwrap().to_vec(), b"s3cr3t");
    assert_eq!(vault.get_value("hosts__1").unwrap().to_vec(), b"b.internal");
}

#[test]
fn name_prefixes_generated_items() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "prefixed", &[alice]);

    let outcome = vault
        .ref_content(RefKind::Json, br#"{"api": {"key": "k-1"}}"#, Some("svc"), false, true)
        .unwrap();
    assert!(outcome.result.contains("{{SEAL.prefixed.svc__api__key}}"));
    let rendered: serde_json::Value = serde_json::from_str(&outcome.result).unwrap();
    assert_eq!(rendered["api"]["key"], "{{SEAL.prefixed.svc__api__key}}");
    assert_eq!(vault.get_value("svc__api__key").unwrap().to_vec(), b"k-1");
}

#[test]
fn colliding_names_get_a_suffix_unless_forced() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "collide", &[alice]);
    vault.put("db__user", b"existing", true).unwrap();

    let outcome = vault
        .ref_content(RefKind::Yaml, b"db:\n  user: fresh\n", None, false, true)
        .unwrap();
    assert!(outcome.result.contains("{{SEAL.collide.db__user_1}}"));
    assert_eq!(vault.get_value("db__user").unwrap().to_vec(), b"existing");
    assert_eq!(vault.get_value("db__user_1").unwrap().to_vec(), b"fresh");

    let outcome = vault
        .ref_content(RefKind::Yaml, b"db:\n  user: forced\n", None, true, true)
        .unwrap();
    assert!(outcome.result.contains("{{SEAL.collide.db__user}}"));
    assert_eq!(vault.get_value("db__user").unwrap().to_vec(), b"forced");
}

#[test]
fn existing_placeholders_are_left_alone() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "idem", &[alice]);

    let first = vault
        .ref_content(RefKind::Yaml, b"token: abc\n", None, false, true)
        .unwrap();
    let second = vault
        .ref_content(RefKind::Yaml, first.result.as_bytes(), None, false, true)
        .unwrap();
    assert_eq!(first.result, second.result);
    assert_eq!(vault.item_names(), vec!["token"]);
}

#[test]
fn blob_conflict_commits_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "blob", &[alice]);

    let outcome = vault
        .ref_content(RefKind::Blob, b"-----BEGIN CERT-----\n", Some("tls_cert"), false, true)
        .unwrap();
    assert_eq!(outcome.result, "{{SEAL.blob.tls_cert}}");
    assert!(!outcome.conflicting);

    let before = fs::read_to_string(vault_path(temp_dir.path(), "blob")).unwrap();
    let outcome = vault
        .ref_content(RefKind::Blob, b"replacement", Some("tls_cert"), false, true)
        .unwrap();
    assert!(outcome.conflicting);
    assert!(outcome.result.is_empty());
    assert_eq!(
        fs::read_to_string(vault_path(temp_dir.path(), "blob")).unwrap(),
        before
    );
    assert_eq!(
        vault.get_value("tls_cert").unwrap().to_vec(),
        b"-----BEGIN CERT-----\n"
    );
}

#[test]
fn blob_requires_valid_name() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "blobname", &[alice]);
    assert!(matches!(
        vault.ref_content(RefKind::Blob, b"x", None, false, true),
        Err(SealError::Validation(_))
    ));
}

#[test]
fn ref_file_dry_run_changes_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "dry", &[alice]);
    let config_path = temp_dir.path().join("app.yaml");
    fs::write(&config_path, APP_CONFIG).unwrap();

    let outcome = vault
        .ref_file(RefKind::Yaml, &config_path, None, false, true, true)
        .unwrap();
    assert!(outcome.result.contains("{{SEAL.dry.db__pass}}"));
    assert_eq!(fs::read_to_string(&config_path).unwrap(), APP_CONFIG);
    assert!(vault.item_names().is_empty());
}

#[test]
fn ref_then_deref_file_restores_values() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (alice_secret, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "cycle", &[alice]);
    let config_path = temp_dir.path().join("app.yaml");
    fs::write(&config_path, APP_CONFIG).unwrap();

    vault
        .ref_file(RefKind::Yaml, &config_path, None, false, true, false)
        .unwrap();
    let rewritten = fs::read_to_string(&config_path).unwrap();
    assert!(!rewritten.contains("s3cr3t"));

    let mut reopened = Vault::open(vault_path(temp_dir.path(), "cycle")).unwrap();
    reopened.unlock(&alice_secret).unwrap();
    let preview = reopened.deref_file(&config_path, true).unwrap().unwrap();
    assert_eq!(fs::read_to_string(&config_path).unwrap(), rewritten);

    assert!(reopened.deref_file(&config_path, false).unwrap().is_none());
    let restored = fs::read(&config_path).unwrap();
    assert_eq!(restored, preview);

    let original: serde_yaml::Value = serde_yaml::from_str(APP_CONFIG).unwrap();
    let restored: serde_yaml::Value = serde_yaml::from_slice(&restored).unwrap();
    assert_eq!(original, restored);
}

#[test]
fn deref_of_single_placeholder_returns_raw_bytes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "raw", &[alice]);
    vault.put("key_pem", b"line1\nline2\n", true).unwrap();

    let value = vault.deref_content("  {{SEAL.raw.key_pem}}\n").unwrap();
    assert_eq!(value, b"line1\nline2\n");
}

#[test]
fn deref_substitutes_inside_text_and_keeps_foreign_placeholders() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "text", &[alice]);
    vault.put("user", b"admin", true).unwrap();
    vault.put("pass", b"pw", false).unwrap();

    let rendered = vault
        .deref_content("url: postgres://{{ SEAL.text.user }}:{{SEAL.text.pass}}@db/{{SEAL.other.name}}")
        .unwrap();
    assert_eq!(
        String::from_utf8(rendered).unwrap(),
        "url: postgres://admin:pw@db/{{SEAL.other.name}}"
    );
}

#[test]
fn deref_matches_vault_id() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "byid", &[alice]);
    vault.put("token", b"t", true).unwrap();

    let text = format!("auth={{{{SEAL.{}.token}}}}", vault.id());
    assert_eq!(vault.deref_content(&text).unwrap(), b"auth=t");
}

#[test]
fn deref_fails_for_locked_vault_and_unknown_items() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, alice) = environment_key();
    let mut vault = create_vault(temp_dir.path(), "locked", &[alice]);
    vault.put("token", b"t", false).unwrap();

    assert!(matches!(
        vault.deref_content("{{SEAL.locked.missing}}"),
        Err(SealError::NotFound)
    ));

    vault.lock();
    assert!(matches!(
        vault.deref_content("{{SEAL.locked.token}}"),
        Err(SealError::VaultLocked)
    ));
}

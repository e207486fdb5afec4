//! # Reconciliation Integration Tests
//!
//! Runs whole configuration trees against an in-memory Vault.
//!
//! These tests verify:
//! - Auth mounts, then policies, then generic documents are applied
//! - A second run over an unchanged tree issues no mutating calls
//! - Undeclared policies, auth mounts and documents are removed, protected ones kept
//! - Dry runs read everything and change nothing
//! - Directory and tarball document sets both work end to end

mod common;

use common::write_tree;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use vault_config_sync::config::SyncConfig;
use vault_config_sync::reconciler::{ConfigWalker, HandlerConfig};
use vault_config_sync::sync;
use vault_config_sync::vault::dry::DryRunClient;
use vault_config_sync::vault::memory::MemoryVault;
use vault_config_sync::vault::VaultClient;

const APPROLE_AUTH: &str = r#"{
    "type": "approle",
    "description": "Application logins",
    "config": {"default_lease_ttl": "1h", "max_lease_ttl": "24h"}
}"#;

const ADMIN_POLICY: &str = r#"{"policy": "path \"*\" { capabilities = [\"sudo\"] }"}"#;

const APP_ROLE: &str = r#"{
    "policies": ["admin", "reader"],
    "token_ttl": "1h",
    "bind_secret_id": true
}"#;

fn standard_tree(root: &Path) {
    write_tree(
        root,
        &[
            ("sys/auth/approle.json", APPROLE_AUTH),
            ("sys/policy/admin.json", ADMIN_POLICY),
            ("auth/approle/role/app.json", APP_ROLE),
        ],
    );
}

fn sync_config(document_path: &Path) -> SyncConfig {
    SyncConfig {
        document_path: document_path.to_str().unwrap().to_string(),
        role: "vault-config-sync".to_string(),
        ..SyncConfig::default()
    }
}

async fn walk(client: Arc<dyn VaultClient>, root: &Path) -> anyhow::Result<()> {
    let config = HandlerConfig {
        document_path: root.to_path_buf(),
        ..HandlerConfig::default()
    };
    ConfigWalker::new(client, config).await?.run().await
}

#[tokio::test]
async fn test_run_applies_auth_then_policies_then_documents() {
    let dir = tempfile::tempdir().unwrap();
    standard_tree(dir.path());

    let vault = Arc::new(MemoryVault::initialized());
    vault.insert_mount("userpass/", "userpass");
    vault.insert_policy("stale", "path \"old/*\" {}");

    walk(vault.clone(), dir.path()).await.unwrap();

    assert_eq!(
        vault.calls(),
        vec![
            "enable_auth approle/",
            "disable_auth userpass/",
            "put_policy admin",
            "delete_policy stale",
            "write auth/approle/role/app",
        ]
    );
    assert_eq!(vault.mount_paths(), vec!["approle/", "token/"]);
    assert_eq!(vault.policy_names(), vec!["admin", "default", "root"]);
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    standard_tree(dir.path());

    let vault = Arc::new(MemoryVault::initialized());
    walk(vault.clone(), dir.path()).await.unwrap();
    assert_eq!(vault.calls().len(), 3);

    vault.clear_calls();
    walk(vault.clone(), dir.path()).await.unwrap();
    assert!(vault.calls().is_empty(), "unexpected calls: {:?}", vault.calls());
}

#[tokio::test]
async fn test_equivalent_live_ttl_forms_are_not_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path(), &[("auth/approle/role/app.json", APP_ROLE)]);

    let vault = Arc::new(MemoryVault::initialized());
    vault.insert_document(
        "auth/approle/role/app",
        serde_json::json!({
            "policies": ["admin", "reader"],
            "token_ttl": 3600,
            "bind_secret_id": true,
            "secret_id_num_uses": 0
        }),
    );

    walk(vault.clone(), dir.path()).await.unwrap();
    assert!(vault.calls().is_empty(), "unexpected calls: {:?}", vault.calls());
}

#[tokio::test]
async fn test_token_mount_and_fixed_policies_survive_an_empty_declaration() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sys/auth")).unwrap();
    std::fs::create_dir_all(dir.path().join("sys/policy")).unwrap();

    let vault = Arc::new(MemoryVault::initialized());
    vault.insert_mount("github/", "github");
    vault.insert_policy("qux", "");
    vault.insert_policy("quux", "");

    walk(vault.clone(), dir.path()).await.unwrap();

    assert_eq!(
        vault.calls(),
        vec!["disable_auth github/", "delete_policy quux", "delete_policy qux"]
    );
    assert_eq!(vault.mount_paths(), vec!["token/"]);
    assert_eq!(vault.policy_names(), vec!["default", "root"]);
}

#[tokio::test]
async fn test_generic_prune_removes_undeclared_leaves() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path(), &[("secret/app/keep.json", r#"{"value": "a"}"#)]);

    let vault = Arc::new(MemoryVault::initialized());
    vault.insert_document("secret/app/keep", serde_json::json!({"value": "a"}));
    vault.insert_document("secret/app/old", serde_json::json!({"value": "b"}));
    vault.insert_document("secret/app/_meta", serde_json::json!({"owner": "ops"}));
    vault.insert_document("secret/app/nested/leaf", serde_json::json!({"value": "c"}));

    walk(vault.clone(), dir.path()).await.unwrap();

    assert_eq!(vault.calls(), vec!["delete secret/app/old"]);
    assert_eq!(
        vault.document_paths(),
        vec!["secret/app/_meta", "secret/app/keep", "secret/app/nested/leaf"]
    );
}

#[tokio::test]
async fn test_sideband_and_root_level_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            ("top.json", r#"{"a": 1}"#),
            ("_drafts/secret/x.json", r#"{"a": 1}"#),
            ("secret/_notes.json", r#"{"a": 1}"#),
            ("secret/real.json", r#"{"a": 1}"#),
        ],
    );

    let vault = Arc::new(MemoryVault::initialized());
    walk(vault.clone(), dir.path()).await.unwrap();

    assert_eq!(vault.calls(), vec!["write secret/real"]);
}

#[tokio::test]
async fn test_templated_policies_fan_out_per_instance() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            (
                "_template.json",
                r#"{"variables": {"mount": "kv"}, "instances": {"team": ["billing", "search"]}}"#,
            ),
            (
                "sys/policy/read_{{ team }}.json",
                r#"{"policy": "path \"{{ mount }}/{{ team }}/*\" { capabilities = [\"read\"] }"}"#,
            ),
        ],
    );

    let vault = Arc::new(MemoryVault::initialized());
    sync::run(vault.clone(), &sync_config(dir.path()))
        .await
        .unwrap();

    assert_eq!(
        vault.calls(),
        vec!["put_policy billing", "put_policy search"]
    );
    assert_eq!(
        vault.policy("search").as_deref(),
        Some(r#"path "kv/search/*" { capabilities = ["read"] }"#)
    );
}

#[tokio::test]
async fn test_template_param_overrides_file_variables() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            ("_template.json", r#"{"variables": {"env": "staging"}}"#),
            ("secret/app.json", r#"{"environment": "{{ env }}"}"#),
        ],
    );

    let vault = Arc::new(MemoryVault::initialized());
    let config = SyncConfig {
        template_params: vec!["env=production".to_string()],
        ..sync_config(dir.path())
    };
    sync::run(vault.clone(), &config).await.unwrap();

    let document = vault.document("secret/app").unwrap();
    assert_eq!(document["environment"], "production");
}

#[tokio::test]
async fn test_dry_run_reads_but_never_mutates() {
    let dir = tempfile::tempdir().unwrap();
    standard_tree(dir.path());

    let vault = Arc::new(MemoryVault::initialized());
    vault.insert_mount("userpass/", "userpass");
    vault.insert_policy("stale", "");
    vault.insert_document("auth/approle/role/old", serde_json::json!({"a": 1}));

    let dry: Arc<dyn VaultClient> = Arc::new(DryRunClient::new(vault.clone()));
    let config = SyncConfig {
        dry: true,
        ..sync_config(dir.path())
    };
    sync::run(dry, &config).await.unwrap();

    assert!(vault.calls().is_empty(), "unexpected calls: {:?}", vault.calls());
    assert!(vault.read_count() > 0);
    assert_eq!(vault.mount_paths(), vec!["token/", "userpass/"]);
    assert_eq!(vault.policy_names(), vec!["default", "root", "stale"]);
    assert!(vault.document("auth/approle/role/old").is_some());
}

#[tokio::test]
async fn test_dry_run_reports_exactly_the_actions_a_real_run_performs() {
    let dir = tempfile::tempdir().unwrap();
    standard_tree(dir.path());
    write_tree(dir.path(), &[("secret/app/keep.json", r#"{"value": "a"}"#)]);

    fn seed(vault: &MemoryVault) {
        vault.insert_mount("userpass/", "userpass");
        vault.insert_policy("stale", "");
        vault.insert_document("auth/approle/role/old", serde_json::json!({"a": 1}));
        vault.insert_document("secret/app/keep", serde_json::json!({"value": "b"}));
        vault.insert_document("secret/app/gone", serde_json::json!({"value": "c"}));
    }

    let real = Arc::new(MemoryVault::initialized());
    seed(&real);
    sync::run(real.clone(), &sync_config(dir.path()))
        .await
        .unwrap();

    let rehearsal = Arc::new(MemoryVault::initialized());
    seed(&rehearsal);
    let dry = Arc::new(DryRunClient::new(rehearsal.clone()));
    let config = SyncConfig {
        dry: true,
        ..sync_config(dir.path())
    };
    sync::run(dry.clone(), &config).await.unwrap();

    assert!(!real.calls().is_empty());
    assert_eq!(dry.suppressed(), real.calls());
    assert!(rehearsal.calls().is_empty());
}

#[tokio::test]
async fn test_failing_handler_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            (
                "sys/auth/approle.json",
                r#"{"type": "approle", "config": {"default_lease_ttl": "one hour"}}"#,
            ),
            ("sys/policy/admin.json", ADMIN_POLICY),
            ("secret/app.json", r#"{"a": 1}"#),
        ],
    );

    let vault = Arc::new(MemoryVault::initialized());
    let err = sync::run(vault.clone(), &sync_config(dir.path()))
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("default_lease_ttl"), "{err:#}");
    assert!(vault.calls().is_empty(), "unexpected calls: {:?}", vault.calls());
}

#[tokio::test]
async fn test_sync_authenticates_with_configured_role() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Arc::new(MemoryVault::initialized());

    sync::run(vault.clone(), &sync_config(dir.path()))
        .await
        .unwrap();

    assert_eq!(vault.roles(), vec!["vault-config-sync"]);
}

#[tokio::test]
async fn test_sync_fails_for_missing_directory() {
    let vault = Arc::new(MemoryVault::initialized());
    let err = sync::run(vault.clone(), &sync_config(Path::new("/nonexistent/vault-config")))
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("/nonexistent/vault-config"), "{err:#}");
}

#[tokio::test]
async fn test_sync_from_local_tarball() {
    let staging = tempfile::tempdir().unwrap();
    standard_tree(&staging.path().join("vault-config"));

    let archive = staging.path().join("vault-config.tar.gz");
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(staging.path())
        .arg("vault-config")
        .status()
        .unwrap();
    assert!(status.success());

    let vault = Arc::new(MemoryVault::initialized());
    sync::run(vault.clone(), &sync_config(&archive))
        .await
        .unwrap();

    assert_eq!(
        vault.calls(),
        vec![
            "enable_auth approle/",
            "put_policy admin",
            "write auth/approle/role/app",
        ]
    );
}

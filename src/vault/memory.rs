//! # In-Memory Vault
//!
//! A [`VaultClient`] that keeps documents, auth mounts and policies in process memory.
//! Every mutating call is recorded as `"<action> <target>"` in call order, which makes
//! it the backend for local rehearsals and for the reconciler tests.

use super::{AuthMount, Document, EnableAuthOptions, VaultClient};
use crate::reconciler::sys_auth::convert_auth_config;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-process Vault store
#[derive(Debug, Default)]
pub struct MemoryVault {
    documents: Mutex<BTreeMap<String, Document>>,
    mounts: Mutex<HashMap<String, AuthMount>>,
    policies: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<String>>,
    roles: Mutex<Vec<String>>,
    reads: Mutex<usize>,
    fail_reads: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryVault {
    /// A server in its freshly initialised state: `token/` mounted, `root` and `default`
    /// policies present
    pub fn initialized() -> Self {
        let vault = Self::default();
        vault.insert_mount("token/", "token");
        vault.insert_policy("root", "");
        vault.insert_policy("default", "path \"sys/capabilities-self\" {}");
        vault
    }

    /// A store whose document reads fail with "permission denied"
    pub fn with_failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    /// Seed a document; non-object values are ignored
    pub fn insert_document(&self, path: &str, value: serde_json::Value) {
        if let serde_json::Value::Object(map) = value {
            lock(&self.documents).insert(path.to_string(), map);
        }
    }

    /// Seed an auth mount of `auth_type` with default tuning
    pub fn insert_mount(&self, path: &str, auth_type: &str) {
        self.insert_auth_mount(
            path,
            AuthMount {
                auth_type: auth_type.to_string(),
                ..AuthMount::default()
            },
        );
    }

    pub fn insert_auth_mount(&self, path: &str, mount: AuthMount) {
        lock(&self.mounts).insert(path.to_string(), mount);
    }

    pub fn insert_policy(&self, name: &str, body: &str) {
        lock(&self.policies).insert(name.to_string(), body.to_string());
    }

    pub fn document(&self, path: &str) -> Option<Document> {
        lock(&self.documents).get(path).cloned()
    }

    /// Stored document paths, sorted
    pub fn document_paths(&self) -> Vec<String> {
        lock(&self.documents).keys().cloned().collect()
    }

    pub fn mount(&self, path: &str) -> Option<AuthMount> {
        lock(&self.mounts).get(path).cloned()
    }

    /// Enabled mount paths, sorted
    pub fn mount_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.mounts).keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        lock(&self.policies).get(name).cloned()
    }

    /// Policy names, sorted
    pub fn policy_names(&self) -> Vec<String> {
        lock(&self.policies).keys().cloned().collect()
    }

    /// Mutating calls so far
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Roles passed to `authenticate`
    pub fn roles(&self) -> Vec<String> {
        lock(&self.roles).clone()
    }

    /// Number of read-only calls served
    pub fn read_count(&self) -> usize {
        *lock(&self.reads)
    }

    fn record(&self, action: &str, target: &str) {
        lock(&self.calls).push(format!("{action} {target}"));
    }

    fn count_read(&self) {
        *lock(&self.reads) += 1;
    }
}

#[async_trait]
impl VaultClient for MemoryVault {
    async fn authenticate(&self, role: &str) -> Result<()> {
        lock(&self.roles).push(role.to_string());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Document>> {
        self.count_read();
        if self.fail_reads {
            anyhow::bail!("permission denied");
        }
        Ok(self.document(path))
    }

    async fn list(&self, path: &str) -> Result<Option<Vec<String>>> {
        self.count_read();
        let prefix = format!("{path}/");
        let mut keys: Vec<String> = Vec::new();
        for key in lock(&self.documents).keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((folder, _)) => format!("{folder}/"),
                None => rest.to_string(),
            };
            if !keys.contains(&entry) {
                keys.push(entry);
            }
        }
        Ok((!keys.is_empty()).then_some(keys))
    }

    async fn write(&self, path: &str, data: &Document) -> Result<()> {
        self.record("write", path);
        lock(&self.documents).insert(path.to_string(), data.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.record("delete", path);
        lock(&self.documents).remove(path);
        Ok(())
    }

    async fn list_auth(&self) -> Result<HashMap<String, AuthMount>> {
        self.count_read();
        Ok(lock(&self.mounts).clone())
    }

    async fn enable_auth(&self, path: &str, options: &EnableAuthOptions) -> Result<()> {
        self.record("enable_auth", path);
        let mount = AuthMount {
            auth_type: options.auth_type.clone(),
            description: options.description.clone(),
            accessor: format!("auth_{}_0001", options.auth_type),
            config: convert_auth_config(&options.config)?,
            local: options.local,
            seal_wrap: options.seal_wrap,
        };
        self.insert_auth_mount(path, mount);
        Ok(())
    }

    async fn disable_auth(&self, path: &str) -> Result<()> {
        self.record("disable_auth", path);
        lock(&self.mounts).remove(path);
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        self.count_read();
        Ok(self.policy_names())
    }

    async fn get_policy(&self, name: &str) -> Result<Option<String>> {
        self.count_read();
        Ok(self.policy(name))
    }

    async fn put_policy(&self, name: &str, policy: &str) -> Result<()> {
        self.record("put_policy", name);
        self.insert_policy(name, policy);
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        self.record("delete_policy", name);
        lock(&self.policies).remove(name);
        Ok(())
    }
}

//! # Dry-Run Client
//!
//! Wraps a [`VaultClient`] so that every read reaches the server unchanged while every
//! write is logged and skipped. Diff decisions are therefore identical to a real run,
//! and the skipped actions are kept as `"<action> <target>"` for the final report.

use super::{AuthMount, Document, EnableAuthOptions, VaultClient};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Write-suppressing decorator
pub struct DryRunClient {
    inner: Arc<dyn VaultClient>,
    suppressed: Mutex<Vec<String>>,
}

impl std::fmt::Debug for DryRunClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DryRunClient").finish_non_exhaustive()
    }
}

impl DryRunClient {
    pub fn new(inner: Arc<dyn VaultClient>) -> Self {
        Self {
            inner,
            suppressed: Mutex::new(Vec::new()),
        }
    }

    /// Actions that would have been performed, in call order
    pub fn suppressed(&self) -> Vec<String> {
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn suppress(&self, action: &str, target: &str) {
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{action} {target}"));
    }
}

#[async_trait]
impl VaultClient for DryRunClient {
    async fn authenticate(&self, role: &str) -> Result<()> {
        self.inner.authenticate(role).await
    }

    async fn read(&self, path: &str) -> Result<Option<Document>> {
        self.inner.read(path).await
    }

    async fn list(&self, path: &str) -> Result<Option<Vec<String>>> {
        self.inner.list(path).await
    }

    async fn write(&self, path: &str, data: &Document) -> Result<()> {
        info!(
            action = "write",
            path,
            keys = data.len(),
            "Dry run: no action performed"
        );
        self.suppress("write", path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        info!(action = "delete", path, "Dry run: no action performed");
        self.suppress("delete", path);
        Ok(())
    }

    async fn list_auth(&self) -> Result<HashMap<String, AuthMount>> {
        self.inner.list_auth().await
    }

    async fn enable_auth(&self, path: &str, options: &EnableAuthOptions) -> Result<()> {
        info!(
            action = "enable_auth",
            path,
            auth_type = %options.auth_type,
            "Dry run: no action performed"
        );
        self.suppress("enable_auth", path);
        Ok(())
    }

    async fn disable_auth(&self, path: &str) -> Result<()> {
        info!(action = "disable_auth", path, "Dry run: no action performed");
        self.suppress("disable_auth", path);
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        self.inner.list_policies().await
    }

    async fn get_policy(&self, name: &str) -> Result<Option<String>> {
        self.inner.get_policy(name).await
    }

    async fn put_policy(&self, name: &str, _policy: &str) -> Result<()> {
        info!(action = "put_policy", name, "Dry run: no action performed");
        self.suppress("put_policy", name);
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        info!(action = "delete_policy", name, "Dry run: no action performed");
        self.suppress("delete_policy", name);
        Ok(())
    }
}

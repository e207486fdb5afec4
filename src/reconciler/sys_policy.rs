//! # SysPolicy Handler
//!
//! Writes the ACL policies declared under `sys/policy` and deletes live policies that
//! are not declared. `root` and `default` are never deleted.
//!
//! Policy files are `{"policy": "<body>"}` with an optional `"name"`. A file name may
//! carry one `{{ placeholder }}` to generate a family of policies from one template.
//! Without a `"name"`, each generated policy is named after its instance label alone,
//! so `read_{{ svc }}.json` with instances `one` and `two` yields policies `one` and
//! `two`. Set `"name"` in the body (for example `"read_{{ svc }}"`) to keep a prefix.
//!
//! Policy bodies are compared as plain text, so a reformatted but equivalent policy is
//! rewritten.

use super::{document_files, load_file, HandlerConfig};
use crate::constants::{FIXED_POLICIES, SYS_POLICY_DIR, SYS_POLICY_ORDER};
use crate::template::file_stem;
use crate::vault::VaultClient;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// A declared policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySpec {
    pub name: String,
    pub policy: String,
}

/// On-disk policy document
#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    name: Option<String>,
    policy: String,
}

/// Handler for `sys/policy`
pub struct SysPolicyHandler {
    client: Arc<dyn VaultClient>,
    config: HandlerConfig,
    order: i32,
    fixed: HashSet<String>,
    /// Policy names on the server when the handler was built
    live: Vec<String>,
    /// Policy names declared so far in this run
    configured: HashSet<String>,
}

impl std::fmt::Debug for SysPolicyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysPolicyHandler")
            .field("order", &self.order)
            .field("live", &self.live)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

impl SysPolicyHandler {
    /// Build the handler, fetching the live policy names once
    ///
    /// # Errors
    /// Fails when the policies cannot be listed.
    pub async fn new(client: Arc<dyn VaultClient>, config: HandlerConfig) -> Result<Self> {
        Self::with_fixed_policies(client, config, FIXED_POLICIES).await
    }

    /// Build the handler with a custom set of never-deleted policies
    ///
    /// # Errors
    /// Fails when the policies cannot be listed.
    pub async fn with_fixed_policies(
        client: Arc<dyn VaultClient>,
        config: HandlerConfig,
        fixed: &[&str],
    ) -> Result<Self> {
        let live = client
            .list_policies()
            .await
            .context("Error listing policies")?;
        debug!("Found {} live policies", live.len());

        Ok(Self {
            client,
            config,
            order: SYS_POLICY_ORDER,
            fixed: fixed.iter().map(ToString::to_string).collect(),
            live,
            configured: HashSet::new(),
        })
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// Ensure every declared policy, then delete the undeclared ones
    ///
    /// # Errors
    /// Fails on the first file that cannot be parsed or applied, or when a delete fails.
    pub async fn apply_directory(&mut self, dir: &Path) -> Result<()> {
        let span = info_span!("handler.apply", handler = "SysPolicy", dir = %dir.display());
        async {
            for file in document_files(dir)? {
                self.apply_file(&file).await?;
            }
            self.remove_undeclared_policies().await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn apply_file(&mut self, file: &Path) -> Result<()> {
        let (api_path, docs) = load_file(&self.config, file)?;
        if !api_path.starts_with(SYS_POLICY_DIR) {
            anyhow::bail!("Found file without {SYS_POLICY_DIR} prefix: {api_path}");
        }

        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let stem = file_stem(file_name);

        for doc in docs {
            let parsed: PolicyDocument = serde_json::from_str(&doc.content)
                .with_context(|| format!("Failed to parse JSON from {}", file.display()))?;
            let name = parsed
                .name
                .filter(|n| !n.is_empty())
                .or_else(|| (!doc.name.is_empty()).then(|| doc.name.clone()))
                .unwrap_or_else(|| stem.to_string());

            let spec = PolicySpec {
                name,
                policy: parsed.policy,
            };
            self.ensure_policy(&spec)
                .await
                .with_context(|| format!("Failed to apply policy at {api_path}"))?;
        }
        Ok(())
    }

    /// Make sure the policy is present with the declared body; returns whether a write
    /// was issued
    ///
    /// # Errors
    /// Fails when the write fails.
    pub async fn ensure_policy(&mut self, spec: &PolicySpec) -> Result<bool> {
        self.configured.insert(spec.name.clone());

        if self.is_policy_applied(spec).await {
            debug!(policy = %spec.name, "Policy already applied");
            return Ok(false);
        }

        info!(policy = %spec.name, "Applying policy");
        self.client
            .put_policy(&spec.name, &spec.policy)
            .await
            .with_context(|| format!("Failed to write policy {}", spec.name))?;
        Ok(true)
    }

    fn policy_exists(&self, name: &str) -> bool {
        self.live.iter().any(|p| p == name)
    }

    async fn is_policy_applied(&self, spec: &PolicySpec) -> bool {
        if !self.policy_exists(&spec.name) {
            return false;
        }
        match self.client.get_policy(&spec.name).await {
            Ok(Some(live)) => live == spec.policy,
            Ok(None) => false,
            Err(e) => {
                warn!(policy = %spec.name, "Could not read policy, assuming not applied: {:#}", e);
                false
            }
        }
    }

    /// Delete live policies that are neither fixed nor declared; returns the deleted
    /// names
    ///
    /// # Errors
    /// Fails on the first delete that fails.
    pub async fn remove_undeclared_policies(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();

        for name in &self.live {
            if self.fixed.contains(name) || self.configured.contains(name) {
                continue;
            }
            info!(policy = %name, "Deleting policy");
            self.client
                .delete_policy(name)
                .await
                .with_context(|| format!("Failed to delete policy {name}"))?;
            deleted.push(name.clone());
        }

        Ok(deleted)
    }
}

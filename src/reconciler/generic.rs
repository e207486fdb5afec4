//! # Generic Handler
//!
//! Writes each JSON document to the Vault path mirroring its location in the tree,
//! then deletes live leaves under the owned directories that were not declared.

use super::equivalence::are_keys_applied;
use super::{document_dirs, document_files, load_file, relative_path, template_path, HandlerConfig};
use crate::vault::{Document, VaultClient};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Handler for every directory without a dedicated handler
pub struct GenericHandler {
    client: Arc<dyn VaultClient>,
    config: HandlerConfig,
    /// Paths declared so far in this run
    configured: HashSet<String>,
}

impl std::fmt::Debug for GenericHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericHandler")
            .field("document_path", &self.config.document_path)
            .field("configured", &self.configured.len())
            .finish_non_exhaustive()
    }
}

impl GenericHandler {
    pub fn new(client: Arc<dyn VaultClient>, config: HandlerConfig) -> Self {
        Self {
            client,
            config,
            configured: HashSet::new(),
        }
    }

    /// Apply every file under `dir`, then prune undeclared documents beneath it
    ///
    /// # Errors
    /// Fails on the first file that cannot be rendered, parsed or written, or when a
    /// prune delete fails.
    pub async fn apply_directory(&mut self, dir: &Path) -> Result<()> {
        let span = info_span!("handler.apply", handler = "Generic", dir = %dir.display());
        async {
            for file in document_files(dir)? {
                self.apply_file(&file).await?;
            }
            self.prune(dir).await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn apply_file(&mut self, file: &Path) -> Result<()> {
        let (api_path, docs) = load_file(&self.config, file)?;

        for doc in docs {
            let data: Document = serde_json::from_str(&doc.content)
                .with_context(|| format!("Failed to parse JSON from file {}", file.display()))?;
            let write_path = template_path(&api_path, &doc.name);
            self.ensure_doc(&write_path, &data).await?;
        }
        Ok(())
    }

    /// Make sure `data` is present at `path`; returns whether a write was issued
    ///
    /// # Errors
    /// Fails when the comparison meets an unsupported value shape or the write fails.
    pub async fn ensure_doc(&mut self, path: &str, data: &Document) -> Result<bool> {
        self.configured.insert(path.to_string());

        let applied = self
            .is_doc_applied(path, data)
            .await
            .with_context(|| format!("Could not determine if {path:?} is applied"))?;
        if applied {
            debug!(path, "Document already applied");
            return Ok(false);
        }

        info!(path, "Applying document");
        self.client
            .write(path, data)
            .await
            .with_context(|| format!("Failed to write {path:?}"))?;
        Ok(true)
    }

    async fn is_doc_applied(&self, path: &str, data: &Document) -> Result<bool> {
        let live = match self.client.read(path).await {
            Ok(Some(live)) => live,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(path, "Read failed, assuming document is not present: {:#}", e);
                return Ok(false);
            }
        };
        Ok(are_keys_applied(data, &live)?)
    }

    /// Delete live leaves under `dir` (and its local sub-directories) that this run did
    /// not declare; returns the deleted paths
    ///
    /// # Errors
    /// Fails when the tree cannot be walked or a delete fails.
    pub async fn prune(&self, dir: &Path) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for local_dir in document_dirs(dir)? {
            let vault_dir = relative_path(&self.config.document_path, &local_dir)?;
            if vault_dir.is_empty() {
                continue;
            }

            let keys = match self.client.list(&vault_dir).await {
                Ok(Some(keys)) => keys,
                Ok(None) => {
                    debug!(path = %vault_dir, "Nothing listed, skipping prune");
                    continue;
                }
                Err(e) => {
                    warn!(path = %vault_dir, "List failed, skipping prune: {:#}", e);
                    continue;
                }
            };

            for key in keys {
                if key.ends_with('/') || key.starts_with(crate::constants::SIDEBAND_PREFIX) {
                    continue;
                }
                let path = format!("{vault_dir}/{key}");
                if self.configured.contains(&path) {
                    continue;
                }
                info!(path = %path, "Deleting undeclared document");
                self.client
                    .delete(&path)
                    .await
                    .with_context(|| format!("Failed to delete {path:?}"))?;
                removed.push(path);
            }
        }

        Ok(removed)
    }
}

//! # Sync
//!
//! One reconciliation run: authenticate, fetch the documents, walk the tree, and
//! clean up the fetched documents whatever the outcome.

use crate::config::SyncConfig;
use crate::constants::DEFAULT_TEMPLATE_FILE;
use crate::document::{self, DocumentSet};
use crate::reconciler::{ConfigWalker, HandlerConfig};
use crate::template::TemplateParameters;
use crate::vault::VaultClient;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Reconcile Vault with the configuration described by `config`
///
/// # Errors
/// Fails when authentication, fetching, parameter loading or any handler fails.
pub async fn run(client: Arc<dyn VaultClient>, config: &SyncConfig) -> Result<()> {
    let span = info_span!("sync.run", document_path = %config.document_path, dry = config.dry);

    async {
        client
            .authenticate(&config.role)
            .await
            .context("Failed authenticating with Vault")?;

        let mut documents =
            document::for_path(&config.document_path, config.document_sha256.clone())?;
        let result = apply_documents(client, config, documents.as_mut()).await;
        documents.clean_up();
        result
    }
    .instrument(span)
    .await
}

async fn apply_documents(
    client: Arc<dyn VaultClient>,
    config: &SyncConfig,
    documents: &mut dyn DocumentSet,
) -> Result<()> {
    documents
        .fetch()
        .await
        .with_context(|| format!("Failed to fetch documents from {}", config.document_path))?;
    let document_path = documents.path()?;
    info!("Applying documents from {}", document_path.display());

    let params = load_params(config, &document_path)?;
    let handler_config = HandlerConfig {
        document_path,
        params,
    };

    let mut walker = ConfigWalker::new(client, handler_config)
        .await
        .context("Failed to instantiate config walker")?;
    walker.run().await
}

/// Template parameters for the run: the configured file, else `_template.json` at the
/// document root when present, plus command-line overrides
fn load_params(config: &SyncConfig, document_path: &Path) -> Result<TemplateParameters> {
    let default_file = document_path.join(DEFAULT_TEMPLATE_FILE);
    let file = match &config.template_file {
        Some(file) => Some(file.as_path()),
        None if default_file.is_file() => {
            debug!("Using template file {}", default_file.display());
            Some(default_file.as_path())
        }
        None => None,
    };
    TemplateParameters::load(file, &config.template_params)
        .context("Could not generate template parameters")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_params_uses_template_file_in_document_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_TEMPLATE_FILE),
            r#"{"variables": {"env": "prod"}}"#,
        )
        .unwrap();

        let config = SyncConfig {
            template_params: vec!["team=core".to_string()],
            ..SyncConfig::default()
        };
        let params = load_params(&config, dir.path()).unwrap();
        assert_eq!(params.variables["env"], "prod");
        assert_eq!(params.variables["team"], "core");
    }

    #[test]
    fn test_load_params_explicit_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_TEMPLATE_FILE),
            r#"{"variables": {"env": "prod"}}"#,
        )
        .unwrap();
        let explicit = dir.path().join("other.json");
        std::fs::write(&explicit, r#"{"variables": {"env": "dev"}}"#).unwrap();

        let config = SyncConfig {
            template_file: Some(explicit),
            ..SyncConfig::default()
        };
        assert_eq!(load_params(&config, dir.path()).unwrap().variables["env"], "dev");
    }

    #[test]
    fn test_load_params_without_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let params = load_params(&SyncConfig::default(), dir.path()).unwrap();
        assert!(params.variables.is_empty());
        assert!(params.instances.is_empty());
    }
}

//! # Vault Config Sync
//!
//! Applies a directory tree of JSON documents to a Vault server.
//!
//! ## Overview
//!
//! 1. **Authenticates** with a static token or a Kubernetes service account role
//! 2. **Fetches the tree** from a local directory, a local tarball, or an http(s) tarball
//! 3. **Applies** auth mounts, then ACL policies, then every other directory as generic
//!    documents, removing what the tree no longer declares
//!
//! With `--dry` every read still happens while writes, deletes and mount changes are
//! only logged.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use vault_config_sync::config::{SyncConfig, VaultConfig};
use vault_config_sync::sync;
use vault_config_sync::vault::dry::DryRunClient;
use vault_config_sync::vault::rest::VaultRest;
use vault_config_sync::vault::VaultClient;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_DATETIME"),
    ")"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Apply Vault policies, auth mounts and documents from a configuration tree
#[derive(Debug, Parser)]
#[command(name = "vault-config-sync", version, long_version = LONG_VERSION)]
struct Cli {
    /// Directory, `.tar.gz`/`.tgz` file, or http(s) URL of a gzipped tarball
    #[arg(long, env = "VAULT_SYNC_DOCUMENT_PATH")]
    document_path: String,

    /// Role to log in as when VAULT_TOKEN is not set
    #[arg(long, env = "VAULT_SYNC_ROLE", default_value = "")]
    role: String,

    /// JSON file with template `variables` and `instances`
    #[arg(long, value_name = "FILE")]
    template_file: Option<PathBuf>,

    /// Template variable override, may be repeated
    #[arg(long = "template-param", value_name = "KEY=VALUE")]
    template_params: Vec<String>,

    /// Only read from Vault; log the changes that would be made
    #[arg(long)]
    dry: bool,

    /// Expected SHA-256 of the tarball (`sha256:<hex>` or bare hex)
    #[arg(long, value_name = "DIGEST")]
    document_sha256: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "vault_config_sync=info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            document_path: self.document_path.clone(),
            role: self.role.clone(),
            template_file: self.template_file.clone(),
            template_params: self.template_params.clone(),
            dry: self.dry,
            document_sha256: self.document_sha256.clone(),
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.as_str().into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let vault_config = VaultConfig::from_env();
    let rest: Arc<dyn VaultClient> = Arc::new(VaultRest::new(vault_config)?);
    if !cli.dry {
        return sync::run(rest, &cli.sync_config()).await;
    }

    let dry = Arc::new(DryRunClient::new(rest));
    sync::run(Arc::clone(&dry) as Arc<dyn VaultClient>, &cli.sync_config()).await?;
    let suppressed = dry.suppressed();
    info!(count = suppressed.len(), "Dry run complete");
    for action in &suppressed {
        info!(action = %action, "Would perform");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Must happen before any rustls client is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    match run(&cli).await {
        Ok(()) => {
            info!("Success");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

//! # SysAuth Handler
//!
//! Enables the auth backends declared under `sys/auth` (one file per mount, named after
//! the mount path) and disables live backends that are not declared.
//!
//! Live and declared configurations are compared in the server's output shape, so the
//! declared TTL strings are converted to whole seconds first. The conversion follows
//! the common duration syntax and may differ from the server's own parsing for exotic
//! values.

use super::equivalence::parse_duration;
use super::{document_files, load_file, template_path, HandlerConfig};
use crate::constants::{SYS_AUTH_DIR, SYS_AUTH_ORDER, TOKEN_AUTH_TYPE};
use crate::vault::{AuthConfigInput, AuthConfigOutput, AuthMount, EnableAuthOptions, VaultClient};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Handler for `sys/auth`
pub struct SysAuthHandler {
    client: Arc<dyn VaultClient>,
    config: HandlerConfig,
    order: i32,
    /// Mounts enabled on the server when the handler was built
    live: HashMap<String, AuthMount>,
    /// Mounts declared so far in this run, in output shape
    configured: HashMap<String, AuthMount>,
}

impl std::fmt::Debug for SysAuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysAuthHandler")
            .field("order", &self.order)
            .field("live", &self.live.keys().collect::<Vec<_>>())
            .field("configured", &self.configured.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SysAuthHandler {
    /// Build the handler, fetching the live auth mounts once
    ///
    /// # Errors
    /// Fails when the auth mounts cannot be listed.
    pub async fn new(client: Arc<dyn VaultClient>, config: HandlerConfig) -> Result<Self> {
        let live = client
            .list_auth()
            .await
            .context("Failed to list auth mounts")?;
        debug!("Found {} live auth mounts", live.len());

        Ok(Self {
            client,
            config,
            order: SYS_AUTH_ORDER,
            live,
            configured: HashMap::new(),
        })
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// Ensure every declared mount, then disable the undeclared ones
    ///
    /// # Errors
    /// Fails on the first file that cannot be parsed or applied, or when a disable fails.
    pub async fn apply_directory(&mut self, dir: &Path) -> Result<()> {
        let span = info_span!("handler.apply", handler = "SysAuth", dir = %dir.display());
        async {
            for file in document_files(dir)? {
                self.apply_file(&file).await?;
            }
            self.disable_unconfigured().await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn apply_file(&mut self, file: &Path) -> Result<()> {
        let (api_path, docs) = load_file(&self.config, file)?;
        if !api_path.starts_with(SYS_AUTH_DIR) {
            anyhow::bail!("Found file without {SYS_AUTH_DIR} prefix: {api_path}");
        }

        for doc in docs {
            let options: EnableAuthOptions = serde_json::from_str(&doc.content)
                .with_context(|| format!("Could not parse JSON from file {}", file.display()))?;
            let write_path = template_path(&api_path, &doc.name);
            let mount_path = mount_path(&write_path);
            self.ensure_auth(&mount_path, &options)
                .await
                .with_context(|| {
                    format!("Error while ensuring auth for path {}", file.display())
                })?;
        }
        Ok(())
    }

    /// Make sure the backend at `path` is enabled with `options`; returns whether an
    /// enable was issued
    ///
    /// # Errors
    /// Fails when a declared TTL cannot be parsed or the enable call fails.
    pub async fn ensure_auth(&mut self, path: &str, options: &EnableAuthOptions) -> Result<bool> {
        let converted = convert_auth_config(&options.config)?;
        let applied = self
            .live
            .get(path)
            .is_some_and(|live| live.config == converted);

        self.configured.insert(
            path.to_string(),
            AuthMount {
                auth_type: options.auth_type.clone(),
                description: options.description.clone(),
                config: converted,
                local: options.local,
                seal_wrap: options.seal_wrap,
                ..AuthMount::default()
            },
        );

        if applied {
            debug!(path, auth_type = %options.auth_type, "Auth mount configuration already applied");
            return Ok(false);
        }

        info!(path, auth_type = %options.auth_type, "Enabling auth mount");
        self.client
            .enable_auth(path, options)
            .await
            .with_context(|| format!("Could not enable auth {path}"))?;
        Ok(true)
    }

    /// Disable every live mount that was not declared, except `token` mounts;
    /// returns the disabled paths
    ///
    /// # Errors
    /// Fails on the first disable call that fails.
    pub async fn disable_unconfigured(&self) -> Result<Vec<String>> {
        let mut disabled = Vec::new();
        let live: BTreeMap<_, _> = self.live.iter().collect();

        for (path, mount) in live {
            if self.configured.contains_key(path) {
                continue;
            }
            if mount.auth_type == TOKEN_AUTH_TYPE {
                debug!(path = %path, "Token auth mount cannot be disabled, leaving it");
                continue;
            }
            info!(path = %path, auth_type = %mount.auth_type, "Disabling auth mount");
            self.client
                .disable_auth(path)
                .await
                .with_context(|| format!("Failed to disable auth mount at {path}"))?;
            disabled.push(path.clone());
        }

        Ok(disabled)
    }
}

/// Mount path for a `sys/auth` document path: `sys/auth/approle` becomes `approle/`
fn mount_path(write_path: &str) -> String {
    let name = write_path
        .strip_prefix(SYS_AUTH_DIR)
        .map_or(write_path, |rest| rest.trim_start_matches('/'));
    format!("{name}/")
}

/// Convert declared auth options to the shape the server reports: TTL strings become
/// whole seconds, every other field passes through
///
/// # Errors
/// Fails when a TTL is not a duration expression.
pub fn convert_auth_config(input: &AuthConfigInput) -> Result<AuthConfigOutput> {
    Ok(AuthConfigOutput {
        default_lease_ttl: ttl_seconds(&input.default_lease_ttl)
            .context("Could not parse default_lease_ttl")?,
        max_lease_ttl: ttl_seconds(&input.max_lease_ttl)
            .context("Could not parse max_lease_ttl")?,
        plugin_name: input.plugin_name.clone(),
        audit_non_hmac_request_keys: input.audit_non_hmac_request_keys.clone(),
        audit_non_hmac_response_keys: input.audit_non_hmac_response_keys.clone(),
        listing_visibility: input.listing_visibility.clone(),
        passthrough_request_headers: input.passthrough_request_headers.clone(),
    })
}

fn ttl_seconds(ttl: &str) -> Result<i64> {
    if ttl.is_empty() {
        return Ok(0);
    }
    let duration = parse_duration(ttl)?;
    Ok(i64::try_from(duration.as_secs())?)
}

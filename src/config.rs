//! # Configuration
//!
//! Run options (`SyncConfig`) assembled from the command line, and Vault client
//! settings (`VaultConfig`) loaded from the same environment variables the Vault CLI
//! reads.

use crate::constants::{
    DEFAULT_AUTH_JWT_PATH, DEFAULT_AUTH_MOUNT, DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_VAULT_ADDR,
};
use std::path::PathBuf;
use std::time::Duration;

/// Options for one reconciliation run
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Local directory, local `.tar.gz`, or http(s) URL of a gzipped tarball
    pub document_path: String,
    /// Role to authenticate as when no token is configured
    pub role: String,
    /// Optional JSON file holding template variables and instances
    pub template_file: Option<PathBuf>,
    /// `key=value` overrides applied on top of the template file's variables
    pub template_params: Vec<String>,
    /// Perform reads only; every mutating call becomes a logged no-op
    pub dry: bool,
    /// Expected SHA-256 digest of a tarball document set (`sha256:<hex>` or bare hex)
    pub document_sha256: Option<String>,
}

/// Vault client settings
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Clone)]
pub struct VaultConfig {
    /// Base address of the Vault server
    pub addr: String,
    /// Pre-issued client token, if any
    pub token: Option<String>,
    /// Enterprise namespace sent as `X-Vault-Namespace`
    pub namespace: Option<String>,
    /// Disable TLS certificate verification
    pub skip_verify: bool,
    /// Auth mount used for role login
    pub auth_mount: String,
    /// JWT presented on role login
    pub auth_jwt_path: PathBuf,
    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("namespace", &self.namespace)
            .field("skip_verify", &self.skip_verify)
            .field("auth_mount", &self.auth_mount)
            .finish_non_exhaustive()
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_VAULT_ADDR.to_string(),
            token: None,
            namespace: None,
            skip_verify: false,
            auth_mount: DEFAULT_AUTH_MOUNT.to_string(),
            auth_jwt_path: PathBuf::from(DEFAULT_AUTH_JWT_PATH),
            timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
        }
    }
}

impl VaultConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            addr: env_var_or_default_str("VAULT_ADDR", DEFAULT_VAULT_ADDR),
            token: env_var_non_empty("VAULT_TOKEN"),
            namespace: env_var_non_empty("VAULT_NAMESPACE"),
            skip_verify: env_var_or_default_bool("VAULT_SKIP_VERIFY", false),
            auth_mount: env_var_or_default_str("VAULT_AUTH_MOUNT", DEFAULT_AUTH_MOUNT),
            auth_jwt_path: PathBuf::from(env_var_or_default_str(
                "VAULT_AUTH_JWT_PATH",
                DEFAULT_AUTH_JWT_PATH,
            )),
            timeout_secs: env_var_or_default("VAULT_CLIENT_TIMEOUT_SECS", DEFAULT_CLIENT_TIMEOUT_SECS),
        }
    }

    /// Get request timeout duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read environment variable, treating an empty value as unset
fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    let v_lower = value.to_lowercase();
    v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
}

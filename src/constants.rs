//! # Constants
//!
//! Shared constants used throughout the sync tool.
//!
//! These values represent reasonable defaults and can be overridden via
//! command-line flags or environment variables where applicable.

/// Default Vault address when `VAULT_ADDR` is not set
pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";

/// Default auth mount used for role-based login when no token is configured
pub const DEFAULT_AUTH_MOUNT: &str = "kubernetes";

/// Default location of the service account JWT used for role-based login
pub const DEFAULT_AUTH_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Default HTTP client timeout for Vault and artifact requests (seconds)
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 60;

/// Processing order of the auth mount handler.
/// Lower runs earlier; 0 means "after every explicitly ordered handler".
pub const SYS_AUTH_ORDER: i32 = 10;

/// Processing order of the policy handler
pub const SYS_POLICY_ORDER: i32 = 20;

/// Configuration directory owned by the auth mount handler
pub const SYS_AUTH_DIR: &str = "sys/auth";

/// Configuration directory owned by the policy handler
pub const SYS_POLICY_DIR: &str = "sys/policy";

/// Top-level directory that must never be handled generically
pub const SYS_DIR: &str = "sys";

/// Policies that are never deleted, declared or not
pub const FIXED_POLICIES: &[&str] = &["root", "default"];

/// Auth mount type the service refuses to disable
pub const TOKEN_AUTH_TYPE: &str = "token";

/// Entries starting with this prefix carry sideband data (e.g. template parameters)
pub const SIDEBAND_PREFIX: &str = "_";

/// Template parameter file picked up from the document root when none is given
pub const DEFAULT_TEMPLATE_FILE: &str = "_template.json";

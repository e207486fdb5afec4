//! # Vault Client
//!
//! The narrow set of Vault capabilities the reconcilers rely on, plus the wire types
//! shared by every implementation.
//!
//! Implementations:
//! - [`rest::VaultRest`] talks to a live server over HTTP
//! - [`dry::DryRunClient`] wraps another client and suppresses every write
//! - [`memory::MemoryVault`] keeps everything in process memory

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod dry;
pub mod memory;
pub mod rest;

/// Payload of a generic document as stored in Vault
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Client trait for the Vault HTTP API
///
/// Read methods return `Ok(None)` when the path does not exist. Mutating methods
/// should be idempotent: an "already done" condition is not an error.
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Obtain (or verify) a client token for `role`
    async fn authenticate(&self, role: &str) -> Result<()>;

    /// Read the data stored at a logical path
    async fn read(&self, path: &str) -> Result<Option<Document>>;

    /// List child keys of a logical path; folders carry a trailing `/`
    async fn list(&self, path: &str) -> Result<Option<Vec<String>>>;

    /// Write a full payload to a logical path
    async fn write(&self, path: &str, data: &Document) -> Result<()>;

    /// Delete a logical path
    async fn delete(&self, path: &str) -> Result<()>;

    /// All enabled auth mounts keyed by mount path (with trailing `/`)
    async fn list_auth(&self) -> Result<HashMap<String, AuthMount>>;

    /// Enable an auth backend at `path`, or re-apply its options if already enabled
    async fn enable_auth(&self, path: &str, options: &EnableAuthOptions) -> Result<()>;

    /// Disable the auth backend mounted at `path`
    async fn disable_auth(&self, path: &str) -> Result<()>;

    /// Names of all policies
    async fn list_policies(&self) -> Result<Vec<String>>;

    /// Body of a named policy
    async fn get_policy(&self, name: &str) -> Result<Option<String>>;

    /// Create or replace a named policy
    async fn put_policy(&self, name: &str, policy: &str) -> Result<()>;

    /// Delete a named policy
    async fn delete_policy(&self, name: &str) -> Result<()>;
}

/// Auth mount tuning options as accepted when enabling a backend.
/// TTLs are duration strings such as `"1h"` or `"1m10s"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfigInput {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_lease_ttl: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_lease_ttl: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_non_hmac_request_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_non_hmac_response_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub listing_visibility: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passthrough_request_headers: Vec<String>,
}

/// Auth mount tuning options as reported by the server; TTLs are whole seconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfigOutput {
    #[serde(default)]
    pub default_lease_ttl: i64,
    #[serde(default)]
    pub max_lease_ttl: i64,
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub audit_non_hmac_request_keys: Vec<String>,
    #[serde(default)]
    pub audit_non_hmac_response_keys: Vec<String>,
    #[serde(default)]
    pub listing_visibility: String,
    #[serde(default)]
    pub passthrough_request_headers: Vec<String>,
}

/// Body of `POST sys/auth/:path`, and the format of `sys/auth/*.json` files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableAuthOptions {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: AuthConfigInput,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub seal_wrap: bool,
}

/// An enabled auth backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMount {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub config: AuthConfigOutput,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub seal_wrap: bool,
}

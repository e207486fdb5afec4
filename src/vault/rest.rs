//! Vault REST Client
//!
//! Native implementation of the Vault HTTP API v1 endpoints used by the reconcilers.
//! Uses reqwest (rustls) for transport.
//!
//! Authentication:
//! - a pre-issued token (`VAULT_TOKEN`) is verified with `auth/token/lookup-self`
//! - otherwise the client logs in at `auth/{VAULT_AUTH_MOUNT}/login` with the
//!   configured role and the JWT read from `VAULT_AUTH_JWT_PATH`
//!
//! References:
//! - [Vault HTTP API](https://developer.hashicorp.com/vault/api-docs)

use super::{AuthMount, Document, EnableAuthOptions, VaultClient};
use crate::config::VaultConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, Instrument};

/// Vault REST client
pub struct VaultRest {
    http_client: Client,
    config: VaultConfig,
    token: RwLock<Option<String>>,
}

/// Vault error body: `{"errors": ["..."]}`
#[derive(Debug, Deserialize)]
struct VaultErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Response of a successful login
#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

/// Response of `GET sys/policy/:name`; newer servers nest the fields under `data`
#[derive(Debug, Deserialize)]
struct PolicyResponse {
    #[serde(default)]
    rules: Option<String>,
    #[serde(default)]
    data: Option<PolicyData>,
}

#[derive(Debug, Deserialize)]
struct PolicyData {
    #[serde(default)]
    rules: Option<String>,
}

impl std::fmt::Debug for VaultRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultRest")
            .field("addr", &self.config.addr)
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}

impl VaultRest {
    /// Create a new Vault REST client
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: VaultConfig) -> Result<Self> {
        info!("Initializing Vault REST client for {}", config.addr);
        if config.skip_verify {
            info!("TLS certificate verification disabled (VAULT_SKIP_VERIFY)");
        }

        let http_client = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.skip_verify)
            .build()
            .context("Failed to create HTTP client")?;

        let token = config.token.clone();
        Ok(Self {
            http_client,
            config,
            token: RwLock::new(token),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.addr.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build HTTP request with token and namespace headers
    async fn make_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http_client.request(method, self.url(path));

        if let Some(token) = self.token.read().await.as_deref() {
            request = request.header("X-Vault-Token", token);
        }
        if let Some(namespace) = self.config.namespace.as_deref() {
            request = request.header("X-Vault-Namespace", namespace);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request
    }

    /// Send a request and decode the body
    ///
    /// `Ok(None)` on 404, `Ok(Some(Value::Null))` on an empty success body.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let span = info_span!("vault.request", http.method = %method, vault.path = path);

        async move {
            let response = self
                .make_request(method.clone(), path, body)
                .await
                .send()
                .await
                .with_context(|| format!("Failed to send {method} {path}"))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                debug!("{} {} returned 404", method, path);
                return Ok(None);
            }

            let text = response
                .text()
                .await
                .with_context(|| format!("Failed to read response body of {method} {path}"))?;

            if !status.is_success() {
                return Err(Self::handle_error_response(status, &text))
                    .with_context(|| format!("{method} {path} failed"));
            }

            if text.trim().is_empty() {
                return Ok(Some(Value::Null));
            }

            let value = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse response of {method} {path}"))?;
            Ok(Some(value))
        }
        .instrument(span)
        .await
    }

    /// Handle Vault API error responses
    fn handle_error_response(status: StatusCode, error_text: &str) -> anyhow::Error {
        match serde_json::from_str::<VaultErrorResponse>(error_text) {
            Ok(error_response) if !error_response.errors.is_empty() => anyhow::anyhow!(
                "Vault API error (HTTP {}): {}",
                status.as_u16(),
                error_response.errors.join("; ")
            ),
            _ => anyhow::anyhow!("HTTP {} (status: {}): {}", status.as_u16(), status, error_text),
        }
    }

    async fn login(&self, role: &str) -> Result<String> {
        let jwt = tokio::fs::read_to_string(&self.config.auth_jwt_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to read JWT from {}",
                    self.config.auth_jwt_path.display()
                )
            })?;

        let path = format!("auth/{}/login", self.config.auth_mount);
        let body = json!({ "role": role, "jwt": jwt.trim() });
        let response = self
            .send(Method::POST, &path, Some(&body))
            .await?
            .ok_or_else(|| anyhow::anyhow!("Auth mount {} not found", self.config.auth_mount))?;

        let login: LoginResponse =
            serde_json::from_value(response).context("Failed to parse login response")?;
        Ok(login.auth.client_token)
    }
}

/// Pull a field from either the top level or the `data` envelope of a response
fn data_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value
        .get("data")
        .and_then(|data| data.get(field))
        .or_else(|| value.get(field))
}

#[async_trait]
impl VaultClient for VaultRest {
    async fn authenticate(&self, role: &str) -> Result<()> {
        let has_token = self.token.read().await.is_some();

        if has_token {
            self.send(Method::GET, "auth/token/lookup-self", None)
                .await
                .context("Vault token is not valid")?
                .ok_or_else(|| anyhow::anyhow!("No token found in Vault client"))?;
            debug!("Using pre-issued Vault token");
            return Ok(());
        }

        if role.is_empty() {
            anyhow::bail!("No Vault token configured and no role given for login");
        }

        info!(
            "Logging in to auth/{} with role {}",
            self.config.auth_mount, role
        );
        let client_token = self.login(role).await?;
        *self.token.write().await = Some(client_token);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Document>> {
        let Some(value) = self.send(Method::GET, path, None).await? else {
            return Ok(None);
        };
        match value.get("data") {
            Some(Value::Object(data)) => Ok(Some(data.clone())),
            _ => Ok(None),
        }
    }

    async fn list(&self, path: &str) -> Result<Option<Vec<String>>> {
        let list_path = format!("{}?list=true", path.trim_end_matches('/'));
        let Some(value) = self.send(Method::GET, &list_path, None).await? else {
            return Ok(None);
        };
        let keys = data_field(&value, "keys")
            .cloned()
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()
            .with_context(|| format!("Failed to parse key list of {path}"))?;
        Ok(keys)
    }

    async fn write(&self, path: &str, data: &Document) -> Result<()> {
        let body = Value::Object(data.clone());
        self.send(Method::PUT, path, Some(&body)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    async fn list_auth(&self) -> Result<HashMap<String, AuthMount>> {
        let Some(value) = self.send(Method::GET, "sys/auth", None).await? else {
            return Ok(HashMap::new());
        };
        let mounts = match value.get("data") {
            Some(Value::Object(data)) => data,
            _ => value
                .as_object()
                .ok_or_else(|| anyhow::anyhow!("Unexpected response from sys/auth"))?,
        };

        mounts
            .iter()
            .filter(|(path, _)| path.ends_with('/'))
            .map(|(path, mount)| {
                let mount: AuthMount = serde_json::from_value(mount.clone())
                    .with_context(|| format!("Failed to parse auth mount {path}"))?;
                Ok((path.clone(), mount))
            })
            .collect()
    }

    async fn enable_auth(&self, path: &str, options: &EnableAuthOptions) -> Result<()> {
        let path = path.trim_end_matches('/');
        let body = serde_json::to_value(options).context("Failed to encode auth options")?;

        let response = self
            .make_request(Method::POST, &format!("sys/auth/{path}"), Some(&body))
            .await
            .send()
            .await
            .with_context(|| format!("Failed to enable auth backend at {path}"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        if status != StatusCode::BAD_REQUEST || !error_text.contains("path is already in use") {
            return Err(Self::handle_error_response(status, &error_text))
                .with_context(|| format!("Failed to enable auth backend at {path}"));
        }

        // Already mounted: re-apply the tunable settings instead
        debug!("Auth backend {} already enabled, tuning instead", path);
        let mut tune = serde_json::to_value(&options.config).context("Failed to encode auth config")?;
        if let Value::Object(fields) = &mut tune {
            fields.insert("description".to_string(), json!(options.description));
        }
        self.send(Method::POST, &format!("sys/auth/{path}/tune"), Some(&tune))
            .await
            .with_context(|| format!("Failed to tune auth backend at {path}"))?;
        Ok(())
    }

    async fn disable_auth(&self, path: &str) -> Result<()> {
        let path = path.trim_end_matches('/');
        self.send(Method::DELETE, &format!("sys/auth/{path}"), None)
            .await?;
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        let Some(value) = self.send(Method::GET, "sys/policy", None).await? else {
            return Ok(Vec::new());
        };
        let Some(policies) = data_field(&value, "policies").or_else(|| data_field(&value, "keys"))
        else {
            return Ok(Vec::new());
        };
        serde_json::from_value(policies.clone()).context("Failed to parse policy list")
    }

    async fn get_policy(&self, name: &str) -> Result<Option<String>> {
        let Some(value) = self
            .send(Method::GET, &format!("sys/policy/{name}"), None)
            .await?
        else {
            return Ok(None);
        };
        let response: PolicyResponse =
            serde_json::from_value(value).with_context(|| format!("Failed to parse policy {name}"))?;
        Ok(response
            .data
            .and_then(|data| data.rules)
            .or(response.rules))
    }

    async fn put_policy(&self, name: &str, policy: &str) -> Result<()> {
        let body = json!({ "policy": policy });
        self.send(Method::PUT, &format!("sys/policy/{name}"), Some(&body))
            .await?;
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        self.send(Method::DELETE, &format!("sys/policy/{name}"), None)
            .await?;
        Ok(())
    }
}

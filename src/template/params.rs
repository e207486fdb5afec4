//! # Template Parameters
//!
//! Variables and instance lists used to render configuration documents.
//!
//! Parameters come from an optional JSON file:
//!
//! ```json
//! {
//!   "variables": { "env": "prod" },
//!   "instances": { "read_service": ["reader1", "reader2"] }
//! }
//! ```
//!
//! and from `key=value` overrides given on the command line, which replace file
//! variables with the same key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Parameters active for one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateParameters {
    /// Direct placeholder substitutions
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Instance labels; a file name carrying `{{ key }}` renders once per label
    #[serde(default)]
    pub instances: HashMap<String, Vec<String>>,
}

impl TemplateParameters {
    /// Build parameters from an optional parameter file plus `key=value` overrides
    ///
    /// # Errors
    /// Fails when the file cannot be read or parsed, or an override has no `=`.
    pub fn load(file: Option<&Path>, overrides: &[String]) -> Result<Self> {
        let mut params = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        params.apply_overrides(overrides)?;
        Ok(params)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read template file {}", path.display()))?;
        let params: Self = serde_json::from_str(&content)
            .with_context(|| format!("Could not parse template file {}", path.display()))?;
        debug!(
            "Loaded {} variables and {} instance lists from {}",
            params.variables.len(),
            params.instances.len(),
            path.display()
        );
        Ok(params)
    }

    /// Apply `key=value` overrides; only the first `=` separates key from value
    ///
    /// # Errors
    /// Fails when an override carries no `=`.
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for entry in overrides {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                anyhow::anyhow!("Invalid template parameter {entry:?}: expected key=value")
            })?;
            self.variables.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

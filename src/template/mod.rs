//! # Template Renderer
//!
//! Expands one configuration file into zero or more rendered documents.
//!
//! Placeholders use `{{ name }}` syntax (whitespace inside the braces is optional) in
//! both file content and file names:
//!
//! - A file name without a placeholder renders once; content placeholders are filled
//!   from the template variables.
//! - A file name with one placeholder renders once per label of the matching
//!   instance list. Content placeholders sharing the file-name key take the label,
//!   unless a variable of the same name exists.
//! - More than one file-name placeholder is rejected.
//!
//! A placeholder with no value is replaced by an empty string and logged; it does not
//! fail the render.

pub mod params;

pub use params::TemplateParameters;

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^\s}]*)\s*\}\}").expect("placeholder regex is valid")
});

/// Configuration errors raised while rendering a file
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("multiple placeholders in a filename not supported: {file}")]
    MultiplePlaceholders { file: String },
    #[error("no instances defined for placeholder {key:?} in filename {file}")]
    MissingInstances { file: String, key: String },
}

/// A concrete document produced from a template file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// Instance label, empty for a single render
    pub name: String,
    pub content: String,
}

/// Map each placeholder name to the literal text that matched it.
///
/// Given `Hello, {{ foo }}.` this returns `{"foo": "{{ foo }}"}`.
pub fn find_placeholders(text: &str) -> BTreeMap<String, String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| (caps[1].to_string(), caps[0].to_string()))
        .collect()
}

/// Render `content` for the file `file_name` with `params`
///
/// # Errors
/// Returns [`RenderError`] when the file name carries more than one placeholder or
/// its placeholder has no instance list.
pub fn render(
    file_name: &str,
    content: &str,
    params: &TemplateParameters,
) -> Result<Vec<RenderedDocument>, RenderError> {
    let stem = file_stem(file_name);
    let name_placeholders = find_placeholders(stem);

    let mut keys = name_placeholders.keys();
    let (Some(key), None) = (keys.next(), keys.next()) else {
        if name_placeholders.is_empty() {
            return Ok(vec![RenderedDocument {
                name: String::new(),
                content: substitute(file_name, content, params, None),
            }]);
        }
        return Err(RenderError::MultiplePlaceholders {
            file: file_name.to_string(),
        });
    };

    let labels = params
        .instances
        .get(key)
        .ok_or_else(|| RenderError::MissingInstances {
            file: file_name.to_string(),
            key: key.clone(),
        })?;

    Ok(labels
        .iter()
        .map(|label| RenderedDocument {
            name: label.clone(),
            content: substitute(
                file_name,
                content,
                params,
                Some((key.as_str(), label.as_str())),
            ),
        })
        .collect())
}

/// File name without its final extension
pub fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

fn substitute(
    file_name: &str,
    content: &str,
    params: &TemplateParameters,
    instance: Option<(&str, &str)>,
) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures<'_>| {
            let name = &caps[1];
            if let Some(value) = params.variables.get(name) {
                return value.clone();
            }
            match instance {
                Some((key, label)) if key == name => label.to_string(),
                _ => {
                    warn!(
                        file = file_name,
                        placeholder = name,
                        "No value for template placeholder, substituting empty string"
                    );
                    String::new()
                }
            }
        })
        .into_owned()
}

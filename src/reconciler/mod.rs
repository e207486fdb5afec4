//! # Reconciler
//!
//! Applies a configuration tree to Vault. Each directory of the tree is owned by one
//! [`PathHandler`]:
//!
//! - `sys/auth` by [`SysAuthHandler`] (auth backends)
//! - `sys/policy` by [`SysPolicyHandler`] (ACL policies)
//! - `sys` itself by a dummy handler, so it is never written generically
//! - everything else by the shared [`GenericHandler`]
//!
//! [`ConfigWalker`] assigns directories to handlers and drives the run.

pub mod equivalence;
pub mod generic;
pub mod sys_auth;
pub mod sys_policy;
pub mod walker;

pub use generic::GenericHandler;
pub use sys_auth::SysAuthHandler;
pub use sys_policy::SysPolicyHandler;
pub use walker::ConfigWalker;

use crate::constants::SIDEBAND_PREFIX;
use crate::template::{self, RenderedDocument, TemplateParameters};
use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Settings shared by every handler of a run
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Root of the configuration tree
    pub document_path: PathBuf,
    /// Template parameters active for this run
    pub params: TemplateParameters,
}

/// A reconciler responsible for one directory subtree
#[derive(Debug)]
pub enum PathHandler {
    Generic(GenericHandler),
    SysAuth(SysAuthHandler),
    SysPolicy(SysPolicyHandler),
    /// Claims a directory without processing it
    Dummy { order: i32 },
}

impl PathHandler {
    /// Apply every document under `dir`, then remove what is live but undeclared
    ///
    /// # Errors
    /// Fails on the first file that cannot be rendered, parsed or applied.
    pub async fn apply_directory(&mut self, dir: &Path) -> Result<()> {
        match self {
            Self::Generic(h) => h.apply_directory(dir).await,
            Self::SysAuth(h) => h.apply_directory(dir).await,
            Self::SysPolicy(h) => h.apply_directory(dir).await,
            Self::Dummy { .. } => Ok(()),
        }
    }

    /// Processing order; lower runs first, 0 runs after all positive orders
    pub fn order(&self) -> i32 {
        match self {
            Self::Generic(_) => 0,
            Self::SysAuth(h) => h.order(),
            Self::SysPolicy(h) => h.order(),
            Self::Dummy { order } => *order,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic(_) => "Generic",
            Self::SysAuth(_) => "SysAuth",
            Self::SysPolicy(_) => "SysPolicy",
            Self::Dummy { .. } => "Dummy",
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, Self::Dummy { .. })
    }
}

/// True for `_`-prefixed entries, which are never reconciler input
pub fn is_sideband(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SIDEBAND_PREFIX))
}

/// All document files under `dir`, sorted, skipping sideband entries
pub(crate) fn document_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_sideband(e))
    {
        let entry = entry.with_context(|| format!("Error reading {}", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Sub-directories of `dir` (including `dir`), sorted, skipping sideband entries
pub(crate) fn document_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_sideband(e))
    {
        let entry = entry.with_context(|| format!("Error reading {}", dir.display()))?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Read and render one document file
///
/// Returns the Vault path the file maps to along with its rendered documents.
pub(crate) fn load_file(
    config: &HandlerConfig,
    path: &Path,
) -> Result<(String, Vec<RenderedDocument>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Error reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("File name of {} is not valid UTF-8", path.display()))?;

    let docs = template::render(file_name, &content, &config.params)
        .with_context(|| format!("Failed to render document {}", path.display()))?;
    let api_path = api_path(&config.document_path, path)?;
    Ok((api_path, docs))
}

/// Posix-style path of `path` relative to `root`
///
/// # Errors
/// Fails when `path` is not under `root` or is not valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).with_context(|| {
        format!(
            "Could not determine relative path of {} to {}",
            path.display(),
            root.display()
        )
    })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .with_context(|| format!("Path {} is not valid UTF-8", path.display()))?,
            ),
            Component::CurDir => {}
            _ => anyhow::bail!("Unexpected component in path {}", path.display()),
        }
    }
    Ok(parts.join("/"))
}

/// Vault path for a document file: relative to the root, with everything from the
/// first `.` of the file name removed (`a/b/c.d.json` becomes `a/b/c`)
///
/// # Errors
/// Fails when `file` is not under `root`.
pub fn api_path(root: &Path, file: &Path) -> Result<String> {
    let rel = relative_path(root, file)?;
    let (dir, name) = match rel.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, rel.as_str()),
    };
    let name = name.split('.').next().unwrap_or(name);
    Ok(match dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name.to_string(),
    })
}

/// Vault path of a rendered instance: `{path}_{label}`, or `path` for a single render
pub fn template_path(api_path: &str, name: &str) -> String {
    if name.is_empty() {
        api_path.to_string()
    } else {
        format!("{api_path}_{name}")
    }
}

//! # Config Walker
//!
//! Assigns each directory of the configuration tree to exactly one handler and runs it.
//!
//! Explicitly assigned paths run first, ordered by [`PathHandler::order`]. The rest of
//! the tree is then walked and every unclaimed directory is bound to the generic
//! handler. A directory is skipped when:
//!
//! - it was already processed in this run
//! - its name starts with `_`
//! - an ancestor is assigned (the ancestor's handler owns the subtree)
//! - a descendant is assigned (binding it generically would swallow that handler)

use super::{is_sideband, relative_path, GenericHandler, HandlerConfig, PathHandler};
use super::{SysAuthHandler, SysPolicyHandler};
use crate::constants::{SYS_AUTH_DIR, SYS_DIR, SYS_POLICY_DIR};
use crate::vault::VaultClient;
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Walks one configuration tree; state lives for a single run
#[derive(Debug)]
pub struct ConfigWalker {
    root: PathBuf,
    handlers: Vec<PathHandler>,
    /// Relative directory path to index into `handlers`
    assignments: HashMap<String, usize>,
    generic: usize,
    visited: HashSet<PathBuf>,
}

impl ConfigWalker {
    /// Build the walker and the handlers the tree needs
    ///
    /// `sys` is claimed by a dummy handler; `sys/auth` and `sys/policy` get their
    /// handlers only when they exist as directories.
    ///
    /// # Errors
    /// Fails when a handler cannot fetch its live state.
    pub async fn new(client: Arc<dyn VaultClient>, config: HandlerConfig) -> Result<Self> {
        let root = config.document_path.clone();
        let mut walker = Self::with_handlers(
            root.clone(),
            PathHandler::Generic(GenericHandler::new(Arc::clone(&client), config.clone())),
        );
        walker.assign(SYS_DIR, PathHandler::Dummy { order: 0 });

        if root.join(SYS_AUTH_DIR).is_dir() {
            let handler = SysAuthHandler::new(Arc::clone(&client), config.clone())
                .await
                .context("Could not create SysAuth handler")?;
            walker.assign(SYS_AUTH_DIR, PathHandler::SysAuth(handler));
        }

        if root.join(SYS_POLICY_DIR).is_dir() {
            let handler = SysPolicyHandler::new(client, config)
                .await
                .context("Could not create SysPolicy handler")?;
            walker.assign(SYS_POLICY_DIR, PathHandler::SysPolicy(handler));
        }

        Ok(walker)
    }

    /// A walker with only the generic handler assigned
    pub fn with_handlers(root: PathBuf, generic: PathHandler) -> Self {
        Self {
            root,
            handlers: vec![generic],
            assignments: HashMap::new(),
            generic: 0,
            visited: HashSet::new(),
        }
    }

    /// Assign `handler` to the relative directory `path`
    pub fn assign(&mut self, path: &str, handler: PathHandler) {
        self.handlers.push(handler);
        self.assignments
            .insert(path.to_string(), self.handlers.len() - 1);
    }

    /// Assigned paths by handler order; order 0 sorts last, ties by path
    pub fn sorted_paths(&self) -> Vec<String> {
        let mut paths: Vec<&String> = self.assignments.keys().collect();
        paths.sort_by(|a, b| {
            let order_a = self.handlers[self.assignments[*a]].order();
            let order_b = self.handlers[self.assignments[*b]].order();
            match (order_a == 0, order_b == 0) {
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => order_a.cmp(&order_b),
            }
            .then_with(|| a.cmp(b))
        });
        paths.into_iter().cloned().collect()
    }

    /// True when a strict ancestor of `path` is assigned
    pub fn has_parent_handler(&self, path: &str) -> bool {
        path.match_indices('/')
            .any(|(i, _)| self.assignments.contains_key(&path[..i]))
    }

    /// True when a strict descendant of `path` is assigned
    pub fn has_child_handler(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.assignments.keys().any(|k| k.starts_with(&prefix))
    }

    /// Apply the whole tree
    ///
    /// # Errors
    /// Fails on the first handler that fails; nothing after it runs.
    pub async fn run(&mut self) -> Result<()> {
        debug!("Starting in directory {}", self.root.display());

        for path in self.sorted_paths() {
            let dir = self.root.join(&path);
            let index = self.assignments[&path];
            let handler = &mut self.handlers[index];
            if !handler.is_dummy() {
                info!(path = %path, handler = handler.name(), "Processing directory");
                handler.apply_directory(&dir).await?;
            }
            self.visited.insert(dir);
        }

        let dirs = self.walk_dirs()?;
        for dir in dirs {
            self.visit(&dir).await?;
        }
        Ok(())
    }

    fn walk_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_sideband(e))
        {
            let entry =
                entry.with_context(|| format!("Error walking {}", self.root.display()))?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            }
        }
        Ok(dirs)
    }

    async fn visit(&mut self, dir: &Path) -> Result<()> {
        if !self.visited.insert(dir.to_path_buf()) {
            return Ok(());
        }

        let rel = relative_path(&self.root, dir)?;
        if self.has_parent_handler(&rel) || self.has_child_handler(&rel) {
            return Ok(());
        }

        let index = match self.assignments.get(&rel) {
            Some(&index) => index,
            None => {
                self.assignments.insert(rel.clone(), self.generic);
                self.generic
            }
        };

        let handler = &mut self.handlers[index];
        info!(path = %rel, handler = handler.name(), "Processing directory");
        handler.apply_directory(dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::memory::MemoryVault;

    fn walker(root: &Path) -> ConfigWalker {
        let client: Arc<dyn VaultClient> = Arc::new(MemoryVault::default());
        ConfigWalker::with_handlers(
            root.to_path_buf(),
            PathHandler::Generic(GenericHandler::new(
                client,
                HandlerConfig {
                    document_path: root.to_path_buf(),
                    ..HandlerConfig::default()
                },
            )),
        )
    }

    #[test]
    fn test_sorted_paths_puts_order_zero_last() {
        let mut w = walker(Path::new("/config"));
        w.assign("sys", PathHandler::Dummy { order: 0 });
        w.assign("b", PathHandler::Dummy { order: 20 });
        w.assign("a", PathHandler::Dummy { order: 10 });
        w.assign("c", PathHandler::Dummy { order: 10 });
        assert_eq!(w.sorted_paths(), vec!["a", "c", "b", "sys"]);
    }

    #[test]
    fn test_has_parent_handler() {
        let mut w = walker(Path::new("/config"));
        w.assign("sys", PathHandler::Dummy { order: 0 });
        assert!(w.has_parent_handler("sys/auth"));
        assert!(w.has_parent_handler("sys/auth/nested"));
        assert!(!w.has_parent_handler("sys"));
        assert!(!w.has_parent_handler("system/auth"));
    }

    #[test]
    fn test_has_child_handler() {
        let mut w = walker(Path::new("/config"));
        w.assign("sys/auth", PathHandler::Dummy { order: 10 });
        assert!(w.has_child_handler("sys"));
        assert!(!w.has_child_handler("sys/auth"));
        assert!(!w.has_child_handler("sy"));
        assert!(!w.has_child_handler("auth"));
    }

    #[tokio::test]
    async fn test_new_assigns_sys_handlers_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sys/policy")).unwrap();

        let client: Arc<dyn VaultClient> = Arc::new(MemoryVault::default());
        let w = ConfigWalker::new(
            client,
            HandlerConfig {
                document_path: dir.path().to_path_buf(),
                ..HandlerConfig::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(w.sorted_paths(), vec!["sys/policy", "sys"]);
    }

    #[tokio::test]
    async fn test_run_binds_generic_to_unclaimed_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("auth/approle/role")).unwrap();
        std::fs::create_dir_all(root.join("sys/mounts")).unwrap();
        std::fs::create_dir_all(root.join("_private")).unwrap();
        std::fs::write(root.join("auth/approle/role/app.json"), r#"{"a": 1}"#).unwrap();
        std::fs::write(root.join("sys/mounts/kv.json"), r#"{"type": "kv"}"#).unwrap();
        std::fs::write(root.join("_private/secret.json"), r#"{"b": 2}"#).unwrap();
        std::fs::write(root.join("top.json"), r#"{"c": 3}"#).unwrap();

        let vault = Arc::new(MemoryVault::default());
        let client: Arc<dyn VaultClient> = vault.clone();
        let mut w = ConfigWalker::new(
            client,
            HandlerConfig {
                document_path: root.to_path_buf(),
                ..HandlerConfig::default()
            },
        )
        .await
        .unwrap();
        w.run().await.unwrap();

        assert_eq!(vault.calls(), vec!["write auth/approle/role/app".to_string()]);
        assert_eq!(w.assignments.get("auth"), Some(&w.generic));
    }
}

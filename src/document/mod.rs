//! # Document Sets
//!
//! Where the configuration tree comes from. The reconcilers only ever see the
//! resolved local directory.
//!
//! - [`LocalFiles`]: a directory used in place
//! - [`LocalTarball`]: a gzipped tarball on disk, extracted to a work directory
//! - [`HttpTarball`]: a gzipped tarball downloaded over http(s), then extracted

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

mod local;
mod tarball;

pub use local::LocalFiles;
pub use tarball::{HttpTarball, LocalTarball};

/// A retrievable set of configuration documents
#[async_trait]
pub trait DocumentSet: Send + Sync {
    /// Make the documents available locally
    async fn fetch(&mut self) -> Result<()>;

    /// Local directory holding the configuration tree
    fn path(&self) -> Result<PathBuf>;

    /// Remove anything `fetch` created; failures are logged, never returned
    fn clean_up(&mut self);
}

/// Select the document set for `spec`: an http(s) URL, a local `.tar.gz`/`.tgz`
/// file, or a directory
///
/// # Errors
/// Fails for URLs with any other scheme.
pub fn for_path(spec: &str, sha256: Option<String>) -> Result<Box<dyn DocumentSet>> {
    if spec.contains("://") {
        let url = reqwest::Url::parse(spec)
            .with_context(|| format!("Could not parse document URL {spec}"))?;
        return match url.scheme() {
            "http" | "https" => Ok(Box::new(HttpTarball::new(url, sha256))),
            scheme => anyhow::bail!("Unsupported URL scheme {scheme:?} for documents"),
        };
    }

    let path = Path::new(spec);
    if path.is_file() && is_tarball_name(spec) {
        return Ok(Box::new(LocalTarball::new(path.to_path_buf(), sha256)));
    }
    Ok(Box::new(LocalFiles::new(path.to_path_buf())))
}

fn is_tarball_name(name: &str) -> bool {
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_path_directory() {
        let dir = tempfile::tempdir().unwrap();
        let set = for_path(dir.path().to_str().unwrap(), None).unwrap();
        assert_eq!(set.path().unwrap(), dir.path());
    }

    #[test]
    fn test_for_path_rejects_unknown_scheme() {
        let err = for_path("ftp://example.com/config.tar.gz", None).err().unwrap();
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_for_path_accepts_http_urls() {
        assert!(for_path("https://example.com/org/repo/tarball/main", None).is_ok());
    }

    #[test]
    fn test_is_tarball_name() {
        assert!(is_tarball_name("config.tar.gz"));
        assert!(is_tarball_name("config.tgz"));
        assert!(!is_tarball_name("config.tar"));
    }
}

use super::DocumentSet;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// A configuration directory already on disk
#[derive(Debug, Clone)]
pub struct LocalFiles {
    directory: PathBuf,
}

impl LocalFiles {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl DocumentSet for LocalFiles {
    async fn fetch(&mut self) -> Result<()> {
        if !self.directory.is_dir() {
            anyhow::bail!(
                "Document path {} is not a directory",
                self.directory.display()
            );
        }
        Ok(())
    }

    fn path(&self) -> Result<PathBuf> {
        Ok(self.directory.clone())
    }

    // Files existed before the run and are left in place
    fn clean_up(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_requires_directory() {
        let mut missing = LocalFiles::new(PathBuf::from("/nonexistent/config"));
        assert!(missing.fetch().await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let mut present = LocalFiles::new(dir.path().to_path_buf());
        present.fetch().await.unwrap();
        present.clean_up();
        assert!(dir.path().is_dir());
    }
}

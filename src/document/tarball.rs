//! # Tarball Document Sets
//!
//! Download, verification and extraction of gzipped tarballs holding a configuration
//! tree. Extraction uses the system `tar` binary.
//!
//! Most tarballs (GitHub archives included) wrap their contents in one top-level
//! directory. When the extraction holds exactly one directory and it is not `sys`, that
//! directory is the configuration root.

use super::DocumentSet;
use crate::constants::{DEFAULT_CLIENT_TIMEOUT_SECS, SYS_DIR};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};

const EXTRACT_DIR: &str = "extract";

/// A gzipped tarball on the local filesystem
#[derive(Debug)]
pub struct LocalTarball {
    archive: PathBuf,
    sha256: Option<String>,
    work_dir: Option<TempDir>,
}

impl LocalTarball {
    pub fn new(archive: PathBuf, sha256: Option<String>) -> Self {
        Self {
            archive,
            sha256,
            work_dir: None,
        }
    }
}

#[async_trait]
impl DocumentSet for LocalTarball {
    async fn fetch(&mut self) -> Result<()> {
        if let Some(expected) = &self.sha256 {
            verify_checksum(&self.archive, expected)?;
        }
        verify_tar_gz_format(&self.archive)?;

        let work_dir = tempfile::Builder::new()
            .prefix("vault-config-sync-")
            .tempdir()
            .context("Failed to create work directory")?;
        extract_archive(&self.archive, &work_dir.path().join(EXTRACT_DIR)).await?;
        self.work_dir = Some(work_dir);
        Ok(())
    }

    fn path(&self) -> Result<PathBuf> {
        let work_dir = self
            .work_dir
            .as_ref()
            .with_context(|| format!("Tarball {} has not been fetched", self.archive.display()))?;
        document_root(&work_dir.path().join(EXTRACT_DIR))
    }

    fn clean_up(&mut self) {
        remove_work_dir(self.work_dir.take());
    }
}

/// A gzipped tarball served over http(s)
#[derive(Debug)]
pub struct HttpTarball {
    url: reqwest::Url,
    sha256: Option<String>,
    work_dir: Option<TempDir>,
    tarball: Option<LocalTarball>,
}

impl HttpTarball {
    pub fn new(url: reqwest::Url, sha256: Option<String>) -> Self {
        Self {
            url,
            sha256,
            work_dir: None,
            tarball: None,
        }
    }

    /// File name for the download: the last URL path segment
    fn archive_name(&self) -> String {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map_or_else(|| "documents.tar.gz".to_string(), ToString::to_string)
    }
}

#[async_trait]
impl DocumentSet for HttpTarball {
    async fn fetch(&mut self) -> Result<()> {
        let work_dir = tempfile::Builder::new()
            .prefix("vault-config-sync-download-")
            .tempdir()
            .context("Failed to create download directory")?;
        let archive = work_dir.path().join(self.archive_name());
        self.work_dir = Some(work_dir);

        download_artifact(self.url.as_str(), &archive)
            .await
            .with_context(|| format!("Error downloading tarball {}", self.url))?;

        let mut tarball = LocalTarball::new(archive, self.sha256.clone());
        let result = tarball
            .fetch()
            .await
            .with_context(|| format!("Error extracting tarball {}", self.url));
        self.tarball = Some(tarball);
        result
    }

    fn path(&self) -> Result<PathBuf> {
        self.tarball
            .as_ref()
            .with_context(|| format!("Tarball {} has not been fetched", self.url))?
            .path()
    }

    fn clean_up(&mut self) {
        if let Some(mut tarball) = self.tarball.take() {
            tarball.clean_up();
        }
        remove_work_dir(self.work_dir.take());
    }
}

fn remove_work_dir(work_dir: Option<TempDir>) {
    let Some(work_dir) = work_dir else {
        return;
    };
    let path = work_dir.path().to_path_buf();
    info!("Removing {}", path.display());
    if let Err(e) = work_dir.close() {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

/// Resolve the configuration root inside an extraction directory
fn document_root(extract_dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(extract_dir)
        .with_context(|| format!("Could not read directory {}", extract_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Could not read directory {}", extract_dir.display()))?;

    match entries.as_slice() {
        [] => anyhow::bail!("Empty directory {}", extract_dir.display()),
        [single] if single.path().is_dir() && single.file_name() != SYS_DIR => Ok(single.path()),
        _ => Ok(extract_dir.to_path_buf()),
    }
}

/// Stream `url` into `destination`, returning the downloaded size in bytes
async fn download_artifact(url: &str, destination: &Path) -> Result<u64> {
    let span = info_span!("documents.download", url = url);

    async move {
        info!("Downloading documents from {}", url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "Download failed: HTTP {} {} from URL: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                url
            );
        }

        // Compared against the streamed size to detect partial downloads
        let expected_size = response.content_length();
        let mut file = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let mut downloaded_size: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read chunk from download stream")?;
            downloaded_size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .context("Failed to write chunk to file")?;
        }
        file.flush().await.context("Failed to flush download")?;
        drop(file);

        if let Some(expected) = expected_size {
            if downloaded_size != expected {
                anyhow::bail!(
                    "Partial download detected: expected {} bytes, got {} bytes",
                    expected,
                    downloaded_size
                );
            }
        }
        if downloaded_size == 0 {
            anyhow::bail!("Downloaded tarball is empty");
        }

        info!(
            "{} bytes written to {}",
            downloaded_size,
            destination.display()
        );
        Ok(downloaded_size)
    }
    .instrument(span)
    .await
}

/// Verify the SHA-256 digest of `file`; `expected` is `sha256:<hex>` or bare hex
fn verify_checksum(file: &Path, expected: &str) -> Result<()> {
    let mut reader = std::fs::File::open(file)
        .with_context(|| format!("Failed to open {} for checksum verification", file.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    let computed = format!("{:x}", hasher.finalize());

    let expected = expected.trim();
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    if !expected.eq_ignore_ascii_case(&computed) {
        anyhow::bail!(
            "Checksum mismatch for {}: expected sha256:{}, got sha256:{}",
            file.display(),
            expected,
            computed
        );
    }
    debug!("Checksum verified: sha256:{}", computed);
    Ok(())
}

/// Verify `file` starts with the gzip magic bytes
fn verify_tar_gz_format(file: &Path) -> Result<()> {
    let mut magic = [0u8; 2];
    std::fs::File::open(file)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("Could not read {}", file.display()))?;

    if magic != [0x1f, 0x8b] {
        anyhow::bail!(
            "Invalid file format for {}: expected tar.gz (gzip), got magic bytes {:02x}{:02x}",
            file.display(),
            magic[0],
            magic[1]
        );
    }
    Ok(())
}

/// Extract `archive` into `destination` with the system `tar`
async fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    info!("Extracting {} to {}", archive.display(), destination.display());

    tokio::fs::create_dir_all(destination)
        .await
        .with_context(|| format!("Failed to create directory {}", destination.display()))?;

    let output = tokio::process::Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(destination)
        .output()
        .await
        .context("Failed to execute tar command")?;

    if !output.status.success() {
        anyhow::bail!(
            "Failed to extract {} (corrupt or invalid tar.gz): {}",
            archive.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

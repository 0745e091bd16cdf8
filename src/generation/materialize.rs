//! Turning a video locator into a local file.
//!
//! A locator is either a path to a file some provider client already wrote
//! locally, or an HTTP(S) URL to a hosted result. Either way the bytes are
//! staged next to the destination and renamed into place on completion, so
//! the destination path never holds a partially written file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

/// Default timeout for downloading a generated video.
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Default connection timeout for downloads.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A generated video that now lives at a path the application owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedAsset {
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

/// Errors that can occur while materializing a locator.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("Locator is neither an existing file nor an HTTP(S) URL: {0}")]
    InvalidLocator(String),

    #[error("Video download failed with status {status}: {message}")]
    DownloadFailed { status: u16, message: String },

    #[error("Materialized file is empty")]
    EmptyAsset,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copies or downloads video locators into application-owned files.
pub struct Materializer {
    http_client: reqwest::Client,
}

impl Materializer {
    /// Create a materializer with default download timeouts.
    pub fn new() -> Result<Self, MaterializeError> {
        Self::with_timeout(DEFAULT_DOWNLOAD_TIMEOUT)
    }

    /// Create a materializer with a custom download timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, MaterializeError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http_client })
    }

    /// Ensure a local file exists at `dest` with the locator's content.
    ///
    /// Resolution order: an existing file is copied; otherwise an
    /// `http://`/`https://` locator is stream-downloaded; anything else
    /// fails as `InvalidLocator` without touching the filesystem.
    ///
    /// On success `dest` exists, is non-empty, and its size is recorded.
    /// On failure nothing new is left visible at `dest` (a previous
    /// complete file at the same path is untouched).
    pub async fn materialize(
        &self,
        locator: &str,
        dest: &Path,
    ) -> Result<MaterializedAsset, MaterializeError> {
        let source = Path::new(locator);
        if source.is_file() {
            self.copy_local(source, dest).await?;
        } else if locator.starts_with("http://") || locator.starts_with("https://") {
            self.download(locator, dest).await?;
        } else {
            return Err(MaterializeError::InvalidLocator(locator.to_string()));
        }

        let size_bytes = tokio::fs::metadata(dest).await?.len();
        if size_bytes == 0 {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(MaterializeError::EmptyAsset);
        }

        Ok(MaterializedAsset {
            local_path: dest.to_path_buf(),
            size_bytes,
        })
    }

    /// Copy a provider-written local file into place via the staging path.
    async fn copy_local(&self, source: &Path, dest: &Path) -> Result<(), MaterializeError> {
        ensure_parent_dir(dest).await?;
        let stage = staging_path(dest);

        if let Err(e) = tokio::fs::copy(source, &stage).await {
            let _ = tokio::fs::remove_file(&stage).await;
            return Err(e.into());
        }
        tokio::fs::rename(&stage, dest).await?;
        Ok(())
    }

    /// Stream a remote video to disk via the staging path.
    ///
    /// The body is never buffered whole in memory; generated videos can be
    /// large.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), MaterializeError> {
        ensure_parent_dir(dest).await?;

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MaterializeError::DownloadFailed {
                status: status.as_u16(),
                message,
            });
        }

        let stage = staging_path(dest);
        let mut file = tokio::fs::File::create(&stage).await?;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&stage).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&stage).await;
                return Err(e.into());
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&stage, dest).await?;
        Ok(())
    }
}

/// Sibling path the bytes are staged at before the final rename.
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "asset".into());
    name.push(".part");
    dest.with_file_name(name)
}

async fn ensure_parent_dir(dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

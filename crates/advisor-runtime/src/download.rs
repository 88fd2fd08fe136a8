//! Model Download
//!
//! Streams a model file to disk. Data lands in `<dest>.part` and is only
//! renamed into place once the size checks pass.

use std::path::{Path, PathBuf};
use std::time::Duration;

use advisor_core::{AdvisorError, CancellationToken, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Large files over slow links
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Downloads model files over HTTP
#[derive(Clone)]
pub struct ModelDownloader {
    client: reqwest::Client,
}

impl Default for ModelDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelDownloader {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Download `url` to `dest`, returning the number of bytes written
    pub async fn download(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
        if url.trim().is_empty() {
            return Err(AdvisorError::Config("model URL cannot be empty".into()));
        }

        if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        if tokio::fs::try_exists(dest).await? {
            tokio::fs::remove_file(dest).await?;
        }

        let partial = partial_path(dest);
        let result = self.fetch(url, &partial, cancel).await;

        match result {
            Ok(written) => {
                tokio::fs::rename(&partial, dest).await?;
                tracing::info!(path = %dest.display(), bytes = written, "Model downloaded");
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    tracing::debug!(error = %cleanup, "No partial download to remove");
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str, partial: &Path, cancel: &CancellationToken) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AdvisorError::Initialization(format!("Failed to download model from {url}: {e}")))?;

        let expected = response.content_length();
        if let Some(total) = expected {
            tracing::info!(path = %partial.display(), total_bytes = total, "Downloading model");
        }

        let mut file = tokio::fs::File::create(partial).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut reported_decile = 0;

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Err(AdvisorError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk
                .map_err(|e| AdvisorError::Initialization(format!("Model download interrupted: {e}")))?;

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = expected {
                let decile = progress_decile(written, total);
                if decile > reported_decile {
                    reported_decile = decile;
                    tracing::info!(percent = decile * 10, bytes = written, "Download progress");
                }
            }
        }
        file.flush().await?;

        check_size(written, expected)?;
        Ok(written)
    }
}

/// Sibling path that receives data while downloading
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Completed tenths of the download, 0..=10
const fn progress_decile(written: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let decile = written.saturating_mul(10) / total;
    if decile > 10 { 10 } else { decile }
}

fn check_size(written: u64, expected: Option<u64>) -> Result<()> {
    if written == 0 {
        return Err(AdvisorError::Initialization(
            "Downloaded file is empty. Download may have failed.".into(),
        ));
    }
    match expected {
        Some(total) if total != written => Err(AdvisorError::Initialization(format!(
            "Downloaded file size ({written}) does not match expected size ({total}). File may be corrupted."
        ))),
        _ => Ok(()),
    }
}

//! Model asset downloading
//!
//! Streams model files over HTTP into the model directory with optional
//! SHA-256 verification. Files are written to a temporary name next to their
//! destination and renamed into place only once complete and verified, so an
//! interrupted download never leaves a truncated `model.onnx` behind.

use crate::error::{EditError, Result};
use crate::models::MODEL_FILE;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn create(enabled: bool) -> Self {
        #[cfg(feature = "cli")]
        if enabled {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            return Self::Indicatif(pb);
        }
        let _ = enabled;
        Self::NoOp
    }

    fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Downloads model assets into a model directory
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    force: bool,
    show_progress: bool,
}

impl ModelDownloader {
    /// Create a downloader with a 5 minute request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| EditError::network_error("create HTTP client", &e))?;
        Ok(Self::with_client(client))
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            force: false,
            show_progress: false,
        }
    }

    /// Re-download files that already exist
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Draw a progress bar (CLI builds only)
    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Download the segmentation graph into `dest_dir/model.onnx`
    ///
    /// # Errors
    /// - `RemoteService` for non-success responses
    /// - `Network` on transport failure
    /// - `ModelLoad` when the SHA-256 does not match
    /// - `Io` on file system failure
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        self.download_file(url, &dest_dir.join(MODEL_FILE), expected_sha256)
            .await
    }

    /// Download `url` to `dest`, verifying the digest when given
    ///
    /// An existing `dest` is kept untouched unless `force` is set.
    ///
    /// # Errors
    /// - `RemoteService` for non-success responses
    /// - `Network` on transport failure
    /// - `ModelLoad` when the SHA-256 does not match
    /// - `Io` on file system failure
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        if dest.exists() && !self.force {
            log::info!("{} already exists, skipping download", dest.display());
            return Ok(dest.to_path_buf());
        }

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EditError::file_io_error("create directory", parent, &e))?;

        let file_name = dest
            .file_name()
            .map_or_else(|| "download".to_string(), |name| name.to_string_lossy().into_owned());
        let temp_path = parent.join(format!(".{file_name}.{}.part", uuid::Uuid::new_v4().simple()));

        log::info!("Downloading {url} -> {}", dest.display());
        let result = self.fetch_to(url, &temp_path, expected_sha256).await;
        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {}: {cleanup}", temp_path.display());
                }
            }
            return Err(e);
        }

        tokio::fs::rename(&temp_path, dest)
            .await
            .map_err(|e| EditError::file_io_error("move download into place", dest, &e))?;
        Ok(dest.to_path_buf())
    }

    async fn fetch_to(&self, url: &str, path: &Path, expected_sha256: Option<&str>) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EditError::network_error("download model", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EditError::remote(
                status.as_u16(),
                format!("Download of {url} failed"),
            ));
        }

        let progress = ProgressIndicator::create(self.show_progress);
        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| EditError::file_io_error("create file", path, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| EditError::Network(format!("Failed to read download stream: {e}")))?;
            if bytes_read == 0 {
                break;
            }
            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| EditError::file_io_error("write to file", path, &e))?;
            downloaded += bytes_read as u64;
            progress.set_position(downloaded);
        }
        file.flush()
            .await
            .map_err(|e| EditError::file_io_error("flush file", path, &e))?;

        let actual = format!("{:x}", hasher.finalize());
        if let Some(expected) = expected_sha256 {
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(EditError::model_load(format!(
                    "SHA-256 mismatch for {url}: expected {expected}, got {actual}"
                )));
            }
        }

        progress.finish_with_message(format!("Downloaded {downloaded} bytes"));
        log::debug!("Downloaded {downloaded} bytes (sha256 {actual})");
        Ok(())
    }
}

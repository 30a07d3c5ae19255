//! Source image acquisition
//!
//! A request names its source image exactly one way: a remote URL, an
//! in-memory buffer or a local path.

use crate::error::{EditError, Result};
use std::path::PathBuf;

/// Where the source image comes from
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Remote image fetched over HTTP(S)
    Url(String),
    /// Encoded image already in memory
    Bytes(Vec<u8>),
    /// Encoded image on the local file system
    Path(PathBuf),
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

impl ImageSource {
    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => format!("url {url}"),
            Self::Bytes(bytes) => format!("buffer of {} bytes", bytes.len()),
            Self::Path(path) => format!("file {}", path.display()),
        }
    }

    /// Obtain the encoded image bytes
    ///
    /// # Errors
    /// - `RemoteService` when the URL answers with a non-success status
    /// - `Network` when the URL cannot be reached
    /// - `Io` when the path cannot be read
    pub async fn acquire(self, client: &reqwest::Client) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Path(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| EditError::file_io_error("read source image", &path, &e)),
            Self::Url(url) => fetch(client, &url).await,
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    log::debug!("Fetching source image from {url}");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| EditError::network_error("fetch source image", &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EditError::remote(
            status.as_u16(),
            format!("Fetching source image from {url} failed"),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| EditError::network_error("read source image body", &e))?;
    Ok(bytes.to_vec())
}

/// Loosely specified input as a caller may supply it
///
/// Any combination of fields may be set; [`ImageInput::into_source`] picks
/// one in priority order URL, bytes, path.
#[derive(Debug, Clone, Default)]
pub struct ImageInput {
    pub url: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub path: Option<PathBuf>,
}

impl ImageInput {
    #[must_use]
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Resolve to a single source
    ///
    /// Blank URLs and empty buffers count as not supplied.
    ///
    /// # Errors
    /// - `NoInputProvided` when nothing usable was supplied
    pub fn into_source(self) -> Result<ImageSource> {
        if let Some(url) = self.url.filter(|url| !url.trim().is_empty()) {
            return Ok(ImageSource::Url(url.trim().to_string()));
        }
        if let Some(bytes) = self.bytes.filter(|bytes| !bytes.is_empty()) {
            return Ok(ImageSource::Bytes(bytes));
        }
        if let Some(path) = self.path.filter(|path| !path.as_os_str().is_empty()) {
            return Ok(ImageSource::Path(path));
        }
        Err(EditError::NoInputProvided)
    }
}

impl TryFrom<ImageInput> for ImageSource {
    type Error = EditError;

    fn try_from(input: ImageInput) -> Result<Self> {
        input.into_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_no_input_is_rejected() {
        assert!(matches!(
            ImageInput::default().into_source(),
            Err(EditError::NoInputProvided)
        ));
        let blank = ImageInput::default().with_url("  ").with_bytes(Vec::new());
        assert!(matches!(blank.into_source(), Err(EditError::NoInputProvided)));
    }

    #[test]
    fn test_priority_is_url_then_bytes_then_path() {
        let all = ImageInput::default()
            .with_url("https://img.example/a.png")
            .with_bytes(vec![1])
            .with_path("/tmp/a.png");
        assert_eq!(
            all.clone().into_source().unwrap(),
            ImageSource::Url("https://img.example/a.png".into())
        );

        let no_url = ImageInput { url: None, ..all };
        assert_eq!(no_url.clone().into_source().unwrap(), ImageSource::Bytes(vec![1]));

        let path_only = ImageInput { bytes: None, ..no_url };
        assert_eq!(
            path_only.into_source().unwrap(),
            ImageSource::Path("/tmp/a.png".into())
        );
    }

    #[tokio::test]
    async fn test_acquire_bytes_and_path() {
        let client = reqwest::Client::new();
        assert_eq!(
            ImageSource::Bytes(vec![9, 8]).acquire(&client).await.unwrap(),
            vec![9, 8]
        );

        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"bytes on disk").unwrap();
        let bytes = ImageSource::Path(file.path().to_path_buf())
            .acquire(&client)
            .await
            .unwrap();
        assert_eq!(bytes, b"bytes on disk");

        let err = ImageSource::Path("/no/such/image.png".into())
            .acquire(&client)
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Io(_)));
    }

    #[tokio::test]
    async fn test_acquire_url() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/photo.png")
            .with_status(200)
            .with_body(b"remote image")
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let bytes = ImageSource::Url(format!("{}/photo.png", server.url()))
            .acquire(&client)
            .await
            .unwrap();
        assert_eq!(bytes, b"remote image");

        let err = ImageSource::Url(format!("{}/missing.png", server.url()))
            .acquire(&client)
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::RemoteService { status: 404, .. }));

        ok.assert_async().await;
        missing.assert_async().await;
    }
}

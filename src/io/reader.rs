use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use super::Locator;
use crate::error::{NetworkError, SourceError};

/// Trait for reading the complete bytes of an origin image.
///
/// Base sources decode the whole image, so unlike a range reader this only
/// ever fetches one contiguous body. Implementations must be thread-safe.
#[async_trait]
pub trait ByteReader: Send + Sync {
    /// Read the entire resource.
    async fn read_all(&self) -> Result<Bytes, SourceError>;

    /// Identifier used for logging and error messages.
    fn identifier(&self) -> &str;
}

/// Create the reader matching a locator.
pub fn reader_for(locator: &Locator, client: &reqwest::Client) -> Box<dyn ByteReader> {
    match locator {
        Locator::File(path) => Box::new(FileReader::new(path.clone())),
        Locator::Remote(url) => Box::new(HttpReader::new(client.clone(), url.clone())),
    }
}

// =============================================================================
// Local Files
// =============================================================================

/// Reads origin bytes from the local filesystem.
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
    identifier: String,
}

impl FileReader {
    pub fn new(path: PathBuf) -> Self {
        let identifier = path.display().to_string();
        Self { path, identifier }
    }
}

#[async_trait]
impl ByteReader for FileReader {
    async fn read_all(&self) -> Result<Bytes, SourceError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Io {
                locator: self.identifier.clone(),
                message: e.to_string(),
            })?;

        debug!(path = %self.identifier, bytes = data.len(), "Read origin file");
        Ok(Bytes::from(data))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Reads origin bytes with a single GET request.
#[derive(Debug, Clone)]
pub struct HttpReader {
    client: reqwest::Client,
    url: Url,
    identifier: String,
}

impl HttpReader {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        let identifier = url.to_string();
        Self {
            client,
            url,
            identifier,
        }
    }
}

#[async_trait]
impl ByteReader for HttpReader {
    async fn read_all(&self) -> Result<Bytes, SourceError> {
        Ok(fetch_bytes(&self.client, self.url.as_str()).await?)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// GET a URL and return its body.
///
/// Connection failures, non-success statuses and body read failures map to
/// the matching [`NetworkError`] variant.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Bytes, NetworkError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| NetworkError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(NetworkError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(|e| NetworkError::Body {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    debug!(url = %url, bytes = body.len(), "Fetched remote resource");
    Ok(body)
}

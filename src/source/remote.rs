//! The `iiif` base source: reads pixels from a remote IIIF image service.
//!
//! Services at compliance level 1 or 2 are asked for exactly the region and
//! size each crop needs. Level 0 services only promise the full image, so it
//! is downloaded once per run and every crop is cut from the cached copy.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageReader};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{
    check_scale, crop_shared, BaseSourceFactory, ImageSource, Metadata, Options, Region,
};
use crate::error::SourceError;
use crate::io::fetch_bytes;
use crate::pyramid::path::{full_path, region_request_path};
use crate::pyramid::ImageDescriptor;

/// Registry name of the remote source.
pub const REMOTE_SOURCE_NAME: &str = "iiif";

/// Format requested from the remote service unless overridden.
pub const DEFAULT_REMOTE_FORMAT: &str = "jpg";

/// Image backed by a remote IIIF service.
pub struct RemoteSource {
    locator: String,
    descriptor: ImageDescriptor,
    format: String,
    client: reqwest::Client,
    metadata: Metadata,

    /// Full-resolution image, only populated for level 0 services
    full_image: OnceCell<Arc<DynamicImage>>,
}

impl RemoteSource {
    /// Fetch and parse the descriptor at `locator`.
    ///
    /// The locator may point at the `info.json` itself or at the image base
    /// URI, in which case `/info.json` is appended.
    pub async fn open(
        locator: &str,
        format: impl Into<String>,
        client: reqwest::Client,
    ) -> Result<Self, SourceError> {
        let info_url = info_url(locator);
        let body = fetch_bytes(&client, &info_url).await?;
        let descriptor = ImageDescriptor::parse(&info_url, &body)?;

        if descriptor.compliance.is_restricted() {
            info!(
                url = %info_url,
                "Level 0 service detected, crops will be cut from the full image"
            );
        }

        let mut metadata = Metadata::new();
        metadata.insert(
            "iiif_source_id".to_string(),
            Value::String(descriptor.id.clone()),
        );
        metadata.insert("iiif_profile".to_string(), descriptor.profile.clone());

        Ok(Self {
            locator: locator.to_string(),
            descriptor,
            format: format.into(),
            client,
            metadata,
            full_image: OnceCell::new(),
        })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    async fn fetch_image(&self, url: &str) -> Result<DynamicImage, SourceError> {
        let body = fetch_bytes(&self.client, url).await?;
        decode_remote(url.to_string(), body).await
    }

    /// The cached full image, downloading it on first use.
    async fn full_image(&self) -> Result<Arc<DynamicImage>, SourceError> {
        self.full_image
            .get_or_try_init(|| async {
                let url = self
                    .descriptor
                    .url_for(&full_path(self.descriptor.version, &self.format));
                debug!(url = %url, "Downloading full image for in-memory crops");
                self.fetch_image(&url).await.map(Arc::new)
            })
            .await
            .cloned()
    }
}

fn info_url(locator: &str) -> String {
    if locator.ends_with(".json") {
        locator.to_string()
    } else {
        format!("{}/info.json", locator.trim_end_matches('/'))
    }
}

async fn decode_remote(url: String, body: Bytes) -> Result<DynamicImage, SourceError> {
    tokio::task::spawn_blocking(move || {
        ImageReader::new(Cursor::new(&body[..]))
            .with_guessed_format()
            .map_err(|e| e.to_string())
            .and_then(|reader| reader.decode().map_err(|e| e.to_string()))
            .map_err(|message| SourceError::Decode {
                locator: url,
                message,
            })
    })
    .await
    .map_err(|e| SourceError::Worker(e.to_string()))?
}

#[async_trait]
impl ImageSource for RemoteSource {
    fn name(&self) -> &str {
        REMOTE_SOURCE_NAME
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn width(&self) -> u32 {
        self.descriptor.width
    }

    fn height(&self) -> u32 {
        self.descriptor.height
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn crop(&self, region: Region, scale: f64) -> Result<DynamicImage, SourceError> {
        check_scale(scale)?;
        region.check_bounds(self.descriptor.width, self.descriptor.height)?;

        if self.descriptor.compliance.is_restricted() {
            let full = self.full_image().await?;
            return crop_shared(full, region, scale).await;
        }

        let scaled = (scale != 1.0).then(|| region.scaled_size(scale));
        let path = region_request_path(
            region.x,
            region.y,
            region.width,
            region.height,
            scaled,
            &self.format,
        );
        let url = self.descriptor.url_for(&path);
        debug!(url = %url, "Fetching remote region");
        self.fetch_image(&url).await
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates [`RemoteSource`]s. Option `format` selects the requested format.
#[derive(Debug, Clone, Default)]
pub struct RemoteSourceFactory {
    client: reqwest::Client,
}

impl RemoteSourceFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BaseSourceFactory for RemoteSourceFactory {
    fn name(&self) -> &'static str {
        REMOTE_SOURCE_NAME
    }

    fn description(&self) -> &'static str {
        "Reads regions from a remote IIIF image service (info.json URL)"
    }

    async fn open(
        &self,
        locator: &str,
        options: &Options,
    ) -> Result<Arc<dyn ImageSource>, SourceError> {
        let format = options
            .get("format")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REMOTE_FORMAT.to_string());
        Ok(Arc::new(
            RemoteSource::open(locator, format, self.client.clone()).await?,
        ))
    }
}

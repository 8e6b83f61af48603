//! The `default` base source: decodes any raster format compiled into
//! `image` from a local path, `file://` URL or `http(s)://` URL.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageDecoder, ImageReader};
use serde_json::json;
use tracing::{debug, warn};

use super::{crop_shared, BaseSourceFactory, ImageSource, Metadata, Options, Region};
use crate::error::SourceError;
use crate::io::{reader_for, Locator};

/// Registry name of the decoding source.
pub const DEFAULT_SOURCE_NAME: &str = "default";

/// Metadata key for an embedded EXIF block.
pub const EXIF_KEY: &str = "Exif";

/// Metadata key for an embedded ICC profile.
pub const ICC_KEY: &str = "ICC Profile";

/// A fully decoded image held in memory.
///
/// The pixel buffer is behind an `Arc` so crops can run on the blocking pool
/// without copying the whole image.
pub struct DecodedSource {
    locator: String,
    image: Arc<DynamicImage>,
    metadata: Metadata,
}

impl DecodedSource {
    /// Read and decode the image at `locator`.
    pub async fn open(locator: &str, client: &reqwest::Client) -> Result<Self, SourceError> {
        let reader = reader_for(&Locator::parse(locator), client);
        let data = reader.read_all().await?;
        Self::decode(locator.to_string(), data).await
    }

    /// Decode already-fetched bytes on the blocking pool.
    pub async fn decode(locator: String, data: Bytes) -> Result<Self, SourceError> {
        tokio::task::spawn_blocking(move || Self::decode_blocking(locator, &data))
            .await
            .map_err(|e| SourceError::Worker(e.to_string()))?
    }

    /// Wrap an image that is already in memory. Metadata is empty.
    pub fn from_image(locator: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            locator: locator.into(),
            image: Arc::new(image),
            metadata: Metadata::new(),
        }
    }

    fn decode_blocking(locator: String, data: &[u8]) -> Result<Self, SourceError> {
        let decode_error = |message: String| SourceError::Decode {
            locator: locator.clone(),
            message,
        };

        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| decode_error(e.to_string()))?;
        let mut decoder = reader
            .into_decoder()
            .map_err(|e| decode_error(e.to_string()))?;

        let metadata = read_metadata(&mut decoder, &locator);
        let image = DynamicImage::from_decoder(decoder).map_err(|e| decode_error(e.to_string()))?;

        debug!(
            locator = %locator,
            width = image.width(),
            height = image.height(),
            metadata_keys = metadata.len(),
            "Decoded image"
        );

        Ok(Self {
            locator,
            image: Arc::new(image),
            metadata,
        })
    }

    /// The decoded pixels.
    pub fn image(&self) -> &Arc<DynamicImage> {
        &self.image
    }
}

/// Collect embedded EXIF and ICC blocks.
///
/// Unreadable metadata is logged and skipped; it never fails the decode.
fn read_metadata(decoder: &mut impl ImageDecoder, locator: &str) -> Metadata {
    let mut metadata = Metadata::new();

    match decoder.exif_metadata() {
        Ok(Some(exif)) => {
            metadata.insert(EXIF_KEY.to_string(), json!({ "length": exif.len() }));
        }
        Ok(None) => {}
        Err(e) => warn!(locator = %locator, "Could not read EXIF metadata: {}", e),
    }

    match decoder.icc_profile() {
        Ok(Some(icc)) => {
            metadata.insert(ICC_KEY.to_string(), json!({ "length": icc.len() }));
        }
        Ok(None) => {}
        Err(e) => warn!(locator = %locator, "Could not read ICC profile: {}", e),
    }

    metadata
}

#[async_trait]
impl ImageSource for DecodedSource {
    fn name(&self) -> &str {
        DEFAULT_SOURCE_NAME
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn crop(&self, region: Region, scale: f64) -> Result<DynamicImage, SourceError> {
        crop_shared(Arc::clone(&self.image), region, scale).await
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates [`DecodedSource`]s, sharing one HTTP client.
#[derive(Debug, Clone, Default)]
pub struct DecodedSourceFactory {
    client: reqwest::Client,
}

impl DecodedSourceFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BaseSourceFactory for DecodedSourceFactory {
    fn name(&self) -> &'static str {
        DEFAULT_SOURCE_NAME
    }

    fn description(&self) -> &'static str {
        "Decodes JPEG, PNG, TIFF, GIF, WebP and BMP from files or URLs"
    }

    async fn open(
        &self,
        locator: &str,
        _options: &Options,
    ) -> Result<Arc<dyn ImageSource>, SourceError> {
        Ok(Arc::new(DecodedSource::open(locator, &self.client).await?))
    }
}

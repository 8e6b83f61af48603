//! Image source abstraction.
//!
//! An [`ImageSource`] exposes fixed dimensions, a metadata mapping and a
//! region accessor that crops and optionally downscales. Sources come in two
//! flavours:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   Manipulator (filter, ...)  │  wraps exactly one upstream source
//! └──────────────┬───────────────┘
//!                │ crop(region, scale)
//!                ▼
//! ┌──────────────────────────────┐
//! │   Base source (default, iiif)│  decodes bytes from a locator
//! └──────────────────────────────┘
//! ```
//!
//! Base sources are created by a [`BaseSourceFactory`] bound to a locator;
//! manipulators by a [`ManipulatorFactory`] bound to their upstream. The
//! [`chain`] module folds a list of stages into one effective source.

pub mod chain;
mod decoded;
mod filter;
mod remote;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{ConfigError, SourceError};

pub use chain::{
    ChainBuilder, ChainSpec, ChainedSource, StageSpec, STACKED_EXTENSION, STACKED_SOURCE_NAME,
};
pub use decoded::{DecodedSource, DecodedSourceFactory, DEFAULT_SOURCE_NAME};
pub use filter::{FilterKind, FilterParams, FilterSource, FilterSourceFactory};
pub use remote::{RemoteSource, RemoteSourceFactory, REMOTE_SOURCE_NAME};

/// Arbitrary metadata attached to a source (EXIF, ICC, upstream profile).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// String options passed to sources and sinks.
pub type Options = BTreeMap<String, String>;

/// Resampling filter used for every downscale.
pub const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

// =============================================================================
// Region
// =============================================================================

/// A native-resolution rectangle of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Check that the region is non-empty and lies within the image.
    pub fn check_bounds(&self, image_width: u32, image_height: u32) -> Result<(), SourceError> {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);

        if self.width == 0
            || self.height == 0
            || right > u64::from(image_width)
            || bottom > u64::from(image_height)
        {
            return Err(SourceError::OutOfBounds {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                image_width,
                image_height,
            });
        }
        Ok(())
    }

    /// Output dimensions after downscaling by `scale`.
    pub fn scaled_size(&self, scale: f64) -> (u32, u32) {
        (
            scaled_extent(self.width, scale),
            scaled_extent(self.height, scale),
        )
    }
}

impl From<crate::pyramid::TileCoordinate> for Region {
    fn from(tile: crate::pyramid::TileCoordinate) -> Self {
        Self::new(tile.x, tile.y, tile.width, tile.height)
    }
}

/// `ceil(length / scale)`, at least 1.
///
/// Quotients within floating-point noise of an integer round to it, so a
/// scale computed as `W / w` maps `W` back onto exactly `w`.
pub fn scaled_extent(length: u32, scale: f64) -> u32 {
    let exact = f64::from(length) / scale;
    let nearest = exact.round();
    let extent = if (exact - nearest).abs() < 1e-6 {
        nearest
    } else {
        exact.ceil()
    };
    (extent as u32).max(1)
}

/// Reject non-finite and non-positive scale factors.
pub fn check_scale(scale: f64) -> Result<(), SourceError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(SourceError::InvalidScale(scale))
    }
}

// =============================================================================
// ImageSource Trait
// =============================================================================

/// A source of pixels with fixed dimensions.
///
/// Implementations are shared read-only across every tile worker, so `crop`
/// takes `&self` and must be safe to call concurrently.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Registry name of the source type (e.g. `default`, `filter`).
    fn name(&self) -> &str;

    /// Origin identity of the image.
    fn locator(&self) -> &str;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Metadata derived from the origin; empty when nothing is available.
    fn metadata(&self) -> &Metadata;

    /// Extract `region` and downscale it by `scale`.
    ///
    /// A scale of exactly 1 returns the native pixels without resampling.
    /// Otherwise the result measures `ceil(w / scale)` by `ceil(h / scale)`.
    ///
    /// # Errors
    ///
    /// [`SourceError::OutOfBounds`] when the region is empty or exceeds the
    /// image, [`SourceError::InvalidScale`] for non-positive scales, plus any
    /// failure fetching or decoding the pixels.
    async fn crop(&self, region: Region, scale: f64) -> Result<DynamicImage, SourceError>;
}

/// Factory for base sources, which decode an image from a locator.
#[async_trait]
pub trait BaseSourceFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line description shown by `info list-sources`.
    fn description(&self) -> &'static str;

    async fn open(
        &self,
        locator: &str,
        options: &Options,
    ) -> Result<Arc<dyn ImageSource>, SourceError>;
}

/// Factory for manipulators, which wrap exactly one upstream source.
pub trait ManipulatorFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Bind a new manipulator to `upstream`.
    ///
    /// Options are validated here so a bad value fails before any pixel work.
    fn wrap(
        &self,
        upstream: Arc<dyn ImageSource>,
        options: &Options,
    ) -> Result<Arc<dyn ImageSource>, ConfigError>;
}

// =============================================================================
// Pixel Helpers
// =============================================================================

/// Crop `region` out of `image` and downscale it by `scale`.
pub fn crop_and_scale(
    image: &DynamicImage,
    region: Region,
    scale: f64,
) -> Result<DynamicImage, SourceError> {
    check_scale(scale)?;
    region.check_bounds(image.width(), image.height())?;

    let cropped = image.crop_imm(region.x, region.y, region.width, region.height);
    if scale == 1.0 {
        return Ok(cropped);
    }

    let (width, height) = region.scaled_size(scale);
    if (width, height) == (region.width, region.height) {
        return Ok(cropped);
    }
    Ok(cropped.resize_exact(width, height, RESAMPLE_FILTER))
}

/// [`crop_and_scale`] on the blocking pool, for shared decoded images.
pub async fn crop_shared(
    image: Arc<DynamicImage>,
    region: Region,
    scale: f64,
) -> Result<DynamicImage, SourceError> {
    tokio::task::spawn_blocking(move || crop_and_scale(&image, region, scale))
        .await
        .map_err(|e| SourceError::Worker(e.to_string()))?
}

/// Parse an optional typed option, falling back to `default` when absent.
pub fn option_or<T: FromStr>(options: &Options, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match options.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidOption {
            key: key.to_string(),
            message: format!("'{}': {}", raw, e),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================

//! The `filter` manipulator: a per-pixel transform over its upstream crop.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

use super::{option_or, ImageSource, ManipulatorFactory, Metadata, Options, Region};
use crate::error::{ConfigError, SourceError};

/// Registry name of the filter manipulator.
pub const FILTER_SOURCE_NAME: &str = "filter";

pub const DEFAULT_THRESHOLD: u8 = 128;
pub const DEFAULT_POSTERIZE_LEVELS: u32 = 4;
pub const DEFAULT_BLUR_RADIUS: u32 = 3;

/// The available filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    None,
    Grayscale,
    Invert,
    Posterize,
    Threshold,
    Sepia,
    Blur,
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FilterKind::None),
            "grayscale" => Ok(FilterKind::Grayscale),
            "invert" => Ok(FilterKind::Invert),
            "posterize" => Ok(FilterKind::Posterize),
            "threshold" => Ok(FilterKind::Threshold),
            "sepia" => Ok(FilterKind::Sepia),
            "blur" => Ok(FilterKind::Blur),
            other => Err(format!("unknown filter type '{}'", other)),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::None => "none",
            FilterKind::Grayscale => "grayscale",
            FilterKind::Invert => "invert",
            FilterKind::Posterize => "posterize",
            FilterKind::Threshold => "threshold",
            FilterKind::Sepia => "sepia",
            FilterKind::Blur => "blur",
        };
        f.write_str(name)
    }
}

/// Filter parameters, validated once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    pub kind: FilterKind,
    pub threshold: u8,
    pub posterize_levels: u32,
    pub blur_radius: u32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::None,
            threshold: DEFAULT_THRESHOLD,
            posterize_levels: DEFAULT_POSTERIZE_LEVELS,
            blur_radius: DEFAULT_BLUR_RADIUS,
        }
    }
}

impl FilterParams {
    /// Read `type`, `threshold`, `posterizeLevels` and `blurRadius`.
    pub fn from_options(options: &Options) -> Result<Self, ConfigError> {
        Ok(Self {
            kind: option_or(options, "type", FilterKind::None)?,
            threshold: option_or(options, "threshold", DEFAULT_THRESHOLD)?,
            posterize_levels: option_or(options, "posterizeLevels", DEFAULT_POSTERIZE_LEVELS)?,
            blur_radius: option_or(options, "blurRadius", DEFAULT_BLUR_RADIUS)?,
        })
    }

    /// Apply the filter. Output dimensions always equal the input's.
    pub fn apply(&self, image: DynamicImage) -> DynamicImage {
        match self.kind {
            FilterKind::None => image,
            FilterKind::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
            FilterKind::Invert => {
                let mut image = image;
                image.invert();
                image
            }
            FilterKind::Posterize => posterize(image, self.posterize_levels),
            FilterKind::Threshold => DynamicImage::ImageLuma8(threshold(&image, self.threshold)),
            FilterKind::Sepia => DynamicImage::ImageRgba8(sepia(image.to_rgba8())),
            FilterKind::Blur => {
                DynamicImage::ImageRgba8(box_blur(&image.to_rgba8(), self.blur_radius))
            }
        }
    }
}

// =============================================================================
// Pixel Arithmetic
// =============================================================================

fn posterize(image: DynamicImage, levels: u32) -> DynamicImage {
    if levels <= 1 {
        return image;
    }
    let step = (255 / (levels.min(256) - 1)).max(1) as u8;
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = *channel / step * step;
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)) as u8
}

fn threshold(image: &DynamicImage, cutoff: u8) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        if luminance(r, g, b) > cutoff {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn sepia(mut rgba: RgbaImage) -> RgbaImage {
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0.map(f64::from);
        let tone = |cr: f64, cg: f64, cb: f64| (cr * r + cg * g + cb * b).min(255.0) as u8;
        *pixel = Rgba([
            tone(0.393, 0.769, 0.189),
            tone(0.349, 0.686, 0.168),
            tone(0.272, 0.534, 0.131),
            a as u8,
        ]);
    }
    rgba
}

/// Box blur with an odd square kernel; pixels closer to the edge than the
/// kernel half-width are copied unchanged.
fn box_blur(source: &RgbaImage, radius: u32) -> RgbaImage {
    let kernel = if radius % 2 == 0 { radius + 1 } else { radius };
    let half = kernel / 2;
    let (width, height) = source.dimensions();
    if half == 0 || width <= 2 * half || height <= 2 * half {
        return source.clone();
    }

    let area = f64::from(kernel * kernel);
    let mut output = source.clone();
    for y in half..height - half {
        for x in half..width - half {
            let mut sums = [0u32; 4];
            for ky in y - half..=y + half {
                for kx in x - half..=x + half {
                    let pixel = source.get_pixel(kx, ky);
                    for (sum, value) in sums.iter_mut().zip(pixel.0) {
                        *sum += u32::from(value);
                    }
                }
            }
            output.put_pixel(x, y, Rgba(sums.map(|s| (f64::from(s) / area).round() as u8)));
        }
    }
    output
}

// =============================================================================
// Source
// =============================================================================

/// Applies a [`FilterParams`] to every crop of its upstream.
pub struct FilterSource {
    upstream: Arc<dyn ImageSource>,
    params: FilterParams,
}

impl FilterSource {
    pub fn new(upstream: Arc<dyn ImageSource>, params: FilterParams) -> Self {
        Self { upstream, params }
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }
}

#[async_trait]
impl ImageSource for FilterSource {
    fn name(&self) -> &str {
        FILTER_SOURCE_NAME
    }

    fn locator(&self) -> &str {
        self.upstream.locator()
    }

    fn width(&self) -> u32 {
        self.upstream.width()
    }

    fn height(&self) -> u32 {
        self.upstream.height()
    }

    fn metadata(&self) -> &Metadata {
        self.upstream.metadata()
    }

    async fn crop(&self, region: Region, scale: f64) -> Result<DynamicImage, SourceError> {
        let cropped = self.upstream.crop(region, scale).await?;
        if self.params.kind == FilterKind::None {
            return Ok(cropped);
        }

        let params = self.params;
        tokio::task::spawn_blocking(move || params.apply(cropped))
            .await
            .map_err(|e| SourceError::Worker(e.to_string()))
    }
}

/// Creates [`FilterSource`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterSourceFactory;

impl ManipulatorFactory for FilterSourceFactory {
    fn name(&self) -> &'static str {
        FILTER_SOURCE_NAME
    }

    fn description(&self) -> &'static str {
        "Pixel filter: none, grayscale, invert, posterize, threshold, sepia, blur"
    }

    fn wrap(
        &self,
        upstream: Arc<dyn ImageSource>,
        options: &Options,
    ) -> Result<Arc<dyn ImageSource>, ConfigError> {
        let params = FilterParams::from_options(options)?;
        Ok(Arc::new(FilterSource::new(upstream, params)))
    }
}

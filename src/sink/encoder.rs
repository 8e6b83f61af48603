//! The `default` tile sink.
//!
//! Encodes tiles in any output format compiled into `image`. JPEG output
//! uses a configurable quality and, since JPEG has no alpha channel,
//! composites transparent pixels onto white first.

use std::borrow::Cow;
use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::trace;

use super::TileSink;
use crate::error::{ConfigError, SinkError};
use crate::source::{option_or, Metadata, Options};

/// Registry name of the default sink.
pub const DEFAULT_SINK_NAME: &str = "default";

/// Default output format.
pub const DEFAULT_FORMAT: &str = "jpg";

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Output Format
// =============================================================================

/// Output formats the default sink can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Tiff,
    Gif,
    WebP,
    Bmp,
}

impl OutputFormat {
    /// Resolve a format name or extension (`jpg`, `jpeg`, `tif`, ...).
    pub fn from_name(name: &str) -> Result<Self, SinkError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "tif" | "tiff" => Ok(OutputFormat::Tiff),
            "gif" => Ok(OutputFormat::Gif),
            "webp" => Ok(OutputFormat::WebP),
            "bmp" => Ok(OutputFormat::Bmp),
            other => Err(SinkError::UnsupportedFormat(other.to_string())),
        }
    }

    /// File extension written into tile paths.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tif",
            OutputFormat::Gif => "gif",
            OutputFormat::WebP => "webp",
            OutputFormat::Bmp => "bmp",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Tiff => ImageFormat::Tiff,
            OutputFormat::Gif => ImageFormat::Gif,
            OutputFormat::WebP => ImageFormat::WebP,
            OutputFormat::Bmp => ImageFormat::Bmp,
        }
    }
}

// =============================================================================
// Default Sink
// =============================================================================

/// Tile sink backed by the `image` encoders.
#[derive(Debug, Clone)]
pub struct DefaultTileSink {
    format: OutputFormat,
    quality: u8,
}

impl Default for DefaultTileSink {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl DefaultTileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink writing `format` at the default quality.
    pub fn with_format(format: OutputFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn encode_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>, SinkError> {
        let rgb = flatten_onto_white(image);
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        encoder.encode_image(&rgb).map_err(|e| SinkError::Encode {
            format: "jpeg".to_string(),
            message: e.to_string(),
        })?;
        Ok(output)
    }

    fn encode_generic(&self, image: &DynamicImage) -> Result<Vec<u8>, SinkError> {
        let image = encodable_pixels(self.format, image);
        let mut output = Cursor::new(Vec::new());
        image
            .write_to(&mut output, self.format.image_format())
            .map_err(|e| SinkError::Encode {
                format: self.format.extension().to_string(),
                message: e.to_string(),
            })?;
        Ok(output.into_inner())
    }
}

impl TileSink for DefaultTileSink {
    fn name(&self) -> &str {
        DEFAULT_SINK_NAME
    }

    fn configure(&mut self, options: &Options) -> Result<(), ConfigError> {
        if let Some(format) = options.get("format") {
            self.format = OutputFormat::from_name(format).map_err(|e| ConfigError::InvalidOption {
                key: "format".to_string(),
                message: e.to_string(),
            })?;
        }

        let quality: u8 = option_or(options, "quality", self.quality)?;
        if !is_valid_quality(quality) {
            return Err(ConfigError::InvalidOption {
                key: "quality".to_string(),
                message: format!(
                    "{} is outside {}-{}",
                    quality, MIN_JPEG_QUALITY, MAX_JPEG_QUALITY
                ),
            });
        }
        self.quality = quality;
        Ok(())
    }

    fn format_extension(&self) -> &str {
        self.format.extension()
    }

    fn encode(&self, image: &DynamicImage, metadata: &Metadata) -> Result<Bytes, SinkError> {
        if !metadata.is_empty() {
            trace!(
                keys = ?metadata.keys().collect::<Vec<_>>(),
                "Source metadata is not embedded in tiles"
            );
        }

        let output = match self.format {
            OutputFormat::Jpeg => self.encode_jpeg(image)?,
            _ => self.encode_generic(image)?,
        };
        Ok(Bytes::from(output))
    }
}

/// Drop alpha by compositing onto a white background.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Convert to a pixel type the format's encoder accepts.
///
/// GIF only takes RGBA8, WebP and BMP only 8-bit channels, and PNG and TIFF
/// have no float samples.
fn encodable_pixels(format: OutputFormat, image: &DynamicImage) -> Cow<'_, DynamicImage> {
    let color = image.color();
    let alpha = color.has_alpha();
    let eight_bit = matches!(
        color,
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8
    );
    let float = matches!(color, ColorType::Rgb32F | ColorType::Rgba32F);

    match format {
        OutputFormat::Gif if color != ColorType::Rgba8 => {
            Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8()))
        }
        OutputFormat::WebP | OutputFormat::Bmp if !eight_bit => Cow::Owned(if alpha {
            DynamicImage::ImageRgba8(image.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        }),
        OutputFormat::Png | OutputFormat::Tiff if float => Cow::Owned(if alpha {
            DynamicImage::ImageRgba16(image.to_rgba16())
        } else {
            DynamicImage::ImageRgb16(image.to_rgb16())
        }),
        _ => Cow::Borrowed(image),
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

// =============================================================================
// Tests
// =============================================================================

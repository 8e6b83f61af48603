//! Tile sinks turn cropped pixels into encoded bytes.
//!
//! A sink is configured once per run from its option bag, then shared
//! read-only by every tile worker.

mod encoder;

use bytes::Bytes;
use image::DynamicImage;

use crate::error::{ConfigError, SinkError};
use crate::source::{Metadata, Options};

pub use encoder::{
    is_valid_quality, DefaultTileSink, OutputFormat, DEFAULT_FORMAT, DEFAULT_JPEG_QUALITY,
    DEFAULT_SINK_NAME, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};

/// Encodes tiles for the generator and composites for the reassembler.
pub trait TileSink: Send + Sync {
    /// Registry name of the sink.
    fn name(&self) -> &str;

    /// Apply options. Called once, before the sink is shared.
    fn configure(&mut self, options: &Options) -> Result<(), ConfigError>;

    /// Extension written into every path this sink produces.
    fn format_extension(&self) -> &str;

    /// Encode one image. `metadata` is the source's metadata mapping.
    fn encode(&self, image: &DynamicImage, metadata: &Metadata) -> Result<Bytes, SinkError>;
}

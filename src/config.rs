//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `IIIF_` prefix:
//!
//! - `IIIF_IDENTIFIER` - Identifier prefix written into descriptors
//! - `IIIF_ZOOM_LEVELS` - Zoom levels, 0 for automatic (default: 0)
//! - `IIIF_TILE_SIZE` - Tile edge length in pixels (default: 512)
//! - `IIIF_OUTPUT` - Output directory (default: iiif)
//! - `IIIF_SOURCE` - Image source type (default: default)
//! - `IIIF_SINK` - Tile sink type (default: default)
//! - `IIIF_VERSION` - Protocol version, v2 or v3 (default: v2)
//! - `IIIF_WORKERS` - Worker count, 0 for all cores (default: 0)
//! - `IIIF_LOG_LEVEL` - Log level for this crate

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::pyramid::{
    IiifVersion, PlanConfig, DEFAULT_IDENTIFIER, DEFAULT_TILE_SIZE, MAX_ZOOM_LEVELS,
};
use crate::sink::{OutputFormat, DEFAULT_FORMAT, DEFAULT_SINK_NAME};
use crate::source::{Options, DEFAULT_SOURCE_NAME, STACKED_SOURCE_NAME};
use crate::validate::DEFAULT_TILE_EXTENSION;

// =============================================================================
// Default Values
// =============================================================================

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "iiif";

/// Default zoom level count (0 = derive from the image size).
pub const DEFAULT_ZOOM_LEVELS: u32 = 0;

/// Default worker count (0 = available hardware parallelism).
pub const DEFAULT_WORKERS: usize = 0;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// =============================================================================
// CLI Arguments
// =============================================================================

/// Generate static IIIF Image API tile pyramids and validate them.
#[derive(Parser, Debug, Clone)]
#[command(name = "iiif-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Log level for this crate; overrides --verbose. RUST_LOG wins over both.
    #[arg(long, global = true, env = "IIIF_LOG_LEVEL", value_parser = LOG_LEVELS)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate a tile pyramid for each input image.
    Generate(GenerateConfig),

    /// Reassemble a published pyramid from its tiles.
    Validate(ValidateConfig),

    /// List registered plugins.
    #[command(subcommand)]
    Info(InfoCommand),
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoCommand {
    /// List image sources and manipulators.
    ListSources,

    /// List tile sinks.
    ListSinks,
}

// =============================================================================
// Generate
// =============================================================================

#[derive(Parser, Debug, Clone)]
pub struct GenerateConfig {
    /// Input images (paths or URLs). Not needed with `--source stacked`.
    pub files: Vec<String>,

    /// Identifier prefix; the image id is appended to form the descriptor id.
    #[arg(short, long, default_value = DEFAULT_IDENTIFIER, env = "IIIF_IDENTIFIER")]
    pub identifier: String,

    /// Number of zoom levels (0 = automatic).
    #[arg(short, long, default_value_t = DEFAULT_ZOOM_LEVELS, env = "IIIF_ZOOM_LEVELS")]
    pub zoom_levels: u32,

    /// Tile edge length in pixels.
    #[arg(short, long, default_value_t = DEFAULT_TILE_SIZE, env = "IIIF_TILE_SIZE")]
    pub tile_size: u32,

    /// Output directory; each image gets its own subdirectory.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR, env = "IIIF_OUTPUT")]
    pub output: PathBuf,

    /// Image source type (`stacked` builds a chain from --source-opt).
    #[arg(short, long, default_value = DEFAULT_SOURCE_NAME, env = "IIIF_SOURCE")]
    pub source: String,

    /// Tile sink type.
    #[arg(long, default_value = DEFAULT_SINK_NAME, env = "IIIF_SINK")]
    pub sink: String,

    /// Source option as key=value (repeatable).
    #[arg(long = "source-opt", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub source_options: Vec<(String, String)>,

    /// Sink option as key=value (repeatable), e.g. format=png or quality=90.
    #[arg(long = "sink-opt", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub sink_options: Vec<(String, String)>,

    /// IIIF Image API version of the output.
    #[arg(long, value_enum, default_value_t = IiifVersion::V2, env = "IIIF_VERSION")]
    pub iiif_version: IiifVersion,

    /// Concurrent tile workers (0 = all cores).
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "IIIF_WORKERS")]
    pub workers: usize,
}

impl GenerateConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }

        if self.zoom_levels > MAX_ZOOM_LEVELS {
            return Err(format!(
                "zoom_levels must be at most {}, got {}",
                MAX_ZOOM_LEVELS, self.zoom_levels
            ));
        }

        if self.is_stacked() {
            if !self.source_options.iter().any(|(k, _)| k == "config" || k.starts_with("source.")) {
                return Err(
                    "--source stacked needs --source-opt config=<file> or source.N=<stage> options"
                        .to_string(),
                );
            }
        } else if self.files.is_empty() {
            return Err("No input files given".to_string());
        }

        if self.identifier.is_empty() {
            return Err("identifier must not be empty".to_string());
        }

        Ok(())
    }

    /// Whether inputs come from a chain description instead of files.
    pub fn is_stacked(&self) -> bool {
        self.source == STACKED_SOURCE_NAME
    }

    pub fn source_options(&self) -> Options {
        self.source_options.iter().cloned().collect()
    }

    pub fn sink_options(&self) -> Options {
        self.sink_options.iter().cloned().collect()
    }

    pub fn plan_config(&self) -> PlanConfig {
        PlanConfig {
            tile_width: self.tile_size,
            tile_height: self.tile_size,
            zoom_levels: self.zoom_levels,
            version: self.iiif_version,
            identifier: self.identifier.clone(),
        }
    }
}

// =============================================================================
// Validate
// =============================================================================

#[derive(Parser, Debug, Clone)]
pub struct ValidateConfig {
    /// URL of the descriptor (info.json) to reassemble.
    pub url: String,

    /// Where to write the reassembled image.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Format of the reassembled image.
    #[arg(short, long, default_value = DEFAULT_FORMAT)]
    pub format: String,

    /// Extension of the tiles to fetch.
    #[arg(long, default_value = DEFAULT_TILE_EXTENSION)]
    pub tile_format: String,
}

impl ValidateConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| format!("Invalid URL '{}': {}", self.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("URL must be http or https, got '{}'", url.scheme()));
        }

        OutputFormat::from_name(&self.format).map_err(|e| e.to_string())?;

        if self.tile_format.is_empty() {
            return Err("tile_format must not be empty".to_string());
        }
        Ok(())
    }

    /// Sink options selecting the output format.
    pub fn sink_options(&self) -> Options {
        let mut options = Options::new();
        options.insert("format".to_string(), self.format.clone());
        options
    }
}

/// Parse a `key=value` pair.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

// =============================================================================
// Tests
// =============================================================================

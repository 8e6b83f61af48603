//! # iiif-pyramid
//!
//! A generator for static IIIF Image API tile pyramids.
//!
//! Given a source image, the generator writes every tile, every reduced size
//! and the `info.json` descriptor under a directory tree that any static web
//! server can publish as a level-0 IIIF image service. A companion validator
//! reads a published descriptor back, fetches every tile and reassembles the
//! full image.
//!
//! ## Features
//!
//! - **IIIF 2.1 and 3.0**: Descriptor layout and path grammar for both versions
//! - **Pluggable sources**: Local/HTTP decoding, remote IIIF services, filters
//! - **Manipulator chains**: Stack filters on a base source, inline or from YAML
//! - **Concurrent tiling**: Bounded worker pool, fail-late per image
//! - **Round-trip validation**: Reassemble a published pyramid from its tiles
//!
//! ## Architecture
//!
//! - [`pyramid`] - Plan geometry, tile grid, path grammar and descriptors
//! - [`io`] - Locators and byte readers for local files and HTTP
//! - [`source`] - Image sources, manipulators and chain assembly
//! - [`sink`] - Tile encoders
//! - [`registry`] - Name → plugin table
//! - [`tile`] - Pyramid generation, single image and batch
//! - [`validate`] - Reassembly of published pyramids
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iiif_pyramid::{
//!     ChainSpec, DefaultTileSink, Options, PlanConfig, PyramidGenerator, Registry, Tiler,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::builtin();
//!     let tiler = Tiler::new(Arc::new(DefaultTileSink::new()));
//!     let generator = PyramidGenerator::new(&registry, tiler, PlanConfig::default(), "iiif");
//!
//!     let spec = ChainSpec::single("default", "page.jpg", Options::new());
//!     let report = generator.generate(&spec).await.unwrap();
//!     println!("wrote {} files under {}", report.written, report.root.display());
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pyramid;
pub mod registry;
pub mod sink;
pub mod source;
pub mod tile;
pub mod validate;

// Re-export commonly used types
pub use config::{Cli, Command, GenerateConfig, InfoCommand, ValidateConfig};
pub use error::{
    ConfigError, GenerateError, NetworkError, PluginKind, SinkError, SourceError, TileError,
    TilerError, ValidateError,
};
pub use io::{ByteReader, Locator};
pub use pyramid::{
    tile_grid, ComplianceLevel, IiifVersion, ImageDescriptor, PlanConfig, PyramidPlan, Size,
    TileCoordinate,
};
pub use registry::{Registry, SourceEntry};
pub use sink::{DefaultTileSink, OutputFormat, TileSink};
pub use source::{
    BaseSourceFactory, ChainBuilder, ChainSpec, ImageSource, ManipulatorFactory, Metadata,
    Options, Region, StageSpec,
};
pub use tile::{BatchReport, GenerationReport, PyramidGenerator, Tiler, UnitFailure};
pub use validate::{Reassembler, ReassemblyReport};

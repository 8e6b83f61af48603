use std::fmt;

use thiserror::Error;

/// Errors raised while validating configuration, resolving plugins or
/// assembling a manipulator chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Tile dimensions must be strictly positive
    #[error("Invalid tile size: {width}x{height} (both dimensions must be greater than 0)")]
    InvalidTileSize { width: u32, height: u32 },

    /// Image dimensions must be strictly positive
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Scale factors are `u32` powers of two
    #[error("Too many zoom levels: {requested} (at most {max})")]
    TooManyZoomLevels { requested: u32, max: u32 },

    /// A manipulator chain needs at least one stage
    #[error("Manipulator chain is empty: at least a base source stage is required")]
    EmptyChain,

    /// The base stage of a chain has no locator to decode
    #[error("Base source '{name}' requires a locator")]
    MissingLocator { name: String },

    /// No plugin of the given kind is registered under this name
    #[error("Unknown {kind}: '{name}'")]
    UnknownType { kind: PluginKind, name: String },

    /// A plugin was used at a position its kind does not allow
    #[error("Source type '{name}' at position {position} must be a {expected}")]
    TypeMismatch {
        name: String,
        position: usize,
        expected: PluginKind,
    },

    /// A compact stage definition could not be parsed
    #[error("Invalid stage definition '{definition}': {reason}")]
    InvalidStage { definition: String, reason: String },

    /// A plugin rejected one of its options
    #[error("Invalid option '{key}': {message}")]
    InvalidOption { key: String, message: String },

    /// A structured chain document could not be read or parsed
    #[error("Invalid chain document {path}: {message}")]
    ChainDocument { path: String, message: String },
}

/// The kinds of plugins the registry knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    BaseSource,
    Manipulator,
    Sink,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::BaseSource => f.write_str("base source"),
            PluginKind::Manipulator => f.write_str("manipulator"),
            PluginKind::Sink => f.write_str("tile sink"),
        }
    }
}

/// Transport-level failures talking to a remote endpoint.
///
/// A response that arrives but cannot be understood is not a network error;
/// see [`SourceError::MalformedDescriptor`].
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// The request could not be sent or the connection failed
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The server answered with a non-success status
    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The response body could not be read
    #[error("Reading body from {url} failed: {message}")]
    Body { url: String, message: String },
}

/// Errors raised by image sources.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The origin bytes could not be decoded into an image
    #[error("Failed to decode {locator}: {message}")]
    Decode { locator: String, message: String },

    /// A crop region is empty or does not lie within the image
    #[error(
        "Crop region [x={x}, y={y}, width={width}, height={height}] is outside the image bounds [width={image_width}, height={image_height}]"
    )]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Scale factors must be finite and positive
    #[error("Invalid scale factor: {0}")]
    InvalidScale(f64),

    /// A remote descriptor was fetched but is not a usable IIIF descriptor
    #[error("Malformed descriptor from {url}: {message}")]
    MalformedDescriptor { url: String, message: String },

    /// Local filesystem failure while reading an origin
    #[error("I/O error reading {locator}: {message}")]
    Io { locator: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A blocking worker panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Errors raised by tile sinks.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The requested output format is not compiled in
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Encoding the pixel buffer failed
    #[error("Failed to encode {format}: {message}")]
    Encode { format: String, message: String },
}

/// Failure of a single generation unit (one derivative or one tile).
#[derive(Debug, Clone, Error)]
pub enum TileError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Writing the encoded bytes failed
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },

    /// The worker running the unit panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Failure of one pyramid generation run.
#[derive(Debug, Clone, Error)]
pub enum TilerError {
    /// At least one unit failed; every other unit was still allowed to finish
    #[error("{failed} of {total} units failed (first: {})", first_failure(.failures))]
    Incomplete {
        failed: usize,
        total: usize,
        failures: Vec<crate::tile::UnitFailure>,
    },

    /// The descriptor could not be serialized or written
    #[error("Failed to write descriptor {path}: {message}")]
    Descriptor { path: String, message: String },
}

fn first_failure(failures: &[crate::tile::UnitFailure]) -> String {
    failures
        .first()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Failure of one input in a batch.
#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Tiler(#[from] TilerError),

    /// An earlier input of the batch already generated this image id
    #[error("Image id '{image_id}' was already generated from {first_input}")]
    DuplicateImageId {
        image_id: String,
        first_input: String,
    },
}

/// Errors that abort a validation (reassembly) run.
#[derive(Debug, Clone, Error)]
pub enum ValidateError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// The descriptor could not be parsed or lacks required fields
    #[error("Malformed descriptor from {url}: {message}")]
    MalformedDescriptor { url: String, message: String },

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Writing the composite failed
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },
}

impl From<SourceError> for ValidateError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Network(e) => ValidateError::Network(e),
            SourceError::MalformedDescriptor { url, message } => {
                ValidateError::MalformedDescriptor { url, message }
            }
            other => ValidateError::MalformedDescriptor {
                url: String::new(),
                message: other.to_string(),
            },
        }
    }
}

//! Pyramid geometry planning.
//!
//! A [`PyramidPlan`] is computed once from the dimensions of a resolved image
//! source and never mutated afterwards. It fixes the tile size, the
//! power-of-two scale factors and the list of reduced sizes that the tile
//! generator walks and that the descriptor advertises.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::IiifVersion;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Default identifier prefix written into descriptors.
pub const DEFAULT_IDENTIFIER: &str = "http://localhost:8887/iiif/";

/// Largest zoom level count whose scale factors still fit in a `u32`.
pub const MAX_ZOOM_LEVELS: u32 = 31;

// =============================================================================
// Size
// =============================================================================

/// A width/height pair as advertised in the descriptor's `sizes` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

// =============================================================================
// Plan Configuration
// =============================================================================

/// Run-wide planning parameters shared by every image of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanConfig {
    /// Tile width in pixels (must be > 0)
    pub tile_width: u32,

    /// Tile height in pixels (must be > 0)
    pub tile_height: u32,

    /// Number of zoom levels; 0 selects [`auto_zoom_levels`]
    pub zoom_levels: u32,

    /// Protocol version of the descriptor and path grammar
    pub version: IiifVersion,

    /// Prefix prepended to the image id to form the descriptor id
    pub identifier: String,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            zoom_levels: 0,
            version: IiifVersion::V2,
            identifier: DEFAULT_IDENTIFIER.to_string(),
        }
    }
}

impl PlanConfig {
    /// Square tiles of the given edge length with every other field defaulted.
    pub fn with_tile_size(tile_size: u32) -> Self {
        Self {
            tile_width: tile_size,
            tile_height: tile_size,
            ..Self::default()
        }
    }
}

// =============================================================================
// Pyramid Plan
// =============================================================================

/// Immutable geometry of one image pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidPlan {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    scale_factors: Vec<u32>,
    sizes: Vec<Size>,
    version: IiifVersion,
    identifier: String,
    image_id: String,
}

impl PyramidPlan {
    /// Plan the pyramid for an image of `width` x `height` pixels.
    ///
    /// `image_id` is appended to the configured identifier prefix to form the
    /// descriptor id, and names the per-image output directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTileSize`] when either tile dimension is
    /// zero, [`ConfigError::InvalidDimensions`] for an empty image and
    /// [`ConfigError::TooManyZoomLevels`] above [`MAX_ZOOM_LEVELS`].
    pub fn new(
        width: u32,
        height: u32,
        config: &PlanConfig,
        image_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if config.tile_width == 0 || config.tile_height == 0 {
            return Err(ConfigError::InvalidTileSize {
                width: config.tile_width,
                height: config.tile_height,
            });
        }
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidDimensions { width, height });
        }

        let zoom_levels = if config.zoom_levels == 0 {
            auto_zoom_levels(width, height, config.tile_width)
        } else {
            config.zoom_levels
        };
        if zoom_levels > MAX_ZOOM_LEVELS {
            return Err(ConfigError::TooManyZoomLevels {
                requested: zoom_levels,
                max: MAX_ZOOM_LEVELS,
            });
        }

        Ok(Self {
            width,
            height,
            tile_width: config.tile_width,
            tile_height: config.tile_height,
            scale_factors: scale_factors(zoom_levels),
            sizes: reduced_sizes(width, height, config.tile_width, config.tile_height),
            version: config.version,
            identifier: config.identifier.clone(),
            image_id: image_id.into(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Ascending power-of-two scale factors, one per zoom level.
    pub fn scale_factors(&self) -> &[u32] {
        &self.scale_factors
    }

    pub fn zoom_levels(&self) -> usize {
        self.scale_factors.len()
    }

    /// Reduced sizes, largest first, ending at or below one tile.
    pub fn sizes(&self) -> &[Size] {
        &self.sizes
    }

    pub fn version(&self) -> IiifVersion {
        self.version
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// The descriptor id: identifier prefix followed by the image id.
    pub fn id(&self) -> String {
        format!("{}{}", self.identifier, self.image_id)
    }
}

// =============================================================================
// Geometry Functions
// =============================================================================

/// Number of zoom levels needed so the coarsest level fits in one tile.
///
/// This is `ceil(log2(max(width, height) / tile_size)) + 1`, computed in
/// integers: the smallest `n` with `max(width, height) <= tile_size * 2^n`,
/// plus one. An image no larger than a tile resolves to a single level.
pub fn auto_zoom_levels(width: u32, height: u32, tile_size: u32) -> u32 {
    let max_dim = u64::from(width.max(height));
    let tile = u64::from(tile_size.max(1));

    let mut levels = 1;
    let mut covered = tile;
    while covered < max_dim {
        covered *= 2;
        levels += 1;
    }
    levels
}

/// `[2^0, 2^1, ..., 2^(zoom_levels - 1)]`.
///
/// Callers check `zoom_levels` against [`MAX_ZOOM_LEVELS`] first.
pub fn scale_factors(zoom_levels: u32) -> Vec<u32> {
    (0..zoom_levels).map(|level| 1u32 << level).collect()
}

/// Successive halvings of the image down to tile size.
///
/// While either dimension exceeds its tile dimension the current size is
/// recorded (only when the width still exceeds the tile width) and both
/// dimensions are halved. The final halved size is always recorded, so the
/// list is never empty and ends at or below the tile dimensions.
pub fn reduced_sizes(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Vec<Size> {
    let mut sizes = Vec::new();
    let mut current_width = width;
    let mut current_height = height;

    while current_width > tile_width || current_height > tile_height {
        if current_width > tile_width {
            sizes.push(Size::new(current_width, current_height));
        }
        current_width /= 2;
        current_height /= 2;
    }
    sizes.push(Size::new(current_width, current_height));

    sizes
}

// =============================================================================
// Tests
// =============================================================================

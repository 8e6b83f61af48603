//! Pyramid geometry and IIIF protocol surface.
//!
//! This module holds everything derived purely from image dimensions and the
//! target protocol version:
//!
//! - [`PyramidPlan`]: scale factors and reduced sizes for one image
//! - [`TileCoordinate`] and [`tile_grid`]: the clipped tile grid at a scale
//! - [`info`]: descriptor (`info.json`) serialization and parsing
//! - [`path`]: the region/size/rotation/quality path grammar per version

pub mod grid;
pub mod info;
pub mod path;
pub mod plan;

use std::fmt;
use std::str::FromStr;

pub use grid::{grid_dimensions, tile_grid, TileCoordinate};
pub use info::{ComplianceLevel, ImageDescriptor};
pub use plan::{
    auto_zoom_levels, reduced_sizes, scale_factors, PlanConfig, PyramidPlan, Size,
    DEFAULT_IDENTIFIER, DEFAULT_TILE_SIZE, MAX_ZOOM_LEVELS,
};

/// Supported IIIF Image API versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum IiifVersion {
    /// Image API 2.1.1
    #[default]
    #[value(name = "v2", alias = "V2", alias = "2")]
    V2,

    /// Image API 3.0
    #[value(name = "v3", alias = "V3", alias = "V3_0", alias = "3")]
    V3,
}

impl IiifVersion {
    /// Full version string, e.g. `2.1.1`.
    pub fn exact_version(&self) -> &'static str {
        match self {
            IiifVersion::V2 => "2.1.1",
            IiifVersion::V3 => "3.0.0",
        }
    }

    pub fn context(&self) -> &'static str {
        match self {
            IiifVersion::V2 => "http://iiif.io/api/image/2/context.json",
            IiifVersion::V3 => "http://iiif.io/api/image/3/context.json",
        }
    }

    /// The size token that designates the unscaled full image.
    pub fn full_size_token(&self) -> &'static str {
        match self {
            IiifVersion::V2 => "full",
            IiifVersion::V3 => "max",
        }
    }
}

impl fmt::Display for IiifVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.exact_version())
    }
}

impl FromStr for IiifVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v2" | "2" | "2.1" | "2.1.1" => Ok(IiifVersion::V2),
            "v3" | "v3_0" | "3" | "3.0" | "3.0.0" => Ok(IiifVersion::V3),
            other => Err(format!("unknown IIIF version '{}'", other)),
        }
    }
}

/// Derive an image id from a locator: its final path segment without the
/// extension.
///
/// Query strings and fragments are ignored. A trailing `info.json` segment
/// is skipped so a remote descriptor URL yields the service's own id.
pub fn image_id_from_locator(locator: &str) -> String {
    let path = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator)
        .trim_end_matches(['/', '\\']);
    let path = path
        .strip_suffix("/info.json")
        .filter(|rest| !rest.is_empty())
        .unwrap_or(path);
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);

    match segment.rfind('.') {
        Some(dot) if dot > 0 => segment[..dot].to_string(),
        _ => segment.to_string(),
    }
}

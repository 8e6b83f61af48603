//! IIIF `info.json` descriptors.
//!
//! [`PyramidPlan::to_info_json`] renders the descriptor for a generated
//! pyramid in either protocol version. [`ImageDescriptor`] is the reverse
//! direction: the subset of a remote descriptor that remote sources and the
//! reassembler need, tolerant of both the v2 (`@id`) and v3 (`id`) spelling.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;

use super::plan::{PyramidPlan, Size};
use super::IiifVersion;

/// Value of the `protocol` property in every descriptor.
pub const IIIF_PROTOCOL: &str = "http://iiif.io/api/image";

const V2_PROFILE: &str = "http://iiif.io/api/image/2/level2.json";
const V3_PROFILE: &str = "level2";
const V3_TYPE: &str = "ImageService3";

// =============================================================================
// Serialization
// =============================================================================

#[derive(Debug, Serialize)]
struct TileDescriptor {
    width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(rename = "scaleFactors")]
    scale_factors: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct InfoV2<'a> {
    #[serde(rename = "@context")]
    context: &'static str,
    #[serde(rename = "@id")]
    id: String,
    protocol: &'static str,
    profile: [&'static str; 1],
    width: u32,
    height: u32,
    tiles: Vec<TileDescriptor>,
    sizes: &'a [Size],
}

#[derive(Debug, Serialize)]
struct InfoV3<'a> {
    #[serde(rename = "@context")]
    context: &'static str,
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    protocol: &'static str,
    profile: &'static str,
    width: u32,
    height: u32,
    #[serde(rename = "maxWidth")]
    max_width: u32,
    #[serde(rename = "maxHeight")]
    max_height: u32,
    tiles: Vec<TileDescriptor>,
    sizes: &'a [Size],
}

impl PyramidPlan {
    /// Render the descriptor for this plan.
    ///
    /// In v2 the tile `height` is omitted when tiles are square, as readers
    /// default it to the width.
    pub fn to_info_json(&self) -> Value {
        let result = match self.version() {
            IiifVersion::V2 => serde_json::to_value(InfoV2 {
                context: IiifVersion::V2.context(),
                id: self.id(),
                protocol: IIIF_PROTOCOL,
                profile: [V2_PROFILE],
                width: self.width(),
                height: self.height(),
                tiles: vec![TileDescriptor {
                    width: self.tile_width(),
                    height: (self.tile_height() != self.tile_width()).then_some(self.tile_height()),
                    scale_factors: self.scale_factors().to_vec(),
                }],
                sizes: self.sizes(),
            }),
            IiifVersion::V3 => serde_json::to_value(InfoV3 {
                context: IiifVersion::V3.context(),
                id: self.id(),
                kind: V3_TYPE,
                protocol: IIIF_PROTOCOL,
                profile: V3_PROFILE,
                width: self.width(),
                height: self.height(),
                max_width: self.width(),
                max_height: self.height(),
                tiles: vec![TileDescriptor {
                    width: self.tile_width(),
                    height: Some(self.tile_height()),
                    scale_factors: self.scale_factors().to_vec(),
                }],
                sizes: self.sizes(),
            }),
        };

        // Plain structs of integers and strings always serialize
        result.unwrap_or(Value::Null)
    }

    /// The descriptor as pretty-printed JSON.
    pub fn to_info_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_info_json()).unwrap_or_default()
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Capability tier advertised by a remote image service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComplianceLevel {
    /// Fixed derivatives only; arbitrary regions are not available
    Level0,
    Level1,
    Level2,
    /// No recognizable profile; treated like a region-capable server
    Unknown,
}

impl ComplianceLevel {
    /// Derive the level from a `profile` value (string, array or objects).
    pub fn from_profile(profile: &Value) -> Self {
        let text = profile.to_string();
        if text.contains("level0") {
            ComplianceLevel::Level0
        } else if text.contains("level1") {
            ComplianceLevel::Level1
        } else if text.contains("level2") {
            ComplianceLevel::Level2
        } else {
            ComplianceLevel::Unknown
        }
    }

    /// Whether the service can only deliver the full image.
    pub fn is_restricted(&self) -> bool {
        matches!(self, ComplianceLevel::Level0)
    }
}

#[derive(Debug, Deserialize)]
struct RawTiles {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "@id")]
    legacy_id: Option<String>,
    id: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tiles: Vec<RawTiles>,
    #[serde(default)]
    profile: Value,
}

/// The parts of a remote descriptor needed to address its images.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    /// Base URI of the image, without a trailing slash
    pub id: String,

    /// Version inferred from the id property (`id` → v3, `@id` → v2)
    pub version: IiifVersion,

    pub width: u32,
    pub height: u32,

    /// First tile width, if the service advertises tiles
    pub tile_width: Option<u32>,

    /// First tile height; v2 services may omit it, in which case it equals
    /// the tile width
    pub tile_height: Option<u32>,

    pub compliance: ComplianceLevel,

    /// The raw `profile` value
    pub profile: Value,
}

impl ImageDescriptor {
    /// Parse a descriptor body fetched from `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MalformedDescriptor`] when the body is not JSON
    /// or lacks an id, width or height.
    pub fn parse(url: &str, body: &[u8]) -> Result<Self, SourceError> {
        let malformed = |message: String| SourceError::MalformedDescriptor {
            url: url.to_string(),
            message,
        };

        let raw: RawDescriptor =
            serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;

        let (id, version) = match (raw.id, raw.legacy_id) {
            (Some(id), _) => (id, IiifVersion::V3),
            (None, Some(id)) => (id, IiifVersion::V2),
            (None, None) => return Err(malformed("missing 'id' or '@id'".to_string())),
        };
        let width = raw.width.ok_or_else(|| malformed("missing 'width'".to_string()))?;
        let height = raw
            .height
            .ok_or_else(|| malformed("missing 'height'".to_string()))?;

        let first_tiles = raw.tiles.first();
        let tile_width = first_tiles.and_then(|t| t.width);
        let tile_height = first_tiles.and_then(|t| t.height).or(tile_width);

        Ok(Self {
            id: id.trim_end_matches('/').to_string(),
            version,
            width,
            height,
            tile_width,
            tile_height,
            compliance: ComplianceLevel::from_profile(&raw.profile),
            profile: raw.profile,
        })
    }

    /// Absolute URL of a path relative to the image base.
    pub fn url_for(&self, relative: &str) -> String {
        format!("{}/{}", self.id, relative)
    }
}

// =============================================================================
// Tests
// =============================================================================

//! IIIF Image API path grammar.
//!
//! Paths follow `{region}/{size}/{rotation}/{quality}.{format}` and are
//! relative to the image's base (the descriptor id, or the per-image output
//! directory on disk). Rotation is always `0` and quality always `default`.

use super::grid::TileCoordinate;
use super::plan::Size;
use super::IiifVersion;

/// Path of a reduced-size derivative of the full image.
///
/// - v2: `full/{width},/0/default.{ext}`
/// - v3: `full/{width},{height}/0/default.{ext}`
pub fn size_path(version: IiifVersion, size: Size, extension: &str) -> String {
    match version {
        IiifVersion::V2 => format!("full/{},/0/default.{}", size.width, extension),
        IiifVersion::V3 => format!(
            "full/{},{}/0/default.{}",
            size.width, size.height, extension
        ),
    }
}

/// Path of the canonical unscaled full image (`full/full` or `full/max`).
pub fn full_path(version: IiifVersion, extension: &str) -> String {
    format!(
        "full/{}/0/default.{}",
        version.full_size_token(),
        extension
    )
}

/// Path of one tile.
///
/// The region is the native-resolution rectangle; the size is the extent
/// after downscaling.
///
/// - v2: `{x},{y},{w},{h}/{tw}/0/default.{ext}`
/// - v3: `{x},{y},{w},{h}/{tw},{th}/0/default.{ext}`
pub fn tile_path(version: IiifVersion, tile: &TileCoordinate, extension: &str) -> String {
    let region = format!("{},{},{},{}", tile.x, tile.y, tile.width, tile.height);
    match version {
        IiifVersion::V2 => format!(
            "{}/{}/0/default.{}",
            region,
            tile.scaled_width(),
            extension
        ),
        IiifVersion::V3 => format!(
            "{}/{},{}/0/default.{}",
            region,
            tile.scaled_width(),
            tile.scaled_height(),
            extension
        ),
    }
}

/// Path of an arbitrary region request against a dynamic (level 1+) server.
///
/// `size` is `max` for unscaled requests, `{w},{h}` otherwise.
pub fn region_request_path(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    scaled: Option<(u32, u32)>,
    extension: &str,
) -> String {
    let size = match scaled {
        Some((w, h)) => format!("{},{}", w, h),
        None => "max".to_string(),
    };
    format!(
        "{},{},{},{}/{}/0/default.{}",
        x, y, width, height, size, extension
    )
}

//! Pyramid validation by reassembly.
//!
//! The [`Reassembler`] is the inverse of the tile generator: it reads a
//! remote descriptor, recomputes the scale-1 tile grid, fetches every tile
//! concurrently and composites them into one RGB raster. A tile that cannot
//! be fetched or decoded leaves a gap and is listed in the report.

mod reassembler;

pub use reassembler::{
    MissingTile, Reassembler, Reassembly, ReassemblyReport, DEFAULT_TILE_EXTENSION,
};

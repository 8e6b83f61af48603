//! Tile grid arithmetic.
//!
//! At scale factor `s` the image is covered by a regular grid whose cells
//! measure `tile_width * s` by `tile_height * s` native pixels. Cells in the
//! last column and row are clipped to the image bounds, never padded.

/// One tile of the pyramid, expressed in native-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    /// Left edge in native pixels
    pub x: u32,

    /// Top edge in native pixels
    pub y: u32,

    /// Native-resolution width, clipped to the image
    pub width: u32,

    /// Native-resolution height, clipped to the image
    pub height: u32,

    /// Scale factor this tile belongs to
    pub scale: u32,
}

impl TileCoordinate {
    /// Width of the encoded tile after downscaling.
    pub fn scaled_width(&self) -> u32 {
        self.width.div_ceil(self.scale.max(1))
    }

    /// Height of the encoded tile after downscaling.
    pub fn scaled_height(&self) -> u32 {
        self.height.div_ceil(self.scale.max(1))
    }
}

/// Number of columns and rows of the grid at `scale`.
pub fn grid_dimensions(
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    scale: u32,
) -> (u32, u32) {
    let step_x = u64::from(tile_width) * u64::from(scale.max(1));
    let step_y = u64::from(tile_height) * u64::from(scale.max(1));
    if step_x == 0 || step_y == 0 {
        return (0, 0);
    }

    let cols = u64::from(image_width).div_ceil(step_x);
    let rows = u64::from(image_height).div_ceil(step_y);
    (cols as u32, rows as u32)
}

/// Every cell of the grid at `scale`, row by row.
pub fn tile_grid(
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    scale: u32,
) -> impl Iterator<Item = TileCoordinate> {
    let scale = scale.max(1);
    let (cols, rows) = grid_dimensions(image_width, image_height, tile_width, tile_height, scale);
    let step_x = u64::from(tile_width) * u64::from(scale);
    let step_y = u64::from(tile_height) * u64::from(scale);

    (0..rows).flat_map(move |row| {
        (0..cols).map(move |col| {
            let x = u64::from(col) * step_x;
            let y = u64::from(row) * step_y;
            let width = step_x.min(u64::from(image_width) - x);
            let height = step_y.min(u64::from(image_height) - y);

            TileCoordinate {
                x: x as u32,
                y: y as u32,
                width: width as u32,
                height: height as u32,
                scale,
            }
        })
    })
}

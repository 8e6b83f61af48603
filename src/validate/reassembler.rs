use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::{imageops, DynamicImage, ImageReader, RgbImage};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{SourceError, ValidateError};
use crate::io::fetch_bytes;
use crate::pyramid::path::tile_path;
use crate::pyramid::{tile_grid, ImageDescriptor, TileCoordinate};
use crate::sink::TileSink;
use crate::source::Metadata;

/// Tile extension requested unless configured otherwise.
pub const DEFAULT_TILE_EXTENSION: &str = "jpg";

/// A grid cell that could not be placed on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingTile {
    pub tile: TileCoordinate,
    pub url: String,
    pub reason: String,
}

/// The composited raster and the cells it lacks.
#[derive(Debug, Clone)]
pub struct Reassembly {
    pub image: RgbImage,
    pub fetched: usize,
    pub missing: Vec<MissingTile>,
}

impl Reassembly {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Outcome of a validation run.
#[derive(Debug, Clone)]
pub struct ReassemblyReport {
    pub width: u32,
    pub height: u32,
    pub tiles: usize,
    pub fetched: usize,
    pub missing: Vec<MissingTile>,
    pub output: PathBuf,
}

impl ReassemblyReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Fetches tiles from a published pyramid and reassembles the full image.
#[derive(Debug, Clone)]
pub struct Reassembler {
    client: reqwest::Client,
    tile_extension: String,
}

impl Reassembler {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            tile_extension: DEFAULT_TILE_EXTENSION.to_string(),
        }
    }

    /// Extension of the tiles to request (`jpg`, `png`, ...).
    pub fn with_tile_extension(mut self, extension: impl Into<String>) -> Self {
        self.tile_extension = extension.into();
        self
    }

    /// Fetch and parse the descriptor at `url`.
    ///
    /// # Errors
    ///
    /// [`ValidateError::Network`] when the fetch fails and
    /// [`ValidateError::MalformedDescriptor`] when the body has no usable
    /// dimensions or tile size.
    pub async fn load(&self, url: &str) -> Result<ImageDescriptor, ValidateError> {
        info!(url = %url, "Fetching descriptor");
        let body = fetch_bytes(&self.client, url).await?;
        let descriptor = ImageDescriptor::parse(url, &body)?;

        let malformed = |message: &str| ValidateError::MalformedDescriptor {
            url: url.to_string(),
            message: message.to_string(),
        };
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(malformed("image dimensions must be greater than 0"));
        }
        match (descriptor.tile_width, descriptor.tile_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => {}
            _ => return Err(malformed("no usable 'tiles' entry")),
        }

        Ok(descriptor)
    }

    /// Fetch every scale-1 tile and composite them.
    ///
    /// Never fails: tiles that cannot be placed are reported as missing.
    pub async fn reassemble(&self, descriptor: &ImageDescriptor) -> Reassembly {
        let tile_width = descriptor.tile_width.unwrap_or(descriptor.width).max(1);
        let tile_height = descriptor.tile_height.unwrap_or(tile_width).max(1);
        let cells: Vec<TileCoordinate> = tile_grid(
            descriptor.width,
            descriptor.height,
            tile_width,
            tile_height,
            1,
        )
        .collect();

        info!(
            width = descriptor.width,
            height = descriptor.height,
            tile_width,
            tile_height,
            tiles = cells.len(),
            "Reassembling image"
        );

        let canvas = Arc::new(Mutex::new(RgbImage::new(
            descriptor.width,
            descriptor.height,
        )));
        let urls: Vec<String> = cells
            .iter()
            .map(|cell| {
                descriptor.url_for(&tile_path(
                    descriptor.version,
                    cell,
                    &self.tile_extension,
                ))
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (index, (cell, url)) in cells.iter().zip(&urls).enumerate() {
            let client = self.client.clone();
            let canvas = Arc::clone(&canvas);
            let cell = *cell;
            let url = url.clone();

            tasks.spawn(async move {
                let result = fetch_tile(&client, &url).await;
                if let Ok(tile) = &result {
                    let mut canvas = canvas.lock().await;
                    imageops::replace(&mut *canvas, tile, i64::from(cell.x), i64::from(cell.y));
                }
                (index, result.map(|_| ()))
            });
        }

        let mut placed = vec![false; cells.len()];
        let mut reasons: Vec<Option<String>> = vec![None; cells.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(()))) => placed[index] = true,
                Ok((index, Err(e))) => {
                    warn!(url = %urls[index], "Tile missing: {}", e);
                    reasons[index] = Some(e.to_string());
                }
                Err(e) => warn!("Tile task failed: {}", e),
            }
        }

        let missing: Vec<MissingTile> = cells
            .iter()
            .enumerate()
            .filter(|(index, _)| !placed[*index])
            .map(|(index, cell)| MissingTile {
                tile: *cell,
                url: urls[index].clone(),
                reason: reasons[index]
                    .take()
                    .unwrap_or_else(|| "tile task did not complete".to_string()),
            })
            .collect();

        let image = match Arc::try_unwrap(canvas) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };

        Reassembly {
            image,
            fetched: cells.len() - missing.len(),
            missing,
        }
    }

    /// Load, reassemble and write the composite through `sink`.
    pub async fn validate(
        &self,
        url: &str,
        output: &Path,
        sink: Arc<dyn TileSink>,
    ) -> Result<ReassemblyReport, ValidateError> {
        let started = Instant::now();
        let descriptor = self.load(url).await?;
        let reassembly = self.reassemble(&descriptor).await;
        let (width, height) = reassembly.image.dimensions();
        let tiles = reassembly.fetched + reassembly.missing.len();

        let image = DynamicImage::ImageRgb8(reassembly.image);
        let encoded = tokio::task::spawn_blocking(move || sink.encode(&image, &Metadata::new()))
            .await
            .map_err(|e| ValidateError::Write {
                path: output.display().to_string(),
                message: e.to_string(),
            })??;

        let write_error = |e: std::io::Error| ValidateError::Write {
            path: output.display().to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(output, &encoded).await.map_err(write_error)?;

        info!(
            output = %output.display(),
            fetched = reassembly.fetched,
            missing = reassembly.missing.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reassembly written"
        );

        Ok(ReassemblyReport {
            width,
            height,
            tiles,
            fetched: reassembly.fetched,
            missing: reassembly.missing,
            output: output.to_path_buf(),
        })
    }
}

async fn fetch_tile(client: &reqwest::Client, url: &str) -> Result<RgbImage, SourceError> {
    debug!(url = %url, "Fetching tile");
    let body = fetch_bytes(client, url).await?;
    let url = url.to_string();

    tokio::task::spawn_blocking(move || {
        ImageReader::new(Cursor::new(&body[..]))
            .with_guessed_format()
            .map_err(|e| e.to_string())
            .and_then(|reader| reader.decode().map_err(|e| e.to_string()))
            .map(|image| image.to_rgb8())
            .map_err(|message| SourceError::Decode {
                locator: url,
                message,
            })
    })
    .await
    .map_err(|e| SourceError::Worker(e.to_string()))?
}

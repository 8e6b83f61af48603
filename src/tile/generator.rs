//! Concurrent pyramid generation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   units    ┌──────────────────────────────────────────┐
//! │ PyramidPlan  │ ─────────▶ │ JoinSet, admission bounded by Semaphore  │
//! └──────────────┘            │  crop (source) → encode (blocking pool)  │
//!                             │  → create_dir_all → write                │
//!                             └────────────────────┬─────────────────────┘
//!                                                  │ all units finished
//!                                                  ▼
//!                                     info.json (only if none failed)
//! ```
//!
//! A unit is either a reduced-size derivative, the canonical full image, or
//! one tile. Units run in any order and failures never cancel siblings:
//! every unit is allowed to finish, then the run reports each failure.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{TileError, TilerError};
use crate::pyramid::path::{full_path, size_path, tile_path};
use crate::pyramid::{tile_grid, IiifVersion, PyramidPlan, Size, TileCoordinate};
use crate::sink::TileSink;
use crate::source::{ImageSource, Metadata, Region};

/// Name of the descriptor file in every per-image root.
pub const INFO_FILE_NAME: &str = "info.json";

/// Worker count used when hardware parallelism cannot be queried.
const FALLBACK_WORKERS: usize = 4;

// =============================================================================
// Units of Work
// =============================================================================

/// One output file of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileJob {
    /// A reduced-size derivative of the whole image
    Size(Size),

    /// The unscaled whole image at the `full`/`max` path
    Full,

    /// One tile of the grid
    Tile(TileCoordinate),
}

impl TileJob {
    /// Region to crop and the downscale factor to apply.
    pub fn region_and_scale(&self, image_width: u32, image_height: u32) -> (Region, f64) {
        match self {
            TileJob::Size(size) => (
                Region::full(image_width, image_height),
                f64::from(image_width) / f64::from(size.width),
            ),
            TileJob::Full => (Region::full(image_width, image_height), 1.0),
            TileJob::Tile(tile) => (Region::from(*tile), f64::from(tile.scale)),
        }
    }

    /// Path below the per-image root.
    pub fn relative_path(&self, version: IiifVersion, extension: &str) -> String {
        match self {
            TileJob::Size(size) => size_path(version, *size, extension),
            TileJob::Full => full_path(version, extension),
            TileJob::Tile(tile) => tile_path(version, tile, extension),
        }
    }
}

impl fmt::Display for TileJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileJob::Size(size) => write!(f, "size {}x{}", size.width, size.height),
            TileJob::Full => f.write_str("full image"),
            TileJob::Tile(tile) => write!(
                f,
                "tile {},{},{},{} at scale {}",
                tile.x, tile.y, tile.width, tile.height, tile.scale
            ),
        }
    }
}

/// Every unit of a plan: sizes, the full image, then tiles by ascending
/// scale factor in row-major order.
pub fn plan_jobs(plan: &PyramidPlan) -> Vec<TileJob> {
    let mut jobs: Vec<TileJob> = plan.sizes().iter().copied().map(TileJob::Size).collect();
    jobs.push(TileJob::Full);

    for &scale in plan.scale_factors() {
        jobs.extend(
            tile_grid(
                plan.width(),
                plan.height(),
                plan.tile_width(),
                plan.tile_height(),
                scale,
            )
            .map(TileJob::Tile),
        );
    }
    jobs
}

// =============================================================================
// Results
// =============================================================================

/// A unit that failed, and why.
#[derive(Debug, Clone)]
pub struct UnitFailure {
    /// Description of the unit (its job, or the task when the job is unknown)
    pub unit: String,

    /// Path the unit would have written, relative to the image root
    pub path: Option<String>,

    pub error: TileError,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} ({}): {}", self.unit, path, self.error),
            None => write!(f, "{}: {}", self.unit, self.error),
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub image_id: String,

    /// The per-image root directory
    pub root: PathBuf,

    /// Units written, including the descriptor
    pub written: usize,

    /// Units skipped because their geometry was degenerate
    pub skipped: usize,

    pub info_path: PathBuf,
}

enum UnitOutcome {
    Written,
    Skipped,
}

// =============================================================================
// Tiler
// =============================================================================

/// Walks a [`PyramidPlan`] and writes every unit through a [`TileSink`].
#[derive(Clone)]
pub struct Tiler {
    sink: Arc<dyn TileSink>,
    workers: usize,
}

impl Tiler {
    /// A tiler using all available hardware parallelism.
    pub fn new(sink: Arc<dyn TileSink>) -> Self {
        Self {
            sink,
            workers: default_workers(),
        }
    }

    /// Override the worker count; 0 restores the hardware default.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            default_workers()
        } else {
            workers
        };
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn sink(&self) -> &Arc<dyn TileSink> {
        &self.sink
    }

    /// Generate every unit of `plan` from `source` below `root`.
    ///
    /// `info.json` is written last and only when every unit succeeded.
    ///
    /// # Errors
    ///
    /// [`TilerError::Incomplete`] lists every failed unit; the successful
    /// units stay on disk. [`TilerError::Descriptor`] when the root or the
    /// descriptor cannot be written.
    pub async fn generate(
        &self,
        plan: &PyramidPlan,
        source: Arc<dyn ImageSource>,
        root: &Path,
    ) -> Result<GenerationReport, TilerError> {
        let started = Instant::now();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| TilerError::Descriptor {
                path: root.display().to_string(),
                message: e.to_string(),
            })?;

        let jobs = plan_jobs(plan);
        let total = jobs.len();
        info!(
            image_id = %plan.image_id(),
            width = plan.width(),
            height = plan.height(),
            units = total,
            workers = self.workers,
            "Generating pyramid"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let metadata = Arc::new(source.metadata().clone());
        let extension = self.sink.format_extension().to_string();
        let mut tasks = JoinSet::new();

        for job in jobs {
            let relative = job.relative_path(plan.version(), &extension);
            let context = UnitContext {
                source: Arc::clone(&source),
                sink: Arc::clone(&self.sink),
                metadata: Arc::clone(&metadata),
                root: root.to_path_buf(),
                image_width: plan.width(),
                image_height: plan.height(),
            };
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => context.run(job, &relative).await,
                    Err(e) => Err(TileError::Worker(e.to_string())),
                };
                (job, relative, result)
            });
        }

        let mut written = 0;
        let mut skipped = 0;
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(UnitOutcome::Written))) => written += 1,
                Ok((_, _, Ok(UnitOutcome::Skipped))) => skipped += 1,
                Ok((job, relative, Err(error))) => {
                    warn!(unit = %job, path = %relative, "Unit failed: {}", error);
                    failures.push(UnitFailure {
                        unit: job.to_string(),
                        path: Some(relative),
                        error,
                    });
                }
                Err(e) => {
                    warn!("Unit task failed: {}", e);
                    failures.push(UnitFailure {
                        unit: "unit task".to_string(),
                        path: None,
                        error: TileError::Worker(e.to_string()),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(TilerError::Incomplete {
                failed: failures.len(),
                total,
                failures,
            });
        }

        let info_path = root.join(INFO_FILE_NAME);
        tokio::fs::write(&info_path, plan.to_info_json_pretty())
            .await
            .map_err(|e| TilerError::Descriptor {
                path: info_path.display().to_string(),
                message: e.to_string(),
            })?;

        info!(
            image_id = %plan.image_id(),
            written,
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pyramid complete"
        );

        Ok(GenerationReport {
            image_id: plan.image_id().to_string(),
            root: root.to_path_buf(),
            written: written + 1,
            skipped,
            info_path,
        })
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// Everything a unit task owns.
struct UnitContext {
    source: Arc<dyn ImageSource>,
    sink: Arc<dyn TileSink>,
    metadata: Arc<Metadata>,
    root: PathBuf,
    image_width: u32,
    image_height: u32,
}

impl UnitContext {
    /// Crop and encode fully before touching the filesystem, so a failing
    /// unit leaves no partial file behind.
    async fn run(self, job: TileJob, relative: &str) -> Result<UnitOutcome, TileError> {
        if let TileJob::Size(size) = job {
            if size.width == 0 || size.height == 0 {
                warn!(unit = %job, "Skipping degenerate size");
                return Ok(UnitOutcome::Skipped);
            }
        }

        let (region, scale) = job.region_and_scale(self.image_width, self.image_height);
        let image = self.source.crop(region, scale).await?;

        let sink = self.sink;
        let metadata = self.metadata;
        let encoded = tokio::task::spawn_blocking(move || sink.encode(&image, &metadata))
            .await
            .map_err(|e| TileError::Worker(e.to_string()))??;

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(&path, e))?;
        }
        write_synced(&path, &encoded)
            .await
            .map_err(|e| write_error(&path, e))?;

        debug!(path = %relative, bytes = encoded.len(), "Wrote unit");
        Ok(UnitOutcome::Written)
    }
}

/// Write `bytes` to `path` and flush them to disk before returning, so every
/// unit is durable once the descriptor is written.
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn write_error(path: &Path, error: std::io::Error) -> TileError {
    TileError::Write {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Pyramid generation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            PyramidGenerator             │
//! │  (one input at a time, fail-late)       │
//! └────────────────────┬────────────────────┘
//!                      │ ChainBuilder → ImageSource
//!                      │ PyramidPlan
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │                 Tiler                   │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ ImageSource  │  │    TileSink     │  │
//! │  │  (crop)      │  │   (encode)      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//!        <output>/<image id>/{region}/{size}/0/default.{ext}
//! ```
//!
//! # Components
//!
//! - [`Tiler`]: Generates every unit of one plan on a bounded worker pool
//! - [`TileJob`]: One unit (reduced size, full image or tile)
//! - [`UnitFailure`]: A failed unit, reported after all siblings finished
//! - [`PyramidGenerator`]: Resolves inputs and runs the tiler over a batch
//! - [`BatchReport`]: Per-input outcomes of a batch

mod batch;
mod generator;

pub use batch::{BatchReport, FileOutcome, PyramidGenerator};
pub use generator::{
    plan_jobs, GenerationReport, TileJob, Tiler, UnitFailure, INFO_FILE_NAME,
};

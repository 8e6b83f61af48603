//! Batch generation over many inputs.
//!
//! Inputs are processed one after another; each yields its own outcome and a
//! failing input never stops the batch. An input whose image id was already
//! generated earlier in the batch fails instead of overwriting that pyramid.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use super::generator::{GenerationReport, Tiler};
use crate::error::GenerateError;
use crate::pyramid::{image_id_from_locator, PlanConfig, PyramidPlan};
use crate::registry::Registry;
use crate::source::{ChainBuilder, ChainSpec};

/// Result of one input of a batch.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// The input as given (locator, or chain description)
    pub input: String,

    pub result: Result<GenerationReport, GenerateError>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of a whole batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Resolves inputs to sources and runs a [`Tiler`] on each.
pub struct PyramidGenerator<'a> {
    registry: &'a Registry,
    tiler: Tiler,
    plan_config: PlanConfig,
    output: PathBuf,
}

impl<'a> PyramidGenerator<'a> {
    pub fn new(
        registry: &'a Registry,
        tiler: Tiler,
        plan_config: PlanConfig,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            tiler,
            plan_config,
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the chain, plan it and generate its pyramid under
    /// `<output>/<image id>`.
    pub async fn generate(&self, spec: &ChainSpec) -> Result<GenerationReport, GenerateError> {
        self.generate_unclaimed(spec, &HashMap::new()).await
    }

    /// Like [`generate`](Self::generate), but fails before writing anything
    /// when the image id is a key of `claimed` (image id to first input).
    async fn generate_unclaimed(
        &self,
        spec: &ChainSpec,
        claimed: &HashMap<String, String>,
    ) -> Result<GenerationReport, GenerateError> {
        let source = ChainBuilder::new(self.registry).build(spec).await?;
        let image_id = image_id_from_locator(source.locator());
        if let Some(first_input) = claimed.get(&image_id) {
            return Err(GenerateError::DuplicateImageId {
                image_id,
                first_input: first_input.clone(),
            });
        }
        let plan = PyramidPlan::new(source.width(), source.height(), &self.plan_config, image_id)?;

        let root = self.output.join(plan.image_id());
        Ok(self.tiler.generate(&plan, source, &root).await?)
    }

    /// Generate one pyramid per `(input, chain)` pair, collecting every
    /// outcome.
    pub async fn run_batch(&self, inputs: Vec<(String, ChainSpec)>) -> BatchReport {
        let total = inputs.len();
        let mut report = BatchReport::default();
        let mut claimed = HashMap::new();

        for (index, (input, spec)) in inputs.into_iter().enumerate() {
            info!(input = %input, "Processing {}/{}", index + 1, total);
            let result = self.generate_unclaimed(&spec, &claimed).await;

            match &result {
                Ok(generated) => {
                    info!(
                        input = %input,
                        root = %generated.root.display(),
                        "Generated pyramid"
                    );
                    claimed.insert(generated.image_id.clone(), input.clone());
                }
                Err(e) => error!(input = %input, "Failed: {}", e),
            }
            report.outcomes.push(FileOutcome { input, result });
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch finished"
        );
        report
    }
}

//! Manipulator chains.
//!
//! A chain is an ordered list of stages. Stage 0 names a base source and its
//! locator; every later stage names a manipulator that wraps the output of
//! the stage before it. Two encodings describe the same chain:
//!
//! Compact key/value options (as passed with `--source-opt`):
//!
//! ```text
//! source.0=default:/scans/page.jpg
//! source.1=filter:type=sepia
//! source.2=filter:type=blur,blurRadius=5
//! ```
//!
//! A YAML document selected with `config=<path>`:
//!
//! ```yaml
//! sources:
//!   - type: default
//!     path: /scans/page.jpg
//!   - type: filter
//!     options:
//!       type: sepia
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ImageSource, Metadata, Options, Region};
use crate::error::{ConfigError, PluginKind, SourceError};
use crate::io::replace_extension;
use crate::registry::{Registry, SourceEntry};

/// Name under which the CLI exposes chain building.
pub const STACKED_SOURCE_NAME: &str = "stacked";

/// Extension substituted into the base locator to name a multi-stage chain.
pub const STACKED_EXTENSION: &str = "stacked";

const STAGE_KEY_PREFIX: &str = "source.";
const CONFIG_KEY: &str = "config";

// =============================================================================
// Chain Description
// =============================================================================

/// One stage of a chain, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Registry name of the source or manipulator
    pub kind: String,

    /// Locator, only meaningful on stage 0
    pub locator: Option<String>,

    pub options: Options,
}

impl StageSpec {
    pub fn new(kind: impl Into<String>, locator: Option<String>, options: Options) -> Self {
        Self {
            kind: kind.into(),
            locator,
            options,
        }
    }
}

/// An unresolved chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSpec {
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Deserialize)]
struct ChainDocument {
    sources: Vec<StageDocument>,
}

#[derive(Debug, Deserialize)]
struct StageDocument {
    #[serde(rename = "type")]
    kind: String,
    path: Option<String>,
    #[serde(default)]
    options: BTreeMap<String, serde_yaml::Value>,
}

impl ChainSpec {
    /// A single base stage.
    pub fn single(kind: impl Into<String>, locator: impl Into<String>, options: Options) -> Self {
        Self {
            stages: vec![StageSpec::new(kind, Some(locator.into()), options)],
        }
    }

    /// Read a chain from source options: a YAML document when `config` is
    /// set, the `source.N` keys otherwise.
    pub async fn from_options(options: &Options) -> Result<Self, ConfigError> {
        match options.get(CONFIG_KEY) {
            Some(path) => Self::from_yaml_file(path).await,
            None => Self::from_compact(options),
        }
    }

    /// Parse the compact `source.N` encoding.
    ///
    /// Keys are ordered by their numeric suffix, so `source.10` follows
    /// `source.9`. Keys without the prefix are ignored.
    pub fn from_compact(options: &Options) -> Result<Self, ConfigError> {
        let mut numbered = Vec::new();
        for (key, value) in options {
            let Some(suffix) = key.strip_prefix(STAGE_KEY_PREFIX) else {
                continue;
            };
            let index: u32 = suffix.parse().map_err(|_| ConfigError::InvalidStage {
                definition: key.clone(),
                reason: "stage keys must be 'source.<number>'".to_string(),
            })?;
            numbered.push((index, value.as_str()));
        }
        numbered.sort_by_key(|(index, _)| *index);

        let stages = numbered
            .into_iter()
            .enumerate()
            .map(|(position, (_, definition))| parse_compact_stage(position, definition))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { stages })
    }

    /// Parse a YAML chain document from a string. `origin` names it in errors.
    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let document: ChainDocument =
            serde_yaml::from_str(text).map_err(|e| ConfigError::ChainDocument {
                path: origin.to_string(),
                message: e.to_string(),
            })?;

        let stages = document
            .sources
            .into_iter()
            .map(|stage| {
                let options = stage
                    .options
                    .into_iter()
                    .map(|(key, value)| (key, yaml_scalar_to_string(value)))
                    .collect();
                StageSpec::new(stage.kind, stage.path, options)
            })
            .collect();

        Ok(Self { stages })
    }

    /// Read and parse a YAML chain document.
    pub async fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ChainDocument {
                path: origin.clone(),
                message: e.to_string(),
            })?;
        Self::from_yaml_str(&text, &origin)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Stage 0 is `type:locator`; later stages are `type` or `type:k=v,k2=v2`.
fn parse_compact_stage(position: usize, definition: &str) -> Result<StageSpec, ConfigError> {
    let (kind, rest) = match definition.split_once(':') {
        Some((kind, rest)) => (kind.trim(), Some(rest)),
        None => (definition.trim(), None),
    };
    if kind.is_empty() {
        return Err(ConfigError::InvalidStage {
            definition: definition.to_string(),
            reason: "missing source type".to_string(),
        });
    }

    if position == 0 {
        let locator = rest.map(str::to_string).filter(|l| !l.is_empty());
        return Ok(StageSpec::new(kind, locator, Options::new()));
    }

    let mut options = Options::new();
    for pair in rest.unwrap_or_default().split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidStage {
            definition: definition.to_string(),
            reason: format!("option '{}' is not key=value", pair),
        })?;
        options.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(StageSpec::new(kind, None, options))
}

fn yaml_scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

// =============================================================================
// Chain Builder
// =============================================================================

/// Resolves a [`ChainSpec`] against a [`Registry`].
pub struct ChainBuilder<'a> {
    registry: &'a Registry,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Check stage kinds and positions without opening anything.
    pub fn check(&self, spec: &ChainSpec) -> Result<(), ConfigError> {
        let Some(base) = spec.stages.first() else {
            return Err(ConfigError::EmptyChain);
        };

        match self.registry.resolve_source(&base.kind) {
            None => {
                return Err(ConfigError::UnknownType {
                    kind: PluginKind::BaseSource,
                    name: base.kind.clone(),
                })
            }
            Some(SourceEntry::Manipulator(_)) => {
                return Err(ConfigError::TypeMismatch {
                    name: base.kind.clone(),
                    position: 0,
                    expected: PluginKind::BaseSource,
                })
            }
            Some(SourceEntry::Base(_)) => {}
        }
        if base.locator.is_none() {
            return Err(ConfigError::MissingLocator {
                name: base.kind.clone(),
            });
        }

        for (position, stage) in spec.stages.iter().enumerate().skip(1) {
            match self.registry.resolve_source(&stage.kind) {
                None => {
                    return Err(ConfigError::UnknownType {
                        kind: PluginKind::Manipulator,
                        name: stage.kind.clone(),
                    })
                }
                Some(SourceEntry::Base(_)) => {
                    return Err(ConfigError::TypeMismatch {
                        name: stage.kind.clone(),
                        position,
                        expected: PluginKind::Manipulator,
                    })
                }
                Some(SourceEntry::Manipulator(_)) => {}
            }
        }
        Ok(())
    }

    /// Open the base stage and fold the manipulators over it.
    ///
    /// A one-stage chain yields the base source itself.
    pub async fn build(&self, spec: &ChainSpec) -> Result<Arc<dyn ImageSource>, SourceError> {
        self.check(spec)?;

        let base = &spec.stages[0];
        let locator = base.locator.as_deref().unwrap_or_default();
        let factory = match self.registry.resolve_source(&base.kind) {
            Some(SourceEntry::Base(factory)) => factory,
            _ => {
                return Err(ConfigError::UnknownType {
                    kind: PluginKind::BaseSource,
                    name: base.kind.clone(),
                }
                .into())
            }
        };

        debug!(source = %base.kind, locator = %locator, "Opening base source");
        let mut current = factory.open(locator, &base.options).await?;
        if spec.len() == 1 {
            return Ok(current);
        }

        let mut stage_names = vec![base.kind.clone()];
        for (position, stage) in spec.stages.iter().enumerate().skip(1) {
            let factory = match self.registry.resolve_source(&stage.kind) {
                Some(SourceEntry::Manipulator(factory)) => factory,
                _ => {
                    return Err(ConfigError::TypeMismatch {
                        name: stage.kind.clone(),
                        position,
                        expected: PluginKind::Manipulator,
                    }
                    .into())
                }
            };
            debug!(manipulator = %stage.kind, position, "Wrapping chain stage");
            current = factory.wrap(current, &stage.options)?;
            stage_names.push(stage.kind.clone());
        }

        let image_base = locator.strip_suffix("/info.json").unwrap_or(locator);
        let chained = ChainedSource::new(
            current,
            replace_extension(image_base, STACKED_EXTENSION),
            stage_names,
        );
        info!(
            stages = %chained.stages().join(" -> "),
            width = chained.width(),
            height = chained.height(),
            "Chained source configured"
        );
        Ok(Arc::new(chained))
    }
}

// =============================================================================
// Chained Source
// =============================================================================

/// The terminal stage of a multi-stage chain under a synthetic locator.
pub struct ChainedSource {
    terminal: Arc<dyn ImageSource>,
    locator: String,
    stages: Vec<String>,
}

impl ChainedSource {
    pub fn new(terminal: Arc<dyn ImageSource>, locator: String, stages: Vec<String>) -> Self {
        Self {
            terminal,
            locator,
            stages,
        }
    }

    /// Stage names from base to terminal.
    pub fn stages(&self) -> &[String] {
        &self.stages
    }
}

#[async_trait]
impl ImageSource for ChainedSource {
    fn name(&self) -> &str {
        STACKED_SOURCE_NAME
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn width(&self) -> u32 {
        self.terminal.width()
    }

    fn height(&self) -> u32 {
        self.terminal.height()
    }

    fn metadata(&self) -> &Metadata {
        self.terminal.metadata()
    }

    async fn crop(&self, region: Region, scale: f64) -> Result<DynamicImage, SourceError> {
        self.terminal.crop(region, scale).await
    }
}

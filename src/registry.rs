//! Static plugin registry.
//!
//! The registry maps names to source factories and sink constructors. It is
//! built once at process start with [`Registry::builtin`] and passed by
//! reference to everything that needs to resolve a plugin by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ConfigError, PluginKind};
use crate::sink::{DefaultTileSink, TileSink, DEFAULT_SINK_NAME};
use crate::source::{
    BaseSourceFactory, DecodedSourceFactory, FilterSourceFactory, ManipulatorFactory, Options,
    RemoteSourceFactory,
};

/// Constructor for an unconfigured sink.
pub type SinkConstructor = fn() -> Box<dyn TileSink>;

/// A registered image source.
#[derive(Clone)]
pub enum SourceEntry {
    Base(Arc<dyn BaseSourceFactory>),
    Manipulator(Arc<dyn ManipulatorFactory>),
}

impl SourceEntry {
    pub fn kind(&self) -> PluginKind {
        match self {
            SourceEntry::Base(_) => PluginKind::BaseSource,
            SourceEntry::Manipulator(_) => PluginKind::Manipulator,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SourceEntry::Base(factory) => factory.description(),
            SourceEntry::Manipulator(factory) => factory.description(),
        }
    }
}

/// Name → plugin table for sources and sinks.
#[derive(Clone, Default)]
pub struct Registry {
    sources: BTreeMap<String, SourceEntry>,
    sinks: BTreeMap<String, SinkConstructor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in plugin, sharing one HTTP client.
    pub fn builtin() -> Self {
        Self::builtin_with_client(reqwest::Client::new())
    }

    pub fn builtin_with_client(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register_base(Arc::new(DecodedSourceFactory::new(client.clone())));
        registry.register_base(Arc::new(RemoteSourceFactory::new(client)));
        registry.register_manipulator(Arc::new(FilterSourceFactory));
        registry.register_sink(DEFAULT_SINK_NAME, default_sink);
        registry
    }

    pub fn register_base(&mut self, factory: Arc<dyn BaseSourceFactory>) {
        self.sources
            .insert(factory.name().to_string(), SourceEntry::Base(factory));
    }

    pub fn register_manipulator(&mut self, factory: Arc<dyn ManipulatorFactory>) {
        self.sources
            .insert(factory.name().to_string(), SourceEntry::Manipulator(factory));
    }

    pub fn register_sink(&mut self, name: &str, constructor: SinkConstructor) {
        self.sinks.insert(name.to_string(), constructor);
    }

    /// Look up a source or manipulator by name.
    pub fn resolve_source(&self, name: &str) -> Option<SourceEntry> {
        self.sources.get(name).cloned()
    }

    /// Construct and configure the sink registered under `name`.
    pub fn resolve_sink(
        &self,
        name: &str,
        options: &Options,
    ) -> Result<Box<dyn TileSink>, ConfigError> {
        let constructor = self.sinks.get(name).ok_or_else(|| ConfigError::UnknownType {
            kind: PluginKind::Sink,
            name: name.to_string(),
        })?;

        let mut sink = constructor();
        sink.configure(options)?;
        Ok(sink)
    }

    /// Registered sources in name order.
    pub fn sources(&self) -> impl Iterator<Item = (&str, &SourceEntry)> {
        self.sources.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.keys().map(String::as_str).collect()
    }
}

fn default_sink() -> Box<dyn TileSink> {
    Box::new(DefaultTileSink::new())
}

//! iiif-pyramid - Static IIIF tile pyramid generator.
//!
//! This binary parses the command line and dispatches to the generator, the
//! validator or the plugin listing.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iiif_pyramid::{
    config::{Cli, Command, GenerateConfig, InfoCommand, ValidateConfig},
    registry::{Registry, SourceEntry},
    source::{ChainSpec, STACKED_SOURCE_NAME},
    tile::{PyramidGenerator, Tiler},
    validate::Reassembler,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_level.as_deref());

    let registry = Registry::builtin();

    match cli.command {
        Command::Generate(config) => run_generate(config, &registry).await,
        Command::Validate(config) => run_validate(config, &registry).await,
        Command::Info(command) => run_info(command, &registry),
    }
}

/// Initialize the tracing/logging subsystem.
///
/// `RUST_LOG` wins; otherwise an explicit level, then `--verbose`.
fn init_logging(verbose: bool, level: Option<&str>) {
    let env_filter = match level {
        Some(level) => format!("iiif_pyramid={}", level),
        None if verbose => "iiif_pyramid=debug".to_string(),
        None => "iiif_pyramid=info".to_string(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Generate Command
// =============================================================================

async fn run_generate(config: GenerateConfig, registry: &Registry) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let sink = match registry.resolve_sink(&config.sink, &config.sink_options()) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let inputs = match collect_inputs(&config).await {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tiler = Tiler::new(Arc::from(sink)).with_workers(config.workers);
    let plan_config = config.plan_config();

    info!("Configuration:");
    info!("  Inputs: {}", inputs.len());
    info!("  Output: {}", config.output.display());
    info!("  Source: {}", config.source);
    info!(
        "  Sink: {} ({})",
        config.sink,
        tiler.sink().format_extension()
    );
    info!(
        "  Tiles: {}x{}, zoom levels: {}",
        plan_config.tile_width,
        plan_config.tile_height,
        if plan_config.zoom_levels == 0 {
            "auto".to_string()
        } else {
            plan_config.zoom_levels.to_string()
        }
    );
    info!("  IIIF version: {}", plan_config.version);
    info!("  Workers: {}", tiler.workers());

    let started = Instant::now();
    let generator = PyramidGenerator::new(registry, tiler, plan_config, config.output.clone());
    let report = generator.run_batch(inputs).await;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(generated) => info!(
                "  ✓ {} → {} ({} files, {} skipped)",
                outcome.input,
                generated.root.display(),
                generated.written,
                generated.skipped
            ),
            Err(e) => error!("  ✗ {}: {}", outcome.input, e),
        }
    }
    info!(
        "Finished in {:.1}s: {} succeeded, {} failed",
        started.elapsed().as_secs_f64(),
        report.succeeded(),
        report.failed()
    );

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Turn the command line into `(label, chain)` pairs.
async fn collect_inputs(
    config: &GenerateConfig,
) -> Result<Vec<(String, ChainSpec)>, iiif_pyramid::error::ConfigError> {
    let options = config.source_options();

    if config.is_stacked() {
        if !config.files.is_empty() {
            warn!(
                "Ignoring {} positional input(s): the stacked source reads its chain from --source-opt",
                config.files.len()
            );
        }
        let spec = ChainSpec::from_options(&options).await?;
        return Ok(vec![(STACKED_SOURCE_NAME.to_string(), spec)]);
    }

    Ok(config
        .files
        .iter()
        .map(|file| {
            let spec = ChainSpec::single(config.source.clone(), file.clone(), options.clone());
            (file.clone(), spec)
        })
        .collect())
}

// =============================================================================
// Validate Command
// =============================================================================

async fn run_validate(config: ValidateConfig, registry: &Registry) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let sink_options = config.sink_options();
    let sink = match registry.resolve_sink(iiif_pyramid::sink::DEFAULT_SINK_NAME, &sink_options) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let reassembler =
        Reassembler::new(reqwest::Client::new()).with_tile_extension(config.tile_format.clone());

    let report = match reassembler
        .validate(&config.url, &config.output, Arc::from(sink))
        .await
    {
        Ok(report) => report,
        Err(e) => {
            error!("Validation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Reassembled {}x{} from {}/{} tiles → {}",
        report.width,
        report.height,
        report.fetched,
        report.tiles,
        report.output.display()
    );

    if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        error!("{} tile(s) missing:", report.missing.len());
        for missing in &report.missing {
            error!("  {} ({})", missing.url, missing.reason);
        }
        ExitCode::FAILURE
    }
}

// =============================================================================
// Info Command
// =============================================================================

fn run_info(command: InfoCommand, registry: &Registry) -> ExitCode {
    match command {
        InfoCommand::ListSources => {
            println!("Image sources:");
            for (name, entry) in registry.sources() {
                let kind = match entry {
                    SourceEntry::Base(_) => "base",
                    SourceEntry::Manipulator(_) => "manipulator",
                };
                println!("  {:<10} {:<12} {}", name, kind, entry.description());
            }
            println!(
                "  {:<10} {:<12} {}",
                STACKED_SOURCE_NAME,
                "chain",
                "Base source followed by manipulators (source.N=... or config=<yaml>)"
            );
        }
        InfoCommand::ListSinks => {
            println!("Tile sinks:");
            for name in registry.sink_names() {
                println!("  {}", name);
            }
        }
    }
    ExitCode::SUCCESS
}

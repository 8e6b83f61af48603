//! Generation integration tests.
//!
//! Tests verify:
//! - On-disk layout and descriptor for both protocol versions
//! - Pixel exactness of scale-1 output
//! - Fail-late behavior: failing units leave siblings written and no info.json
//! - Batch runs driven by parsed command-line configuration

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use std::sync::Arc;

use iiif_pyramid::error::{SinkError, SourceError, TileError, TilerError};
use iiif_pyramid::source::DecodedSource;
use iiif_pyramid::{
    ChainSpec, Cli, Command, DefaultTileSink, IiifVersion, ImageSource, Metadata, Options,
    OutputFormat, PlanConfig, PyramidGenerator, PyramidPlan, Region, Registry, TileSink, Tiler,
};

use super::test_utils::{gradient_image, list_files, read_image, write_png};

fn png_tiler() -> Tiler {
    Tiler::new(Arc::new(DefaultTileSink::with_format(OutputFormat::Png))).with_workers(4)
}

fn plan_config(version: IiifVersion) -> PlanConfig {
    PlanConfig {
        version,
        ..PlanConfig::with_tile_size(32)
    }
}

fn read_info(root: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(root.join("info.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn sorted(paths: &[&str]) -> Vec<String> {
    let mut paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    paths.sort();
    paths
}

// =============================================================================
// Layout
// =============================================================================

#[tokio::test]
async fn test_generate_v2_layout() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let page = write_png(input.path(), "page.png", &gradient_image(100, 60));

    let registry = Registry::builtin();
    let generator = PyramidGenerator::new(
        &registry,
        png_tiler(),
        plan_config(IiifVersion::V2),
        output.path(),
    );
    let report = generator
        .generate(&ChainSpec::single("default", page, Options::new()))
        .await
        .unwrap();

    let root = output.path().join("page");
    assert_eq!(report.image_id, "page");
    assert_eq!(report.root, root);
    assert_eq!(report.written, 15);
    assert_eq!(report.skipped, 0);

    assert_eq!(
        list_files(&root),
        sorted(&[
            "info.json",
            "full/100,/0/default.png",
            "full/50,/0/default.png",
            "full/25,/0/default.png",
            "full/full/0/default.png",
            "0,0,32,32/32/0/default.png",
            "32,0,32,32/32/0/default.png",
            "64,0,32,32/32/0/default.png",
            "96,0,4,32/4/0/default.png",
            "0,32,32,28/32/0/default.png",
            "32,32,32,28/32/0/default.png",
            "64,32,32,28/32/0/default.png",
            "96,32,4,28/4/0/default.png",
            "0,0,64,60/32/0/default.png",
            "64,0,36,60/18/0/default.png",
            "0,0,100,60/25/0/default.png",
        ])
    );

    let info = read_info(&root);
    assert_eq!(info["@context"], "http://iiif.io/api/image/2/context.json");
    assert_eq!(info["@id"], "http://localhost:8887/iiif/page");
    assert_eq!(info["width"], 100);
    assert_eq!(info["height"], 60);
    assert_eq!(info["tiles"][0]["width"], 32);
    assert!(info["tiles"][0].get("height").is_none());
    assert_eq!(info["tiles"][0]["scaleFactors"], serde_json::json!([1, 2, 4]));
    assert_eq!(
        info["sizes"],
        serde_json::json!([
            {"width": 100, "height": 60},
            {"width": 50, "height": 30},
            {"width": 25, "height": 15},
        ])
    );
}

#[tokio::test]
async fn test_generate_v3_layout() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let page = write_png(input.path(), "scan.png", &gradient_image(100, 60));

    let registry = Registry::builtin();
    let generator = PyramidGenerator::new(
        &registry,
        png_tiler(),
        plan_config(IiifVersion::V3),
        output.path(),
    );
    generator
        .generate(&ChainSpec::single("default", page, Options::new()))
        .await
        .unwrap();

    let root = output.path().join("scan");
    let files = list_files(&root);
    for expected in [
        "full/100,60/0/default.png",
        "full/max/0/default.png",
        "96,32,4,28/4,28/0/default.png",
        "64,0,36,60/18,30/0/default.png",
        "0,0,100,60/25,15/0/default.png",
    ] {
        assert!(files.contains(&expected.to_string()), "missing {}", expected);
    }

    let info = read_info(&root);
    assert_eq!(info["@context"], "http://iiif.io/api/image/3/context.json");
    assert_eq!(info["id"], "http://localhost:8887/iiif/scan");
    assert_eq!(info["type"], "ImageService3");
    assert_eq!(info["profile"], "level2");
    assert_eq!(info["maxWidth"], 100);
    assert_eq!(info["maxHeight"], 60);
    assert_eq!(info["tiles"][0]["height"], 32);
}

#[tokio::test]
async fn test_scale_one_output_is_pixel_exact() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let source_image = gradient_image(100, 60);
    let page = write_png(input.path(), "page.png", &source_image);

    let registry = Registry::builtin();
    let generator = PyramidGenerator::new(
        &registry,
        png_tiler(),
        plan_config(IiifVersion::V2),
        output.path(),
    );
    generator
        .generate(&ChainSpec::single("default", page, Options::new()))
        .await
        .unwrap();

    let root = output.path().join("page");
    assert_eq!(read_image(&root.join("full/full/0/default.png")), source_image);

    let tile = read_image(&root.join("32,32,32,28/32/0/default.png"));
    let expected = source_image.view(32, 32, 32, 28).to_image();
    assert_eq!(tile, expected);

    let reduced = read_image(&root.join("64,0,36,60/18/0/default.png"));
    assert_eq!(reduced.dimensions(), (18, 30));
}

// =============================================================================
// Fail-late
// =============================================================================

/// Reports a larger canvas than its upstream holds.
struct OversizedSource {
    inner: Arc<dyn ImageSource>,
    width: u32,
    height: u32,
}

#[async_trait]
impl ImageSource for OversizedSource {
    fn name(&self) -> &str {
        "oversized"
    }

    fn locator(&self) -> &str {
        self.inner.locator()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }

    async fn crop(&self, region: Region, scale: f64) -> Result<DynamicImage, SourceError> {
        self.inner.crop(region, scale).await
    }
}

#[tokio::test]
async fn test_out_of_bounds_crop_writes_no_file() {
    let output = tempfile::tempdir().unwrap();
    let inner = DecodedSource::from_image(
        "small.png",
        DynamicImage::ImageRgb8(gradient_image(32, 32)),
    );
    let source: Arc<dyn ImageSource> = Arc::new(OversizedSource {
        inner: Arc::new(inner),
        width: 64,
        height: 64,
    });

    let plan = PyramidPlan::new(64, 64, &PlanConfig::with_tile_size(32), "oversized").unwrap();
    let root = output.path().join("oversized");
    let err = png_tiler().generate(&plan, source, &root).await.unwrap_err();

    match err {
        TilerError::Incomplete {
            failed,
            total,
            failures,
        } => {
            assert_eq!(total, 8);
            assert_eq!(failed, 7);
            assert!(failures.iter().all(|f| matches!(
                f.error,
                TileError::Source(SourceError::OutOfBounds { .. })
            )));
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(list_files(&root), vec!["0,0,32,32/32/0/default.png"]);
}

/// Fails every image of the given width.
struct FailingSink {
    inner: DefaultTileSink,
    fail_width: u32,
}

impl TileSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn configure(&mut self, options: &Options) -> Result<(), iiif_pyramid::ConfigError> {
        self.inner.configure(options)
    }

    fn format_extension(&self) -> &str {
        self.inner.format_extension()
    }

    fn encode(&self, image: &DynamicImage, metadata: &Metadata) -> Result<Bytes, SinkError> {
        if image.width() == self.fail_width {
            return Err(SinkError::Encode {
                format: "png".to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.inner.encode(image, metadata)
    }
}

#[tokio::test]
async fn test_failing_tile_leaves_siblings_and_no_descriptor() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let page = write_png(input.path(), "page.png", &gradient_image(100, 60));

    let sink = FailingSink {
        inner: DefaultTileSink::with_format(OutputFormat::Png),
        fail_width: 18,
    };
    let registry = Registry::builtin();
    let generator = PyramidGenerator::new(
        &registry,
        Tiler::new(Arc::new(sink)).with_workers(3),
        plan_config(IiifVersion::V2),
        output.path(),
    );
    let err = generator
        .generate(&ChainSpec::single("default", page, Options::new()))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("1 of 15 units failed"), "{}", message);

    let root = output.path().join("page");
    let files = list_files(&root);
    assert_eq!(files.len(), 14);
    assert!(!files.contains(&"info.json".to_string()));
    assert!(!files.contains(&"64,0,36,60/18/0/default.png".to_string()));
    assert!(files.contains(&"0,0,100,60/25/0/default.png".to_string()));
}

// =============================================================================
// Command-line Driven Batch
// =============================================================================

#[tokio::test]
async fn test_batch_from_command_line() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let first = write_png(input.path(), "first.png", &gradient_image(40, 30));
    let missing = input.path().join("absent.png").to_string_lossy().to_string();
    let output_arg = output.path().to_string_lossy().to_string();

    let cli = Cli::try_parse_from([
        "iiif-pyramid",
        "generate",
        "-t",
        "16",
        "-o",
        output_arg.as_str(),
        "-i",
        "https://images.example.org/",
        "--sink-opt",
        "format=png",
        "--iiif-version",
        "v3",
        first.as_str(),
        missing.as_str(),
    ])
    .unwrap();
    let Command::Generate(config) = cli.command else {
        panic!("expected generate");
    };
    config.validate().unwrap();

    let registry = Registry::builtin();
    let sink = registry
        .resolve_sink(&config.sink, &config.sink_options())
        .unwrap();
    let tiler = Tiler::new(Arc::from(sink)).with_workers(config.workers);
    let generator =
        PyramidGenerator::new(&registry, tiler, config.plan_config(), config.output.clone());

    let inputs = config
        .files
        .iter()
        .map(|file| {
            (
                file.clone(),
                ChainSpec::single(config.source.clone(), file.clone(), config.source_options()),
            )
        })
        .collect();
    let report = generator.run_batch(inputs).await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures().next().unwrap().input, missing);

    let info = read_info(&output.path().join("first"));
    assert_eq!(info["id"], "https://images.example.org/first");
    assert!(output.path().join("first/full/max/0/default.png").is_file());
}

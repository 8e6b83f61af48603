//! Remote IIIF source integration tests.
//!
//! Tests verify:
//! - Level 0 services: the full image is downloaded once and crops are cut
//!   from it, even under concurrent crops
//! - Level 1+ services: region requests use the region/size path grammar
//! - Descriptor failures map to network or malformed-descriptor errors

use image::GenericImageView;
use std::collections::HashMap;
use std::sync::Arc;

use iiif_pyramid::error::{NetworkError, SourceError};
use iiif_pyramid::{
    ChainBuilder, ChainSpec, DefaultTileSink, ImageSource, Options, OutputFormat, PlanConfig,
    PyramidGenerator, Region, Registry, Tiler,
};

use super::test_utils::{gradient_image, list_files, png_bytes, TestServer};

fn png_options() -> Options {
    let mut options = Options::new();
    options.insert("format".to_string(), "png".to_string());
    options
}

/// A level 0 v2 service for a 40x24 gradient under `iiif/page`.
async fn level0_server() -> TestServer {
    let server = TestServer::from_files(HashMap::new()).await;
    let info = serde_json::json!({
        "@context": "http://iiif.io/api/image/2/context.json",
        "@id": server.url("iiif/page"),
        "protocol": "http://iiif.io/api/image",
        "profile": ["http://iiif.io/api/image/2/level0.json"],
        "width": 40,
        "height": 24,
        "tiles": [{"width": 16, "scaleFactors": [1, 2]}],
    });
    server.insert("iiif/page/info.json", info.to_string());
    server.insert(
        "iiif/page/full/full/0/default.png",
        png_bytes(&gradient_image(40, 24)),
    );
    server
}

async fn open(locator: &str) -> Result<Arc<dyn ImageSource>, SourceError> {
    let registry = Registry::builtin();
    ChainBuilder::new(&registry)
        .build(&ChainSpec::single("iiif", locator, png_options()))
        .await
}

// =============================================================================
// Level 0
// =============================================================================

#[tokio::test]
async fn test_level0_full_image_fetched_once() {
    let server = level0_server().await;
    let source = open(&server.url("iiif/page/info.json")).await.unwrap();

    assert_eq!(source.name(), "iiif");
    assert_eq!((source.width(), source.height()), (40, 24));
    assert_eq!(
        source.metadata()["iiif_source_id"],
        serde_json::json!(server.url("iiif/page"))
    );

    let regions = [
        Region::new(0, 0, 16, 16),
        Region::new(16, 0, 16, 16),
        Region::new(32, 16, 8, 8),
        Region::new(0, 0, 40, 24),
    ];
    let crops = crop_concurrently(&source, &regions).await;

    let expected = gradient_image(40, 24);
    for (region, crop) in regions.iter().zip(&crops) {
        let local = expected
            .view(region.x, region.y, region.width, region.height)
            .to_image();
        assert_eq!(crop, &local);
    }

    assert_eq!(server.hits("iiif/page/info.json"), 1);
    assert_eq!(server.hits("iiif/page/full/full/0/default.png"), 1);
}

/// Crop every region concurrently.
async fn crop_concurrently(
    source: &Arc<dyn ImageSource>,
    regions: &[Region],
) -> Vec<image::RgbImage> {
    let mut tasks = tokio::task::JoinSet::new();
    for (index, region) in regions.iter().copied().enumerate() {
        let source = Arc::clone(source);
        tasks.spawn(async move { (index, source.crop(region, 1.0).await.unwrap().to_rgb8()) });
    }

    let mut crops = vec![None; regions.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, crop) = joined.unwrap();
        crops[index] = Some(crop);
    }
    crops.into_iter().map(Option::unwrap).collect()
}

#[tokio::test]
async fn test_generate_from_level0_service() {
    let server = level0_server().await;
    let output = tempfile::tempdir().unwrap();

    let registry = Registry::builtin();
    let generator = PyramidGenerator::new(
        &registry,
        Tiler::new(Arc::new(DefaultTileSink::with_format(OutputFormat::Png))).with_workers(4),
        PlanConfig::with_tile_size(16),
        output.path(),
    );
    let report = generator
        .generate(&ChainSpec::single(
            "iiif",
            server.url("iiif/page/info.json"),
            png_options(),
        ))
        .await
        .unwrap();

    assert_eq!(report.image_id, "page");
    let files = list_files(&output.path().join("page"));
    assert!(files.contains(&"info.json".to_string()));
    assert!(files.contains(&"32,16,8,8/8/0/default.png".to_string()));
    assert_eq!(server.hits("iiif/page/full/full/0/default.png"), 1);
}

// =============================================================================
// Level 2
// =============================================================================

#[tokio::test]
async fn test_level2_region_requests() {
    let server = TestServer::from_files(HashMap::new()).await;
    let info = serde_json::json!({
        "@context": "http://iiif.io/api/image/3/context.json",
        "id": server.url("iiif/scan"),
        "type": "ImageService3",
        "protocol": "http://iiif.io/api/image",
        "profile": "level2",
        "width": 8,
        "height": 6,
    });
    let image = gradient_image(8, 6);
    let corner = image.view(0, 0, 4, 4).to_image();
    server.insert("iiif/scan/info.json", info.to_string());
    server.insert("iiif/scan/0,0,4,4/max/0/default.png", png_bytes(&corner));
    server.insert(
        "iiif/scan/0,0,8,6/4,3/0/default.png",
        png_bytes(&gradient_image(4, 3)),
    );

    // Base URI without info.json
    let source = open(&server.url("iiif/scan")).await.unwrap();
    assert_eq!((source.width(), source.height()), (8, 6));

    let crop = source.crop(Region::new(0, 0, 4, 4), 1.0).await.unwrap();
    assert_eq!(crop.to_rgb8(), corner);

    let reduced = source.crop(Region::full(8, 6), 2.0).await.unwrap();
    assert_eq!(reduced.dimensions(), (4, 3));

    assert_eq!(server.hits("iiif/scan/0,0,4,4/max/0/default.png"), 1);
    assert_eq!(server.hits("iiif/scan/0,0,8,6/4,3/0/default.png"), 1);
    assert_eq!(server.hits("iiif/scan/full/max/0/default.png"), 0);

    let err = source.crop(Region::new(4, 4, 8, 8), 1.0).await.unwrap_err();
    assert!(matches!(err, SourceError::OutOfBounds { .. }));
}

// =============================================================================
// Descriptor Errors
// =============================================================================

#[tokio::test]
async fn test_missing_descriptor_is_network_error() {
    let server = TestServer::from_files(HashMap::new()).await;
    let err = match open(&server.url("iiif/nothing/info.json")).await {
        Ok(_) => panic!("expected a network error"),
        Err(e) => e,
    };
    assert!(matches!(
        err,
        SourceError::Network(NetworkError::Status { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_malformed_descriptor() {
    let server = TestServer::from_files(HashMap::new()).await;
    server.insert("iiif/odd/info.json", r#"{"@id": "x", "height": 10}"#);
    server.insert("iiif/junk/info.json", "not json");

    for path in ["iiif/odd/info.json", "iiif/junk/info.json"] {
        let err = match open(&server.url(path)).await {
            Ok(_) => panic!("expected a malformed descriptor for {}", path),
            Err(e) => e,
        };
        assert!(
            matches!(err, SourceError::MalformedDescriptor { .. }),
            "{}: {}",
            path,
            err
        );
    }
}

//! Reassembly integration tests.
//!
//! Tests verify:
//! - A served 2x2 pyramid of 1x1 tiles reassembles pixel-exactly
//! - Missing tiles leave gaps and are reported by URL
//! - Generate, serve and validate round trip for both protocol versions
//! - Descriptor failures abort validation

use std::collections::HashMap;
use std::sync::Arc;

use iiif_pyramid::error::{NetworkError, ValidateError};
use iiif_pyramid::{
    ChainSpec, DefaultTileSink, IiifVersion, Options, OutputFormat, PlanConfig, PyramidGenerator,
    Reassembler, Registry, TileSink, Tiler,
};

use super::test_utils::{gradient_image, pixel_png, read_image, write_png, TestServer};

const RED: [u8; 3] = [255, 0, 0];
const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const WHITE: [u8; 3] = [255, 255, 255];

fn png_sink() -> Arc<dyn TileSink> {
    Arc::new(DefaultTileSink::with_format(OutputFormat::Png))
}

fn reassembler() -> Reassembler {
    Reassembler::new(reqwest::Client::new()).with_tile_extension("png")
}

/// A level 0 v2 pyramid of a 2x2 image stored as four 1x1 tiles.
async fn quad_server() -> TestServer {
    let server = TestServer::from_files(HashMap::new()).await;
    let info = serde_json::json!({
        "@context": "http://iiif.io/api/image/2/context.json",
        "@id": server.url("iiif/quad"),
        "protocol": "http://iiif.io/api/image",
        "profile": ["http://iiif.io/api/image/2/level0.json"],
        "width": 2,
        "height": 2,
        "tiles": [{"width": 1, "scaleFactors": [1, 2]}],
    });
    server.insert("iiif/quad/info.json", info.to_string());
    server.insert("iiif/quad/0,0,1,1/1/0/default.png", pixel_png(RED));
    server.insert("iiif/quad/1,0,1,1/1/0/default.png", pixel_png(GREEN));
    server.insert("iiif/quad/0,1,1,1/1/0/default.png", pixel_png(BLUE));
    server.insert("iiif/quad/1,1,1,1/1/0/default.png", pixel_png(WHITE));
    server
}

// =============================================================================
// Reassembly
// =============================================================================

#[tokio::test]
async fn test_two_by_two_reassembles_exactly() {
    let server = quad_server().await;
    let reassembler = reassembler();

    let descriptor = reassembler
        .load(&server.url("iiif/quad/info.json"))
        .await
        .unwrap();
    assert_eq!((descriptor.width, descriptor.height), (2, 2));
    assert_eq!(descriptor.version, IiifVersion::V2);

    let reassembly = reassembler.reassemble(&descriptor).await;
    assert!(reassembly.is_complete());
    assert_eq!(reassembly.fetched, 4);
    assert_eq!(reassembly.image.get_pixel(0, 0).0, RED);
    assert_eq!(reassembly.image.get_pixel(1, 0).0, GREEN);
    assert_eq!(reassembly.image.get_pixel(0, 1).0, BLUE);
    assert_eq!(reassembly.image.get_pixel(1, 1).0, WHITE);
}

#[tokio::test]
async fn test_validate_writes_composite() {
    let server = quad_server().await;
    let output = tempfile::tempdir().unwrap();
    let target = output.path().join("nested/quad.png");

    let report = reassembler()
        .validate(&server.url("iiif/quad/info.json"), &target, png_sink())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!((report.width, report.height), (2, 2));
    assert_eq!(report.tiles, 4);
    assert_eq!(report.output, target);

    let written = read_image(&target);
    assert_eq!(written.get_pixel(1, 0).0, GREEN);
    assert_eq!(written.get_pixel(0, 1).0, BLUE);
}

#[tokio::test]
async fn test_missing_tile_is_reported() {
    let server = quad_server().await;
    server.remove("iiif/quad/1,1,1,1/1/0/default.png");
    let output = tempfile::tempdir().unwrap();
    let target = output.path().join("quad.png");

    let report = reassembler()
        .validate(&server.url("iiif/quad/info.json"), &target, png_sink())
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.fetched, 3);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(
        report.missing[0].url,
        server.url("iiif/quad/1,1,1,1/1/0/default.png")
    );
    assert!(report.missing[0].reason.contains("404"));

    let written = read_image(&target);
    assert_eq!(written.get_pixel(0, 0).0, RED);
    assert_eq!(written.get_pixel(1, 1).0, [0, 0, 0]);
}

// =============================================================================
// Round Trip
// =============================================================================

#[tokio::test]
async fn test_generate_serve_validate_round_trip() {
    let input = tempfile::tempdir().unwrap();
    let published = tempfile::tempdir().unwrap();
    let server = TestServer::from_directory(published.path()).await;
    let source_image = gradient_image(40, 30);

    for (name, version) in [("page-v2", IiifVersion::V2), ("page-v3", IiifVersion::V3)] {
        let page = write_png(input.path(), &format!("{}.png", name), &source_image);

        let registry = Registry::builtin();
        let plan_config = PlanConfig {
            version,
            identifier: format!("{}/", server.base_url()),
            ..PlanConfig::with_tile_size(16)
        };
        let generator = PyramidGenerator::new(
            &registry,
            Tiler::new(png_sink()).with_workers(2),
            plan_config,
            published.path(),
        );
        generator
            .generate(&ChainSpec::single("default", page, Options::new()))
            .await
            .unwrap();

        let target = input.path().join(format!("{}-reassembled.png", name));
        let report = reassembler()
            .validate(&server.url(&format!("{}/info.json", name)), &target, png_sink())
            .await
            .unwrap();

        assert!(report.is_complete(), "{}: {:?}", name, report.missing);
        assert_eq!(report.tiles, 6);
        assert_eq!(read_image(&target), source_image, "{} differs", name);
    }
}

// =============================================================================
// Descriptor Errors
// =============================================================================

#[tokio::test]
async fn test_descriptor_errors_abort() {
    let server = TestServer::from_files(HashMap::new()).await;
    server.insert(
        "iiif/untiled/info.json",
        serde_json::json!({"@id": server.url("iiif/untiled"), "width": 4, "height": 4}).to_string(),
    );
    server.insert(
        "iiif/empty/info.json",
        serde_json::json!({
            "@id": server.url("iiif/empty"),
            "width": 0,
            "height": 4,
            "tiles": [{"width": 2}],
        })
        .to_string(),
    );
    let output = tempfile::tempdir().unwrap();
    let target = output.path().join("out.png");

    for path in ["iiif/untiled/info.json", "iiif/empty/info.json"] {
        let err = reassembler()
            .validate(&server.url(path), &target, png_sink())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ValidateError::MalformedDescriptor { .. }),
            "{}: {}",
            path,
            err
        );
    }

    let err = reassembler()
        .validate(&server.url("iiif/absent/info.json"), &target, png_sink())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ValidateError::Network(NetworkError::Status { status: 404, .. })
    ));
    assert!(!target.exists());
}

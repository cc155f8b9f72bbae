//! End-to-end capture tests against the synthetic surface.
//!
//! The synthetic document is a pure function of pixel coordinates, so a
//! stitched output that equals the source bitmap proves the arrangement,
//! scaling and compositing all landed every pixel where it belongs.

use std::sync::{Arc, Mutex};

use image::{imageops, RgbaImage};
use sha2::Digest;

use pagecap::surface::{ruled_document, SyntheticSurface};
use pagecap::{
    CaptureConfig, CaptureOptions, DirStore, Orchestrator, ProgressHandler, Surface, TileCaps,
};

fn quick_config() -> CaptureConfig {
    CaptureConfig {
        scroll_settle_ms: 1,
        snapshot_settle_ms: 0,
        ..CaptureConfig::default()
    }
}

fn progress_recorder() -> (ProgressHandler, Arc<Mutex<Vec<f64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: ProgressHandler = Arc::new(move |p| sink.lock().unwrap().push(p));
    (handler, seen)
}

/// Pulls the embedded JSON tile table back out of the manifest page.
fn manifest_json(manifest: &str) -> serde_json::Value {
    let marker = "id=\"capture-manifest\">";
    let start = manifest.find(marker).expect("manifest json block") + marker.len();
    let end = manifest[start..].find("</script>").expect("json terminator") + start;
    serde_json::from_str(manifest[start..end].trim()).expect("manifest json parses")
}

#[tokio::test]
async fn capture_reproduces_a_tall_document_exactly() {
    let doc = ruled_document(1024, 3000);
    let surface = Arc::new(SyntheticSurface::new(doc.clone(), 1024, 800));
    let orchestrator = Orchestrator::new(quick_config()).expect("config is valid");
    let (on_progress, progress) = progress_recorder();
    let opts = CaptureOptions {
        on_progress: Some(on_progress),
        ..CaptureOptions::default()
    };

    let finished = orchestrator
        .capture(surface.clone(), &opts)
        .await
        .expect("capture succeeds");

    assert_eq!(finished.tiles.len(), 1);
    assert_eq!(finished.scale, 1.0);
    assert_eq!(
        (finished.total_width, finished.total_height),
        (1024, 3000)
    );
    assert_eq!(finished.frames_absorbed, 5);
    assert_eq!(finished.tiles[0].surface, doc, "stitched output differs from source");

    let seen = progress.lock().unwrap().clone();
    assert_eq!(seen, vec![0.2, 0.4, 0.6, 0.8, 1.0]);
    assert_eq!(surface.restores(), 1);
    assert_eq!(surface.scroll_position().await.unwrap(), (0.0, 0.0));
}

#[tokio::test]
async fn high_density_surface_scales_from_the_first_bitmap() {
    // 2.0 device pixels per CSS pixel: the page reports 1024x3000 CSS
    // but every snapshot arrives 2048 wide.
    let doc = ruled_document(2048, 6000);
    let surface = Arc::new(SyntheticSurface::new(doc.clone(), 1024, 800).with_dpr(2.0));
    let orchestrator = Orchestrator::new(quick_config()).expect("config is valid");

    let finished = orchestrator
        .capture(surface, &CaptureOptions::default())
        .await
        .expect("capture succeeds");

    assert_eq!(finished.scale, 2.0);
    assert_eq!(
        (finished.total_width, finished.total_height),
        (2048, 6000)
    );
    assert_eq!(finished.tiles.len(), 1);
    assert_eq!(finished.tiles[0].surface, doc, "high-density stitch differs from source");
}

#[tokio::test]
async fn wide_document_walks_columns_and_reports_clamped_positions() {
    let doc = ruled_document(2500, 1500);
    let surface = Arc::new(SyntheticSurface::new(doc.clone(), 1000, 700));
    let orchestrator = Orchestrator::new(quick_config()).expect("config is valid");

    let finished = orchestrator
        .capture(surface.clone(), &CaptureOptions::default())
        .await
        .expect("capture succeeds");

    // 3 columns x 3 rows; the right column clamps from x=2000 to x=1500
    // and the frame must carry the clamped position for compositing.
    assert_eq!(finished.frames_absorbed, 9);
    assert_eq!((finished.total_width, finished.total_height), (2500, 1500));
    assert_eq!(finished.tiles[0].surface, doc, "column stitch differs from source");
    assert!(surface
        .scroll_history()
        .iter()
        .all(|&(x, _)| x <= 1500.0));
}

#[tokio::test]
async fn short_document_yields_one_trimmed_tile() {
    // Smaller than the viewport on both axes: the snapshot pads past the
    // document edge, the tile plan trims the output back to the page.
    let doc = ruled_document(600, 400);
    let surface = Arc::new(SyntheticSurface::new(doc.clone(), 1024, 800));
    let orchestrator = Orchestrator::new(quick_config()).expect("config is valid");

    let finished = orchestrator
        .capture(surface, &CaptureOptions::default())
        .await
        .expect("capture succeeds");

    assert_eq!(finished.frames_absorbed, 1);
    assert_eq!((finished.total_width, finished.total_height), (600, 400));
    assert_eq!(finished.tiles[0].surface, doc, "trimmed tile differs from source");
}

#[tokio::test]
async fn split_capture_persists_named_tiles_and_manifest() {
    let doc = ruled_document(1024, 3000);
    let surface = Arc::new(SyntheticSurface::new(doc.clone(), 1024, 800));
    let config = CaptureConfig {
        tile_caps: TileCaps {
            max_width: 2000,
            max_height: 1200,
            max_area: 60_000_000,
        },
        ..quick_config()
    };
    let orchestrator = Orchestrator::new(config).expect("config is valid");

    let splits = Arc::new(Mutex::new(Vec::new()));
    let split_sink = Arc::clone(&splits);
    let opts = CaptureOptions {
        on_split: Some(Arc::new(move |n| split_sink.lock().unwrap().push(n))),
        base_name: "page".to_string(),
        ..CaptureOptions::default()
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DirStore::new(dir.path());

    let artifacts = orchestrator
        .start_capture(surface, &store, &opts)
        .await
        .expect("capture succeeds");

    assert_eq!(*splits.lock().unwrap(), vec![3], "split must fire once");
    assert_eq!(artifacts.images.len(), 3);
    for name in ["page-01.png", "page-02.png", "page-03.png", "page.html"] {
        assert!(dir.path().join(name).exists(), "{name} missing");
    }

    // Reassemble the page from the manifest's tile table alone.
    let manifest = std::fs::read_to_string(dir.path().join("page.html")).expect("manifest");
    let table = manifest_json(&manifest);
    assert_eq!(table["total_width"], 1024);
    assert_eq!(table["total_height"], 3000);

    let mut canvas = RgbaImage::new(1024, 3000);
    for tile in table["tiles"].as_array().expect("tiles array") {
        let name = tile["name"].as_str().expect("tile name");
        let bytes = std::fs::read(dir.path().join(name)).expect("tile bytes");
        assert_eq!(
            tile["sha256"].as_str().expect("tile digest"),
            hex::encode(sha2::Sha256::digest(&bytes)),
            "stored bytes do not match the manifest digest"
        );
        let png = image::load_from_memory(&bytes).expect("tile decodes").to_rgba8();
        let left = tile["left"].as_u64().expect("left") as i64;
        let top = tile["top"].as_u64().expect("top") as i64;
        imageops::replace(&mut canvas, &png, left, top);
    }
    assert_eq!(canvas, doc, "reassembled manifest differs from source");
}

#[tokio::test]
async fn single_tile_store_uses_the_bare_base_name() {
    let surface = Arc::new(SyntheticSurface::new(ruled_document(800, 600), 1024, 800));
    let orchestrator = Orchestrator::new(quick_config()).expect("config is valid");
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DirStore::new(dir.path());
    let opts = CaptureOptions {
        base_name: "shot".to_string(),
        ..CaptureOptions::default()
    };

    let artifacts = orchestrator
        .start_capture(surface, &store, &opts)
        .await
        .expect("capture succeeds");

    assert_eq!(artifacts.images.len(), 1);
    assert!(dir.path().join("shot.png").exists());
    assert!(dir.path().join("shot.html").exists());
    assert!(!dir.path().join("shot-01.png").exists());
}

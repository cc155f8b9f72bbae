//! Encoding and persistence: PNG tiles, deterministic names, and the
//! manifest document that reassembles them.

use std::path::PathBuf;

use async_trait::async_trait;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};
use log::debug;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::geometry::TileRect;
use crate::session::{FinishedCapture, Tile};

/// Where a stored artifact ended up: a filesystem path or an URL,
/// depending on the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredLocation(pub String);

/// Durable storage for capture artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores one named artifact and returns its addressable location.
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<StoredLocation>;
}

/// Stores artifacts as plain files under a directory.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for DirStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<StoredLocation> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("create {}: {e}", parent.display())))?;
        }
        std::fs::write(&path, bytes)
            .map_err(|e| Error::Storage(format!("write {}: {e}", path.display())))?;
        Ok(StoredLocation(path.display().to_string()))
    }
}

/// One encoded output tile ready for storage.
pub struct EncodedImage {
    pub rect: TileRect,
    pub png: Vec<u8>,
    /// Hex SHA-256 of the PNG bytes, recorded in the manifest so a
    /// viewer can verify what it loads.
    pub digest: String,
}

/// Locations of everything a persisted capture produced.
#[derive(Debug, Clone)]
pub struct CaptureArtifacts {
    pub manifest: StoredLocation,
    pub images: Vec<StoredLocation>,
}

/// Encodes every tile to PNG on the blocking pool; encoding is pure CPU
/// and the tiles are independent, so they run in parallel.
pub async fn encode_tiles(tiles: &[Tile]) -> Result<Vec<EncodedImage>> {
    let mut handles = Vec::with_capacity(tiles.len());
    for tile in tiles {
        let surface = tile.surface.clone();
        let rect = tile.rect;
        handles.push(tokio::task::spawn_blocking(move || encode_tile(&surface, rect)));
    }
    futures::future::try_join_all(handles)
        .await
        .map_err(|e| Error::Storage(format!("encoder task died: {e}")))?
        .into_iter()
        .collect()
}

fn encode_tile(surface: &RgbaImage, rect: TileRect) -> Result<EncodedImage> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            surface.as_raw(),
            surface.width(),
            surface.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| Error::Storage(format!("PNG encode of tile {}: {e}", rect.index)))?;
    let digest = hex::encode(Sha256::digest(&png));
    Ok(EncodedImage { rect, png, digest })
}

/// Deterministic image name: the base alone for a single tile, or a
/// 1-based zero-padded suffix wide enough for the whole set (at least
/// two digits) when the capture split.
pub fn image_name(base: &str, index: usize, count: usize) -> String {
    if count <= 1 {
        format!("{base}.png")
    } else {
        let width = count.to_string().len().max(2);
        format!("{base}-{:0width$}.png", index + 1)
    }
}

pub fn manifest_name(base: &str) -> String {
    format!("{base}.html")
}

#[derive(Serialize)]
struct ManifestTile<'a> {
    name: &'a str,
    location: &'a str,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    sha256: &'a str,
}

#[derive(Serialize)]
struct ManifestDoc<'a> {
    surface: u64,
    total_width: u32,
    total_height: u32,
    scale: f64,
    tiles: Vec<ManifestTile<'a>>,
}

/// Builds the self-contained viewer page: absolutely positioned tile
/// images over a page-sized stage, plus the machine-readable tile table
/// embedded as JSON.
pub fn build_manifest(
    finished: &FinishedCapture,
    base: &str,
    entries: &[(String, StoredLocation, &EncodedImage)],
) -> Result<String> {
    let doc = ManifestDoc {
        surface: finished.surface_id.0,
        total_width: finished.total_width,
        total_height: finished.total_height,
        scale: finished.scale,
        tiles: entries
            .iter()
            .map(|(name, location, image)| ManifestTile {
                name,
                location: &location.0,
                left: image.rect.left,
                top: image.rect.top,
                width: image.rect.width(),
                height: image.rect.height(),
                sha256: &image.digest,
            })
            .collect(),
    };
    let table = serde_json::to_string_pretty(&doc)
        .map_err(|e| Error::Storage(format!("manifest serialization: {e}")))?;

    let mut imgs = String::new();
    for (name, _, image) in entries {
        imgs.push_str(&format!(
            "    <img src=\"{}\" style=\"left:{}px;top:{}px;width:{}px;height:{}px\" alt=\"tile {}\">\n",
            name,
            image.rect.left,
            image.rect.top,
            image.rect.width(),
            image.rect.height(),
            image.rect.index + 1,
        ));
    }

    Ok(format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{base}</title>\n<style>\n  \
         body {{ margin: 0; background: #202124; }}\n  \
         #page {{ position: relative; margin: 0 auto; width: {w}px; height: {h}px; background: #fff; }}\n  \
         #page img {{ position: absolute; display: block; }}\n</style>\n</head>\n<body>\n\
         <div id=\"page\">\n{imgs}</div>\n\
         <script type=\"application/json\" id=\"capture-manifest\">\n{table}\n</script>\n\
         </body>\n</html>\n",
        base = base,
        w = finished.total_width,
        h = finished.total_height,
        imgs = imgs,
        table = table,
    ))
}

/// Encodes, stores and indexes a finished capture.
///
/// Borrows the capture: when the store rejects an artifact the tiles
/// stay alive in the caller's hands, ready for a retry elsewhere.
pub async fn persist_capture(
    finished: &FinishedCapture,
    store: &dyn ObjectStore,
    base: &str,
) -> Result<CaptureArtifacts> {
    let encoded = encode_tiles(&finished.tiles).await?;
    let count = encoded.len();

    let mut entries = Vec::with_capacity(count);
    for image in &encoded {
        let name = image_name(base, image.rect.index, count);
        let location = store.put(&name, &image.png).await?;
        debug!("stored tile {} as {}", image.rect.index, location.0);
        entries.push((name, location, image));
    }

    let manifest = build_manifest(finished, base, &entries)?;
    let manifest_location = store.put(&manifest_name(base), manifest.as_bytes()).await?;

    Ok(CaptureArtifacts {
        manifest: manifest_location,
        images: entries.into_iter().map(|(_, location, _)| location).collect(),
    })
}

impl FinishedCapture {
    /// Encodes and stores this capture under `base`. See
    /// [`persist_capture`]; callable repeatedly against different stores.
    pub async fn persist(
        &self,
        store: &dyn ObjectStore,
        base: &str,
    ) -> Result<CaptureArtifacts> {
        persist_capture(self, store, base).await
    }
}

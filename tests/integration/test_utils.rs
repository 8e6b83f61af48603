//! Test utilities for integration tests.
//!
//! Provides a small HTTP server that serves either an in-memory file map or a
//! directory on disk, counting requests per path, plus helpers for writing
//! synthetic images.

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

// =============================================================================
// Static Test Server
// =============================================================================

enum Content {
    Memory(Mutex<HashMap<String, Bytes>>),
    Directory(PathBuf),
}

struct ServerState {
    content: Content,
    hits: Mutex<HashMap<String, usize>>,
}

/// An HTTP server bound to an ephemeral local port.
///
/// Request paths are matched without their leading slash. The server stops
/// when the handle is dropped.
pub struct TestServer {
    base_url: String,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve in-memory files keyed by path (e.g. `iiif/page/info.json`).
    ///
    /// Files can be added later with [`TestServer::insert`], once the bound
    /// address is known.
    pub async fn from_files(files: HashMap<String, Bytes>) -> Self {
        Self::start(Content::Memory(Mutex::new(files))).await
    }

    /// Add or replace an in-memory file. No-op for directory servers.
    pub fn insert(&self, path: &str, body: impl Into<Bytes>) {
        if let Content::Memory(files) = &self.state.content {
            files
                .lock()
                .unwrap()
                .insert(path.trim_start_matches('/').to_string(), body.into());
        }
    }

    /// Remove an in-memory file so later requests get a 404.
    pub fn remove(&self, path: &str) {
        if let Content::Memory(files) = &self.state.content {
            files.lock().unwrap().remove(path.trim_start_matches('/'));
        }
    }

    /// Serve every file under `root`.
    pub async fn from_directory(root: impl Into<PathBuf>) -> Self {
        Self::start(Content::Directory(root.into())).await
    }

    async fn start(content: Content) -> Self {
        let state = Arc::new(ServerState {
            content,
            hits: Mutex::new(HashMap::new()),
        });
        let router = Router::new()
            .fallback(serve_file)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("local address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// How many times `path` was requested, whatever the response.
    pub fn hits(&self, path: &str) -> usize {
        let hits = self.state.hits.lock().unwrap();
        hits.get(path.trim_start_matches('/')).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_file(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/').to_string();
    record_hit(&state, &path);

    let body = match &state.content {
        Content::Memory(files) => lookup(files, &path),
        Content::Directory(root) => {
            if path.split('/').any(|segment| segment == "..") {
                None
            } else {
                tokio::fs::read(root.join(&path)).await.ok().map(Bytes::from)
            }
        }
    };

    match body {
        Some(body) => ([(header::CONTENT_TYPE, content_type(&path))], body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn record_hit(state: &ServerState, path: &str) {
    *state.hits.lock().unwrap().entry(path.to_string()).or_insert(0) += 1;
}

fn lookup(files: &Mutex<HashMap<String, Bytes>>, path: &str) -> Option<Bytes> {
    files.lock().unwrap().get(path).cloned()
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Image Helpers
// =============================================================================

/// A deterministic gradient, so crops at different offsets differ.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

/// Save `image` as PNG at `dir/name` and return the path as a string.
pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> String {
    let path = dir.join(name);
    image.save_with_format(&path, ImageFormat::Png).unwrap();
    path.to_string_lossy().to_string()
}

/// Encode `image` as PNG bytes.
pub fn png_bytes(image: &RgbImage) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// A single-pixel PNG.
pub fn pixel_png(color: [u8; 3]) -> Bytes {
    png_bytes(&RgbImage::from_pixel(1, 1, Rgb(color)))
}

/// Decode an image file written by the generator.
pub fn read_image(path: &Path) -> RgbImage {
    image::open(path).unwrap().to_rgb8()
}

/// Relative paths of every file under `root`, sorted.
pub fn list_files(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let mut files = Vec::new();
    if root.exists() {
        walk(root, root, &mut files);
    }
    files.sort();
    files
}

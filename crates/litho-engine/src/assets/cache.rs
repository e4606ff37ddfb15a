use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pipeline::pending::{self, Completer, Pending};

use super::Pixmap;

/// Opaque handle to an asset registered with a context's cache.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AssetRef(u64);

#[cfg(test)]
impl AssetRef {
    pub(crate) fn test_ref(id: u64) -> Self {
        Self(id)
    }
}

/// Where an image's bytes come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Straight-alpha RGBA8 pixels, tightly packed.
    Rgba8 {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    /// Encoded bytes (png/jpeg), decoded on the loader thread.
    Encoded(Vec<u8>),
    /// File read and decoded on the loader thread.
    Path(PathBuf),
}

/// Aggregate outcome delivered to `on_all_assets_loaded` subscribers.
///
/// `errors` is empty when every load succeeded; individual failures accumulate
/// here instead of failing the subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetLoadResult {
    pub loaded_count: usize,
    pub errors: Vec<String>,
}

enum AssetState {
    Loading,
    Ready(Arc<Pixmap>),
    Failed, // error string lives in the aggregate list
}

struct CacheInner {
    entries: HashMap<AssetRef, AssetState>,
    next_id: u64,
    /// Loads registered but not yet completed.
    in_flight: usize,
    loaded: usize,
    errors: Vec<String>,
    /// Subscribers waiting for the in-flight count to reach zero.
    /// Drained (retired) whenever the aggregate resolves.
    waiters: Vec<Completer<AssetLoadResult>>,
}

/// Load-tracking image cache shared between a context and its loader threads.
///
/// Pixel data is handed out as `Arc<Pixmap>`, so frames keep their image
/// dependencies alive independently of the cache and the context.
pub struct AssetCache {
    inner: Mutex<CacheInner>,
}

impl AssetCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_id: 0,
                in_flight: 0,
                loaded: 0,
                errors: Vec::new(),
                waiters: Vec::new(),
            }),
        })
    }

    /// Registers an asset and starts loading it on a detached thread.
    pub fn load(self: &Arc<Self>, source: ImageSource) -> AssetRef {
        let asset = {
            let mut inner = self.inner.lock();
            let asset = AssetRef(inner.next_id);
            inner.next_id += 1;
            inner.entries.insert(asset, AssetState::Loading);
            inner.in_flight += 1;
            asset
        };

        let cache = Arc::clone(self);
        std::thread::spawn(move || {
            let result = decode(source);
            cache.complete_load(asset, result);
        });

        asset
    }

    /// Pixel data for a ready asset; `None` while loading or after failure.
    pub fn ready_pixmap(&self, asset: AssetRef) -> Option<Arc<Pixmap>> {
        match self.inner.lock().entries.get(&asset) {
            Some(AssetState::Ready(pm)) => Some(Arc::clone(pm)),
            _ => None,
        }
    }

    /// Resolves once every registered load has finished (successfully or not).
    ///
    /// If nothing is in flight the handle is ready immediately with the
    /// current totals. Each subscription resolves exactly once and is then
    /// retired.
    pub fn subscribe(&self) -> Pending<AssetLoadResult> {
        let mut inner = self.inner.lock();
        if inner.in_flight == 0 {
            return Pending::ready(snapshot(&inner));
        }

        // The fallback snapshot covers cache teardown with loads still running:
        // the subscriber then observes the partial counts from subscription time.
        let (handle, completer) = pending::channel(snapshot(&inner));
        inner.waiters.push(completer);
        handle
    }

    /// Resolves all current subscribers with the partial totals available now.
    ///
    /// Called on context disposal so no waiter outlives its context.
    pub(crate) fn resolve_partial(&self) {
        let mut inner = self.inner.lock();
        let result = snapshot(&inner);
        for waiter in inner.waiters.drain(..) {
            waiter.complete(result.clone());
        }
    }

    fn complete_load(&self, asset: AssetRef, result: Result<Pixmap, String>) {
        let mut inner = self.inner.lock();

        // A disposed context may have drained the waiters already; the entry
        // update below is still valid for frames holding the cache alive.
        match result {
            Ok(pixmap) => {
                inner.entries.insert(asset, AssetState::Ready(Arc::new(pixmap)));
                inner.loaded += 1;
            }
            Err(message) => {
                log::warn!("asset load failed: {message}");
                inner.entries.insert(asset, AssetState::Failed);
                inner.errors.push(message);
            }
        }

        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 {
            let result = snapshot(&inner);
            for waiter in inner.waiters.drain(..) {
                waiter.complete(result.clone());
            }
        }
    }
}

fn snapshot(inner: &CacheInner) -> AssetLoadResult {
    AssetLoadResult {
        loaded_count: inner.loaded,
        errors: inner.errors.clone(),
    }
}

fn decode(source: ImageSource) -> Result<Pixmap, String> {
    match source {
        ImageSource::Rgba8 { width, height, pixels } => {
            Pixmap::from_rgba8_straight(width, height, &pixels)
        }
        ImageSource::Encoded(bytes) => decode_bytes(&bytes),
        ImageSource::Path(path) => {
            let bytes = std::fs::read(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            decode_bytes(&bytes)
        }
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<Pixmap, String> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| format!("image decode failed: {e}"))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Pixmap::from_rgba8_straight(width, height, decoded.as_raw())
}

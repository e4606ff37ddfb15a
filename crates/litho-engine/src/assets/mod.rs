//! Image assets: reference-counted decoded pixels and the load-tracking cache.

mod cache;
mod pixmap;

pub use cache::{AssetCache, AssetLoadResult, AssetRef, ImageSource};
pub use pixmap::Pixmap;

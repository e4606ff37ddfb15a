use crate::assets::AssetRef;
use crate::coords::Rect;
use crate::scene::{DrawCmd, SceneBuilder, ZIndex};

/// Image draw payload.
///
/// The command references the asset by id; pixel data is resolved from the
/// asset cache at draw time. An asset that has not finished loading simply
/// does not emit pixels for that frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCmd {
    pub rect: Rect,
    pub asset: AssetRef,
}

impl ImageCmd {
    #[inline]
    pub fn new(rect: Rect, asset: AssetRef) -> Self {
        Self { rect, asset }
    }
}

impl SceneBuilder {
    /// Records an image draw command referencing a loaded (or loading) asset.
    #[inline]
    pub fn push_image(&mut self, z: ZIndex, rect: Rect, asset: AssetRef) {
        self.push(z, DrawCmd::Image(ImageCmd::new(rect, asset)));
    }
}

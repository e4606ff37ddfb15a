use crate::coords::Rect;
use crate::paint::Paint;
use crate::scene::{DrawCmd, SceneBuilder, ZIndex};

/// Rounded rectangle draw payload with a uniform corner radius.
///
/// The radius is clamped at fill time to half the shorter side.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundedRectCmd {
    pub rect: Rect,
    pub radius: f32,
    pub paint: Paint,
}

impl RoundedRectCmd {
    #[inline]
    pub fn new(rect: Rect, radius: f32, paint: Paint) -> Self {
        Self { rect, radius, paint }
    }
}

impl SceneBuilder {
    /// Records a rounded rectangle draw command.
    #[inline]
    pub fn push_rounded_rect(&mut self, z: ZIndex, rect: Rect, radius: f32, paint: Paint) {
        self.push(z, DrawCmd::RoundedRect(RoundedRectCmd::new(rect, radius, paint)));
    }
}

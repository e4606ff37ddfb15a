use crate::coords::Rect;
use crate::scene::shapes::circle::CircleCmd;
use crate::scene::shapes::image::ImageCmd;
use crate::scene::shapes::rect::RectCmd;
use crate::scene::shapes::rounded_rect::RoundedRectCmd;

/// Rasterizer-agnostic draw command stream.
///
/// Extending the scene:
/// - add a new shape module under `scene::shapes::*`
/// - add a new variant here
/// - implement push helpers inside that shape module
/// - teach `raster::painter` to fill the new shape
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCmd {
    Rect(RectCmd),
    RoundedRect(RoundedRectCmd),
    Circle(CircleCmd),
    Image(ImageCmd),
}

impl DrawCmd {
    /// Bounding rectangle in scene coordinates, before clipping.
    pub fn bounds(&self) -> Rect {
        match self {
            DrawCmd::Rect(c) => c.rect.normalized(),
            DrawCmd::RoundedRect(c) => c.rect.normalized(),
            DrawCmd::Circle(c) => Rect::new(
                c.center.x - c.radius,
                c.center.y - c.radius,
                c.radius * 2.0,
                c.radius * 2.0,
            ),
            DrawCmd::Image(c) => c.rect.normalized(),
        }
    }
}

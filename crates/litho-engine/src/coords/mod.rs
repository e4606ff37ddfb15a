//! Coordinate and geometry types shared across the pipeline.
//!
//! Canonical space:
//! - Logical pixels
//! - Origin top-left
//! - +X right, +Y down
//!
//! Damage rectangles and surface bounds use the same space, so rasterization
//! needs no coordinate conversion.

mod rect;
mod size;
mod vec2;

pub use rect::Rect;
pub use size::Size;
pub use vec2::Vec2;

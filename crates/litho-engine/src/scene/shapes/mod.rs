//! Shape-specific draw payloads and `SceneBuilder` push helpers.

pub mod circle;
pub mod image;
pub mod rect;
pub mod rounded_rect;

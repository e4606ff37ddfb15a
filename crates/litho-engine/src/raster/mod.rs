//! CPU rasterization into caller-owned surfaces.

pub(crate) mod painter;
mod surface;

pub use surface::{AlphaType, ColorType, Surface, SurfaceError};

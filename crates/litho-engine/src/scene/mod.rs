//! Scene (draw stream) types.
//!
//! Responsibilities:
//! - record rasterizer-agnostic draw commands on the caller thread
//! - provide deterministic ordering (z-index + insertion order)
//! - produce the immutable snapshot consumed by the owner-thread stages
//! - keep shape-specific helpers isolated per shape file under `scene::shapes`

mod builder;
mod cmd;
mod key;
mod z_index;

pub mod shapes;

pub use builder::{Scene, SceneBuilder, SceneItem};
pub use cmd::DrawCmd;
pub use key::SortKey;
pub use z_index::ZIndex;

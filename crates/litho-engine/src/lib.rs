//! Lithograph engine crate.
//!
//! This crate owns the staged rendering pipeline: scene recording on caller
//! threads, measure/layout/draw dispatched onto the single owner thread, and
//! CPU rasterization of the resulting frames into caller-supplied surfaces.

pub mod assets;
pub mod coords;
pub mod frame;
pub mod paint;
pub mod pipeline;
pub mod raster;
pub mod scene;

pub mod logging;
pub mod time;

//! Frames: immutable draw-instruction snapshots produced by `draw()`.
//!
//! A frame is rasterizable independently of the context that produced it: its
//! instructions hold reference-counted pixel data, and its link to the
//! previous frame of the same lineage is captured at creation time.

mod damage;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::assets::{AssetRef, Pixmap};
use crate::coords::{Rect, Vec2};
use crate::paint::Paint;
use crate::raster::Surface;
use crate::raster::painter::{self, RampCache};

/// Damage rectangles produced by one rasterization call.
///
/// Rectangles are in destination-surface coordinates. Produced fresh per call
/// and not retained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterResult {
    pub damage: Vec<Rect>,
}

/// Error for operations attempted on a disposed frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RasterError {
    FrameDisposed,
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::FrameDisposed => write!(f, "frame has been disposed"),
        }
    }
}

impl std::error::Error for RasterError {}

/// One resolved draw instruction in device coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub(crate) kind: InstructionKind,
    /// Exact scissor rect; already folded into `bounds` but needed for
    /// edge-coverage during filling.
    pub(crate) clip: Option<Rect>,
    /// Clip-intersected device bounds; the unit of damage tracking.
    pub(crate) bounds: Rect,
}

#[derive(Debug, Clone)]
pub(crate) enum InstructionKind {
    Rect {
        rect: Rect,
        paint: Paint,
    },
    RoundedRect {
        rect: Rect,
        radius: f32,
        paint: Paint,
    },
    Circle {
        center: Vec2,
        radius: f32,
        paint: Paint,
    },
    Image {
        rect: Rect,
        asset: AssetRef,
        pixmap: Arc<Pixmap>,
    },
}

impl PartialEq for InstructionKind {
    /// Structural comparison: geometry and the paint it references. Images
    /// compare by asset identity, never pixel-by-pixel.
    fn eq(&self, other: &Self) -> bool {
        use InstructionKind::*;
        match (self, other) {
            (Rect { rect: a, paint: pa }, Rect { rect: b, paint: pb }) => a == b && pa == pb,
            (
                RoundedRect { rect: a, radius: ra, paint: pa },
                RoundedRect { rect: b, radius: rb, paint: pb },
            ) => a == b && ra == rb && pa == pb,
            (
                Circle { center: a, radius: ra, paint: pa },
                Circle { center: b, radius: rb, paint: pb },
            ) => a == b && ra == rb && pa == pb,
            (Image { rect: a, asset: aa, .. }, Image { rect: b, asset: ab, .. }) => {
                a == b && aa == ab
            }
            _ => false,
        }
    }
}

enum FrameState {
    Alive(FrameData),
    Disposed,
}

struct FrameData {
    instructions: Arc<[Instruction]>,
    /// Instruction list of the previous frame from the same context lineage,
    /// captured at `draw()` time. `None` for the lineage's first frame.
    prev: Option<Arc<[Instruction]>>,
    /// Exclusively-owned rasterization cache, released on dispose.
    ramps: RampCache,
}

/// Immutable output of one `draw()` call.
///
/// Disposal is idempotent and safe from any thread; rasterization is
/// single-threaded by contract, and concurrent calls on one frame serialize
/// on the internal lock rather than interleave.
pub struct Frame {
    state: Mutex<FrameState>,
}

impl Frame {
    pub(crate) fn new(instructions: Arc<[Instruction]>, prev: Option<Arc<[Instruction]>>) -> Self {
        Self {
            state: Mutex::new(FrameState::Alive(FrameData {
                instructions,
                prev,
                ramps: RampCache::new(),
            })),
        }
    }

    /// The neutral frame resolved by stages racing disposal.
    pub(crate) fn empty() -> Self {
        Self::new(Vec::new().into(), None)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.state.lock(), FrameState::Disposed)
    }

    /// True for a disposed frame or one holding no instructions.
    pub fn is_empty(&self) -> bool {
        match &*self.state.lock() {
            FrameState::Alive(data) => data.instructions.is_empty(),
            FrameState::Disposed => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn instructions(&self) -> Option<Arc<[Instruction]>> {
        match &*self.state.lock() {
            FrameState::Alive(data) => Some(Arc::clone(&data.instructions)),
            FrameState::Disposed => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn prev_instructions(&self) -> Option<Arc<[Instruction]>> {
        match &*self.state.lock() {
            FrameState::Alive(data) => data.prev.as_ref().map(Arc::clone),
            FrameState::Disposed => None,
        }
    }

    /// Rasterizes the full instruction list into `surface`.
    ///
    /// `clear_first` clears the destination to transparent before drawing;
    /// false composites over existing content. Full rasterization reports the
    /// entire target as damage. The exception is an empty frame: by convention
    /// performs no pixel writes (not even the clear) and reports no damage.
    pub fn raster_into(
        &self,
        surface: &mut Surface<'_>,
        clear_first: bool,
    ) -> Result<RasterResult, RasterError> {
        // The lock is held for the whole call: dispose from another thread
        // cannot observe a partially written surface.
        let mut state = self.state.lock();
        let FrameState::Alive(data) = &mut *state else {
            return Err(RasterError::FrameDisposed);
        };

        if data.instructions.is_empty() {
            return Ok(RasterResult::default());
        }

        if clear_first {
            surface.clear();
        }

        let FrameData { instructions, ramps, .. } = data;
        painter::fill(surface, instructions, None, ramps);

        Ok(RasterResult { damage: vec![surface.bounds()] })
    }

    /// Rasterizes only the regions that changed since the previous frame of
    /// this lineage, returning the precise damage set.
    ///
    /// The caller is responsible for having preserved the pixels outside the
    /// damage rectangles (typically by rasterizing the previous frame into
    /// the same surface). Damage rectangles are expanded to the pixel grid so
    /// the redrawn regions match a full rasterization exactly.
    pub fn raster_delta_into(&self, surface: &mut Surface<'_>) -> Result<RasterResult, RasterError> {
        let mut state = self.state.lock();
        let FrameState::Alive(data) = &mut *state else {
            return Err(RasterError::FrameDisposed);
        };
        let FrameData { instructions, prev, ramps } = data;

        let surface_bounds = surface.bounds();
        let raw = match prev {
            Some(prev) => damage::compute(prev, instructions),
            None if instructions.is_empty() => Vec::new(),
            None => vec![surface_bounds],
        };

        let damage: Vec<Rect> = raw
            .into_iter()
            .filter_map(|r| r.round_out().intersect(surface_bounds))
            .collect();

        for rect in &damage {
            surface.clear_rect(*rect);
            painter::fill(surface, instructions, Some(*rect), ramps);
        }

        Ok(RasterResult { damage })
    }

    /// Releases the instruction list and rasterization caches.
    ///
    /// Idempotent and safe to call from any thread.
    pub fn dispose(&self) {
        *self.state.lock() = FrameState::Disposed;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            FrameState::Alive(data) => f
                .debug_struct("Frame")
                .field("instructions", &data.instructions.len())
                .field("has_prev", &data.prev.is_some())
                .finish(),
            FrameState::Disposed => f.debug_struct("Frame").field("disposed", &true).finish(),
        }
    }
}

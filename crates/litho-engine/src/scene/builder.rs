use crate::coords::Rect;

use super::{DrawCmd, SortKey, ZIndex};

/// A single recorded draw item: sort key + command + clip rect.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneItem {
    pub key: SortKey,
    pub cmd: DrawCmd,
    /// Scissor rect in logical pixels. `None` = no clipping (draw everywhere).
    pub clip: Option<Rect>,
}

/// Recorder for one `render()` call.
///
/// # Clipping
///
/// Use [`push_clip`](SceneBuilder::push_clip) / [`pop_clip`](SceneBuilder::pop_clip)
/// to scope draw commands to a scissor rect. Clips are intersected with the
/// current parent, so nested clipped containers work correctly.
#[derive(Debug, Default)]
pub struct SceneBuilder {
    items: Vec<SceneItem>,
    next_order: u32,

    /// Stack of active scissor rects (logical pixels).
    /// The top is always the current effective clip, already intersected with all parents.
    clip_stack: Vec<Rect>,
}

impl SceneBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a draw command with the given z-index.
    ///
    /// The item inherits the current clip rect from the clip stack.
    #[inline]
    pub fn push(&mut self, z: ZIndex, cmd: DrawCmd) {
        let order = self.next_order;
        self.next_order = self.next_order.wrapping_add(1);

        self.items.push(SceneItem {
            key: SortKey::new(z, order),
            cmd,
            clip: self.clip_stack.last().copied(),
        });
    }

    /// Begins a scissor region. All draw commands pushed until
    /// [`pop_clip`](SceneBuilder::pop_clip) are clipped to `rect`
    /// (intersected with any parent clip rect).
    ///
    /// Calls must be balanced with `pop_clip`.
    #[inline]
    pub fn push_clip(&mut self, rect: Rect) {
        let effective = match self.clip_stack.last() {
            None => rect,
            // Intersect with the parent; if no overlap, produce a zero-area rect so
            // the rasterizer skips those draw commands.
            Some(&parent) => parent.intersect(rect).unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0)),
        };
        self.clip_stack.push(effective);
    }

    /// Ends the most recent scissor region started by [`push_clip`](SceneBuilder::push_clip).
    ///
    /// # Panics
    /// Panics (debug only) if called without a matching `push_clip`.
    #[inline]
    pub fn pop_clip(&mut self) {
        debug_assert!(!self.clip_stack.is_empty(), "pop_clip called without matching push_clip");
        self.clip_stack.pop();
    }

    /// Consumes the recorder and produces the immutable scene snapshot.
    #[inline]
    pub fn finish(self) -> Scene {
        Scene { items: self.items }
    }
}

/// Immutable tree snapshot produced by one `render()` call.
///
/// The owner-thread stages read whatever snapshot is current at execution
/// time; the snapshot itself never changes after `finish()`.
#[derive(Debug, Default)]
pub struct Scene {
    items: Vec<SceneItem>,
}

impl Scene {
    /// Returns items in insertion order (not paint order).
    #[inline]
    pub fn items(&self) -> &[SceneItem] {
        &self.items
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Natural content extent: the union of clipped item bounds, measured
    /// from the scene origin.
    pub fn content_bounds(&self) -> Option<Rect> {
        let mut acc: Option<Rect> = None;
        for item in &self.items {
            let bounds = match item.clip {
                Some(clip) => match item.cmd.bounds().intersect(clip) {
                    Some(b) => b,
                    None => continue,
                },
                None => item.cmd.bounds(),
            };
            if bounds.is_empty() {
                continue;
            }
            acc = Some(match acc {
                Some(a) => a.union(bounds),
                None => bounds,
            });
        }
        acc
    }
}

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::assets::{AssetCache, AssetLoadResult, AssetRef, ImageSource};
use crate::coords::{Rect, Size, Vec2};
use crate::frame::{Frame, Instruction, InstructionKind};
use crate::paint::Paint;
use crate::scene::{DrawCmd, Scene, SceneBuilder, SceneItem};
use crate::time::Stopwatch;

use super::error::StageError;
use super::lazy::Lazy;
use super::owner::OwnerThread;
use super::pending::{self, Pending};

/// How a measure constraint is interpreted, per axis.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MeasureMode {
    /// The constraint value is ignored; measure to the natural content extent.
    Unspecified,
    /// Resolve to exactly the constraint value.
    Exactly,
    /// Resolve to the content extent, capped at the constraint value.
    AtMost,
}

/// Layout inputs fixed at `layout()` call time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LayoutSpec {
    pub width: f32,
    pub height: f32,
    pub rtl: bool,
}

/// Result of a completed `draw()`.
///
/// `owner_ms` is owner-thread wall time only; the caller can subtract it from
/// total pipeline latency to attribute scheduling overhead.
#[derive(Debug)]
pub struct DrawOutput {
    pub frame: Frame,
    pub owner_ms: f64,
}

/// Handle type returned by the async stages.
pub type StagePending<T> = Pending<Result<T, StageError>>;

/// Outstanding operation counts per stage kind.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct PendingOps {
    pub measure: usize,
    pub layout: usize,
    pub draw: usize,
}

#[derive(Debug, Copy, Clone)]
enum StageKind {
    Measure,
    Layout,
    Draw,
}

#[derive(Default)]
struct Counters {
    measure: AtomicUsize,
    layout: AtomicUsize,
    draw: AtomicUsize,
}

impl Counters {
    fn cell(&self, kind: StageKind) -> &AtomicUsize {
        match kind {
            StageKind::Measure => &self.measure,
            StageKind::Layout => &self.layout,
            StageKind::Draw => &self.draw,
        }
    }
}

/// Context lifecycle, read atomically at both enqueue and execution time.
///
/// The tagged variant replaces scattered boolean checks: every owner-thread
/// job matches on it when it runs and branches to the neutral-result path.
enum ContextState {
    Active {
        scene: Arc<Scene>,
        layout: Option<LayoutSpec>,
    },
    Disposed,
}

/// Owner-side per-context state. Locked only from owner-thread jobs, so the
/// lock is uncontended; lock order is owner_slot → state.
struct OwnerSlot {
    scratch: Lazy<DrawScratch>,
    /// Instruction list of the most recent published draw, the predecessor
    /// for delta rasterization.
    last_instructions: Option<Arc<[Instruction]>>,
}

/// Reusable paint-order sort buffer; no per-frame allocation once warmed.
struct DrawScratch {
    order: Vec<usize>,
}

struct ContextShared {
    state: Mutex<ContextState>,
    owner_slot: Mutex<OwnerSlot>,
    counters: Counters,
    seq: AtomicU64,
    warned_missing_layout: AtomicBool,
}

/// The managed rendering context: owns the tree snapshot and dispatches the
/// staged operations onto the owner thread.
///
/// Clones share one context; callers on any thread may interleave calls.
/// `dispose()` may race in-flight stages freely: queued work completes with
/// neutral results instead of touching released state.
#[derive(Clone)]
pub struct ManagedContext {
    shared: Arc<ContextShared>,
    owner: Arc<OwnerThread>,
    assets: Arc<AssetCache>,
}

impl ManagedContext {
    /// Creates a context bound to the given owner thread.
    ///
    /// The owner handle is a constructor dependency on purpose: there is no
    /// process-global queue to reach for.
    pub fn new(owner: Arc<OwnerThread>) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                state: Mutex::new(ContextState::Active {
                    scene: Arc::new(Scene::default()),
                    layout: None,
                }),
                owner_slot: Mutex::new(OwnerSlot {
                    scratch: Lazy::new(|| DrawScratch { order: Vec::new() }),
                    last_instructions: None,
                }),
                counters: Counters::default(),
                seq: AtomicU64::new(0),
                warned_missing_layout: AtomicBool::new(false),
            }),
            owner,
            assets: AssetCache::new(),
        }
    }

    /// Synchronously replaces the tree snapshot with whatever `build` records.
    ///
    /// Runs entirely on the calling thread and never suspends. The swap is
    /// all-or-nothing: a panic inside `build` propagates and leaves the
    /// previous snapshot untouched. A disposed context ignores the call
    /// without invoking `build`, so callers racing disposal are not penalized.
    pub fn render(&self, build: impl FnOnce(&mut SceneBuilder)) {
        if self.is_disposed() {
            return;
        }

        let mut builder = SceneBuilder::new();
        build(&mut builder);
        let scene = Arc::new(builder.finish());

        let mut state = self.shared.state.lock();
        if let ContextState::Active { scene: current, .. } = &mut *state {
            *current = scene;
        }
    }

    /// Registers an image asset and starts loading it concurrently.
    pub fn load_image(&self, source: ImageSource) -> AssetRef {
        self.assets.load(source)
    }

    /// Measures the current tree against the given constraints.
    ///
    /// The constraints are fixed now; the tree snapshot is read when the owner
    /// thread executes the operation. Resolves `Size::zero()` if the context
    /// is disposed before or during execution.
    pub fn measure(
        &self,
        max_width: f32,
        width_mode: MeasureMode,
        max_height: f32,
        height_mode: MeasureMode,
        rtl: bool,
    ) -> StagePending<Size> {
        if let Err(e) = validate_constraint("measure", max_width, width_mode)
            .and_then(|()| validate_constraint("measure", max_height, height_mode))
        {
            return Pending::ready(Err(e));
        }
        // Measurement of an absolute-positioned scene is direction-independent.
        let _ = rtl;

        let shared = Arc::clone(&self.shared);
        self.dispatch(StageKind::Measure, move || {
            let scene = {
                let state = shared.state.lock();
                match &*state {
                    ContextState::Active { scene, .. } => Arc::clone(scene),
                    ContextState::Disposed => return Ok(Size::zero()),
                }
            };

            let content = scene
                .content_bounds()
                .map(|b| b.max())
                .unwrap_or(Vec2::zero());
            Ok(Size::new(
                resolve_axis(content.x.max(0.0), max_width, width_mode),
                resolve_axis(content.y.max(0.0), max_height, height_mode),
            ))
        })
    }

    /// Fixes the layout inputs used by subsequent draws.
    ///
    /// Resolves no-op success if the context is disposed before or during
    /// execution.
    pub fn layout(&self, width: f32, height: f32, rtl: bool) -> StagePending<()> {
        if let Err(e) = validate_dimension("layout", "width", width)
            .and_then(|()| validate_dimension("layout", "height", height))
        {
            return Pending::ready(Err(e));
        }

        let shared = Arc::clone(&self.shared);
        self.dispatch(StageKind::Layout, move || {
            let mut state = shared.state.lock();
            if let ContextState::Active { layout, .. } = &mut *state {
                *layout = Some(LayoutSpec { width, height, rtl });
            }
            Ok(())
        })
    }

    /// Resolves the current tree and layout into an immutable [`Frame`].
    ///
    /// Resolves an empty frame with `owner_ms == 0` if the context is
    /// disposed before or during execution; work already running finishes but
    /// its result is not published.
    pub fn draw(&self) -> StagePending<DrawOutput> {
        let shared = Arc::clone(&self.shared);
        let assets = Arc::clone(&self.assets);
        self.dispatch(StageKind::Draw, move || {
            let stopwatch = Stopwatch::start();

            let (scene, layout) = {
                let state = shared.state.lock();
                match &*state {
                    ContextState::Active { scene, layout } => (Arc::clone(scene), *layout),
                    ContextState::Disposed => {
                        return Ok(DrawOutput { frame: Frame::empty(), owner_ms: 0.0 });
                    }
                }
            };

            let layout = layout.unwrap_or_else(|| {
                if !shared.warned_missing_layout.swap(true, Ordering::Relaxed) {
                    log::warn!("draw called before layout; using natural content extent");
                }
                let extent = scene
                    .content_bounds()
                    .map(|b| b.max())
                    .unwrap_or(Vec2::zero());
                LayoutSpec {
                    width: extent.x.max(0.0),
                    height: extent.y.max(0.0),
                    rtl: false,
                }
            });

            let mut slot = shared.owner_slot.lock();
            let instructions: Arc<[Instruction]> = {
                let OwnerSlot { scratch, .. } = &mut *slot;
                resolve_instructions(&scene, layout, &assets, scratch.get()).into()
            };

            // Publication gate: a context disposed mid-execution finishes its
            // internal work but must not hand out results derived from it.
            let state = shared.state.lock();
            if matches!(*state, ContextState::Disposed) {
                return Ok(DrawOutput { frame: Frame::empty(), owner_ms: 0.0 });
            }
            let prev = slot.last_instructions.replace(Arc::clone(&instructions));
            drop(state);
            drop(slot);

            Ok(DrawOutput {
                frame: Frame::new(instructions, prev),
                owner_ms: stopwatch.elapsed_ms(),
            })
        })
    }

    /// Resolves once every asset registered so far has finished loading.
    ///
    /// Individual load failures accumulate in the result; disposal resolves
    /// the subscription with the partial counts available at that moment.
    pub fn on_all_assets_loaded(&self) -> Pending<AssetLoadResult> {
        self.assets.subscribe()
    }

    /// Releases the tree snapshot and marks the context disposed.
    ///
    /// Idempotent. Does not wait for in-flight owner-thread work (queued
    /// operations complete harmlessly through the neutral-result contract)
    /// and therefore can never deadlock against the owner thread.
    pub fn dispose(&self) {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ContextState::Disposed) {
                return;
            }
            *state = ContextState::Disposed;
        }
        self.assets.resolve_partial();
        log::debug!("managed context disposed");
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.shared.state.lock(), ContextState::Disposed)
    }

    /// Outstanding stage operations, for observability.
    pub fn pending_ops(&self) -> PendingOps {
        PendingOps {
            measure: self.shared.counters.measure.load(Ordering::Relaxed),
            layout: self.shared.counters.layout.load(Ordering::Relaxed),
            draw: self.shared.counters.draw.load(Ordering::Relaxed),
        }
    }

    /// Enqueues stage work on the owner thread with a guaranteed-resolving
    /// handle. Panics inside `work` resolve this operation with
    /// `StageError::OwnerFault` and leave the queue healthy.
    fn dispatch<T, F>(&self, kind: StageKind, work: F) -> StagePending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StageError> + Send + 'static,
    {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        log::trace!("enqueue {kind:?} seq={seq}");

        let shared = Arc::clone(&self.shared);
        shared.counters.cell(kind).fetch_add(1, Ordering::Relaxed);

        let (handle, completer) = pending::channel(Err(StageError::OwnerFault));
        let accepted = self.owner.dispatch(Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(_) => {
                    log::error!("{kind:?} stage panicked (seq={seq})");
                    Err(StageError::OwnerFault)
                }
            };
            shared.counters.cell(kind).fetch_sub(1, Ordering::Relaxed);
            completer.complete(result);
        }));

        if !accepted {
            // The rejected job was dropped, firing the fallback; the counter
            // it would have decremented is rolled back here.
            self.shared.counters.cell(kind).fetch_sub(1, Ordering::Relaxed);
        }

        handle
    }
}

fn validate_constraint(stage: &'static str, max: f32, mode: MeasureMode) -> Result<(), StageError> {
    // Unspecified ignores the value entirely, matching the measure contract.
    if mode == MeasureMode::Unspecified {
        return Ok(());
    }
    if !max.is_finite() || max < 0.0 {
        return Err(StageError::InvalidConstraint {
            stage,
            detail: format!("constraint must be finite and non-negative, got {max}"),
        });
    }
    Ok(())
}

fn validate_dimension(stage: &'static str, axis: &str, value: f32) -> Result<(), StageError> {
    if !value.is_finite() || value < 0.0 {
        return Err(StageError::InvalidConstraint {
            stage,
            detail: format!("{axis} must be finite and non-negative, got {value}"),
        });
    }
    Ok(())
}

fn resolve_axis(content: f32, max: f32, mode: MeasureMode) -> f32 {
    match mode {
        MeasureMode::Unspecified => content,
        MeasureMode::Exactly => max,
        MeasureMode::AtMost => content.min(max),
    }
}

/// Resolves the scene snapshot into paint-ordered device instructions.
fn resolve_instructions(
    scene: &Scene,
    layout: LayoutSpec,
    assets: &AssetCache,
    scratch: &mut DrawScratch,
) -> Vec<Instruction> {
    let items = scene.items();

    scratch.order.clear();
    scratch.order.extend(0..items.len());
    // Stable paint order is ensured by SortKey including insertion order.
    scratch.order.sort_by(|&a, &b| items[a].key.cmp(&items[b].key));

    let mut out = Vec::with_capacity(items.len());
    for &i in &scratch.order {
        if let Some(instruction) = resolve_item(&items[i], layout, assets) {
            out.push(instruction);
        }
    }
    out
}

fn resolve_item(item: &SceneItem, layout: LayoutSpec, assets: &AssetCache) -> Option<Instruction> {
    let kind = match &item.cmd {
        DrawCmd::Rect(c) => InstructionKind::Rect {
            rect: place_rect(c.rect.normalized(), layout),
            paint: place_paint(&c.paint, layout),
        },
        DrawCmd::RoundedRect(c) => InstructionKind::RoundedRect {
            rect: place_rect(c.rect.normalized(), layout),
            radius: c.radius,
            paint: place_paint(&c.paint, layout),
        },
        DrawCmd::Circle(c) => InstructionKind::Circle {
            center: place_point(c.center, layout),
            radius: c.radius,
            paint: place_paint(&c.paint, layout),
        },
        DrawCmd::Image(c) => {
            // Still loading or failed: the image is absent from this frame.
            let pixmap = assets.ready_pixmap(c.asset)?;
            InstructionKind::Image {
                rect: place_rect(c.rect.normalized(), layout),
                asset: c.asset,
                pixmap,
            }
        }
    };

    let clip = item.clip.map(|c| place_rect(c.normalized(), layout));
    let shape_bounds = kind_bounds(&kind);
    let bounds = match clip {
        Some(clip) => shape_bounds.intersect(clip)?,
        None => shape_bounds,
    };
    if bounds.is_empty() {
        return None;
    }

    Some(Instruction { kind, clip, bounds })
}

fn kind_bounds(kind: &InstructionKind) -> Rect {
    match kind {
        InstructionKind::Rect { rect, .. }
        | InstructionKind::RoundedRect { rect, .. }
        | InstructionKind::Image { rect, .. } => *rect,
        InstructionKind::Circle { center, radius, .. } => Rect::new(
            center.x - radius,
            center.y - radius,
            radius * 2.0,
            radius * 2.0,
        ),
    }
}

/// Mirrors geometry across the layout width when the direction is RTL.
fn place_rect(rect: Rect, layout: LayoutSpec) -> Rect {
    if !layout.rtl {
        return rect;
    }
    Rect::new(
        layout.width - (rect.origin.x + rect.size.x),
        rect.origin.y,
        rect.size.x,
        rect.size.y,
    )
}

fn place_point(p: Vec2, layout: LayoutSpec) -> Vec2 {
    if !layout.rtl {
        return p;
    }
    Vec2::new(layout.width - p.x, p.y)
}

fn place_paint(paint: &Paint, layout: LayoutSpec) -> Paint {
    if !layout.rtl {
        return paint.clone();
    }
    match paint {
        Paint::Solid(c) => Paint::Solid(*c),
        Paint::LinearGradient(g) => {
            let mut g = g.clone();
            g.start = place_point(g.start, layout);
            g.end = place_point(g.end, layout);
            Paint::LinearGradient(g)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::Color;
    use crate::raster::{AlphaType, ColorType, Surface};
    use crate::scene::ZIndex;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn pipeline() -> (Arc<OwnerThread>, ManagedContext) {
        let owner = OwnerThread::spawn().unwrap();
        let ctx = ManagedContext::new(Arc::clone(&owner));
        (owner, ctx)
    }

    fn red() -> Color {
        Color::from_rgba8(255, 0, 0, 255)
    }

    fn green() -> Color {
        Color::from_rgba8(0, 255, 0, 255)
    }

    fn wait<T>(pending: Pending<T>) -> T {
        pending.wait_timeout(WAIT).unwrap_or_else(|_| panic!("stage did not resolve"))
    }

    fn surface_buf(w: u32, h: u32) -> Vec<u8> {
        vec![0u8; (w * h * 4) as usize]
    }

    fn surface<'a>(buf: &'a mut [u8], w: u32, h: u32) -> Surface<'a> {
        Surface::new(buf, w, h, w as usize * 4, ColorType::Rgba8888, AlphaType::Premultiplied)
            .unwrap()
    }

    fn px(buf: &[u8], w: u32, x: u32, y: u32) -> [u8; 4] {
        let i = (y * w + x) as usize * 4;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    // ── render ────────────────────────────────────────────────────────────

    #[test]
    fn render_after_dispose_is_a_silent_no_op() {
        let (_owner, ctx) = pipeline();
        ctx.dispose();

        let mut invoked = false;
        ctx.render(|_| invoked = true);
        assert!(!invoked, "builder must not run after disposal");
    }

    #[test]
    fn render_replaces_snapshot_atomically() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 10.0, 10.0), red()));
        ctx.render(|b| {
            b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 4.0, 4.0), red());
            b.push_solid_rect(ZIndex::default(), Rect::new(4.0, 0.0, 4.0, 4.0), green());
        });

        let output = wait(ctx.draw()).unwrap();
        assert_eq!(output.frame.instructions().unwrap().len(), 2);
    }

    // ── measure ───────────────────────────────────────────────────────────

    #[test]
    fn measure_resolves_modes_per_axis() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 40.0, 30.0), red()));

        let natural = wait(ctx.measure(
            0.0,
            MeasureMode::Unspecified,
            0.0,
            MeasureMode::Unspecified,
            false,
        ))
        .unwrap();
        assert_eq!(natural, Size::new(40.0, 30.0));

        let exact = wait(ctx.measure(100.0, MeasureMode::Exactly, 100.0, MeasureMode::Exactly, false))
            .unwrap();
        assert_eq!(exact, Size::new(100.0, 100.0));

        let capped = wait(ctx.measure(25.0, MeasureMode::AtMost, 100.0, MeasureMode::AtMost, false))
            .unwrap();
        assert_eq!(capped, Size::new(25.0, 30.0));
    }

    #[test]
    fn measure_with_malformed_constraint_fails_immediately() {
        let (_owner, ctx) = pipeline();

        let handle = ctx.measure(-5.0, MeasureMode::Exactly, 10.0, MeasureMode::AtMost, false);
        assert!(handle.is_ready(), "validation failures never enqueue");
        assert!(matches!(
            wait(handle),
            Err(StageError::InvalidConstraint { stage: "measure", .. })
        ));

        let nan = ctx.measure(f32::NAN, MeasureMode::AtMost, 10.0, MeasureMode::AtMost, false);
        assert!(matches!(wait(nan), Err(StageError::InvalidConstraint { .. })));
    }

    #[test]
    fn measure_after_dispose_resolves_zero_size() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 40.0, 30.0), red()));
        ctx.dispose();

        let size = wait(ctx.measure(
            0.0,
            MeasureMode::Unspecified,
            0.0,
            MeasureMode::Unspecified,
            false,
        ))
        .unwrap();
        assert_eq!(size, Size::zero());
    }

    // ── layout / draw ─────────────────────────────────────────────────────

    #[test]
    fn layout_with_malformed_dimension_fails_immediately() {
        let (_owner, ctx) = pipeline();
        let handle = ctx.layout(f32::INFINITY, 100.0, false);
        assert!(handle.is_ready());
        assert!(matches!(
            wait(handle),
            Err(StageError::InvalidConstraint { stage: "layout", .. })
        ));
    }

    #[test]
    fn draw_resolves_latest_snapshot_not_enqueue_time_snapshot() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 1.0, 1.0), red()));
        wait(ctx.layout(100.0, 100.0, false)).unwrap();

        // Two draws with a render in between: FIFO guarantees the first draw
        // ran before the second, and lineage links them.
        let first = ctx.draw();
        ctx.render(|b| {
            b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 1.0, 1.0), red());
            b.push_solid_rect(ZIndex::default(), Rect::new(2.0, 0.0, 1.0, 1.0), green());
        });
        let second = ctx.draw();

        let f1 = wait(first).unwrap().frame;
        let f2 = wait(second).unwrap().frame;

        let f1_instructions = f1.instructions().unwrap();
        let f2_prev = f2.prev_instructions().expect("second draw has a predecessor");
        assert_eq!(&*f1_instructions, &*f2_prev, "lineage follows completion order");
        assert!(f2.instructions().unwrap().len() >= f1_instructions.len());
    }

    #[test]
    fn z_order_beats_insertion_order_in_resolution() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| {
            b.push_solid_rect(ZIndex::new(5), Rect::new(0.0, 0.0, 4.0, 4.0), green());
            b.push_solid_rect(ZIndex::new(-1), Rect::new(0.0, 0.0, 4.0, 4.0), red());
        });
        wait(ctx.layout(4.0, 4.0, false)).unwrap();

        let frame = wait(ctx.draw()).unwrap().frame;
        let instructions = frame.instructions().unwrap();

        // Back-to-front: the z=-1 red rect resolves first.
        assert_eq!(
            instructions[0].kind,
            InstructionKind::Rect {
                rect: Rect::new(0.0, 0.0, 4.0, 4.0),
                paint: Paint::Solid(red())
            }
        );
    }

    #[test]
    fn rtl_layout_mirrors_geometry() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(10.0, 0.0, 20.0, 10.0), red()));
        wait(ctx.layout(100.0, 100.0, true)).unwrap();

        let frame = wait(ctx.draw()).unwrap().frame;
        let instructions = frame.instructions().unwrap();
        assert_eq!(instructions[0].bounds, Rect::new(70.0, 0.0, 20.0, 10.0));
    }

    #[test]
    fn draw_before_layout_uses_content_extent() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 10.0, 10.0), red()));

        let output = wait(ctx.draw()).unwrap();
        assert_eq!(output.frame.instructions().unwrap().len(), 1);
    }

    // ── disposal contract ─────────────────────────────────────────────────

    #[test]
    fn draw_after_dispose_resolves_empty_frame_with_zero_owner_time() {
        let (_owner, ctx) = pipeline();
        ctx.dispose();

        let output = wait(ctx.draw()).unwrap();
        assert!(output.frame.is_empty());
        assert_eq!(output.owner_ms, 0.0);

        // Rasterizing the neutral frame performs no pixel writes and reports
        // no damage (the documented empty-frame convention).
        let mut buf = vec![0x5Au8; 16 * 16 * 4];
        let mut s = surface(&mut buf, 16, 16);
        let result = output.frame.raster_into(&mut s, true).unwrap();
        assert!(result.damage.is_empty());
        drop(s);
        assert!(buf.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn dispose_is_idempotent() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 5.0, 5.0), red()));

        ctx.dispose();
        ctx.dispose();
        ctx.dispose();

        assert!(ctx.is_disposed());
        let output = wait(ctx.draw()).unwrap();
        assert!(output.frame.is_empty());
    }

    #[test]
    fn stages_resolve_under_concurrent_disposal() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 50.0, 50.0), red()));

        let issuer = {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                let mut handles = Vec::new();
                for i in 0..200 {
                    match i % 3 {
                        0 => handles.push(StageHandle::Draw(ctx.draw())),
                        1 => handles.push(StageHandle::Layout(ctx.layout(64.0, 64.0, false))),
                        _ => handles.push(StageHandle::Measure(ctx.measure(
                            64.0,
                            MeasureMode::AtMost,
                            64.0,
                            MeasureMode::AtMost,
                            false,
                        ))),
                    }
                }
                handles
            })
        };

        std::thread::sleep(Duration::from_millis(2));
        ctx.dispose();

        // Every handle resolves, neutral or real depending on the race, but
        // never a hang and never an error.
        for handle in issuer.join().unwrap() {
            match handle {
                StageHandle::Draw(h) => assert!(wait(h).is_ok()),
                StageHandle::Layout(h) => assert!(wait(h).is_ok()),
                StageHandle::Measure(h) => assert!(wait(h).is_ok()),
            }
        }

        let ops = ctx.pending_ops();
        assert_eq!(ops, PendingOps::default());
    }

    enum StageHandle {
        Draw(StagePending<DrawOutput>),
        Layout(StagePending<()>),
        Measure(StagePending<Size>),
    }

    #[test]
    fn queued_stages_resolve_after_owner_shutdown() {
        let (owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 5.0, 5.0), red()));
        owner.shutdown();

        // Rejected dispatch: the handle resolves through its fallback.
        let result = wait(ctx.draw());
        assert_eq!(result.unwrap_err(), StageError::OwnerFault);
        assert_eq!(ctx.pending_ops(), PendingOps::default());
    }

    // ── scenario A: full pipeline to pixels ───────────────────────────────

    #[test]
    fn rect_scene_rasters_at_expected_offset() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(30.0, 40.0, 10.0, 10.0), red()));
        wait(ctx.layout(100.0, 100.0, false)).unwrap();

        let output = wait(ctx.draw()).unwrap();

        let mut buf = surface_buf(100, 100);
        let mut s = surface(&mut buf, 100, 100);
        let result = output.frame.raster_into(&mut s, true).unwrap();
        assert_eq!(result.damage, vec![Rect::new(0.0, 0.0, 100.0, 100.0)]);
        drop(s);

        assert_eq!(px(&buf, 100, 30, 40), [255, 0, 0, 255]);
        assert_eq!(px(&buf, 100, 39, 49), [255, 0, 0, 255]);
        assert_eq!(px(&buf, 100, 29, 40), [0, 0, 0, 0]);
        assert_eq!(px(&buf, 100, 40, 50), [0, 0, 0, 0]);
        assert_eq!(px(&buf, 100, 0, 0), [0, 0, 0, 0]);
        assert_eq!(px(&buf, 100, 99, 99), [0, 0, 0, 0]);
    }

    // ── raster round-trip (P4) ────────────────────────────────────────────

    #[test]
    fn unchanged_frame_rasters_identically_twice() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| {
            b.push_solid_rect(ZIndex::default(), Rect::new(3.5, 2.25, 20.0, 12.0), red());
            b.push_circle(ZIndex::new(1), Vec2::new(32.0, 32.0), 10.0, Paint::solid(green()));
        });
        wait(ctx.layout(64.0, 64.0, false)).unwrap();
        let output = wait(ctx.draw()).unwrap();

        let mut a = surface_buf(64, 64);
        let mut b = surface_buf(64, 64);
        output.frame.raster_into(&mut surface(&mut a, 64, 64), true).unwrap();
        output.frame.raster_into(&mut surface(&mut b, 64, 64), true).unwrap();
        assert_eq!(a, b);
    }

    // ── scenario C: no change, empty delta ────────────────────────────────

    #[test]
    fn consecutive_draws_without_change_produce_empty_delta() {
        let (_owner, ctx) = pipeline();
        ctx.render(|b| b.push_solid_rect(ZIndex::default(), Rect::new(5.0, 5.0, 10.0, 10.0), red()));
        wait(ctx.layout(32.0, 32.0, false)).unwrap();

        let f1 = wait(ctx.draw()).unwrap().frame;
        let f2 = wait(ctx.draw()).unwrap().frame;

        let mut buf = surface_buf(32, 32);
        f1.raster_into(&mut surface(&mut buf, 32, 32), true).unwrap();
        let before = buf.clone();

        let result = f2.raster_delta_into(&mut surface(&mut buf, 32, 32)).unwrap();
        assert!(result.damage.is_empty());
        assert_eq!(buf, before, "empty delta performs no pixel writes");
    }

    // ── damage coverage (P5) ──────────────────────────────────────────────

    #[test]
    fn paint_change_delta_matches_full_raster_inside_damage() {
        let (_owner, ctx) = pipeline();
        let build = |second_color: Color| {
            move |b: &mut SceneBuilder| {
                b.push_solid_rect(ZIndex::default(), Rect::new(0.0, 0.0, 20.0, 20.0), red());
                b.push_solid_rect(ZIndex::default(), Rect::new(40.0, 40.0, 20.0, 20.0), second_color);
            }
        };

        ctx.render(build(green()));
        wait(ctx.layout(100.0, 100.0, false)).unwrap();
        let f1 = wait(ctx.draw()).unwrap().frame;

        ctx.render(build(Color::from_rgba8(0, 0, 255, 255)));
        let f2 = wait(ctx.draw()).unwrap().frame;

        let mut live = surface_buf(100, 100);
        f1.raster_into(&mut surface(&mut live, 100, 100), true).unwrap();
        let before = live.clone();

        let delta = f2.raster_delta_into(&mut surface(&mut live, 100, 100)).unwrap();
        assert!(!delta.damage.is_empty());

        // The damage union covers the changed instruction's bounds.
        let changed = Rect::new(40.0, 40.0, 20.0, 20.0);
        assert!(
            delta.damage.iter().any(|d| d.intersect(changed) == Some(changed)),
            "damage {:?} does not cover {changed:?}",
            delta.damage
        );

        let mut full = surface_buf(100, 100);
        f2.raster_into(&mut surface(&mut full, 100, 100), true).unwrap();

        let in_damage = |x: u32, y: u32| {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            delta.damage.iter().any(|d| d.contains(p))
        };
        for y in 0..100 {
            for x in 0..100 {
                if in_damage(x, y) {
                    assert_eq!(px(&live, 100, x, y), px(&full, 100, x, y), "inside damage at ({x},{y})");
                } else {
                    assert_eq!(px(&live, 100, x, y), px(&before, 100, x, y), "outside damage at ({x},{y})");
                }
            }
        }
    }

    // ── assets through the pipeline ───────────────────────────────────────

    #[test]
    fn ready_asset_resolves_into_frame_and_pixels() {
        let (_owner, ctx) = pipeline();
        let asset = ctx.load_image(ImageSource::Rgba8 {
            width: 2,
            height: 1,
            pixels: vec![255, 0, 0, 255, 0, 255, 0, 255],
        });

        let loaded = wait(ctx.on_all_assets_loaded());
        assert_eq!(loaded.loaded_count, 1);
        assert!(loaded.errors.is_empty());

        ctx.render(|b| b.push_image(ZIndex::default(), Rect::new(0.0, 0.0, 4.0, 2.0), asset));
        wait(ctx.layout(4.0, 2.0, false)).unwrap();
        let frame = wait(ctx.draw()).unwrap().frame;

        let mut buf = surface_buf(4, 2);
        frame.raster_into(&mut surface(&mut buf, 4, 2), true).unwrap();
        assert_eq!(px(&buf, 4, 0, 0), [255, 0, 0, 255]);
        assert_eq!(px(&buf, 4, 3, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn unready_asset_is_absent_from_the_frame() {
        let (_owner, ctx) = pipeline();
        // Deliberately broken bytes: the load fails, the asset never readies.
        let asset = ctx.load_image(ImageSource::Encoded(vec![0, 1, 2, 3]));
        wait(ctx.on_all_assets_loaded());

        ctx.render(|b| b.push_image(ZIndex::default(), Rect::new(0.0, 0.0, 4.0, 4.0), asset));
        wait(ctx.layout(4.0, 4.0, false)).unwrap();

        let frame = wait(ctx.draw()).unwrap().frame;
        assert!(frame.is_empty());
    }

    #[test]
    fn dispose_resolves_asset_subscription_with_partial_counts() {
        let (_owner, ctx) = pipeline();
        ctx.load_image(ImageSource::Rgba8 { width: 1, height: 1, pixels: vec![0, 0, 0, 255] });

        let subscription = ctx.on_all_assets_loaded();
        ctx.dispose();

        // Resolves either through disposal (partial) or load completion,
        // whichever won the race. Either way it resolves.
        let result = subscription
            .wait_timeout(WAIT)
            .unwrap_or_else(|_| panic!("subscription must resolve after dispose"));
        assert!(result.loaded_count <= 1);
    }
}

//! CPU fills for resolved draw instructions.
//!
//! Coverage model: exact area coverage for axis-aligned rects and image
//! blits, signed-distance coverage for circles and rounded corners. All
//! blending is premultiplied source-over.

use std::collections::HashMap;
use std::sync::Arc;

use crate::assets::Pixmap;
use crate::coords::{Rect, Vec2};
use crate::frame::{Instruction, InstructionKind};
use crate::paint::{Color, ColorStop, LinearGradient, Paint, SpreadMode};

use super::Surface;

const RAMP_LEN: usize = 256;

/// Per-frame cache of gradient color ramps, keyed by instruction index.
///
/// Owned by the frame and released when the frame is disposed.
pub(crate) struct RampCache {
    ramps: HashMap<usize, Box<[Color]>>,
}

impl RampCache {
    pub(crate) fn new() -> Self {
        Self { ramps: HashMap::new() }
    }

    fn ramp(&mut self, index: usize, gradient: &LinearGradient) -> &[Color] {
        self.ramps.entry(index).or_insert_with(|| build_ramp(&gradient.stops))
    }
}

/// Fills `instructions` in order, optionally restricted to a pixel-aligned
/// `region` (delta rasterization).
pub(crate) fn fill(
    surface: &mut Surface<'_>,
    instructions: &[Instruction],
    region: Option<Rect>,
    ramps: &mut RampCache,
) {
    for (index, instruction) in instructions.iter().enumerate() {
        fill_one(surface, instruction, index, region, ramps);
    }
}

fn fill_one(
    surface: &mut Surface<'_>,
    instruction: &Instruction,
    index: usize,
    region: Option<Rect>,
    ramps: &mut RampCache,
) {
    let mut area = instruction.bounds;
    if let Some(region) = region {
        match area.intersect(region) {
            Some(a) => area = a,
            None => return,
        }
    }
    let Some((x0, y0, x1, y1)) = surface.pixel_span(area) else {
        return;
    };

    for y in y0..y1 {
        for x in x0..x1 {
            let cell = Rect::new(x as f32, y as f32, 1.0, 1.0);
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);

            let mut coverage = shape_coverage(&instruction.kind, cell, center);
            if let Some(clip) = instruction.clip {
                coverage *= rect_coverage(clip, cell);
            }
            if let Some(region) = region {
                coverage *= rect_coverage(region, cell);
            }
            if coverage <= 0.0 {
                continue;
            }

            let src = source_color(&instruction.kind, index, center, ramps);
            surface.blend(x, y, src, coverage);
        }
    }
}

fn shape_coverage(kind: &InstructionKind, cell: Rect, center: Vec2) -> f32 {
    match kind {
        InstructionKind::Rect { rect, .. } | InstructionKind::Image { rect, .. } => {
            rect_coverage(*rect, cell)
        }
        InstructionKind::RoundedRect { rect, radius, .. } => {
            rounded_rect_coverage(*rect, *radius, center)
        }
        InstructionKind::Circle { center: c, radius, .. } => {
            let d = (center - *c).length() - radius;
            (0.5 - d).clamp(0.0, 1.0)
        }
    }
}

/// Fraction of a unit pixel cell covered by `rect`.
#[inline]
fn rect_coverage(rect: Rect, cell: Rect) -> f32 {
    match rect.normalized().intersect(cell) {
        Some(overlap) => overlap.area(),
        None => 0.0,
    }
}

/// Signed-distance coverage for a rounded rectangle, sampled at the pixel center.
fn rounded_rect_coverage(rect: Rect, radius: f32, p: Vec2) -> f32 {
    let r = rect.normalized();
    let half = r.size * 0.5;
    let radius = radius.clamp(0.0, half.x.min(half.y));
    let c = r.center();

    let q = Vec2::new(
        (p.x - c.x).abs() - (half.x - radius),
        (p.y - c.y).abs() - (half.y - radius),
    );
    let outside = Vec2::new(q.x.max(0.0), q.y.max(0.0)).length();
    let d = outside + q.x.max(q.y).min(0.0) - radius;
    (0.5 - d).clamp(0.0, 1.0)
}

fn source_color(kind: &InstructionKind, index: usize, p: Vec2, ramps: &mut RampCache) -> Color {
    match kind {
        InstructionKind::Rect { paint, .. }
        | InstructionKind::RoundedRect { paint, .. }
        | InstructionKind::Circle { paint, .. } => paint_at(paint, index, p, ramps),
        InstructionKind::Image { rect, pixmap, .. } => sample_image(*rect, pixmap, p),
    }
}

fn paint_at(paint: &Paint, index: usize, p: Vec2, ramps: &mut RampCache) -> Color {
    match paint {
        Paint::Solid(c) => *c,
        Paint::LinearGradient(g) => {
            let d = g.end - g.start;
            let len2 = d.dot(d);
            if len2 <= 0.0 {
                return g.stops.first().map(|s| s.color).unwrap_or(Color::transparent());
            }
            let t = (p - g.start).dot(d) / len2;
            let u = apply_spread(t, g.spread);
            let ramp = ramps.ramp(index, g);
            ramp[((u * (RAMP_LEN - 1) as f32) as usize).min(RAMP_LEN - 1)]
        }
    }
}

fn apply_spread(t: f32, spread: SpreadMode) -> f32 {
    match spread {
        SpreadMode::Pad => t.clamp(0.0, 1.0),
        SpreadMode::Repeat => t.rem_euclid(1.0),
        SpreadMode::Reflect => {
            let m = t.rem_euclid(2.0);
            if m > 1.0 { 2.0 - m } else { m }
        }
    }
}

fn build_ramp(stops: &[ColorStop]) -> Box<[Color]> {
    let mut sorted: Vec<ColorStop> = stops.to_vec();
    sorted.sort_by(|a, b| a.t.total_cmp(&b.t));

    let mut ramp = Vec::with_capacity(RAMP_LEN);
    if sorted.is_empty() {
        ramp.resize(RAMP_LEN, Color::transparent());
        return ramp.into_boxed_slice();
    }

    for i in 0..RAMP_LEN {
        let t = i as f32 / (RAMP_LEN - 1) as f32;
        ramp.push(sample_stops(&sorted, t));
    }
    ramp.into_boxed_slice()
}

fn sample_stops(stops: &[ColorStop], t: f32) -> Color {
    let first = stops[0];
    if t <= first.t {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.t {
            let span = b.t - a.t;
            if span <= 0.0 {
                return b.color;
            }
            return a.color.lerp(b.color, (t - a.t) / span);
        }
    }
    stops[stops.len() - 1].color
}

/// Nearest-neighbor sample of an image stretched over `rect`.
fn sample_image(rect: Rect, pixmap: &Arc<Pixmap>, p: Vec2) -> Color {
    let r = rect.normalized();
    if r.is_empty() {
        return Color::transparent();
    }
    let u = ((p.x - r.origin.x) / r.size.x).clamp(0.0, 1.0);
    let v = ((p.y - r.origin.y) / r.size.y).clamp(0.0, 1.0);
    let x = ((u * pixmap.width() as f32) as u32).min(pixmap.width().saturating_sub(1));
    let y = ((v * pixmap.height() as f32) as u32).min(pixmap.height().saturating_sub(1));
    pixmap.get(x, y)
}

//! Structural damage tracking between consecutive frames.

use crate::coords::Rect;

use super::Instruction;

/// Upper bound on rectangles returned from one diff. Merging beyond this
/// trades some over-draw for a bounded region count.
pub(crate) const MAX_DAMAGE_RECTS: usize = 8;

/// Computes the damage rectangles between two instruction lists.
///
/// Instructions are compared structurally; equal prefix and suffix runs are
/// trimmed, and every instruction in the changed middle window (from both
/// lists) contributes its device bounding rectangle. Identical lists produce
/// the empty set.
pub(crate) fn compute(prev: &[Instruction], next: &[Instruction]) -> Vec<Rect> {
    let common = prev.len().min(next.len());

    let mut prefix = 0;
    while prefix < common && prev[prefix] == next[prefix] {
        prefix += 1;
    }

    if prefix == prev.len() && prefix == next.len() {
        return Vec::new();
    }

    let mut suffix = 0;
    while suffix < common - prefix
        && prev[prev.len() - 1 - suffix] == next[next.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mut rects = Vec::new();
    let mut push = |instruction: &Instruction| {
        let bounds = instruction.bounds.normalized();
        if !bounds.is_empty() {
            rects.push(bounds);
        }
    };
    for instruction in &prev[prefix..prev.len() - suffix] {
        push(instruction);
    }
    for instruction in &next[prefix..next.len() - suffix] {
        push(instruction);
    }

    merge(rects)
}

/// Coalesces overlapping/adjacent rectangles, then merges least-wasteful
/// pairs until at most [`MAX_DAMAGE_RECTS`] remain.
fn merge(mut rects: Vec<Rect>) -> Vec<Rect> {
    loop {
        let mut merged_any = false;
        'scan: for i in 0..rects.len() {
            for j in (i + 1)..rects.len() {
                if rects[i].touches(rects[j]) {
                    rects[i] = rects[i].union(rects[j]);
                    rects.swap_remove(j);
                    merged_any = true;
                    break 'scan;
                }
            }
        }
        if !merged_any {
            break;
        }
    }

    while rects.len() > MAX_DAMAGE_RECTS {
        let mut best = (0, 1);
        let mut best_waste = f32::INFINITY;
        for i in 0..rects.len() {
            for j in (i + 1)..rects.len() {
                let waste = rects[i].union(rects[j]).area() - rects[i].area() - rects[j].area();
                if waste < best_waste {
                    best_waste = waste;
                    best = (i, j);
                }
            }
        }
        rects[best.0] = rects[best.0].union(rects[best.1]);
        rects.swap_remove(best.1);
    }

    rects
}

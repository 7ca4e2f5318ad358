//! Arc center resolution for single- and multi-quadrant modes.

use std::f64::consts::{FRAC_PI_2, TAU};

use crate::ast::QuadrantMode;
use crate::geometry::Point;

/// Relative tolerance when comparing the start and end radii.
pub(crate) const RADIUS_TOLERANCE: f64 = 1e-3;
/// Slack on the 90° sweep limit of single-quadrant arcs, in radians.
pub(crate) const SWEEP_TOLERANCE: f64 = 1e-4;

/// Center of an arc from `start` to `end` given the I/J `offset`.
///
/// Multi-quadrant offsets are signed and taken as-is. Single-quadrant offsets
/// are unsigned; among the sign combinations producing a consistent arc of at
/// most 90° in the requested direction, the one with the smallest sweep wins.
pub(crate) fn resolve_center(start: Point, end: Point, offset: Point, clockwise: bool, mode: QuadrantMode) -> Option<Point> {
    match mode {
        QuadrantMode::Multi => Some(start + offset),
        QuadrantMode::Single => single_quadrant_candidates(start, end, offset, clockwise).into_iter().next(),
    }
}

/// Every distinct sign combination of `offset` that forms a valid
/// single-quadrant arc, ordered by increasing sweep.
pub(crate) fn single_quadrant_candidates(start: Point, end: Point, offset: Point, clockwise: bool) -> Vec<Point> {
    let (i, j) = (offset.x.abs(), offset.y.abs());
    let mut found: Vec<(f64, Point)> = Vec::new();
    for (sx, sy) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
        let center = start + Point::new(sx * i, sy * j);
        if found.iter().any(|&(_, c)| c == center) {
            continue;
        }
        if let Some(sweep) = single_quadrant_sweep(start, end, center, clockwise) {
            found.push((sweep, center));
        }
    }
    found.sort_by(|a, b| a.0.total_cmp(&b.0));
    found.into_iter().map(|(_, center)| center).collect()
}

/// Sweep of the arc about `center` when it is at most a quadrant.
fn single_quadrant_sweep(start: Point, end: Point, center: Point, clockwise: bool) -> Option<f64> {
    let r0 = start.distance(center);
    let r1 = end.distance(center);
    let scale = r0.max(r1);
    if scale == 0.0 || (r0 - r1).abs() > RADIUS_TOLERANCE * scale {
        return None;
    }
    let a0 = (start - center).angle();
    let a1 = (end - center).angle();
    let sweep = if clockwise { (a0 - a1).rem_euclid(TAU) } else { (a1 - a0).rem_euclid(TAU) };
    if sweep <= FRAC_PI_2 + SWEEP_TOLERANCE {
        return Some(sweep);
    }
    // Rounding can push a zero sweep to just under a full turn, but only when
    // the endpoints coincide.
    (sweep >= TAU - SWEEP_TOLERANCE && start.approx_eq(end, 1e-9 * scale)).then_some(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_quadrant_uses_signed_offset() {
        let c = resolve_center(Point::new(1.0, 0.0), Point::new(-1.0, 0.0), Point::new(-1.0, 0.0), false, QuadrantMode::Multi);
        assert_eq!(c, Some(Point::ORIGIN));
    }

    #[test]
    fn single_quadrant_picks_direction_consistent_center() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(2.0, 0.0);
        let offset = Point::new(1.0, 1.0);
        let cw = resolve_center(start, end, offset, true, QuadrantMode::Single).unwrap();
        assert!(cw.approx_eq(Point::new(1.0, -1.0), 1e-12));
        let ccw = resolve_center(start, end, offset, false, QuadrantMode::Single).unwrap();
        assert!(ccw.approx_eq(Point::new(1.0, 1.0), 1e-12));
    }

    #[test]
    fn single_quadrant_rejects_inconsistent_offsets() {
        let c = resolve_center(Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(1.0, 1.0), true, QuadrantMode::Single);
        assert_eq!(c, None);
    }

    #[test]
    fn single_quadrant_rejects_sweeps_over_ninety_degrees() {
        // Half circle: radii match but the sweep is 180 degrees.
        let c = single_quadrant_candidates(Point::new(1.0, 0.0), Point::new(-1.0, 0.0), Point::new(1.0, 0.0), false);
        assert!(c.is_empty());
    }

    #[test]
    fn random_single_quadrant_arcs_have_exactly_one_center() {
        let mut rng = fastrand::Rng::with_seed(74);
        for _ in 0..2000 {
            let center = Point::new(rng.f64() * 200.0 - 100.0, rng.f64() * 200.0 - 100.0);
            let radius = 0.5 + rng.f64() * 50.0;
            let a0 = rng.f64() * TAU;
            let sweep = (5.0 + rng.f64() * 80.0).to_radians();
            let clockwise = rng.bool();
            let a1 = if clockwise { a0 - sweep } else { a0 + sweep };
            let start = center + Point::from_polar(radius, a0);
            let end = center + Point::from_polar(radius, a1);
            let offset = center - start;
            // Near-axis offsets are ambiguous within the radius tolerance.
            if offset.x.abs() < 0.01 * radius || offset.y.abs() < 0.01 * radius {
                continue;
            }
            let found = single_quadrant_candidates(start, end, offset, clockwise);
            assert_eq!(found.len(), 1, "start {start:?} end {end:?} center {center:?} cw {clockwise}");
            assert!(found[0].approx_eq(center, 1e-9));
        }
    }

    #[test]
    fn near_coincident_endpoints_take_the_short_arc() {
        // End sits a hair clockwise of start; the far center would sweep almost a full turn.
        let start = Point::new(1.0, 0.0);
        let end = Point::new(1.0, -1e-6);
        let found = single_quadrant_candidates(start, end, Point::new(1.0, 0.0), true);
        assert_eq!(found.len(), 1);
        assert!(found[0].approx_eq(Point::ORIGIN, 1e-12));
        let c = resolve_center(start, end, Point::new(1.0, 0.0), true, QuadrantMode::Single).unwrap();
        assert!(c.approx_eq(Point::ORIGIN, 1e-12));
    }

    #[test]
    fn coincident_endpoints_keep_zero_sweep() {
        let p = Point::new(1.0, 0.0);
        assert_eq!(single_quadrant_sweep(p, p, Point::ORIGIN, true), Some(0.0));
        assert_eq!(single_quadrant_sweep(p, p, Point::ORIGIN, false), Some(0.0));
    }
}

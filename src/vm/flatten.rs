//! Shape flattening: every RVMC shape becomes one or more closed polylines
//! whose chord error stays within the configured arc tolerance.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use crate::geometry::{Point, Transform, arc_sweep, vertex_angle};
use crate::rvmc::{Segment, ShapeKind};

use super::Contour;

const MIN_CIRCLE_SEGMENTS: usize = 16;
const MAX_SEGMENTS: usize = 4096;

/// Angular step that keeps the sagitta of a chord below `tolerance`.
fn max_step(radius: f64, tolerance: f64) -> f64 {
    if radius <= tolerance {
        FRAC_PI_2
    } else {
        2.0 * (1.0 - tolerance / radius).acos()
    }
}

fn steps(radius: f64, sweep: f64, tolerance: f64) -> usize {
    let n = (sweep.abs() / max_step(radius, tolerance)).ceil() as usize;
    n.clamp(1, MAX_SEGMENTS)
}

/// Points along an arc from `a0` through `sweep` radians, radius blending
/// linearly from `r0` to `r1`. Includes both endpoints.
fn arc_polyline(center: Point, r0: f64, r1: f64, a0: f64, sweep: f64, tolerance: f64, min_steps: usize) -> Vec<Point> {
    let n = steps(r0.max(r1), sweep, tolerance).max(min_steps);
    (0..=n)
        .map(|k| {
            let t = k as f64 / n as f64;
            center + Point::from_polar(r0 + (r1 - r0) * t, a0 + sweep * t)
        })
        .collect()
}

fn circle(center: Point, radius: f64, tolerance: f64) -> Contour {
    let mut pts = arc_polyline(center, radius, radius, 0.0, TAU, tolerance, MIN_CIRCLE_SEGMENTS);
    pts.pop();
    to_contour(pts)
}

fn to_contour(points: Vec<Point>) -> Contour {
    let mut out: Contour = Vec::with_capacity(points.len());
    for p in points {
        let q = [p.x, p.y];
        if out.last() != Some(&q) {
            out.push(q);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

fn placed(points: impl IntoIterator<Item = Point>, t: &Transform) -> Contour {
    to_contour(points.into_iter().map(|p| t.apply(p)).collect())
}

/// Outline(s) of one shape. Degenerate shapes flatten to nothing.
pub(crate) fn flatten(kind: &ShapeKind, tolerance: f64) -> Vec<Contour> {
    let contours = match kind {
        ShapeKind::Circle { center, diameter } => {
            if *diameter <= 0.0 {
                return Vec::new();
            }
            vec![circle(*center, diameter / 2.0, tolerance)]
        }
        ShapeKind::Rectangle { center, width, height, rotation } => {
            if *width <= 0.0 || *height <= 0.0 {
                return Vec::new();
            }
            let (hw, hh) = (width / 2.0, height / 2.0);
            let t = Transform::rotate(*rotation).then(Transform::translate(*center));
            let corners = [Point::new(-hw, -hh), Point::new(hw, -hh), Point::new(hw, hh), Point::new(-hw, hh)];
            vec![placed(corners, &t)]
        }
        ShapeKind::Obround { center, width, height, rotation } => {
            if *width <= 0.0 || *height <= 0.0 {
                return Vec::new();
            }
            let t = Transform::rotate(*rotation).then(Transform::translate(*center));
            vec![placed(obround(*width, *height, tolerance), &t)]
        }
        ShapeKind::Polygon { center, outer_diameter, vertices, rotation } => {
            if *outer_diameter <= 0.0 || *vertices < 3 {
                return Vec::new();
            }
            let n = *vertices as usize;
            let pts = (0..n).map(|i| *center + Point::from_polar(outer_diameter / 2.0, vertex_angle(*rotation, i, n)));
            vec![to_contour(pts.collect())]
        }
        ShapeKind::Contour { segments } => vec![contour(segments, tolerance)],
        ShapeKind::LineStroke { start, end, width } => {
            let along = *end - *start;
            let length = along.length();
            if length < 1e-12 || *width <= 0.0 {
                return Vec::new();
            }
            let normal = Point::new(-along.y, along.x) * (width / 2.0 / length);
            vec![to_contour(vec![*start - normal, *end - normal, *end + normal, *start + normal])]
        }
        ShapeKind::CwArc { start, end, center, width } => arc_stroke(*start, *end, *center, *width, true, tolerance),
        ShapeKind::CcwArc { start, end, center, width } => arc_stroke(*start, *end, *center, *width, false, tolerance),
    };
    contours.into_iter().filter(|c| c.len() >= 3).collect()
}

/// Stadium centred on the origin, long axis along x or y.
fn obround(width: f64, height: f64, tolerance: f64) -> Vec<Point> {
    let radius = width.min(height) / 2.0;
    let (offset, base) = if width >= height {
        (Point::new(width / 2.0 - radius, 0.0), -FRAC_PI_2)
    } else {
        (Point::new(0.0, height / 2.0 - radius), 0.0)
    };
    let mut pts = arc_polyline(offset, radius, radius, base, PI, tolerance, 8);
    pts.extend(arc_polyline(-offset, radius, radius, base + PI, PI, tolerance, 8));
    pts
}

fn contour(segments: &[Segment], tolerance: f64) -> Contour {
    let mut pts = Vec::new();
    if let Some(first) = segments.first() {
        pts.push(first.start());
    }
    for segment in segments {
        match *segment {
            Segment::Line { end, .. } => pts.push(end),
            Segment::Arc { start, end, center, clockwise } => {
                let sweep = arc_sweep(start, end, center, clockwise);
                let r0 = start.distance(center);
                let r1 = end.distance(center);
                let arc = arc_polyline(center, r0, r1, (start - center).angle(), sweep, tolerance, 1);
                pts.extend(arc.into_iter().skip(1));
            }
        }
    }
    to_contour(pts)
}

/// Annular sector with butt ends. A full turn becomes an outer circle plus an
/// oppositely wound inner circle, which the non-zero fill rule treats as a hole.
fn arc_stroke(start: Point, end: Point, center: Point, width: f64, clockwise: bool, tolerance: f64) -> Vec<Contour> {
    if width <= 0.0 {
        return Vec::new();
    }
    let half = width / 2.0;
    let r0 = start.distance(center);
    let r1 = end.distance(center);
    let sweep = arc_sweep(start, end, center, clockwise);
    let a0 = (start - center).angle();

    if (sweep.abs() - TAU).abs() < 1e-12 {
        let outer = circle(center, r0 + half, tolerance);
        let inner_radius = r0 - half;
        if inner_radius <= 0.0 {
            return vec![outer];
        }
        let mut inner = circle(center, inner_radius, tolerance);
        inner.reverse();
        return vec![outer, inner];
    }

    let mut pts = arc_polyline(center, r0 + half, r1 + half, a0, sweep, tolerance, 1);
    let inner = arc_polyline(center, (r0 - half).max(0.0), (r1 - half).max(0.0), a0, sweep, tolerance, 1);
    pts.extend(inner.into_iter().rev());
    vec![to_contour(pts)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(c: &Contour) -> f64 {
        let n = c.len();
        (0..n)
            .map(|i| {
                let (a, b) = (c[i], c[(i + 1) % n]);
                a[0] * b[1] - b[0] * a[1]
            })
            .sum::<f64>()
            / 2.0
    }

    #[test]
    fn circle_respects_tolerance() {
        let tol = 0.001;
        let c = &flatten(&ShapeKind::Circle { center: Point::ORIGIN, diameter: 10.0 }, tol)[0];
        let expected = PI * 25.0;
        assert!((area(c).abs() - expected).abs() / expected < 1e-3);
        for p in c {
            assert!(((p[0] * p[0] + p[1] * p[1]).sqrt() - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rectangle_has_four_corners() {
        let c = &flatten(&ShapeKind::Rectangle { center: Point::new(1.0, 1.0), width: 2.0, height: 4.0, rotation: 0.0 }, 0.01)[0];
        assert_eq!(c.len(), 4);
        assert!((area(c).abs() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn obround_area() {
        let c = &flatten(&ShapeKind::Obround { center: Point::ORIGIN, width: 4.0, height: 2.0, rotation: 30.0 }, 0.0001)[0];
        let expected = 2.0 * 2.0 + PI;
        assert!((area(c).abs() - expected).abs() < 1e-3);
    }

    #[test]
    fn line_stroke_is_butt_ended() {
        let c = &flatten(&ShapeKind::LineStroke { start: Point::ORIGIN, end: Point::new(3.0, 0.0), width: 1.0 }, 0.01)[0];
        assert!((area(c).abs() - 3.0).abs() < 1e-12);
        assert!(flatten(&ShapeKind::LineStroke { start: Point::ORIGIN, end: Point::ORIGIN, width: 1.0 }, 0.01).is_empty());
    }

    #[test]
    fn quarter_arc_stroke_area() {
        let shape = ShapeKind::CcwArc { start: Point::new(2.0, 0.0), end: Point::new(0.0, 2.0), center: Point::ORIGIN, width: 1.0 };
        let c = &flatten(&shape, 0.0001)[0];
        let expected = PI / 4.0 * (2.5f64.powi(2) - 1.5f64.powi(2));
        assert!((area(c).abs() - expected).abs() < 1e-3);
    }

    #[test]
    fn full_arc_stroke_is_a_ring() {
        let shape = ShapeKind::CwArc { start: Point::new(2.0, 0.0), end: Point::new(2.0, 0.0), center: Point::ORIGIN, width: 1.0 };
        let contours = flatten(&shape, 0.001);
        assert_eq!(contours.len(), 2);
        assert!(area(&contours[0]).signum() != area(&contours[1]).signum());
    }

    #[test]
    fn contour_with_arc_segment() {
        let segments = vec![
            Segment::Line { start: Point::ORIGIN, end: Point::new(1.0, 0.0) },
            Segment::Arc { start: Point::new(1.0, 0.0), end: Point::new(0.0, 1.0), center: Point::ORIGIN, clockwise: false },
            Segment::Line { start: Point::new(0.0, 1.0), end: Point::ORIGIN },
        ];
        let c = &flatten(&ShapeKind::Contour { segments }, 0.0001)[0];
        assert!((area(c) - PI / 4.0).abs() < 1e-3);
    }

    #[test]
    fn degenerate_shapes_vanish() {
        assert!(flatten(&ShapeKind::Circle { center: Point::ORIGIN, diameter: 0.0 }, 0.01).is_empty());
        assert!(flatten(&ShapeKind::Contour { segments: Vec::new() }, 0.01).is_empty());
    }
}

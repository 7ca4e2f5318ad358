//! Plane geometry shared by the compiler and the VM: points, boxes, affine
//! transforms and arc helpers.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Point) -> f64 {
        (other - self).length()
    }

    /// Angle of the vector from the origin, in radians.
    pub fn angle(self) -> f64 {
        self.y.atan2(self.x)
    }

    pub fn from_polar(radius: f64, angle: f64) -> Self {
        Point::new(radius * angle.cos(), radius * angle.sin())
    }

    pub fn approx_eq(self, other: Point, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn new(min: Point, max: Point) -> Self {
        BoundingBox { min, max }
    }

    pub fn around(center: Point, half_width: f64, half_height: f64) -> Self {
        BoundingBox::new(
            Point::new(center.x - half_width, center.y - half_height),
            Point::new(center.x + half_width, center.y + half_height),
        )
    }

    pub fn from_points<I: IntoIterator<Item = Point>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(BoundingBox::new(first, first), BoundingBox::include))
    }

    pub fn include(self, p: Point) -> Self {
        BoundingBox::new(
            Point::new(self.min.x.min(p.x), self.min.y.min(p.y)),
            Point::new(self.max.x.max(p.x), self.max.y.max(p.y)),
        )
    }

    pub fn union(self, other: BoundingBox) -> Self {
        self.include(other.min).include(other.max)
    }

    pub fn translate(self, by: Point) -> Self {
        BoundingBox::new(self.min + by, self.max + by)
    }

    pub fn expand(self, margin: f64) -> Self {
        BoundingBox::new(self.min - Point::new(margin, margin), self.max + Point::new(margin, margin))
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        Point::new((self.min.x + self.max.x) / 2.0, (self.min.y + self.max.y) / 2.0)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }
}

/// Mirroring applied by `%LM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mirroring {
    #[default]
    None,
    X,
    Y,
    XY,
}

/// Affine transform `p' = [a b; c d] p + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    pub fn translate(by: Point) -> Self {
        Transform { tx: by.x, ty: by.y, ..Transform::IDENTITY }
    }

    /// Counter-clockwise rotation about the origin.
    pub fn rotate(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Transform { a: cos, b: -sin, c: sin, d: cos, tx: 0.0, ty: 0.0 }
    }

    pub fn scale(factor: f64) -> Self {
        Transform { a: factor, d: factor, ..Transform::IDENTITY }
    }

    /// `X` flips the x axis, `Y` the y axis.
    pub fn mirror(mirroring: Mirroring) -> Self {
        let (sx, sy) = match mirroring {
            Mirroring::None => (1.0, 1.0),
            Mirroring::X => (-1.0, 1.0),
            Mirroring::Y => (1.0, -1.0),
            Mirroring::XY => (-1.0, -1.0),
        };
        Transform { a: sx, d: sy, ..Transform::IDENTITY }
    }

    /// Apply `self` first, then `next`.
    pub fn then(self, next: Transform) -> Transform {
        Transform {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.a * p.x + self.b * p.y + self.tx, self.c * p.x + self.d * p.y + self.ty)
    }

    /// Apply the linear part only.
    pub fn apply_vector(&self, v: Point) -> Point {
        Point::new(self.a * v.x + self.b * v.y, self.c * v.x + self.d * v.y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// True when the transform flips orientation, so arcs change direction.
    pub fn is_mirroring(&self) -> bool {
        self.determinant() < 0.0
    }

    /// Length multiplier of a similarity transform.
    pub fn scale_factor(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Rotation of a symmetric shape whose reference axis sits at `degrees`.
    pub fn map_rotation(&self, degrees: f64) -> f64 {
        let axis = self.apply_vector(Point::from_polar(1.0, degrees.to_radians()));
        normalize_degrees(axis.angle().to_degrees())
    }

    pub fn is_identity(&self) -> bool {
        const EPS: f64 = 1e-12;
        let id = Transform::IDENTITY;
        [
            self.a - id.a,
            self.b - id.b,
            self.c - id.c,
            self.d - id.d,
            self.tx,
            self.ty,
        ]
        .iter()
        .all(|v| v.abs() < EPS)
    }

    /// Stable textual key, used to cache transformed copies of layers.
    pub fn tag(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            self.a, self.b, self.c, self.d, self.tx, self.ty
        )
        .replace("-0.000000", "0.000000")
    }
}

/// Fold an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let folded = degrees.rem_euclid(360.0);
    if (folded - 360.0).abs() < 1e-9 { 0.0 } else { folded }
}

/// Signed sweep from `start` to `end` around `center`, positive counter-clockwise.
///
/// Coincident endpoints give a full turn.
pub fn arc_sweep(start: Point, end: Point, center: Point, clockwise: bool) -> f64 {
    let a0 = (start - center).angle();
    let a1 = (end - center).angle();
    let sweep = if clockwise { (a0 - a1).rem_euclid(TAU) } else { (a1 - a0).rem_euclid(TAU) };
    let sweep = if sweep < 1e-12 || start.approx_eq(end, 1e-12) { TAU } else { sweep };
    if clockwise { -sweep } else { sweep }
}

/// Bounding box of a circular arc of zero width.
pub fn arc_bounds(start: Point, end: Point, center: Point, clockwise: bool) -> BoundingBox {
    let radius = start.distance(center);
    let a0 = (start - center).angle();
    let sweep = arc_sweep(start, end, center, clockwise);
    let mut bbox = BoundingBox::new(start, start).include(end);
    for k in -4..=4 {
        let axis = k as f64 * FRAC_PI_2;
        if angle_within(axis, a0, sweep) {
            bbox = bbox.include(center + Point::from_polar(radius, axis));
        }
    }
    bbox
}

fn angle_within(angle: f64, start: f64, sweep: f64) -> bool {
    let offset = if sweep >= 0.0 {
        (angle - start).rem_euclid(TAU)
    } else {
        (start - angle).rem_euclid(TAU)
    };
    offset <= sweep.abs() + 1e-12 || (sweep.abs() >= TAU - 1e-12)
}

/// Convex hull (Andrew's monotone chain), counter-clockwise, no repeated end point.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts: Vec<Point> = points.to_vec();
    pts.sort_by(|p, q| p.x.total_cmp(&q.x).then(p.y.total_cmp(&q.y)));
    pts.dedup_by(|p, q| p.approx_eq(*q, 1e-12));
    if pts.len() < 3 {
        return pts;
    }
    let cross = |o: Point, a: Point, b: Point| (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x);
    let mut hull: Vec<Point> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Angle in radians of vertex `index` of a regular polygon whose first
/// vertex sits at `rotation_degrees`.
pub fn vertex_angle(rotation_degrees: f64, index: usize, vertices: usize) -> f64 {
    rotation_degrees.to_radians() + 2.0 * PI * index as f64 / vertices as f64
}

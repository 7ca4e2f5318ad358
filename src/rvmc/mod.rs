//! Render VM commands: a flat, serializable stream of layer and shape
//! instructions produced by the compiler and consumed by the VM.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Point, Transform, arc_bounds};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
    pub const MAIN: &'static str = "%main%";

    pub fn new(id: impl Into<String>) -> Self {
        LayerId(id.into())
    }

    pub fn main() -> Self {
        LayerId::new(Self::MAIN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One edge of a contour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Line { start: Point, end: Point },
    /// Coincident endpoints describe a full circle.
    Arc { start: Point, end: Point, center: Point, clockwise: bool },
}

impl Segment {
    pub fn start(&self) -> Point {
        match *self {
            Segment::Line { start, .. } | Segment::Arc { start, .. } => start,
        }
    }

    pub fn end(&self) -> Point {
        match *self {
            Segment::Line { end, .. } | Segment::Arc { end, .. } => end,
        }
    }

    fn transformed(&self, t: &Transform) -> Segment {
        match *self {
            Segment::Line { start, end } => Segment::Line { start: t.apply(start), end: t.apply(end) },
            Segment::Arc { start, end, center, clockwise } => Segment::Arc {
                start: t.apply(start),
                end: t.apply(end),
                center: t.apply(center),
                clockwise: clockwise != t.is_mirroring(),
            },
        }
    }

    fn bbox(&self) -> BoundingBox {
        match *self {
            Segment::Line { start, end } => BoundingBox::new(start, start).include(end),
            Segment::Arc { start, end, center, clockwise } => arc_bounds(start, end, center, clockwise),
        }
    }
}

/// Primitive shapes the VM knows how to rasterize. Rotations are degrees
/// counter-clockwise about the shape center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShapeKind {
    Circle { center: Point, diameter: f64 },
    Rectangle { center: Point, width: f64, height: f64, rotation: f64 },
    Obround { center: Point, width: f64, height: f64, rotation: f64 },
    /// Regular polygon; the first vertex sits at `rotation`.
    Polygon { center: Point, outer_diameter: f64, vertices: u32, rotation: f64 },
    /// Closed outline; the last segment ends where the first begins.
    Contour { segments: Vec<Segment> },
    /// Straight stroke with butt ends.
    LineStroke { start: Point, end: Point, width: f64 },
    /// Arc stroke with butt ends.
    CwArc { start: Point, end: Point, center: Point, width: f64 },
    CcwArc { start: Point, end: Point, center: Point, width: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub kind: ShapeKind,
    /// Clear polarity: subtracts from the layer instead of adding.
    pub negative: bool,
}

impl Shape {
    pub fn new(kind: ShapeKind, negative: bool) -> Self {
        Shape { kind, negative }
    }

    pub fn circle(center: Point, diameter: f64, negative: bool) -> Self {
        Shape::new(ShapeKind::Circle { center, diameter }, negative)
    }

    pub fn rectangle(center: Point, width: f64, height: f64, rotation: f64, negative: bool) -> Self {
        Shape::new(ShapeKind::Rectangle { center, width, height, rotation }, negative)
    }

    pub fn contour(segments: Vec<Segment>, negative: bool) -> Self {
        Shape::new(ShapeKind::Contour { segments }, negative)
    }

    /// Closed polygon through `points`.
    pub fn outline(points: &[Point], negative: bool) -> Self {
        let segments = points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .map(|(&start, &end)| Segment::Line { start, end })
            .collect();
        Shape::contour(segments, negative)
    }

    pub fn line_stroke(start: Point, end: Point, width: f64, negative: bool) -> Self {
        Shape::new(ShapeKind::LineStroke { start, end, width }, negative)
    }

    pub fn arc_stroke(start: Point, end: Point, center: Point, width: f64, clockwise: bool, negative: bool) -> Self {
        let kind = if clockwise {
            ShapeKind::CwArc { start, end, center, width }
        } else {
            ShapeKind::CcwArc { start, end, center, width }
        };
        Shape::new(kind, negative)
    }

    /// Same shape with polarity inverted when `invert` is set.
    pub fn with_polarity(mut self, invert: bool) -> Self {
        self.negative ^= invert;
        self
    }

    /// Apply a similarity transform (rotation, uniform scale, mirroring, translation).
    pub fn transformed(&self, t: &Transform) -> Shape {
        let s = t.scale_factor();
        let kind = match &self.kind {
            ShapeKind::Circle { center, diameter } => {
                ShapeKind::Circle { center: t.apply(*center), diameter: diameter * s }
            }
            ShapeKind::Rectangle { center, width, height, rotation } => ShapeKind::Rectangle {
                center: t.apply(*center),
                width: width * s,
                height: height * s,
                rotation: t.map_rotation(*rotation),
            },
            ShapeKind::Obround { center, width, height, rotation } => ShapeKind::Obround {
                center: t.apply(*center),
                width: width * s,
                height: height * s,
                rotation: t.map_rotation(*rotation),
            },
            ShapeKind::Polygon { center, outer_diameter, vertices, rotation } => ShapeKind::Polygon {
                center: t.apply(*center),
                outer_diameter: outer_diameter * s,
                vertices: *vertices,
                rotation: t.map_rotation(*rotation),
            },
            ShapeKind::Contour { segments } => ShapeKind::Contour {
                segments: segments.iter().map(|seg| seg.transformed(t)).collect(),
            },
            ShapeKind::LineStroke { start, end, width } => ShapeKind::LineStroke {
                start: t.apply(*start),
                end: t.apply(*end),
                width: width * s,
            },
            ShapeKind::CwArc { start, end, center, width } | ShapeKind::CcwArc { start, end, center, width } => {
                let clockwise = matches!(self.kind, ShapeKind::CwArc { .. }) != t.is_mirroring();
                return Shape::arc_stroke(
                    t.apply(*start),
                    t.apply(*end),
                    t.apply(*center),
                    width * s,
                    clockwise,
                    self.negative,
                );
            }
        };
        Shape::new(kind, self.negative)
    }

    pub fn translated(&self, by: Point) -> Shape {
        self.transformed(&Transform::translate(by))
    }

    /// Conservative bounds of the shape.
    pub fn bbox(&self) -> Option<BoundingBox> {
        match &self.kind {
            ShapeKind::Circle { center, diameter } => Some(BoundingBox::around(*center, diameter / 2.0, diameter / 2.0)),
            ShapeKind::Rectangle { center, width, height, rotation }
            | ShapeKind::Obround { center, width, height, rotation } => {
                let t = Transform::rotate(*rotation).then(Transform::translate(*center));
                let local = BoundingBox::around(Point::ORIGIN, width / 2.0, height / 2.0);
                BoundingBox::from_points(local.corners().into_iter().map(|p| t.apply(p)))
            }
            ShapeKind::Polygon { center, outer_diameter, .. } => {
                Some(BoundingBox::around(*center, outer_diameter / 2.0, outer_diameter / 2.0))
            }
            ShapeKind::Contour { segments } => segments.iter().map(Segment::bbox).reduce(BoundingBox::union),
            ShapeKind::LineStroke { start, end, width } => {
                Some(BoundingBox::new(*start, *start).include(*end).expand(width / 2.0))
            }
            ShapeKind::CwArc { start, end, center, width } => {
                Some(arc_bounds(*start, *end, *center, true).expand(width / 2.0))
            }
            ShapeKind::CcwArc { start, end, center, width } => {
                Some(arc_bounds(*start, *end, *center, false).expand(width / 2.0))
            }
        }
    }
}

/// One instruction of the render VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Open a layer. A fixed `bbox` clips the layer; otherwise its box is
    /// computed from its contents when it ends.
    StartLayer { id: LayerId, bbox: Option<BoundingBox>, origin: Point },
    Shape(Shape),
    /// Composite a completed layer into the current one, placing the
    /// source's origin at `location`.
    PasteLayer { id: LayerId, location: Point, negative: bool },
    EndLayer,
}

/// A compiled program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Rvmc {
    pub commands: Vec<Command>,
}

impl Rvmc {
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Layer ids in the order they are opened.
    pub fn layers(&self) -> impl Iterator<Item = &LayerId> {
        self.commands.iter().filter_map(|c| match c {
            Command::StartLayer { id, .. } => Some(id),
            _ => None,
        })
    }

    pub fn shape_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, Command::Shape(_))).count()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RvmcError {
    #[error("layer `{0}` is pasted before it is completed")]
    LayerNotCompleted(LayerId),
    #[error("layer `{0}` is defined twice")]
    DuplicateLayer(LayerId),
    #[error("no layer is open")]
    NoLayerOpen,
    #[error("layers left open: {0:?}")]
    UnclosedLayers(Vec<LayerId>),
}

/// Builds an [`Rvmc`], refusing any stream in which a layer is pasted
/// before it is complete. That rules out paste cycles by construction.
#[derive(Debug, Default)]
pub struct RvmcBuilder {
    commands: Vec<Command>,
    open: Vec<LayerId>,
    seen: HashSet<LayerId>,
    completed: HashSet<LayerId>,
}

impl RvmcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_layer(&mut self, id: LayerId, bbox: Option<BoundingBox>, origin: Point) -> Result<&mut Self, RvmcError> {
        if !self.seen.insert(id.clone()) {
            return Err(RvmcError::DuplicateLayer(id));
        }
        self.open.push(id.clone());
        self.commands.push(Command::StartLayer { id, bbox, origin });
        Ok(self)
    }

    pub fn shape(&mut self, shape: Shape) -> Result<&mut Self, RvmcError> {
        if self.open.is_empty() {
            return Err(RvmcError::NoLayerOpen);
        }
        self.commands.push(Command::Shape(shape));
        Ok(self)
    }

    pub fn paste(&mut self, id: LayerId, location: Point, negative: bool) -> Result<&mut Self, RvmcError> {
        if self.open.is_empty() {
            return Err(RvmcError::NoLayerOpen);
        }
        if !self.completed.contains(&id) {
            return Err(RvmcError::LayerNotCompleted(id));
        }
        self.commands.push(Command::PasteLayer { id, location, negative });
        Ok(self)
    }

    pub fn end_layer(&mut self) -> Result<&mut Self, RvmcError> {
        let id = self.open.pop().ok_or(RvmcError::NoLayerOpen)?;
        self.completed.insert(id);
        self.commands.push(Command::EndLayer);
        Ok(self)
    }

    pub fn finish(self) -> Result<Rvmc, RvmcError> {
        if !self.open.is_empty() {
            return Err(RvmcError::UnclosedLayers(self.open));
        }
        Ok(Rvmc { commands: self.commands })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Mirroring;

    const EPS: f64 = 1e-9;

    #[test]
    fn builder_produces_flat_stream() {
        let mut b = RvmcBuilder::new();
        b.start_layer(LayerId::new("D10"), None, Point::ORIGIN).unwrap();
        b.shape(Shape::circle(Point::ORIGIN, 1.0, false)).unwrap();
        b.end_layer().unwrap();
        b.start_layer(LayerId::main(), None, Point::ORIGIN).unwrap();
        b.paste(LayerId::new("D10"), Point::new(2.0, 0.0), false).unwrap();
        b.end_layer().unwrap();
        let rvmc = b.finish().unwrap();
        assert_eq!(rvmc.len(), 6);
        let layers: Vec<_> = rvmc.layers().map(LayerId::as_str).collect();
        assert_eq!(layers, vec!["D10", "%main%"]);
    }

    #[test]
    fn builder_rejects_paste_of_open_layer() {
        let mut b = RvmcBuilder::new();
        b.start_layer(LayerId::new("a"), None, Point::ORIGIN).unwrap();
        let err = b.paste(LayerId::new("a"), Point::ORIGIN, false).unwrap_err();
        assert_eq!(err, RvmcError::LayerNotCompleted(LayerId::new("a")));
    }

    #[test]
    fn builder_rejects_unknown_and_duplicate_layers() {
        let mut b = RvmcBuilder::new();
        b.start_layer(LayerId::new("a"), None, Point::ORIGIN).unwrap();
        assert!(matches!(b.paste(LayerId::new("zzz"), Point::ORIGIN, false), Err(RvmcError::LayerNotCompleted(_))));
        b.end_layer().unwrap();
        assert!(matches!(b.start_layer(LayerId::new("a"), None, Point::ORIGIN), Err(RvmcError::DuplicateLayer(_))));
    }

    #[test]
    fn builder_rejects_orphan_commands() {
        let mut b = RvmcBuilder::new();
        assert_eq!(b.shape(Shape::circle(Point::ORIGIN, 1.0, false)).unwrap_err(), RvmcError::NoLayerOpen);
        assert_eq!(b.end_layer().unwrap_err(), RvmcError::NoLayerOpen);
        b.start_layer(LayerId::main(), None, Point::ORIGIN).unwrap();
        assert!(matches!(b.finish(), Err(RvmcError::UnclosedLayers(open)) if open.len() == 1));
    }

    #[test]
    fn mirrored_arc_flips_direction() {
        let arc = Shape::arc_stroke(Point::new(1.0, 0.0), Point::new(0.0, 1.0), Point::ORIGIN, 0.1, false, false);
        let flipped = arc.transformed(&Transform::mirror(Mirroring::X));
        let ShapeKind::CwArc { start, end, .. } = flipped.kind else {
            panic!("expected clockwise arc, got {:?}", flipped.kind);
        };
        assert!(start.approx_eq(Point::new(-1.0, 0.0), EPS));
        assert!(end.approx_eq(Point::new(0.0, 1.0), EPS));
    }

    #[test]
    fn transformed_rectangle_rotates_and_scales() {
        let r = Shape::rectangle(Point::new(1.0, 0.0), 2.0, 1.0, 0.0, true);
        let t = Transform::rotate(90.0).then(Transform::scale(2.0));
        let ShapeKind::Rectangle { center, width, height, rotation } = r.transformed(&t).kind else {
            panic!("expected rectangle");
        };
        assert!(center.approx_eq(Point::new(0.0, 2.0), EPS));
        assert!((width - 4.0).abs() < EPS && (height - 2.0).abs() < EPS);
        assert!((rotation - 90.0).abs() < EPS);
    }

    #[test]
    fn polarity_inversion() {
        let s = Shape::circle(Point::ORIGIN, 1.0, true);
        assert!(!s.clone().with_polarity(true).negative);
        assert!(s.with_polarity(false).negative);
    }

    #[test]
    fn bbox_of_rotated_rectangle() {
        let r = Shape::rectangle(Point::ORIGIN, 2.0, 2.0, 45.0, false);
        let b = r.bbox().unwrap();
        let half = 2f64.sqrt();
        assert!((b.max.x - half).abs() < EPS);
        assert!((b.min.y + half).abs() < EPS);
    }

    #[test]
    fn rvmc_serializes_layer_ids_as_strings() {
        let rvmc = Rvmc {
            commands: vec![
                Command::StartLayer { id: LayerId::main(), bbox: None, origin: Point::ORIGIN },
                Command::EndLayer,
            ],
        };
        let json = serde_json::to_string(&rvmc).unwrap();
        assert!(json.contains(r#""id":"%main%""#), "{json}");
        let back: Rvmc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rvmc);
    }
}

//! Aperture kinds and how each one flashes and strokes.

use crate::geometry::{BoundingBox, Point, Transform, convex_hull};
use crate::rvmc::{LayerId, Shape, ShapeKind};

/// Stroke geometry of one interpolated arc, endpoints in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ArcPath {
    pub start: Point,
    pub end: Point,
    pub center: Point,
    pub clockwise: bool,
}

/// What a flash of an aperture produces, before placement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FlashImage {
    /// Shapes that can be placed straight into the target layer.
    Direct(Vec<Shape>),
    /// Shapes whose clear parts must only erase the aperture's own image, so
    /// they are composed in a layer of their own and pasted.
    Layered(Vec<Shape>),
    /// A block aperture's layer.
    Block(LayerId),
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("{kind} apertures cannot be used for strokes")]
pub(crate) struct StrokeError {
    pub kind: &'static str,
}

type StrokeResult = Result<Vec<Shape>, StrokeError>;

/// Behaviour shared by every aperture kind. Local geometry is centred on the
/// aperture origin and already in millimetres.
pub(crate) trait Aperture {
    fn kind(&self) -> &'static str;

    /// Bounds of the untransformed flash image.
    fn bbox(&self) -> BoundingBox;

    fn flash(&self) -> FlashImage;

    /// Stroke a straight draw. `transform` is the linear aperture transform.
    fn line(&self, transform: &Transform, start: Point, end: Point, negative: bool) -> StrokeResult;

    fn arc(&self, transform: &Transform, arc: &ArcPath, negative: bool) -> StrokeResult;
}

fn with_hole(mut shapes: Vec<Shape>, hole: Option<f64>) -> FlashImage {
    match hole {
        Some(diameter) if diameter > 0.0 => {
            shapes.push(Shape::circle(Point::ORIGIN, diameter, true));
            FlashImage::Layered(shapes)
        }
        _ => FlashImage::Direct(shapes),
    }
}

/// Round-capped straight stroke.
fn round_line(width: f64, start: Point, end: Point, negative: bool) -> Vec<Shape> {
    if start == end {
        return vec![Shape::circle(start, width, negative)];
    }
    vec![
        Shape::circle(start, width, negative),
        Shape::line_stroke(start, end, width, negative),
        Shape::circle(end, width, negative),
    ]
}

/// Round-capped arc stroke.
fn round_arc(width: f64, arc: &ArcPath, negative: bool) -> Vec<Shape> {
    vec![
        Shape::circle(arc.start, width, negative),
        Shape::arc_stroke(arc.start, arc.end, arc.center, width, arc.clockwise, negative),
        Shape::circle(arc.end, width, negative),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CircleAperture {
    pub diameter: f64,
    pub hole: Option<f64>,
}

impl Aperture for CircleAperture {
    fn kind(&self) -> &'static str {
        "circle"
    }

    fn bbox(&self) -> BoundingBox {
        let r = self.diameter / 2.0;
        BoundingBox::around(Point::ORIGIN, r, r)
    }

    fn flash(&self) -> FlashImage {
        with_hole(vec![Shape::circle(Point::ORIGIN, self.diameter, false)], self.hole)
    }

    fn line(&self, transform: &Transform, start: Point, end: Point, negative: bool) -> StrokeResult {
        Ok(round_line(self.diameter * transform.scale_factor(), start, end, negative))
    }

    fn arc(&self, transform: &Transform, arc: &ArcPath, negative: bool) -> StrokeResult {
        Ok(round_arc(self.diameter * transform.scale_factor(), arc, negative))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RectangleAperture {
    pub width: f64,
    pub height: f64,
    pub hole: Option<f64>,
}

impl Aperture for RectangleAperture {
    fn kind(&self) -> &'static str {
        "rectangle"
    }

    fn bbox(&self) -> BoundingBox {
        BoundingBox::around(Point::ORIGIN, self.width / 2.0, self.height / 2.0)
    }

    fn flash(&self) -> FlashImage {
        with_hole(vec![Shape::rectangle(Point::ORIGIN, self.width, self.height, 0.0, false)], self.hole)
    }

    /// The rectangle swept along a straight line is the convex hull of its
    /// corners at both ends.
    fn line(&self, transform: &Transform, start: Point, end: Point, negative: bool) -> StrokeResult {
        let corners = self.bbox().corners().map(|c| transform.apply_vector(c));
        let swept: Vec<Point> = corners.iter().flat_map(|&c| [start + c, end + c]).collect();
        let hull = convex_hull(&swept);
        if hull.len() < 3 {
            return Ok(Vec::new());
        }
        Ok(vec![Shape::outline(&hull, negative)])
    }

    fn arc(&self, transform: &Transform, arc: &ArcPath, negative: bool) -> StrokeResult {
        Ok(round_arc(self.width.min(self.height) * transform.scale_factor(), arc, negative))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObroundAperture {
    pub width: f64,
    pub height: f64,
    pub hole: Option<f64>,
}

impl Aperture for ObroundAperture {
    fn kind(&self) -> &'static str {
        "obround"
    }

    fn bbox(&self) -> BoundingBox {
        BoundingBox::around(Point::ORIGIN, self.width / 2.0, self.height / 2.0)
    }

    fn flash(&self) -> FlashImage {
        let shape = Shape::new(
            ShapeKind::Obround { center: Point::ORIGIN, width: self.width, height: self.height, rotation: 0.0 },
            false,
        );
        with_hole(vec![shape], self.hole)
    }

    fn line(&self, transform: &Transform, start: Point, end: Point, negative: bool) -> StrokeResult {
        Ok(round_line(self.width.min(self.height) * transform.scale_factor(), start, end, negative))
    }

    fn arc(&self, transform: &Transform, arc: &ArcPath, negative: bool) -> StrokeResult {
        Ok(round_arc(self.width.min(self.height) * transform.scale_factor(), arc, negative))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PolygonAperture {
    pub outer_diameter: f64,
    pub vertices: u32,
    pub rotation: f64,
    pub hole: Option<f64>,
}

impl PolygonAperture {
    fn inscribed_diameter(&self) -> f64 {
        self.outer_diameter * (std::f64::consts::PI / self.vertices as f64).cos()
    }
}

impl Aperture for PolygonAperture {
    fn kind(&self) -> &'static str {
        "polygon"
    }

    fn bbox(&self) -> BoundingBox {
        let r = self.outer_diameter / 2.0;
        BoundingBox::around(Point::ORIGIN, r, r)
    }

    fn flash(&self) -> FlashImage {
        let shape = Shape::new(
            ShapeKind::Polygon {
                center: Point::ORIGIN,
                outer_diameter: self.outer_diameter,
                vertices: self.vertices,
                rotation: self.rotation,
            },
            false,
        );
        with_hole(vec![shape], self.hole)
    }

    fn line(&self, transform: &Transform, start: Point, end: Point, negative: bool) -> StrokeResult {
        Ok(round_line(self.inscribed_diameter() * transform.scale_factor(), start, end, negative))
    }

    fn arc(&self, transform: &Transform, arc: &ArcPath, negative: bool) -> StrokeResult {
        Ok(round_arc(self.inscribed_diameter() * transform.scale_factor(), arc, negative))
    }
}

/// An instantiated aperture macro.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MacroAperture {
    pub shapes: Vec<Shape>,
}

impl Aperture for MacroAperture {
    fn kind(&self) -> &'static str {
        "macro"
    }

    fn bbox(&self) -> BoundingBox {
        self.shapes
            .iter()
            .filter(|s| !s.negative)
            .filter_map(Shape::bbox)
            .reduce(BoundingBox::union)
            .unwrap_or_else(|| BoundingBox::around(Point::ORIGIN, 0.0, 0.0))
    }

    fn flash(&self) -> FlashImage {
        if self.shapes.iter().any(|s| s.negative) {
            FlashImage::Layered(self.shapes.clone())
        } else {
            FlashImage::Direct(self.shapes.clone())
        }
    }

    fn line(&self, _: &Transform, _: Point, _: Point, _: bool) -> StrokeResult {
        Err(StrokeError { kind: self.kind() })
    }

    fn arc(&self, _: &Transform, _: &ArcPath, _: bool) -> StrokeResult {
        Err(StrokeError { kind: self.kind() })
    }
}

/// A closed `%AB%` block, compiled into its own layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockAperture {
    pub layer: LayerId,
    pub bounds: Option<BoundingBox>,
}

impl Aperture for BlockAperture {
    fn kind(&self) -> &'static str {
        "block"
    }

    fn bbox(&self) -> BoundingBox {
        self.bounds.unwrap_or_else(|| BoundingBox::around(Point::ORIGIN, 0.0, 0.0))
    }

    fn flash(&self) -> FlashImage {
        FlashImage::Block(self.layer.clone())
    }

    fn line(&self, _: &Transform, _: Point, _: Point, _: bool) -> StrokeResult {
        Err(StrokeError { kind: self.kind() })
    }

    fn arc(&self, _: &Transform, _: &ArcPath, _: bool) -> StrokeResult {
        Err(StrokeError { kind: self.kind() })
    }
}

/// Every aperture the compiler can hold in its table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApertureKind {
    Circle(CircleAperture),
    Rectangle(RectangleAperture),
    Obround(ObroundAperture),
    Polygon(PolygonAperture),
    Macro(MacroAperture),
    Block(BlockAperture),
}

impl ApertureKind {
    fn inner(&self) -> &dyn Aperture {
        match self {
            ApertureKind::Circle(a) => a,
            ApertureKind::Rectangle(a) => a,
            ApertureKind::Obround(a) => a,
            ApertureKind::Polygon(a) => a,
            ApertureKind::Macro(a) => a,
            ApertureKind::Block(a) => a,
        }
    }
}

impl Aperture for ApertureKind {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn bbox(&self) -> BoundingBox {
        self.inner().bbox()
    }

    fn flash(&self) -> FlashImage {
        self.inner().flash()
    }

    fn line(&self, transform: &Transform, start: Point, end: Point, negative: bool) -> StrokeResult {
        self.inner().line(transform, start, end, negative)
    }

    fn arc(&self, transform: &Transform, arc: &ArcPath, negative: bool) -> StrokeResult {
        self.inner().arc(transform, arc, negative)
    }
}

//! Aperture macro evaluation: arithmetic over `$n` parameters and expansion of
//! primitives into shapes in aperture-local coordinates.

use std::collections::HashMap;
use std::f64::consts::SQRT_2;

use tracing::trace;

use crate::ast::{BinOp, ExprPoint, MacroExpr, MacroPrimitive, MacroStatement};
use crate::geometry::{Point, Transform};
use crate::rvmc::{Segment, Shape, ShapeKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MacroEvaluationError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("macro variable ${0} is not bound")]
    UnboundParameter(u32),
    #[error("expression evaluated to a non-finite value")]
    NonFinite,
    #[error("invalid {primitive} primitive: {message}")]
    InvalidPrimitive { primitive: &'static str, message: String },
}

type Result<T> = std::result::Result<T, MacroEvaluationError>;

/// Values of `$n` variables during one instantiation.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<u32, f64>,
}

impl Bindings {
    /// `$1..$n` bound to the aperture definition's parameters.
    pub fn from_params(params: &[f64]) -> Self {
        let values = params.iter().enumerate().map(|(i, &v)| (i as u32 + 1, v)).collect();
        Bindings { values }
    }

    pub fn get(&self, param: u32) -> Option<f64> {
        self.values.get(&param).copied()
    }

    pub fn set(&mut self, param: u32, value: f64) {
        self.values.insert(param, value);
    }
}

pub fn evaluate(expr: &MacroExpr, bindings: &Bindings) -> Result<f64> {
    let value = match expr {
        MacroExpr::Constant(v) => *v,
        MacroExpr::Param(n) => bindings.get(*n).ok_or(MacroEvaluationError::UnboundParameter(*n))?,
        MacroExpr::Neg(inner) => -evaluate(inner, bindings)?,
        MacroExpr::Pos(inner) | MacroExpr::Paren(inner) => evaluate(inner, bindings)?,
        MacroExpr::Binary { op, left, right } => {
            let l = evaluate(left, bindings)?;
            let r = evaluate(right, bindings)?;
            match op {
                BinOp::Add => l + r,
                BinOp::Subtract => l - r,
                BinOp::Multiply => l * r,
                BinOp::Divide if r == 0.0 => return Err(MacroEvaluationError::DivisionByZero),
                BinOp::Divide => l / r,
            }
        }
    };
    if value.is_finite() { Ok(value) } else { Err(MacroEvaluationError::NonFinite) }
}

/// Run a macro body with the given parameters.
///
/// Shapes are in aperture-local coordinates and the file's unit; `negative`
/// marks exposure-off primitives, which only erase within this aperture.
pub fn instantiate(body: &[MacroStatement], params: &[f64]) -> Result<Vec<Shape>> {
    let mut bindings = Bindings::from_params(params);
    let mut shapes = Vec::new();
    for statement in body {
        match statement {
            MacroStatement::Comment(_) => {}
            MacroStatement::Assign { param, value } => {
                let v = evaluate(value, &bindings)?;
                bindings.set(*param, v);
            }
            MacroStatement::Primitive(primitive) => {
                let mut expander = Expander { bindings: &bindings, shapes: &mut shapes };
                expander.expand(primitive)?;
            }
        }
    }
    trace!(shapes = shapes.len(), "instantiated macro");
    Ok(shapes)
}

struct Expander<'a> {
    bindings: &'a Bindings,
    shapes: &'a mut Vec<Shape>,
}

impl Expander<'_> {
    fn eval(&self, e: &MacroExpr) -> Result<f64> {
        evaluate(e, self.bindings)
    }

    fn point(&self, p: &ExprPoint) -> Result<Point> {
        Ok(Point::new(self.eval(&p.x)?, self.eval(&p.y)?))
    }

    fn negative(&self, exposure: &MacroExpr) -> Result<bool> {
        Ok(self.eval(exposure)? == 0.0)
    }

    /// Push `shapes` after rotating them about the macro origin.
    fn emit(&mut self, shapes: impl IntoIterator<Item = Shape>, rotation: f64) {
        let t = Transform::rotate(rotation);
        self.shapes.extend(shapes.into_iter().map(|s| s.transformed(&t)));
    }

    fn expand(&mut self, primitive: &MacroPrimitive) -> Result<()> {
        match primitive {
            MacroPrimitive::Circle { exposure, diameter, center, rotation } => {
                let negative = self.negative(exposure)?;
                let diameter = self.eval(diameter)?;
                let center = self.point(center)?;
                let rotation = rotation.as_ref().map(|r| self.eval(r)).transpose()?.unwrap_or(0.0);
                if diameter < 0.0 {
                    return Err(invalid("circle", format!("negative diameter {diameter}")));
                }
                self.emit([Shape::circle(center, diameter, negative)], rotation);
            }
            MacroPrimitive::VectorLine { exposure, width, start, end, rotation } => {
                let shape = Shape::line_stroke(self.point(start)?, self.point(end)?, self.eval(width)?, self.negative(exposure)?);
                let rotation = self.eval(rotation)?;
                self.emit([shape], rotation);
            }
            MacroPrimitive::CenterLine { exposure, width, height, center, rotation } => {
                let shape = Shape::rectangle(self.point(center)?, self.eval(width)?, self.eval(height)?, 0.0, self.negative(exposure)?);
                let rotation = self.eval(rotation)?;
                self.emit([shape], rotation);
            }
            MacroPrimitive::LowerLeftLine { exposure, width, height, lower_left, rotation } => {
                let (w, h) = (self.eval(width)?, self.eval(height)?);
                let center = self.point(lower_left)? + Point::new(w / 2.0, h / 2.0);
                let shape = Shape::rectangle(center, w, h, 0.0, self.negative(exposure)?);
                let rotation = self.eval(rotation)?;
                self.emit([shape], rotation);
            }
            MacroPrimitive::Outline { exposure, points, rotation } => {
                let mut pts = points.iter().map(|p| self.point(p)).collect::<Result<Vec<_>>>()?;
                if pts.len() > 1 && pts.first() == pts.last() {
                    pts.pop();
                }
                if pts.len() < 3 {
                    return Err(invalid("outline", format!("needs at least 3 distinct vertices, got {}", pts.len())));
                }
                let shape = Shape::outline(&pts, self.negative(exposure)?);
                let rotation = self.eval(rotation)?;
                self.emit([shape], rotation);
            }
            MacroPrimitive::Polygon { exposure, vertices, center, diameter, rotation } => {
                let n = self.eval(vertices)?.round();
                if !(3.0..=12.0).contains(&n) {
                    return Err(invalid("polygon", format!("vertex count must be 3 to 12, got {n}")));
                }
                let kind = ShapeKind::Polygon {
                    center: self.point(center)?,
                    outer_diameter: self.eval(diameter)?,
                    vertices: n as u32,
                    rotation: 0.0,
                };
                let shape = Shape::new(kind, self.negative(exposure)?);
                let rotation = self.eval(rotation)?;
                self.emit([shape], rotation);
            }
            MacroPrimitive::Moire {
                center,
                outer_diameter,
                ring_thickness,
                gap,
                max_rings,
                crosshair_thickness,
                crosshair_length,
                rotation,
            } => {
                let center = self.point(center)?;
                let shapes = moire(
                    center,
                    self.eval(outer_diameter)?,
                    self.eval(ring_thickness)?,
                    self.eval(gap)?,
                    self.eval(max_rings)?.round().max(0.0) as usize,
                    self.eval(crosshair_thickness)?,
                    self.eval(crosshair_length)?,
                );
                let rotation = self.eval(rotation)?;
                self.emit(shapes, rotation);
            }
            MacroPrimitive::Thermal { center, outer_diameter, inner_diameter, gap, rotation } => {
                let (outer, inner, gap) = (self.eval(outer_diameter)?, self.eval(inner_diameter)?, self.eval(gap)?);
                if inner < 0.0 || outer <= inner || gap < 0.0 {
                    return Err(invalid("thermal", format!("needs 0 <= inner ({inner}) < outer ({outer}) and gap >= 0")));
                }
                let shapes = thermal(self.point(center)?, outer / 2.0, inner / 2.0, gap / 2.0);
                let rotation = self.eval(rotation)?;
                self.emit(shapes, rotation);
            }
        }
        Ok(())
    }
}

fn invalid(primitive: &'static str, message: String) -> MacroEvaluationError {
    MacroEvaluationError::InvalidPrimitive { primitive, message }
}

/// Concentric rings plus a crosshair, all dark. Each ring is a full-turn arc
/// stroke at its mid radius; a ring thicker than its radius is a solid disc.
fn moire(
    center: Point,
    outer_diameter: f64,
    ring_thickness: f64,
    gap: f64,
    max_rings: usize,
    crosshair_thickness: f64,
    crosshair_length: f64,
) -> Vec<Shape> {
    let mut shapes = Vec::new();
    let mut radius = outer_diameter / 2.0;
    for _ in 0..max_rings {
        if radius <= 0.0 {
            break;
        }
        let inner = radius - ring_thickness;
        if inner > 0.0 {
            let mid = center + Point::new(radius - ring_thickness / 2.0, 0.0);
            shapes.push(Shape::arc_stroke(mid, mid, center, ring_thickness, false, false));
        } else {
            shapes.push(Shape::circle(center, radius * 2.0, false));
        }
        radius = inner - gap;
    }
    if crosshair_thickness > 0.0 && crosshair_length > 0.0 {
        shapes.push(Shape::rectangle(center, crosshair_length, crosshair_thickness, 0.0, false));
        shapes.push(Shape::rectangle(center, crosshair_thickness, crosshair_length, 0.0, false));
    }
    shapes
}

/// Ring with a cross-shaped gap, as four positive quadrant outlines.
fn thermal(center: Point, outer: f64, inner: f64, half_gap: f64) -> Vec<Shape> {
    // The gap swallows the whole ring once it reaches the outer diagonal.
    if half_gap * SQRT_2 >= outer {
        return Vec::new();
    }
    let along = |radius: f64| (radius * radius - half_gap * half_gap).sqrt();
    let outer_start = Point::new(along(outer), half_gap);
    let outer_end = Point::new(half_gap, along(outer));
    let mut segments = vec![Segment::Arc { start: outer_start, end: outer_end, center: Point::ORIGIN, clockwise: false }];
    if half_gap * SQRT_2 < inner {
        let inner_start = Point::new(half_gap, along(inner));
        let inner_end = Point::new(along(inner), half_gap);
        segments.push(Segment::Line { start: outer_end, end: inner_start });
        segments.push(Segment::Arc { start: inner_start, end: inner_end, center: Point::ORIGIN, clockwise: true });
        segments.push(Segment::Line { start: inner_end, end: outer_start });
    } else {
        let corner = Point::new(half_gap, half_gap);
        segments.push(Segment::Line { start: outer_end, end: corner });
        segments.push(Segment::Line { start: corner, end: outer_start });
    }
    let quadrant = Shape::contour(segments, false);
    (0..4)
        .map(|q| {
            let t = Transform::rotate(q as f64 * 90.0).then(Transform::translate(center));
            quadrant.transformed(&t)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn body(source: &str) -> Vec<MacroStatement> {
        let program = parse(source).unwrap();
        match &program.commands[0].node {
            crate::ast::Command::MacroDefine { body, .. } => body.clone(),
            other => panic!("expected macro, got {other:?}"),
        }
    }

    fn eval_str(expr: &str, params: &[f64]) -> Result<f64> {
        let b = body(&format!("%AMT*$9={expr}*%"));
        let MacroStatement::Assign { value, .. } = &b[0] else { panic!() };
        evaluate(value, &Bindings::from_params(params))
    }

    #[test]
    fn evaluate_arithmetic() {
        assert_eq!(eval_str("1+2x3", &[]).unwrap(), 7.0);
        assert_eq!(eval_str("(1+2)x3", &[]).unwrap(), 9.0);
        assert_eq!(eval_str("-$1/4", &[2.0]).unwrap(), -0.5);
        assert_eq!(eval_str("$2-$1-1", &[1.0, 10.0]).unwrap(), 8.0);
    }

    #[test]
    fn evaluate_errors() {
        assert_eq!(eval_str("1/0", &[]), Err(MacroEvaluationError::DivisionByZero));
        assert_eq!(eval_str("1/($1-$1)", &[3.0]), Err(MacroEvaluationError::DivisionByZero));
        assert_eq!(eval_str("$4", &[1.0]), Err(MacroEvaluationError::UnboundParameter(4)));
    }

    #[test]
    fn assignments_apply_in_order() {
        let b = body("%AMT*$3=$1x2*$3=$3+1*1,1,$3,0,0*%");
        let shapes = instantiate(&b, &[2.0]).unwrap();
        assert_eq!(shapes, vec![Shape::circle(Point::ORIGIN, 5.0, false)]);
    }

    #[test]
    fn exposure_off_marks_shape_negative() {
        let b = body("%AMDONUT*1,1,$1,0,0*1,0,$2,0,0*%");
        let shapes = instantiate(&b, &[2.0, 1.0]).unwrap();
        assert_eq!(shapes.len(), 2);
        assert!(!shapes[0].negative);
        assert!(shapes[1].negative);
    }

    #[test]
    fn rotation_is_about_macro_origin() {
        let b = body("%AMR*1,1,1,2,0,90*%");
        let shapes = instantiate(&b, &[]).unwrap();
        let ShapeKind::Circle { center, .. } = shapes[0].kind else { panic!() };
        assert!(center.approx_eq(Point::new(0.0, 2.0), 1e-9));
    }

    #[test]
    fn lower_left_line_is_recentred() {
        let b = body("%AMLL*22,1,2,1,0,0,0*%");
        let shapes = instantiate(&b, &[]).unwrap();
        assert_eq!(shapes, vec![Shape::rectangle(Point::new(1.0, 0.5), 2.0, 1.0, 0.0, false)]);
    }

    #[test]
    fn outline_drops_closing_vertex() {
        let b = body("%AMTRI*4,1,3,0,0,1,0,0,1,0,0,0*%");
        let shapes = instantiate(&b, &[]).unwrap();
        let ShapeKind::Contour { segments } = &shapes[0].kind else { panic!() };
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].end(), Point::ORIGIN);
    }

    #[test]
    fn polygon_vertex_count_is_validated() {
        let b = body("%AMP*5,1,$1,0,0,1,0*%");
        assert!(instantiate(&b, &[6.0]).is_ok());
        assert!(matches!(
            instantiate(&b, &[2.0]),
            Err(MacroEvaluationError::InvalidPrimitive { primitive: "polygon", .. })
        ));
    }

    #[test]
    fn thermal_has_four_positive_quadrants() {
        let b = body("%AMTH*7,0,0,1.0,0.6,0.1,0*%");
        let shapes = instantiate(&b, &[]).unwrap();
        assert_eq!(shapes.len(), 4);
        assert!(shapes.iter().all(|s| !s.negative));
        let ShapeKind::Contour { segments } = &shapes[0].kind else { panic!() };
        assert_eq!(segments.len(), 4);
        assert!(matches!(segments[2], Segment::Arc { clockwise: true, .. }));
    }

    #[test]
    fn thermal_with_wide_gap_loses_inner_arc() {
        let shapes = thermal(Point::ORIGIN, 0.5, 0.1, 0.1);
        let ShapeKind::Contour { segments } = &shapes[0].kind else { panic!() };
        assert_eq!(segments.len(), 3);
        assert!(thermal(Point::ORIGIN, 0.5, 0.1, 0.4).is_empty());
    }

    #[test]
    fn moire_is_entirely_dark() {
        let shapes = moire(Point::ORIGIN, 1.0, 0.1, 0.1, 2, 0.05, 1.2);
        assert_eq!(shapes.len(), 4);
        assert!(shapes.iter().all(|s| !s.negative));
        let ShapeKind::CcwArc { start, end, width, .. } = shapes[0].kind else { panic!("{:?}", shapes[0]) };
        assert_eq!(start, end);
        assert!(start.approx_eq(Point::new(0.45, 0.0), 1e-12));
        assert_eq!(width, 0.1);
    }

    #[test]
    fn moire_does_not_erase_earlier_primitives() {
        let b = body("%AMM*1,1,0.5,0,0*6,0,0,4,0.5,0.5,2,0,0,0*%");
        let shapes = instantiate(&b, &[]).unwrap();
        assert_eq!(shapes[0], Shape::circle(Point::ORIGIN, 0.5, false));
        assert!(shapes.iter().all(|s| !s.negative));
    }

    #[test]
    fn moire_ring_thicker_than_radius_is_a_disc() {
        let shapes = moire(Point::ORIGIN, 1.0, 0.6, 0.1, 3, 0.0, 0.0);
        assert_eq!(shapes, vec![Shape::circle(Point::ORIGIN, 1.0, false)]);
    }

    #[test]
    fn unbound_parameter_in_primitive() {
        let b = body("%AMC*1,1,$2,0,0*%");
        assert_eq!(instantiate(&b, &[1.0]), Err(MacroEvaluationError::UnboundParameter(2)));
    }
}

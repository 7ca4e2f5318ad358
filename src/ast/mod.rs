use serde::{Deserialize, Serialize};

pub use crate::format::{Notation, RawCoordinate, Unit, Zeros};
pub use crate::geometry::Mirroring;

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }

    pub fn unknown(node: T) -> Self {
        Spanned { node, span: Span::UNKNOWN }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Spanned<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(|node| Spanned { node, span: Span::UNKNOWN })
    }
}

// ---- Operands ----

/// Operand words of a D01/D02/D03 statement, still packed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x: Option<RawCoordinate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub y: Option<RawCoordinate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub i: Option<RawCoordinate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub j: Option<RawCoordinate>,
}

impl Coordinates {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.i.is_none() && self.j.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMode {
    Linear,
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuadrantMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarity {
    #[default]
    Dark,
    Clear,
}

/// Standard aperture templates and references to custom macros.
///
/// Dimensions are in the unit active when the aperture is defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApertureTemplate {
    Circle {
        diameter: f64,
        hole: Option<f64>,
    },
    Rectangle {
        width: f64,
        height: f64,
        hole: Option<f64>,
    },
    Obround {
        width: f64,
        height: f64,
        hole: Option<f64>,
    },
    Polygon {
        outer_diameter: f64,
        vertices: u32,
        rotation: Option<f64>,
        hole: Option<f64>,
    },
    Macro {
        name: String,
        params: Vec<f64>,
    },
}

// ---- Aperture macros ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Arithmetic over constants and `$n` parameters, evaluated at instantiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacroExpr {
    Constant(f64),
    Param(u32),
    Neg(Box<MacroExpr>),
    Pos(Box<MacroExpr>),
    Paren(Box<MacroExpr>),
    Binary {
        op: BinOp,
        left: Box<MacroExpr>,
        right: Box<MacroExpr>,
    },
}

impl MacroExpr {
    pub fn binary(op: BinOp, left: MacroExpr, right: MacroExpr) -> Self {
        MacroExpr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprPoint {
    pub x: MacroExpr,
    pub y: MacroExpr,
}

/// Macro primitives keyed by their numeric code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacroPrimitive {
    /// Code 1.
    Circle {
        exposure: MacroExpr,
        diameter: MacroExpr,
        center: ExprPoint,
        rotation: Option<MacroExpr>,
    },
    /// Codes 2 and 20.
    VectorLine {
        exposure: MacroExpr,
        width: MacroExpr,
        start: ExprPoint,
        end: ExprPoint,
        rotation: MacroExpr,
    },
    /// Code 21.
    CenterLine {
        exposure: MacroExpr,
        width: MacroExpr,
        height: MacroExpr,
        center: ExprPoint,
        rotation: MacroExpr,
    },
    /// Code 22, a deprecated variant anchored at the lower-left corner.
    LowerLeftLine {
        exposure: MacroExpr,
        width: MacroExpr,
        height: MacroExpr,
        lower_left: ExprPoint,
        rotation: MacroExpr,
    },
    /// Code 4. The first point is repeated as the last.
    Outline {
        exposure: MacroExpr,
        points: Vec<ExprPoint>,
        rotation: MacroExpr,
    },
    /// Code 5.
    Polygon {
        exposure: MacroExpr,
        vertices: MacroExpr,
        center: ExprPoint,
        diameter: MacroExpr,
        rotation: MacroExpr,
    },
    /// Code 6, deprecated.
    Moire {
        center: ExprPoint,
        outer_diameter: MacroExpr,
        ring_thickness: MacroExpr,
        gap: MacroExpr,
        max_rings: MacroExpr,
        crosshair_thickness: MacroExpr,
        crosshair_length: MacroExpr,
        rotation: MacroExpr,
    },
    /// Code 7.
    Thermal {
        center: ExprPoint,
        outer_diameter: MacroExpr,
        inner_diameter: MacroExpr,
        gap: MacroExpr,
        rotation: MacroExpr,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacroStatement {
    /// Primitive code 0.
    Comment(String),
    /// `$n=expr`
    Assign { param: u32, value: MacroExpr },
    Primitive(MacroPrimitive),
}

// ---- Attributes and deprecated image parameters ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    File { name: String, values: Vec<String> },
    Aperture { name: String, values: Vec<String> },
    Object { name: String, values: Vec<String> },
    /// `TD` with no name clears every aperture and object attribute.
    Delete { name: Option<String> },
}

/// Parameters from the deprecated image block (IP, IN, LN, AS, IR, MI, OF, SF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageParameter {
    pub code: String,
    pub value: String,
}

// ---- Commands ----

/// One statement of a Gerber file, in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// `G04`
    Comment(String),
    /// `%FS%`
    FormatSpec {
        zeros: Zeros,
        notation: Notation,
        x_integer: u8,
        x_decimal: u8,
        y_integer: u8,
        y_decimal: u8,
    },
    /// `%MO%`
    UnitMode(Unit),
    /// `G70` / `G71`
    LegacyUnit(Unit),
    /// `G90` / `G91`
    LegacyNotation(Notation),
    /// `%AD%`
    ApertureDefine { id: u32, template: ApertureTemplate },
    /// `%AM%`
    MacroDefine { name: String, body: Vec<MacroStatement> },
    /// `Dnn` with nn >= 10, optionally prefixed with the legacy `G54`.
    SelectAperture(u32),
    /// `D01`
    Draw(Coordinates),
    /// `D02`
    Move(Coordinates),
    /// `D03`
    Flash(Coordinates),
    /// `G01` / `G02` / `G03`
    Interpolation(InterpolationMode),
    /// `G74` / `G75`
    Quadrant(QuadrantMode),
    /// `G36`
    RegionStart,
    /// `G37`
    RegionEnd,
    /// `%LP%`
    LoadPolarity(Polarity),
    /// `%LM%`
    LoadMirroring(Mirroring),
    /// `%LR%`, degrees counter-clockwise.
    LoadRotation(f64),
    /// `%LS%`
    LoadScaling(f64),
    /// `%ABDnn*%`
    BlockOpen(u32),
    /// `%AB*%`
    BlockClose,
    /// `%SRXnYnIfJf*%`
    StepRepeatOpen {
        x_repeat: u32,
        y_repeat: u32,
        x_step: f64,
        y_step: f64,
    },
    /// `%SR*%`
    StepRepeatClose,
    /// `%TF%`, `%TA%`, `%TO%`, `%TD%`
    Attribute(Attribute),
    ImageParameter(ImageParameter),
    /// `M00`
    ProgramStop,
    /// `M01`
    OptionalStop,
    /// `M02`
    EndOfFile,
    /// Placeholder produced by resilient parsing.
    Invalid { text: String },
}

/// A parsed Gerber file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub commands: Vec<Spanned<Command>>,
    #[serde(skip)]
    pub source: Option<String>,
}

impl Program {
    pub fn iter(&self) -> impl Iterator<Item = &Spanned<Command>> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge() {
        let merged = Span::new(4, 9).merge(Span::new(1, 6));
        assert_eq!(merged, Span::new(1, 9));
    }

    #[test]
    fn spanned_deref() {
        let s = Spanned::new(Command::RegionStart, Span::new(0, 4));
        assert_eq!(*s, Command::RegionStart);
    }

    #[test]
    fn spanned_serialize_transparent() {
        let s = Spanned::new(Command::SelectAperture(10), Span::new(5, 10));
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"SelectAperture":10}"#);
    }

    #[test]
    fn spanned_deserialize_transparent() {
        let s: Spanned<Command> = serde_json::from_str(r#""EndOfFile""#).unwrap();
        assert_eq!(s.node, Command::EndOfFile);
        assert_eq!(s.span, Span::UNKNOWN);
    }

    #[test]
    fn coordinates_skip_missing_axes() {
        let c = Coordinates { x: Some(RawCoordinate::new(true, "0015")), ..Default::default() };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"x\""));
        assert!(!json.contains("\"y\""));
        assert!(json.contains("0015"));
    }

    #[test]
    fn program_source_not_serialized() {
        let prog = Program {
            commands: vec![Spanned::new(Command::EndOfFile, Span::new(0, 4))],
            source: Some("M02*".to_string()),
        };
        let json = serde_json::to_string(&prog).unwrap();
        assert!(!json.contains("source"));
        assert!(!json.contains("M02*"));
    }

    #[test]
    fn program_json_round_trip_drops_spans() {
        let prog = Program {
            commands: vec![
                Spanned::new(
                    Command::ApertureDefine {
                        id: 10,
                        template: ApertureTemplate::Circle { diameter: 0.5, hole: None },
                    },
                    Span::new(0, 14),
                ),
                Spanned::new(Command::EndOfFile, Span::new(15, 19)),
            ],
            source: None,
        };
        let json = serde_json::to_string_pretty(&prog).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.commands[0].span, Span::UNKNOWN);
        assert_eq!(back.commands[0].node, prog.commands[0].node);
    }
}

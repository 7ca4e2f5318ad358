//! Coordinate & format engine: fixed-point decoding of packed coordinates
//! and unit normalization to millimetres.

use serde::{Deserialize, Serialize};

/// Millimetres per inch.
pub const MM_PER_INCH: f64 = 25.4;

/// Smallest and largest digit count accepted for either part of a coordinate.
pub const MIN_DIGITS: u8 = 1;
pub const MAX_DIGITS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    Millimeters,
    Inches,
}

impl Unit {
    /// Factor converting a value in this unit to millimetres.
    pub fn factor(self) -> f64 {
        match self {
            Unit::Millimeters => 1.0,
            Unit::Inches => MM_PER_INCH,
        }
    }

    pub fn to_mm(self, value: f64) -> f64 {
        value * self.factor()
    }
}

/// Which zeros may be omitted from packed coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Zeros {
    #[default]
    SkipLeading,
    SkipTrailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Notation {
    #[default]
    Absolute,
    Incremental,
}

/// Packed coordinate exactly as written: optional sign plus the digit string.
/// Leading and trailing zeros are significant until decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCoordinate {
    pub negative: bool,
    pub digits: String,
}

impl RawCoordinate {
    pub fn new(negative: bool, digits: impl Into<String>) -> Self {
        RawCoordinate { negative, digits: digits.into() }
    }

    /// Parse `[+-]?[0-9]+`.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(RawCoordinate::new(negative, digits))
    }
}

impl std::fmt::Display for RawCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{}", self.digits)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("{axis} digit counts {integer}.{decimal} are outside {MIN_DIGITS}..={MAX_DIGITS}")]
    DigitsOutOfRange { axis: char, integer: u8, decimal: u8 },
    #[error("coordinate format may only be set once")]
    AlreadySet,
    #[error("coordinate used before the coordinate format was set")]
    NotSet,
    #[error("packed coordinate '{coordinate}' has more than {integer}+{decimal} digits")]
    TooLong { coordinate: String, integer: u8, decimal: u8 },
    #[error("packed coordinate is empty")]
    Empty,
}

type Result<T> = std::result::Result<T, FormatError>;

/// Integer/decimal digit split for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisFormat {
    pub integer: u8,
    pub decimal: u8,
}

impl AxisFormat {
    pub fn new(integer: u8, decimal: u8) -> Self {
        AxisFormat { integer, decimal }
    }

    fn validate(self, axis: char) -> Result<Self> {
        let range = MIN_DIGITS..=MAX_DIGITS;
        if range.contains(&self.integer) && range.contains(&self.decimal) {
            Ok(self)
        } else {
            Err(FormatError::DigitsOutOfRange { axis, integer: self.integer, decimal: self.decimal })
        }
    }

    fn width(self) -> usize {
        (self.integer + self.decimal) as usize
    }

    fn decode(self, zeros: Zeros, raw: &RawCoordinate) -> Result<f64> {
        if raw.digits.is_empty() {
            return Err(FormatError::Empty);
        }
        if raw.digits.len() > self.width() {
            return Err(FormatError::TooLong {
                coordinate: raw.to_string(),
                integer: self.integer,
                decimal: self.decimal,
            });
        }
        let padded = match zeros {
            Zeros::SkipLeading => format!("{:0>width$}", raw.digits, width = self.width()),
            Zeros::SkipTrailing => format!("{:0<width$}", raw.digits, width = self.width()),
        };
        // At most twelve digits, always fits an i64.
        let units: i64 = padded.parse().map_err(|_| FormatError::Empty)?;
        let magnitude = units as f64 / 10f64.powi(self.decimal as i32);
        Ok(if raw.negative { -magnitude } else { magnitude })
    }
}

/// A validated `%FS` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateFormat {
    pub zeros: Zeros,
    pub x: AxisFormat,
    pub y: AxisFormat,
}

impl CoordinateFormat {
    pub fn new(zeros: Zeros, x: AxisFormat, y: AxisFormat) -> Result<Self> {
        Ok(CoordinateFormat { zeros, x: x.validate('X')?, y: y.validate('Y')? })
    }

    pub fn decode_x(&self, raw: &RawCoordinate) -> Result<f64> {
        self.x.decode(self.zeros, raw)
    }

    pub fn decode_y(&self, raw: &RawCoordinate) -> Result<f64> {
        self.y.decode(self.zeros, raw)
    }
}

/// Write-once coordinate format plus the (mutable) unit mode.
///
/// Values leave the engine in millimetres; nothing downstream ever sees inches.
#[derive(Debug, Clone, Default)]
pub struct FormatEngine {
    format: Option<CoordinateFormat>,
    unit: Unit,
}

impl FormatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coordinate format. Fails on out-of-range digits or a second call.
    pub fn configure(&mut self, zeros: Zeros, x: AxisFormat, y: AxisFormat) -> Result<()> {
        if self.format.is_some() {
            return Err(FormatError::AlreadySet);
        }
        self.format = Some(CoordinateFormat::new(zeros, x, y)?);
        Ok(())
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Convert a length given in the active unit to millimetres.
    pub fn to_mm(&self, value: f64) -> f64 {
        self.unit.to_mm(value)
    }

    pub fn decode_x(&self, raw: &RawCoordinate) -> Result<f64> {
        let format = self.format.as_ref().ok_or(FormatError::NotSet)?;
        Ok(self.to_mm(format.decode_x(raw)?))
    }

    pub fn decode_y(&self, raw: &RawCoordinate) -> Result<f64> {
        let format = self.format.as_ref().ok_or(FormatError::NotSet)?;
        Ok(self.to_mm(format.decode_y(raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(zeros: Zeros, integer: u8, decimal: u8) -> CoordinateFormat {
        let axis = AxisFormat::new(integer, decimal);
        CoordinateFormat::new(zeros, axis, axis).unwrap()
    }

    fn raw(s: &str) -> RawCoordinate {
        RawCoordinate::parse(s).unwrap()
    }

    #[test]
    fn decode_leading_zeros_omitted() {
        let f = fmt(Zeros::SkipLeading, 2, 6);
        assert_eq!(f.decode_x(&raw("1500000")).unwrap(), 1.5);
        assert_eq!(f.decode_x(&raw("-2500")).unwrap(), -0.0025);
        assert_eq!(f.decode_x(&raw("0")).unwrap(), 0.0);
    }

    #[test]
    fn decode_trailing_zeros_omitted() {
        let f = fmt(Zeros::SkipTrailing, 2, 4);
        assert_eq!(f.decode_y(&raw("015")).unwrap(), 1.5);
        assert_eq!(f.decode_y(&raw("-1")).unwrap(), -10.0);
    }

    #[test]
    fn decode_rejects_too_many_digits() {
        let f = fmt(Zeros::SkipLeading, 2, 3);
        let err = f.decode_x(&raw("123456")).unwrap_err();
        assert!(matches!(err, FormatError::TooLong { integer: 2, decimal: 3, .. }));
    }

    #[test]
    fn configure_validates_digit_range() {
        let mut engine = FormatEngine::new();
        let err = engine
            .configure(Zeros::SkipLeading, AxisFormat::new(0, 6), AxisFormat::new(2, 6))
            .unwrap_err();
        assert_eq!(err, FormatError::DigitsOutOfRange { axis: 'X', integer: 0, decimal: 6 });
        let err = engine
            .configure(Zeros::SkipLeading, AxisFormat::new(2, 6), AxisFormat::new(2, 7))
            .unwrap_err();
        assert!(matches!(err, FormatError::DigitsOutOfRange { axis: 'Y', .. }));
    }

    #[test]
    fn configure_twice_is_an_error() {
        let mut engine = FormatEngine::new();
        let axis = AxisFormat::new(2, 6);
        engine.configure(Zeros::SkipLeading, axis, axis).unwrap();
        assert_eq!(engine.configure(Zeros::SkipLeading, axis, axis), Err(FormatError::AlreadySet));
    }

    #[test]
    fn decode_before_configure_fails() {
        let engine = FormatEngine::new();
        assert_eq!(engine.decode_x(&raw("100")), Err(FormatError::NotSet));
    }

    #[test]
    fn inches_become_millimetres() {
        let mut engine = FormatEngine::new();
        let axis = AxisFormat::new(2, 4);
        engine.configure(Zeros::SkipLeading, axis, axis).unwrap();
        engine.set_unit(Unit::Inches);
        let mm = engine.decode_x(&raw("10000")).unwrap();
        assert!((mm - 25.4).abs() < 1e-12);
    }

    #[test]
    fn raw_coordinate_parse() {
        assert_eq!(RawCoordinate::parse("-007"), Some(RawCoordinate::new(true, "007")));
        assert_eq!(RawCoordinate::parse("+12"), Some(RawCoordinate::new(false, "12")));
        assert_eq!(RawCoordinate::parse("-"), None);
        assert_eq!(RawCoordinate::parse("1.5"), None);
    }

    /// Pack `units` the way a CAM writer would for the given zero suppression.
    fn pack(zeros: Zeros, width: usize, units: i64) -> RawCoordinate {
        let digits = format!("{:0>width$}", units.unsigned_abs());
        let trimmed = match zeros {
            Zeros::SkipLeading => digits.trim_start_matches('0'),
            Zeros::SkipTrailing => digits.trim_end_matches('0'),
        };
        RawCoordinate::new(units < 0, if trimmed.is_empty() { "0" } else { trimmed })
    }

    #[test]
    fn decode_recovers_value_for_all_digit_counts() {
        let mut rng = fastrand::Rng::with_seed(0x6e7b);
        for zeros in [Zeros::SkipLeading, Zeros::SkipTrailing] {
            for integer in MIN_DIGITS..=MAX_DIGITS {
                for decimal in MIN_DIGITS..=MAX_DIGITS {
                    let f = fmt(zeros, integer, decimal);
                    let step = 10f64.powi(-(decimal as i32));
                    let limit = 10i64.pow(integer as u32) * 10i64.pow(decimal as u32) - 1;
                    for _ in 0..50 {
                        let units = rng.i64(-limit..=limit);
                        let packed = pack(zeros, (integer + decimal) as usize, units);
                        let decoded = f.decode_y(&packed).unwrap();
                        let value = units as f64 * step;
                        assert!(
                            (decoded - value).abs() <= step / 2.0,
                            "{zeros:?} {integer}.{decimal}: {value} -> {packed} -> {decoded}"
                        );
                    }
                }
            }
        }
    }
}

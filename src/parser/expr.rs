//! Macro arithmetic and primitive construction.
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('x' | 'X' | '/') unary)*
//! unary  := ('+' | '-') unary | atom
//! atom   := '$' digits | number | '(' expr ')'
//! ```

use super::{BlockResult, Fail};
use crate::ast::{BinOp, ExprPoint, MacroExpr, MacroPrimitive};

/// Parse one whitespace-free expression.
pub(super) fn parse(text: &str) -> Result<MacroExpr, String> {
    let mut p = ExprParser { bytes: text.as_bytes(), pos: 0 };
    if text.is_empty() {
        return Err("empty macro expression".to_string());
    }
    let expr = p.expr()?;
    if p.pos != p.bytes.len() {
        return Err(format!("unexpected '{}' in macro expression '{text}'", &text[p.pos..]));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<MacroExpr, String> {
        let mut left = self.term()?;
        while let Some(op) = match self.peek() {
            Some(b'+') => Some(BinOp::Add),
            Some(b'-') => Some(BinOp::Subtract),
            _ => None,
        } {
            self.pos += 1;
            left = MacroExpr::binary(op, left, self.term()?);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<MacroExpr, String> {
        let mut left = self.unary()?;
        while let Some(op) = match self.peek() {
            Some(b'x' | b'X') => Some(BinOp::Multiply),
            Some(b'/') => Some(BinOp::Divide),
            _ => None,
        } {
            self.pos += 1;
            left = MacroExpr::binary(op, left, self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<MacroExpr, String> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(MacroExpr::Neg(Box::new(self.unary()?)))
            }
            Some(b'+') => {
                self.pos += 1;
                Ok(MacroExpr::Pos(Box::new(self.unary()?)))
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<MacroExpr, String> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err("missing ')' in macro expression".to_string());
                }
                self.pos += 1;
                Ok(MacroExpr::Paren(Box::new(inner)))
            }
            Some(b'$') => {
                self.pos += 1;
                let digits = self.take_while(|b| b.is_ascii_digit());
                match digits.parse::<u32>() {
                    Ok(n) if n >= 1 => Ok(MacroExpr::Param(n)),
                    _ => Err("macro variable must be $1 or higher".to_string()),
                }
            }
            Some(b) if b.is_ascii_digit() || b == b'.' => {
                let number = self.take_while(|b| b.is_ascii_digit() || b == b'.');
                number
                    .parse::<f64>()
                    .map(MacroExpr::Constant)
                    .map_err(|_| format!("invalid number '{number}'"))
            }
            Some(b) => Err(format!("unexpected '{}' in macro expression", b as char)),
            None => Err("macro expression ends unexpectedly".to_string()),
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        let bytes: &'a [u8] = self.bytes;
        std::str::from_utf8(&bytes[start..self.pos]).unwrap_or("")
    }
}

/// Arrange evaluated-later arguments into a typed primitive.
pub(super) fn primitive(code: u32, args: Vec<MacroExpr>) -> BlockResult<MacroPrimitive> {
    let count = args.len();
    let arity = |expected: &[usize]| -> BlockResult<()> {
        if expected.contains(&count) {
            Ok(())
        } else {
            Err(Fail::operands(format!(
                "macro primitive {code} expects {expected:?} arguments, got {count}"
            )))
        }
    };
    let mut it = args.into_iter();
    let mut next = || it.next().unwrap_or(MacroExpr::Constant(0.0));

    Ok(match code {
        1 => {
            arity(&[4, 5])?;
            MacroPrimitive::Circle {
                exposure: next(),
                diameter: next(),
                center: ExprPoint { x: next(), y: next() },
                rotation: (count == 5).then(&mut next),
            }
        }
        2 | 20 => {
            arity(&[7])?;
            MacroPrimitive::VectorLine {
                exposure: next(),
                width: next(),
                start: ExprPoint { x: next(), y: next() },
                end: ExprPoint { x: next(), y: next() },
                rotation: next(),
            }
        }
        21 => {
            arity(&[6])?;
            MacroPrimitive::CenterLine {
                exposure: next(),
                width: next(),
                height: next(),
                center: ExprPoint { x: next(), y: next() },
                rotation: next(),
            }
        }
        22 => {
            arity(&[6])?;
            MacroPrimitive::LowerLeftLine {
                exposure: next(),
                width: next(),
                height: next(),
                lower_left: ExprPoint { x: next(), y: next() },
                rotation: next(),
            }
        }
        4 => {
            // exposure, vertex count, (n + 1) points, rotation
            if count < 11 || count % 2 == 0 {
                return Err(Fail::operands(format!(
                    "outline primitive needs an exposure, a vertex count, at least four points and a rotation, got {count} arguments"
                )));
            }
            let exposure = next();
            let _vertex_count = next();
            let points = (0..(count - 3) / 2).map(|_| ExprPoint { x: next(), y: next() }).collect();
            MacroPrimitive::Outline { exposure, points, rotation: next() }
        }
        5 => {
            arity(&[6])?;
            MacroPrimitive::Polygon {
                exposure: next(),
                vertices: next(),
                center: ExprPoint { x: next(), y: next() },
                diameter: next(),
                rotation: next(),
            }
        }
        6 => {
            arity(&[9])?;
            MacroPrimitive::Moire {
                center: ExprPoint { x: next(), y: next() },
                outer_diameter: next(),
                ring_thickness: next(),
                gap: next(),
                max_rings: next(),
                crosshair_thickness: next(),
                crosshair_length: next(),
                rotation: next(),
            }
        }
        7 => {
            arity(&[6])?;
            MacroPrimitive::Thermal {
                center: ExprPoint { x: next(), y: next() },
                outer_diameter: next(),
                inner_diameter: next(),
                gap: next(),
                rotation: next(),
            }
        }
        other => return Err(Fail::unknown(format!("unknown macro primitive code {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(v: f64) -> MacroExpr {
        MacroExpr::Constant(v)
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = parse("1+2x3").unwrap();
        assert_eq!(e, MacroExpr::binary(BinOp::Add, c(1.0), MacroExpr::binary(BinOp::Multiply, c(2.0), c(3.0))));
    }

    #[test]
    fn operators_are_left_associative() {
        let e = parse("8/2/2").unwrap();
        assert_eq!(
            e,
            MacroExpr::binary(BinOp::Divide, MacroExpr::binary(BinOp::Divide, c(8.0), c(2.0)), c(2.0))
        );
    }

    #[test]
    fn parentheses_and_unary() {
        let e = parse("-($1+.5)X2").unwrap();
        let inner = MacroExpr::Paren(Box::new(MacroExpr::binary(BinOp::Add, MacroExpr::Param(1), c(0.5))));
        assert_eq!(e, MacroExpr::binary(BinOp::Multiply, MacroExpr::Neg(Box::new(inner)), c(2.0)));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(parse("").is_err());
        assert!(parse("(1+2").is_err());
        assert!(parse("1+").is_err());
        assert!(parse("$0").is_err());
        assert!(parse("1..2").is_err());
        assert!(parse("2y3").is_err());
    }

    #[test]
    fn outline_collects_points() {
        let args: Vec<_> = [1.0, 3.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0].map(c).to_vec();
        let MacroPrimitive::Outline { points, .. } = primitive(4, args).unwrap() else {
            panic!("expected outline");
        };
        assert_eq!(points.len(), 4);
    }

    #[test]
    fn circle_rotation_is_optional() {
        let p = primitive(1, vec![c(1.0), c(2.0), c(0.0), c(0.0)]).unwrap();
        assert!(matches!(p, MacroPrimitive::Circle { rotation: None, .. }));
        let p = primitive(1, vec![c(1.0), c(2.0), c(0.0), c(0.0), c(45.0)]).unwrap();
        assert!(matches!(p, MacroPrimitive::Circle { rotation: Some(_), .. }));
    }
}

use tracing::{debug, trace};

use crate::ast::source_map::excerpt;
use crate::ast::*;
use crate::lexer::{self, Token};

pub mod expr;

/// Legacy-syntax toggles, fixed for the lifetime of a [`Grammar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxSwitches {
    /// Accept `X..Y..*` with no D code as an implicit D01.
    pub allow_d01_without_code: bool,
    /// Accept a G code fused with an operation, e.g. `G01X..Y..D01*`.
    pub allow_non_standalone_d_codes: bool,
}

impl Default for SyntaxSwitches {
    fn default() -> Self {
        SyntaxSwitches { allow_d01_without_code: true, allow_non_standalone_d_codes: true }
    }
}

impl SyntaxSwitches {
    /// Reject both legacy forms.
    pub fn strict() -> Self {
        SyntaxSwitches { allow_d01_without_code: false, allow_non_standalone_d_codes: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// No statement rule matches the input.
    TokenNotFound,
    /// A statement was recognised but its operands are malformed.
    InvalidCommandFormat,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::TokenNotFound => write!(f, "token not found"),
            ParseErrorKind::InvalidCommandFormat => write!(f, "invalid command format"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} at {line}:{column}: {message} (near `{excerpt}`)")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub code: &'static str,
    pub span: Span,
    pub line: usize,
    pub column: usize,
    pub excerpt: String,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Block-level failure, located by the caller.
#[derive(Debug)]
struct Fail {
    kind: ParseErrorKind,
    code: &'static str,
    message: String,
}

impl Fail {
    fn unknown(message: impl Into<String>) -> Self {
        Fail { kind: ParseErrorKind::TokenNotFound, code: "GBR-P001", message: message.into() }
    }

    fn operands(message: impl Into<String>) -> Self {
        Fail { kind: ParseErrorKind::InvalidCommandFormat, code: "GBR-P004", message: message.into() }
    }

    fn legacy(message: impl Into<String>) -> Self {
        Fail { kind: ParseErrorKind::TokenNotFound, code: "GBR-P006", message: message.into() }
    }
}

type BlockResult<T> = std::result::Result<T, Fail>;

const MAX_EXCERPT: usize = 40;
const MAX_ERRORS: usize = 20;

/// Entry point for parsing; holds the syntax switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grammar {
    switches: SyntaxSwitches,
}

impl Grammar {
    pub fn new(switches: SyntaxSwitches) -> Self {
        Grammar { switches }
    }

    /// Parse the whole source, stopping at the first error.
    pub fn parse(&self, source: &str) -> Result<Program> {
        let mut parser = Parser::new(source, self.switches)?;
        let mut commands = Vec::new();
        while !parser.at_end() {
            commands.extend(parser.parse_statement()?);
        }
        debug!(commands = commands.len(), "parsed program");
        Ok(Program { commands, source: Some(source.to_string()) })
    }

    /// Parse everything that can be parsed; malformed statements become
    /// [`Command::Invalid`] nodes and their errors are returned alongside.
    pub fn parse_resilient(&self, source: &str) -> (Program, Vec<ParseError>) {
        let mut parser = match Parser::new(source, self.switches) {
            Ok(p) => p,
            Err(e) => return (Program { commands: Vec::new(), source: Some(source.to_string()) }, vec![e]),
        };
        let mut commands = Vec::new();
        let mut errors = Vec::new();
        while !parser.at_end() && errors.len() < MAX_ERRORS {
            let start = parser.pos;
            match parser.parse_statement() {
                Ok(nodes) => commands.extend(nodes),
                Err(e) => {
                    let end = parser.last_span(start);
                    let span = e.span.merge(end);
                    let text = source.get(span.start..span.end).unwrap_or("").to_string();
                    commands.push(Spanned::new(Command::Invalid { text }, span));
                    errors.push(e);
                }
            }
        }
        debug!(commands = commands.len(), errors = errors.len(), "parsed program (resilient)");
        (Program { commands, source: Some(source.to_string()) }, errors)
    }
}

/// Parse with the default (permissive) grammar.
pub fn parse(source: &str) -> Result<Program> {
    Grammar::default().parse(source)
}

/// One `*`-terminated data block with the newlines already removed.
struct Block {
    text: String,
    span: Span,
}

struct Parser<'s> {
    source: &'s str,
    map: SourceMap,
    tokens: Vec<(Token, Span)>,
    pos: usize,
    switches: SyntaxSwitches,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str, switches: SyntaxSwitches) -> Result<Self> {
        let map = SourceMap::new(source);
        let tokens = match lexer::lex(source) {
            Ok(tokens) => tokens
                .into_iter()
                .map(|(t, r)| (t, Span::new(r.start, r.end)))
                .collect(),
            Err(e) => {
                let (line, column) = map.lookup(e.position);
                return Err(ParseError {
                    kind: ParseErrorKind::TokenNotFound,
                    code: "GBR-P005",
                    span: Span::new(e.position, e.position + 1),
                    line,
                    column,
                    excerpt: e.snippet.clone(),
                    message: e.suggestion,
                });
            }
        };
        Ok(Parser { source, map, tokens, pos: 0, switches })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or(Span::new(self.source.len(), self.source.len()))
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Span covering the tokens consumed since `start`.
    fn last_span(&self, start: usize) -> Span {
        let first = self.tokens.get(start).map(|(_, s)| *s);
        let last = self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)).map(|(_, s)| *s);
        match (first, last) {
            (Some(a), Some(b)) => a.merge(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => Span::UNKNOWN,
        }
    }

    fn locate(&self, fail: Fail, span: Span) -> ParseError {
        let (line, column) = self.map.lookup(span.start);
        ParseError {
            kind: fail.kind,
            code: fail.code,
            span,
            line,
            column,
            excerpt: excerpt(self.source, span.start, MAX_EXCERPT),
            message: fail.message,
        }
    }

    // ---- Token level ----

    fn parse_statement(&mut self) -> Result<Vec<Spanned<Command>>> {
        match self.peek() {
            Some(Token::Percent) => self.parse_extended(),
            Some(Token::Star) => {
                self.advance();
                Ok(Vec::new())
            }
            Some(Token::Data(_)) => {
                let Some(block) = self.read_block()? else {
                    return Ok(Vec::new());
                };
                if block.text.is_empty() {
                    return Ok(Vec::new());
                }
                trace!(block = %block.text, "word command");
                let commands = parse_word(&block.text, self.switches)
                    .map_err(|fail| self.locate(fail, block.span))?;
                Ok(commands.into_iter().map(|c| Spanned::new(c, block.span)).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Collect data up to and including the next `*`.
    ///
    /// Returns `None` for stray whitespace that precedes a `%` or the end of input.
    fn read_block(&mut self) -> Result<Option<Block>> {
        let mut text = String::new();
        let mut span: Option<Span> = None;
        loop {
            match self.peek().cloned() {
                Some(Token::Data(chunk)) => {
                    let s = self.peek_span();
                    span = Some(span.map_or(s, |acc| acc.merge(s)));
                    text.push_str(&chunk);
                    self.advance();
                }
                Some(Token::Star) => {
                    let s = self.peek_span();
                    let span = span.map_or(s, |acc| acc.merge(s));
                    self.advance();
                    return Ok(Some(Block { text: text.trim().to_string(), span }));
                }
                _ if text.trim().is_empty() => return Ok(None),
                _ => {
                    let span = span.unwrap_or_else(|| self.peek_span());
                    return Err(self.locate(
                        Fail {
                            kind: ParseErrorKind::TokenNotFound,
                            code: "GBR-P002",
                            message: "data block is missing its terminating '*'".to_string(),
                        },
                        span,
                    ));
                }
            }
        }
    }

    /// `%` block* `%`
    fn parse_extended(&mut self) -> Result<Vec<Spanned<Command>>> {
        let open = self.peek_span();
        self.advance();
        let mut blocks = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Percent) => {
                    self.advance();
                    break;
                }
                None => {
                    return Err(self.locate(
                        Fail {
                            kind: ParseErrorKind::TokenNotFound,
                            code: "GBR-P003",
                            message: "extended command is missing its closing '%'".to_string(),
                        },
                        open,
                    ));
                }
                Some(_) => match self.read_block() {
                    Ok(Some(block)) => blocks.push(block),
                    Ok(None) => {}
                    Err(e) => {
                        // Swallow the closing '%' so the next statement starts clean.
                        if matches!(self.peek(), Some(Token::Percent)) {
                            self.advance();
                        }
                        return Err(e);
                    }
                },
            }
        }

        let mut blocks = blocks.into_iter().filter(|b| !b.text.is_empty()).peekable();
        let Some(first) = blocks.peek() else {
            return Ok(Vec::new());
        };
        if let Some(name) = first.text.strip_prefix("AM") {
            let name = name.trim().to_string();
            let head_span = first.span;
            let body: Vec<Block> = blocks.skip(1).collect();
            let span = body.iter().fold(head_span, |acc, b| acc.merge(b.span));
            trace!(macro_name = %name, statements = body.len(), "aperture macro");
            let command = parse_macro(&name, &body).map_err(|(fail, at)| {
                let at = at.map_or(head_span, |i| body[i].span);
                self.locate(fail, at)
            })?;
            return Ok(vec![Spanned::new(command, span)]);
        }

        let mut commands = Vec::new();
        for block in blocks {
            trace!(block = %block.text, "extended command");
            let command = parse_extended_block(&block.text).map_err(|fail| self.locate(fail, block.span))?;
            commands.push(Spanned::new(command, block.span));
        }
        Ok(commands)
    }
}

// ---- Block level ----

/// Byte cursor over one block's text.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn eat(&mut self, prefix: &str) -> bool {
        if self.rest().starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn unsigned(&mut self) -> Option<u32> {
        self.take_while(|b| b.is_ascii_digit()).parse().ok()
    }

    /// `[+-]?[0-9]+`
    fn signed_digits(&mut self) -> Option<RawCoordinate> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        self.take_while(|b| b.is_ascii_digit());
        RawCoordinate::parse(&self.text[start..self.pos])
    }

    /// `[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)`
    fn decimal(&mut self) -> Option<f64> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        self.take_while(|b| b.is_ascii_digit() || b == b'.');
        parse_decimal(&self.text[start..self.pos])
    }

    fn single_digit(&mut self) -> Option<u8> {
        let b = self.peek().filter(u8::is_ascii_digit)?;
        self.pos += 1;
        Some(b - b'0')
    }
}

fn parse_decimal(text: &str) -> Option<f64> {
    let digits = text.trim_start_matches(['+', '-']);
    if digits.is_empty() || digits == "." || digits.matches('.').count() > 1 {
        return None;
    }
    text.parse().ok()
}

/// Word command: G/M codes and D01/D02/D03/Dnn operations.
fn parse_word(text: &str, switches: SyntaxSwitches) -> BlockResult<Vec<Command>> {
    let mut c = Cursor::new(text);
    let mut commands = Vec::new();

    if c.eat("G") {
        let code = c.unsigned().ok_or_else(|| Fail::unknown("G must be followed by a code number"))?;
        let prefix = match code {
            4 => return Ok(vec![Command::Comment(c.rest().trim().to_string())]),
            1 => Some(Command::Interpolation(InterpolationMode::Linear)),
            2 => Some(Command::Interpolation(InterpolationMode::Clockwise)),
            3 => Some(Command::Interpolation(InterpolationMode::CounterClockwise)),
            36 => Some(Command::RegionStart),
            37 => Some(Command::RegionEnd),
            74 => Some(Command::Quadrant(QuadrantMode::Single)),
            75 => Some(Command::Quadrant(QuadrantMode::Multi)),
            70 => Some(Command::LegacyUnit(Unit::Inches)),
            71 => Some(Command::LegacyUnit(Unit::Millimeters)),
            90 => Some(Command::LegacyNotation(Notation::Absolute)),
            91 => Some(Command::LegacyNotation(Notation::Incremental)),
            // Legacy "select aperture" and "prepare for flash" prefixes carry no state.
            54 | 55 => None,
            other => return Err(Fail::unknown(format!("unknown G code G{other:02}"))),
        };
        if c.at_end() {
            return Ok(prefix.into_iter().collect());
        }
        if prefix.is_some() && !switches.allow_non_standalone_d_codes {
            return Err(Fail::legacy(format!(
                "G{code:02} must stand alone; operations fused with a G code are disabled"
            )));
        }
        commands.extend(prefix);
    } else if c.eat("M") {
        let code = c.unsigned().ok_or_else(|| Fail::unknown("M must be followed by a code number"))?;
        if !c.at_end() {
            return Err(Fail::operands(format!("unexpected '{}' after M{code:02}", c.rest())));
        }
        return match code {
            0 => Ok(vec![Command::ProgramStop]),
            1 => Ok(vec![Command::OptionalStop]),
            2 => Ok(vec![Command::EndOfFile]),
            other => Err(Fail::unknown(format!("unknown M code M{other:02}"))),
        };
    }

    commands.push(parse_operation(&mut c, switches)?);
    Ok(commands)
}

/// `[X][Y][I][J]Dnn`
fn parse_operation(c: &mut Cursor<'_>, switches: SyntaxSwitches) -> BlockResult<Command> {
    let mut coords = Coordinates::default();
    for (letter, slot) in [("X", 0), ("Y", 1), ("I", 2), ("J", 3)] {
        if c.eat(letter) {
            let value = c
                .signed_digits()
                .ok_or_else(|| Fail::operands(format!("{letter} must be followed by an integer")))?;
            let target = match slot {
                0 => &mut coords.x,
                1 => &mut coords.y,
                2 => &mut coords.i,
                _ => &mut coords.j,
            };
            *target = Some(value);
        }
    }

    if c.eat("D") {
        let code = c.unsigned().ok_or_else(|| Fail::unknown("D must be followed by a code number"))?;
        if !c.at_end() {
            return Err(Fail::operands(format!("unexpected '{}' after D{code:02}", c.rest())));
        }
        return match code {
            1 => Ok(Command::Draw(coords)),
            2 => Ok(Command::Move(coords)),
            3 => Ok(Command::Flash(coords)),
            n if n >= 10 && coords.is_empty() => Ok(Command::SelectAperture(n)),
            n if n >= 10 => Err(Fail::operands(format!("aperture selection D{n} takes no coordinates"))),
            n => Err(Fail::unknown(format!("reserved D code D{n:02}"))),
        };
    }

    if !c.at_end() {
        return Err(Fail::unknown(format!("unrecognised statement '{}'", c.text)));
    }
    if coords.is_empty() {
        return Err(Fail::unknown("empty operation"));
    }
    if !switches.allow_d01_without_code {
        return Err(Fail::legacy("coordinates without a D code; implicit D01 is disabled"));
    }
    Ok(Command::Draw(coords))
}

fn parse_extended_block(text: &str) -> BlockResult<Command> {
    let Some(code) = text.get(..2) else {
        return Err(Fail::unknown(format!("unknown extended command '{text}'")));
    };
    let rest = &text[2..];
    match code {
        "FS" => parse_format_spec(rest),
        "MO" => match rest {
            "MM" => Ok(Command::UnitMode(Unit::Millimeters)),
            "IN" => Ok(Command::UnitMode(Unit::Inches)),
            other => Err(Fail::operands(format!("unit must be MM or IN, got '{other}'"))),
        },
        "AD" => parse_aperture_define(rest),
        "AB" => {
            if rest.is_empty() {
                return Ok(Command::BlockClose);
            }
            let mut c = Cursor::new(rest);
            if !c.eat("D") {
                return Err(Fail::operands("block aperture must be named Dnn"));
            }
            match c.unsigned() {
                Some(id) if c.at_end() && id >= 10 => Ok(Command::BlockOpen(id)),
                _ => Err(Fail::operands(format!("invalid block aperture name '{rest}'"))),
            }
        }
        "SR" => parse_step_repeat(rest),
        "LP" => match rest {
            "D" => Ok(Command::LoadPolarity(Polarity::Dark)),
            "C" => Ok(Command::LoadPolarity(Polarity::Clear)),
            other => Err(Fail::operands(format!("polarity must be D or C, got '{other}'"))),
        },
        "LM" => match rest {
            "N" => Ok(Command::LoadMirroring(Mirroring::None)),
            "X" => Ok(Command::LoadMirroring(Mirroring::X)),
            "Y" => Ok(Command::LoadMirroring(Mirroring::Y)),
            "XY" => Ok(Command::LoadMirroring(Mirroring::XY)),
            other => Err(Fail::operands(format!("mirroring must be N, X, Y or XY, got '{other}'"))),
        },
        "LR" => parse_decimal(rest)
            .map(Command::LoadRotation)
            .ok_or_else(|| Fail::operands(format!("rotation must be a decimal, got '{rest}'"))),
        "LS" => match parse_decimal(rest) {
            Some(v) if v > 0.0 => Ok(Command::LoadScaling(v)),
            _ => Err(Fail::operands(format!("scaling must be a positive decimal, got '{rest}'"))),
        },
        "TF" | "TA" | "TO" => {
            let mut fields = rest.split(',').map(str::to_string);
            let name = fields.next().filter(|n| !n.is_empty());
            let Some(name) = name else {
                return Err(Fail::operands("attribute name is missing"));
            };
            let values = fields.collect();
            Ok(Command::Attribute(match code {
                "TF" => Attribute::File { name, values },
                "TA" => Attribute::Aperture { name, values },
                _ => Attribute::Object { name, values },
            }))
        }
        "TD" => Ok(Command::Attribute(Attribute::Delete {
            name: (!rest.is_empty()).then(|| rest.to_string()),
        })),
        "IP" | "IN" | "LN" | "AS" | "IR" | "MI" | "OF" | "SF" => {
            Ok(Command::ImageParameter(ImageParameter { code: code.to_string(), value: rest.to_string() }))
        }
        _ => Err(Fail::unknown(format!("unknown extended command '{text}'"))),
    }
}

/// `FS[LT][AI]X<i><d>Y<i><d>`
fn parse_format_spec(rest: &str) -> BlockResult<Command> {
    let mut c = Cursor::new(rest);
    let zeros = if c.eat("T") {
        Zeros::SkipTrailing
    } else {
        c.eat("L");
        Zeros::SkipLeading
    };
    let notation = if c.eat("I") {
        Notation::Incremental
    } else {
        c.eat("A");
        Notation::Absolute
    };
    let bad = || Fail::operands(format!("coordinate format must look like LAX26Y26, got '{rest}'"));
    let mut axis = |letter: &str| -> BlockResult<(u8, u8)> {
        if !c.eat(letter) {
            return Err(bad());
        }
        let integer = c.single_digit().ok_or_else(bad)?;
        let decimal = c.single_digit().ok_or_else(bad)?;
        Ok((integer, decimal))
    };
    let (x_integer, x_decimal) = axis("X")?;
    let (y_integer, y_decimal) = axis("Y")?;
    if !c.at_end() {
        return Err(bad());
    }
    Ok(Command::FormatSpec { zeros, notation, x_integer, x_decimal, y_integer, y_decimal })
}

/// `ADD<n><template>[,<p>X<p>...]`
fn parse_aperture_define(rest: &str) -> BlockResult<Command> {
    let mut c = Cursor::new(rest);
    if !c.eat("D") {
        return Err(Fail::operands("aperture identifier must start with D"));
    }
    let id = c.unsigned().ok_or_else(|| Fail::operands("aperture identifier must be Dnn"))?;
    if id < 10 {
        return Err(Fail::operands(format!("aperture identifier D{id} is reserved; use D10 or higher")));
    }
    let (name, params) = match c.rest().split_once(',') {
        Some((name, params)) => (name.trim(), Some(params)),
        None => (c.rest().trim(), None),
    };
    let params: Vec<f64> = match params {
        Some(p) => p
            .split(['X', 'x'])
            .map(|v| parse_decimal(v.trim()).ok_or_else(|| Fail::operands(format!("invalid aperture parameter '{v}'"))))
            .collect::<BlockResult<_>>()?,
        None => Vec::new(),
    };

    let arity = |min: usize, max: usize| -> BlockResult<()> {
        if (min..=max).contains(&params.len()) {
            Ok(())
        } else {
            Err(Fail::operands(format!(
                "aperture template {name} takes {min} to {max} parameters, got {}",
                params.len()
            )))
        }
    };
    let at = |i: usize| params.get(i).copied();

    let template = match name {
        "C" => {
            arity(1, 2)?;
            ApertureTemplate::Circle { diameter: params[0], hole: at(1) }
        }
        "R" => {
            arity(2, 3)?;
            ApertureTemplate::Rectangle { width: params[0], height: params[1], hole: at(2) }
        }
        "O" => {
            arity(2, 3)?;
            ApertureTemplate::Obround { width: params[0], height: params[1], hole: at(2) }
        }
        "P" => {
            arity(2, 4)?;
            let vertices = params[1];
            if vertices.fract() != 0.0 || !(3.0..=12.0).contains(&vertices) {
                return Err(Fail::operands(format!("polygon vertex count must be 3 to 12, got {vertices}")));
            }
            ApertureTemplate::Polygon {
                outer_diameter: params[0],
                vertices: vertices as u32,
                rotation: at(2),
                hole: at(3),
            }
        }
        _ if is_macro_name(name) => ApertureTemplate::Macro { name: name.to_string(), params },
        _ => return Err(Fail::operands(format!("invalid aperture template name '{name}'"))),
    };
    Ok(Command::ApertureDefine { id, template })
}

fn is_macro_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '.' | '_' | '$'))
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// `SR[X<n>][Y<n>][I<f>][J<f>]`; bare `SR` closes.
fn parse_step_repeat(rest: &str) -> BlockResult<Command> {
    if rest.is_empty() {
        return Ok(Command::StepRepeatClose);
    }
    let mut c = Cursor::new(rest);
    let (mut x_repeat, mut y_repeat, mut x_step, mut y_step) = (1, 1, 0.0, 0.0);
    while let Some(letter) = c.peek() {
        c.pos += 1;
        let bad = || Fail::operands(format!("invalid step & repeat operand in '{rest}'"));
        match letter {
            b'X' => x_repeat = c.unsigned().ok_or_else(bad)?,
            b'Y' => y_repeat = c.unsigned().ok_or_else(bad)?,
            b'I' => x_step = c.decimal().ok_or_else(bad)?,
            b'J' => y_step = c.decimal().ok_or_else(bad)?,
            _ => return Err(bad()),
        }
    }
    if x_repeat == 0 || y_repeat == 0 {
        return Err(Fail::operands("step & repeat counts must be at least 1"));
    }
    Ok(Command::StepRepeatOpen { x_repeat, y_repeat, x_step, y_step })
}

/// Macro body: one statement per block. On failure, reports which block.
fn parse_macro(name: &str, body: &[Block]) -> std::result::Result<Command, (Fail, Option<usize>)> {
    if !is_macro_name(name) {
        return Err((Fail::operands(format!("invalid macro name '{name}'")), None));
    }
    let statements = body
        .iter()
        .enumerate()
        .map(|(i, block)| parse_macro_statement(&block.text).map_err(|f| (f, Some(i))))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Command::MacroDefine { name: name.to_string(), body: statements })
}

fn parse_macro_statement(text: &str) -> BlockResult<MacroStatement> {
    if let Some(comment) = text.strip_prefix('0')
        && !comment.starts_with(|c: char| c.is_ascii_digit() || c == '.')
    {
        return Ok(MacroStatement::Comment(comment.trim().to_string()));
    }

    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(assign) = compact.strip_prefix('$') {
        let (param, value) = assign
            .split_once('=')
            .ok_or_else(|| Fail::operands(format!("expected `$n=<expr>`, got '{text}'")))?;
        let param = param
            .parse()
            .map_err(|_| Fail::operands(format!("invalid variable name '${param}'")))?;
        let value = expr::parse(value).map_err(Fail::operands)?;
        return Ok(MacroStatement::Assign { param, value });
    }

    let mut fields: Vec<&str> = compact.split(',').collect();
    if fields.len() > 1 && fields.last() == Some(&"") {
        fields.pop();
    }
    let code: u32 = fields[0]
        .parse()
        .map_err(|_| Fail::unknown(format!("unrecognised macro statement '{text}'")))?;
    let args = fields[1..]
        .iter()
        .map(|f| expr::parse(f).map_err(Fail::operands))
        .collect::<BlockResult<Vec<MacroExpr>>>()?;
    expr::primitive(code, args).map(MacroStatement::Primitive)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Vec<Command> {
        parse(source).unwrap().commands.into_iter().map(|s| s.node).collect()
    }

    fn raw(s: &str) -> Option<RawCoordinate> {
        RawCoordinate::parse(s)
    }

    #[test]
    fn parse_minimal_flash_program() {
        let cmds = parse_ok("%FSLAX26Y26*%\n%MOMM*%\n%ADD100C,1.5*%\nD100*\nX0Y0D03*\nM02*");
        assert_eq!(
            cmds,
            vec![
                Command::FormatSpec {
                    zeros: Zeros::SkipLeading,
                    notation: Notation::Absolute,
                    x_integer: 2,
                    x_decimal: 6,
                    y_integer: 2,
                    y_decimal: 6,
                },
                Command::UnitMode(Unit::Millimeters),
                Command::ApertureDefine {
                    id: 100,
                    template: ApertureTemplate::Circle { diameter: 1.5, hole: None },
                },
                Command::SelectAperture(100),
                Command::Flash(Coordinates { x: raw("0"), y: raw("0"), ..Default::default() }),
                Command::EndOfFile,
            ]
        );
    }

    #[test]
    fn parse_keeps_leading_zeros_in_coordinates() {
        let cmds = parse_ok("X-00150Y0025D02*");
        assert_eq!(
            cmds,
            vec![Command::Move(Coordinates { x: raw("-00150"), y: raw("0025"), ..Default::default() })]
        );
    }

    #[test]
    fn parse_codes_with_leading_zeros() {
        assert_eq!(parse_ok("G1*G01*G001*"), vec![Command::Interpolation(InterpolationMode::Linear); 3]);
        assert_eq!(parse_ok("D010*"), vec![Command::SelectAperture(10)]);
    }

    #[test]
    fn parse_comment_keeps_text() {
        assert_eq!(parse_ok("G04 Hello, world!*"), vec![Command::Comment("Hello, world!".into())]);
    }

    #[test]
    fn parse_arc_with_offsets() {
        let cmds = parse_ok("G75*G02*X100Y0I-50J0D01*");
        assert_eq!(cmds[0], Command::Quadrant(QuadrantMode::Multi));
        assert_eq!(cmds[1], Command::Interpolation(InterpolationMode::Clockwise));
        assert_eq!(
            cmds[2],
            Command::Draw(Coordinates { x: raw("100"), y: raw("0"), i: raw("-50"), j: raw("0") })
        );
    }

    #[test]
    fn fused_g_code_splits_into_two_nodes() {
        let program = parse("G01X100Y100D01*").unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.commands[0].node, Command::Interpolation(InterpolationMode::Linear));
        assert!(matches!(program.commands[1].node, Command::Draw(_)));
        assert_eq!(program.commands[0].span, program.commands[1].span);
    }

    #[test]
    fn strict_switches_reject_legacy_forms() {
        let strict = Grammar::new(SyntaxSwitches::strict());
        let err = strict.parse("G01X100Y100D01*").unwrap_err();
        assert_eq!(err.code, "GBR-P006");
        let err = strict.parse("X100Y100*").unwrap_err();
        assert_eq!(err.code, "GBR-P006");
        assert!(strict.parse("G01*X100Y100D01*").is_ok());
    }

    #[test]
    fn implicit_d01_when_allowed() {
        assert!(matches!(parse_ok("X100Y100*")[0], Command::Draw(_)));
    }

    #[test]
    fn g54_prefix_selects_aperture() {
        assert_eq!(parse_ok("G54D11*"), vec![Command::SelectAperture(11)]);
    }

    #[test]
    fn multiple_statements_in_one_extended_block() {
        let cmds = parse_ok("%FSLAX24Y24*MOIN*%");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1], Command::UnitMode(Unit::Inches));
    }

    #[test]
    fn parse_standard_templates() {
        let cmds = parse_ok("%ADD10R,0.5X0.25*%%ADD11O,1X2X0.3*%%ADD12P,1X6X15*%%ADD13C,0.1*%");
        assert_eq!(
            cmds[0],
            Command::ApertureDefine {
                id: 10,
                template: ApertureTemplate::Rectangle { width: 0.5, height: 0.25, hole: None }
            }
        );
        assert_eq!(
            cmds[1],
            Command::ApertureDefine {
                id: 11,
                template: ApertureTemplate::Obround { width: 1.0, height: 2.0, hole: Some(0.3) }
            }
        );
        assert_eq!(
            cmds[2],
            Command::ApertureDefine {
                id: 12,
                template: ApertureTemplate::Polygon {
                    outer_diameter: 1.0,
                    vertices: 6,
                    rotation: Some(15.0),
                    hole: None
                }
            }
        );
    }

    #[test]
    fn template_arity_is_checked() {
        let err = parse("%ADD10C,1X2X3*%").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidCommandFormat);
        let err = parse("%ADD10P,1X2*%").unwrap_err();
        assert!(err.message.contains("vertex count"));
    }

    #[test]
    fn parse_macro_reference() {
        assert_eq!(
            parse_ok("%ADD15THERMAL80,1.2X0.8*%"),
            vec![Command::ApertureDefine {
                id: 15,
                template: ApertureTemplate::Macro { name: "THERMAL80".into(), params: vec![1.2, 0.8] }
            }]
        );
    }

    #[test]
    fn parse_macro_definition() {
        let src = "%AMDONUT*\n0 ring with a hole*\n$3=$1-$2*\n1,1,$1,0,0*\n1,0,$2,0,0*%";
        let cmds = parse_ok(src);
        let Command::MacroDefine { name, body } = &cmds[0] else {
            panic!("expected macro, got {:?}", cmds[0]);
        };
        assert_eq!(name, "DONUT");
        assert_eq!(body.len(), 4);
        assert_eq!(body[0], MacroStatement::Comment("ring with a hole".into()));
        assert!(matches!(body[1], MacroStatement::Assign { param: 3, .. }));
        assert!(matches!(
            body[3],
            MacroStatement::Primitive(MacroPrimitive::Circle { rotation: None, .. })
        ));
    }

    #[test]
    fn macro_primitive_arity_is_checked() {
        let err = parse("%AMBAD*7,0,0,1*%").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidCommandFormat);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unknown_macro_primitive() {
        let err = parse("%AMBAD*9,1,2*%").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TokenNotFound);
    }

    #[test]
    fn parse_block_and_step_repeat() {
        let cmds = parse_ok("%ABD12*%%AB*%%SRX3Y2I5J4*%%SR*%");
        assert_eq!(cmds[0], Command::BlockOpen(12));
        assert_eq!(cmds[1], Command::BlockClose);
        assert_eq!(
            cmds[2],
            Command::StepRepeatOpen { x_repeat: 3, y_repeat: 2, x_step: 5.0, y_step: 4.0 }
        );
        assert_eq!(cmds[3], Command::StepRepeatClose);
    }

    #[test]
    fn parse_transformations() {
        let cmds = parse_ok("%LPC*%%LMXY*%%LR45.0*%%LS0.8*%");
        assert_eq!(
            cmds,
            vec![
                Command::LoadPolarity(Polarity::Clear),
                Command::LoadMirroring(Mirroring::XY),
                Command::LoadRotation(45.0),
                Command::LoadScaling(0.8),
            ]
        );
    }

    #[test]
    fn parse_attributes() {
        let cmds = parse_ok("%TF.FileFunction,Copper,L1,Top*%%TD*%%TA.AperFunction,SMDPad*%");
        assert_eq!(
            cmds[0],
            Command::Attribute(Attribute::File {
                name: ".FileFunction".into(),
                values: vec!["Copper".into(), "L1".into(), "Top".into()]
            })
        );
        assert_eq!(cmds[1], Command::Attribute(Attribute::Delete { name: None }));
    }

    #[test]
    fn parse_deprecated_image_parameters() {
        let cmds = parse_ok("%IPPOS*%%OFA0B0*%");
        assert_eq!(
            cmds[0],
            Command::ImageParameter(ImageParameter { code: "IP".into(), value: "POS".into() })
        );
    }

    #[test]
    fn error_reports_line_column_and_excerpt() {
        let err = parse("%FSLAX26Y26*%\nD10*\nX1Y1Q5D01*\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TokenNotFound);
        assert_eq!((err.line, err.column), (3, 1));
        assert!(err.excerpt.starts_with("X1Y1Q5"));
        let shown = err.to_string();
        assert!(shown.contains("3:1"), "{shown}");
    }

    #[test]
    fn missing_star_is_reported() {
        let err = parse("D10*\nX1Y1D01").unwrap_err();
        assert_eq!(err.code, "GBR-P002");
        let err = parse("%FSLAX26Y26*").unwrap_err();
        assert_eq!(err.code, "GBR-P003");
    }

    #[test]
    fn resilient_parse_keeps_going() {
        let (program, errors) = Grammar::default().parse_resilient("D10*\nQQ*\nD11*\n%XX1*%\nM02*");
        assert_eq!(errors.len(), 2);
        let kinds: Vec<_> = program.commands.iter().map(|c| &c.node).collect();
        assert_eq!(kinds.len(), 5);
        assert_eq!(*kinds[0], Command::SelectAperture(10));
        assert!(matches!(kinds[1], Command::Invalid { text } if text.contains("QQ")));
        assert_eq!(*kinds[2], Command::SelectAperture(11));
        assert!(matches!(kinds[3], Command::Invalid { .. }));
        assert_eq!(*kinds[4], Command::EndOfFile);
    }

    #[test]
    fn spans_point_at_statements() {
        let src = "G04 a*\nD10*";
        let program = parse(src).unwrap();
        let span = program.commands[1].span;
        assert_eq!(&src[span.start..span.end], "D10*");
    }
}

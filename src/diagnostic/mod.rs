pub mod ansi;
pub mod json;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    /// Same diagnostic downgraded to a warning (recovered errors).
    pub fn as_warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the pipeline's error types ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("GBR-P005")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        Diagnostic::error(&e.message)
            .with_code(e.code)
            .with_span(e.span, e.kind.to_string())
            .with_note(format!("near `{}`", e.excerpt))
    }
}

impl From<&crate::compiler::CompileError> for Diagnostic {
    fn from(e: &crate::compiler::CompileError) -> Self {
        use crate::compiler::CompileError;
        let code = match e {
            CompileError::Format { .. } => "GBR-C001",
            CompileError::IncrementalCoordinatesNotSupported { .. } => "GBR-C002",
            CompileError::MacroEvaluation { .. } | CompileError::NoCorrespondingApertureClass { .. } => "GBR-C003",
            CompileError::ApertureNotDefined { .. }
            | CompileError::NoApertureSelected { .. }
            | CompileError::ApertureRedefined { .. }
            | CompileError::StrokeAperture { .. } => "GBR-C004",
            CompileError::FlashInRegion { .. } | CompileError::NestedRegion { .. } | CompileError::RegionNotClosed { .. } => {
                "GBR-C005"
            }
            CompileError::UnnamedBlockAperture { .. }
            | CompileError::UnclosedBlockAperture { .. }
            | CompileError::StepAndRepeatNotInitialized { .. }
            | CompileError::MismatchedClose { .. } => "GBR-C006",
            CompileError::NoValidArcCenter { .. } => "GBR-C007",
            CompileError::CyclicLayerDependency(_) | CompileError::Rvmc(_) => "GBR-C008",
        };
        let mut d = Diagnostic::error(e.to_string()).with_code(code);
        if let Some(span) = e.span() {
            d = d.with_span(span, "here");
        }
        if let CompileError::NoValidArcCenter { .. } = e {
            d = d.with_suggestion("check the quadrant mode (G74/G75) and the I/J offsets");
        }
        d
    }
}

impl From<&crate::vm::VmError> for Diagnostic {
    fn from(e: &crate::vm::VmError) -> Self {
        Diagnostic::error(e.to_string()).with_code("GBR-V001")
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Parse(e) => e.into(),
            crate::Error::Compile(e) => e.into(),
            crate::Error::Vm(e) => e.into(),
        }
    }
}

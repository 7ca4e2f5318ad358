use serde::Serialize;

use crate::ast::SourceMap;
use super::{Diagnostic, Severity};

/// Where a label lands in the Gerber source.
#[derive(Serialize)]
struct Position<'a> {
    line: usize,
    column: usize,
    /// The whole source line holding the label start.
    excerpt: &'a str,
}

#[derive(Serialize)]
struct JsonLabel<'a> {
    start: usize,
    end: usize,
    message: &'a str,
    #[serde(flatten)]
    position: Option<Position<'a>>,
}

/// Wire shape of one diagnostic. The first label's position is repeated at
/// the top level so tools can jump to the offending statement directly.
#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    message: &'a str,
    #[serde(flatten)]
    position: Option<Position<'a>>,
    labels: Vec<JsonLabel<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: &'a Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let source = d.source.as_deref();
    let map = source.map(SourceMap::new);
    let position = |offset: usize| {
        let (map, source) = (map.as_ref()?, source?);
        let (line, column) = map.lookup(offset);
        Some(Position { line, column, excerpt: map.line_text(source, line) })
    };

    let labels: Vec<JsonLabel<'_>> = d
        .labels
        .iter()
        .map(|l| JsonLabel { start: l.span.start, end: l.span.end, message: &l.message, position: position(l.span.start) })
        .collect();

    let out = JsonDiagnostic {
        severity: match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        },
        code: d.code,
        message: &d.message,
        position: d.labels.first().and_then(|l| position(l.span.start)),
        labels,
        notes: &d.notes,
        suggestion: d.suggestion.as_deref(),
    };
    serde_json::to_string(&out).unwrap_or_else(|e| format!(r#"{{"severity":"error","message":"diagnostic not serializable: {e}"}}"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn bare_error_has_no_position() {
        let v = parse_json(&render(&Diagnostic::error("aperture D11 is not defined")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "aperture D11 is not defined");
        assert!(v["labels"].as_array().unwrap().is_empty());
        assert!(v.get("code").is_none());
        assert!(v.get("line").is_none());
        assert!(v.get("notes").is_none());
    }

    #[test]
    fn position_points_at_offending_statement() {
        let d = Diagnostic::error("unknown statement")
            .with_code("GBR-P001")
            .with_span(Span { start: 14, end: 18 }, "here")
            .with_source("%FSLAX26Y26*%\nG99*\n");
        let v = parse_json(&render(&d));
        assert_eq!(v["code"], "GBR-P001");
        assert_eq!(v["line"], 2);
        assert_eq!(v["column"], 1);
        assert_eq!(v["excerpt"], "G99*");
        let label = &v["labels"][0];
        assert_eq!(label["start"], 14);
        assert_eq!(label["end"], 18);
        assert_eq!(label["line"], 2);
        assert_eq!(label["excerpt"], "G99*");
    }

    #[test]
    fn column_within_a_long_line() {
        let d = Diagnostic::error("undefined aperture")
            .with_span(Span { start: 9, end: 12 }, "selected here")
            .with_source("X0Y0D03*\tD11*\r\nM02*");
        let v = parse_json(&render(&d));
        assert_eq!(v["line"], 1);
        assert_eq!(v["column"], 10);
        assert_eq!(v["excerpt"], "X0Y0D03*\tD11*");
    }

    #[test]
    fn notes_and_suggestion() {
        let d = Diagnostic::error("bad")
            .with_note("near `G99*`")
            .with_note("second")
            .with_suggestion("use G01");
        let v = parse_json(&render(&d));
        assert_eq!(v["notes"].as_array().unwrap().len(), 2);
        assert_eq!(v["notes"][0], "near `G99*`");
        assert_eq!(v["suggestion"], "use G01");
    }

    #[test]
    fn label_without_source_has_no_position() {
        let d = Diagnostic::error("bad").with_span(Span { start: 5, end: 8 }, "here");
        let v = parse_json(&render(&d));
        assert!(v["labels"][0].get("line").is_none());
        assert!(v["labels"][0].get("column").is_none());
        assert!(v.get("excerpt").is_none());
    }

    #[test]
    fn warning_stays_on_one_line() {
        let d = Diagnostic::error("skipped")
            .as_warning()
            .with_span(Span { start: 9, end: 13 }, "ignored")
            .with_source("X0Y0D03*\nM02*\n");
        let out = render(&d);
        assert!(!out.contains('\n'));
        let v = parse_json(&out);
        assert_eq!(v["severity"], "warning");
        assert_eq!(v["excerpt"], "M02*");
    }
}

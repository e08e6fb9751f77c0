use serde::Serialize;

use crate::ast::SourceMap;
use super::{Diagnostic, Label, Severity};

#[derive(Serialize)]
struct JsonLabel<'a> {
    start: usize,
    end: usize,
    message: &'a str,
    primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    col: Option<usize>,
    /// The generated source line the label points into.
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    message: &'a str,
    labels: Vec<JsonLabel<'a>>,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

fn json_label<'a>(label: &'a Label, source: Option<(&'a str, &SourceMap)>) -> JsonLabel<'a> {
    let mut out = JsonLabel {
        start: label.span.start,
        end: label.span.end,
        message: &label.message,
        primary: label.is_primary,
        line: None,
        col: None,
        text: None,
    };
    if let Some((source, map)) = source {
        let location = map.locate(label.span.start);
        out.line = Some(location.line);
        out.col = Some(location.column);
        out.text = Some(map.line_text(source, location.line));
    }
    out
}

/// One diagnostic as a single-line JSON object, for editors and graders.
pub fn render(d: &Diagnostic) -> String {
    let map = d.source.as_deref().map(SourceMap::new);
    let source = d.source.as_deref().zip(map.as_ref());
    let json = JsonDiagnostic {
        severity: match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        },
        code: d.code,
        message: &d.message,
        labels: d.labels.iter().map(|l| json_label(l, source)).collect(),
        notes: &d.notes,
        suggestion: d.suggestion.as_deref(),
    };
    serde_json::to_string(&json)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"diagnostic could not be encoded"}"#.to_string())
}

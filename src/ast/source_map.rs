use super::Span;

/// 1-based line/column position in the generated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// Maps byte offsets in generated code back to line/column positions.
pub struct SourceMap {
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { line_starts, len: source.len() }
    }

    pub fn locate(&self, offset: usize) -> Location {
        let offset = offset.min(self.len);
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        Location {
            line: line + 1,
            column: offset - self.line_starts[line] + 1,
        }
    }

    pub fn locate_span(&self, span: Span) -> Location {
        self.locate(span.start)
    }

    /// Text of the given 1-based line, without its line terminator.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        if line == 0 || line > self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line - 1];
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches(['\n', '\r'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_columns() {
        let src = "highlightBlock('a');";
        let map = SourceMap::new(src);
        assert_eq!(map.locate(0), Location { line: 1, column: 1 });
        assert_eq!(map.locate(15), Location { line: 1, column: 16 });
    }

    #[test]
    fn later_lines() {
        let src = "var x;\nx = 1;\nexit(true, 'ok');";
        let map = SourceMap::new(src);
        assert_eq!(map.locate(7), Location { line: 2, column: 1 });
        assert_eq!(map.locate(14), Location { line: 3, column: 1 });
        assert_eq!(map.locate_span(Span::new(9, 10)), Location { line: 2, column: 3 });
    }

    #[test]
    fn newline_belongs_to_its_line() {
        let map = SourceMap::new("ab\ncd");
        assert_eq!(map.locate(2), Location { line: 1, column: 3 });
        assert_eq!(map.locate(3), Location { line: 2, column: 1 });
    }

    #[test]
    fn offsets_past_the_end_clamp() {
        let map = SourceMap::new("abc");
        assert_eq!(map.locate(99), Location { line: 1, column: 4 });
    }

    #[test]
    fn line_text_strips_terminators() {
        let src = "first\r\nsecond\n";
        let map = SourceMap::new(src);
        assert_eq!(map.line_text(src, 1), "first");
        assert_eq!(map.line_text(src, 2), "second");
        assert_eq!(map.line_text(src, 3), "");
        assert_eq!(map.line_text(src, 0), "");
    }
}

/// Byte offset to line/column lookup.
///
/// Old CAM exports end lines with `\r\n`, `\n` or a bare `\r`; all three count
/// as one line break, matching what the lexer skips.
pub struct SourceMap {
    /// Offset of the first byte of each line.
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let bytes = source.as_bytes();
        let mut line_starts = vec![0];
        for (i, &b) in bytes.iter().enumerate() {
            let lone_cr = b == b'\r' && bytes.get(i + 1) != Some(&b'\n');
            if b == b'\n' || lone_cr {
                line_starts.push(i + 1);
            }
        }
        SourceMap { line_starts }
    }

    /// 1-based (line, column) of `offset`.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset).saturating_sub(1);
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// Text of 1-based `line` without its terminator; empty when out of range.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source.get(start..end).unwrap_or("").trim_end_matches(['\r', '\n'])
    }
}

/// At most `max_chars` characters of `source` starting at `offset`, cut at the line end.
pub fn excerpt(source: &str, offset: usize, max_chars: usize) -> String {
    let Some(rest) = source.get(offset..) else {
        return String::new();
    };
    rest.chars().take_while(|c| !matches!(c, '\r' | '\n')).take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_within_one_line() {
        let src = "X100Y200D01*";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(4), (1, 5));
        assert_eq!(sm.lookup(12), (1, 13));
    }

    #[test]
    fn lookup_across_lines() {
        let src = "%FSLAX26Y26*%\n%MOMM*%\nD10*";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(13), (1, 14));
        assert_eq!(sm.lookup(14), (2, 1));
        assert_eq!(sm.lookup(22), (3, 1));
    }

    #[test]
    fn all_line_endings_count_once() {
        let src = "G04 a*\r\nG04 b*\rG04 c*\nM02*";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "G04 a*");
        assert_eq!(sm.line_text(src, 2), "G04 b*");
        assert_eq!(sm.line_text(src, 3), "G04 c*");
        assert_eq!(sm.line_text(src, 4), "M02*");
        assert_eq!(sm.lookup(src.find("G04 c").unwrap()), (3, 1));
    }

    #[test]
    fn line_text_out_of_range() {
        let src = "M02*";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 99), "");
    }

    #[test]
    fn empty_source() {
        let sm = SourceMap::new("");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.line_text("", 1), "");
    }

    #[test]
    fn excerpt_stops_at_line_end() {
        let src = "D10*\nX1Y1D99QQQ*\rM02*";
        assert_eq!(excerpt(src, 5, 40), "X1Y1D99QQQ*");
        assert_eq!(excerpt(src, 5, 4), "X1Y1");
        assert_eq!(excerpt(src, 100, 4), "");
    }
}

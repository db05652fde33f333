//! Error plumbing shared by the lexer, parser, assembler, and front ends.
//!
//! Every user-facing error in this crate implements the [`Error`] trait,
//! which extends [`std::error::Error`] with an optional source span
//! ([`ErrSpan`]) and an optional help message. The [`report`] function
//! renders an error against its source text with line/column context,
//! which is what the command-line front ends print to stderr.

use std::borrow::Cow;
use std::ops::Range;

/// Unified error interface for this crate's error types.
///
/// Beyond the standard error requirements, this exposes where in the
/// source the error occurred and a hint on how to fix it. Both are
/// optional; errors without position information (e.g., simulator halts)
/// simply return `None`.
pub trait Error: std::error::Error {
    /// The span(s) in source code which caused the error.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A possible help message to guide the user in fixing the error.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}

/// One or more byte ranges in source code tied to an error.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrSpan {
    /// One contiguous span.
    One(Range<usize>),
    /// Two distinct spans (e.g., two clashing label definitions).
    Two([Range<usize>; 2]),
    /// An arbitrary collection of spans.
    Many(Vec<Range<usize>>),
}
impl ErrSpan {
    /// The first (earliest-starting) range of this span.
    pub fn first(&self) -> Option<Range<usize>> {
        match self {
            ErrSpan::One(r) => Some(r.clone()),
            ErrSpan::Two([a, b]) => Some(if a.start <= b.start { a.clone() } else { b.clone() }),
            ErrSpan::Many(rs) => rs.iter().min_by_key(|r| r.start).cloned(),
        }
    }

    /// Iterates over all ranges of this span.
    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> + '_ {
        match self {
            ErrSpan::One(r) => std::slice::from_ref(r).iter(),
            ErrSpan::Two(rs) => rs.iter(),
            ErrSpan::Many(rs) => rs.iter(),
        }
    }
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::One(value)
    }
}
impl From<[Range<usize>; 2]> for ErrSpan {
    fn from(value: [Range<usize>; 2]) -> Self {
        ErrSpan::Two(value)
    }
}
impl From<Vec<Range<usize>>> for ErrSpan {
    fn from(value: Vec<Range<usize>>) -> Self {
        ErrSpan::Many(value)
    }
}
impl From<ErrSpan> for Vec<Range<usize>> {
    fn from(value: ErrSpan) -> Self {
        match value {
            ErrSpan::One(r) => vec![r],
            ErrSpan::Two(rs) => rs.to_vec(),
            ErrSpan::Many(rs) => rs,
        }
    }
}

/// Computes the 0-indexed line and column numbers of a byte index in `src`.
fn line_col(src: &str, index: usize) -> (usize, usize) {
    let index = index.min(src.len());
    let line_start = src[..index].rfind('\n').map_or(0, |i| i + 1);
    let line = src[..line_start].matches('\n').count();
    (line, index - line_start)
}

/// Renders an error against its source text.
///
/// The output contains the filename, the 1-indexed line/column of each
/// span, the offending line itself, and the error's help message if it
/// provides one:
///
/// ```text
/// error: label was defined multiple times
///   --> fib.asm:4:1
///    |  LOOP: ADD R1, R2
///    |  ^^^^
/// help: labels must be unique within a file
/// ```
pub fn report(filename: &str, src: &str, err: &dyn Error) -> String {
    use std::fmt::Write;

    let mut buf = String::new();
    let _ = writeln!(buf, "error: {err}");

    if let Some(span) = err.span() {
        for range in span.iter() {
            let (line, col) = line_col(src, range.start);
            let _ = writeln!(buf, "  --> {filename}:{}:{}", line + 1, col + 1);

            if let Some(text) = src.lines().nth(line) {
                let _ = writeln!(buf, "   |  {text}");
                let underline = "^".repeat(range.len().clamp(1, text.len().saturating_sub(col).max(1)));
                let _ = writeln!(buf, "   |  {:col$}{underline}", "");
            }
        }
    }

    if let Some(help) = err.help() {
        let _ = writeln!(buf, "help: {help}");
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Oops;
    impl std::fmt::Display for Oops {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("something went wrong")
        }
    }
    impl std::error::Error for Oops {}
    impl Error for Oops {
        fn span(&self) -> Option<ErrSpan> {
            Some(ErrSpan::One(6..10))
        }
        fn help(&self) -> Option<Cow<str>> {
            Some("try not doing that".into())
        }
    }

    #[test]
    fn test_line_col() {
        let src = "abc\ndef\nghi";
        assert_eq!(line_col(src, 0), (0, 0));
        assert_eq!(line_col(src, 3), (0, 3));
        assert_eq!(line_col(src, 4), (1, 0));
        assert_eq!(line_col(src, 6), (1, 2));
        assert_eq!(line_col(src, 8), (2, 0));
        assert_eq!(line_col(src, 99), (2, 3));
    }

    #[test]
    fn test_report_contains_position() {
        let out = report("input.asm", "abc\ndefg\nhi", &Oops);
        assert!(out.contains("error: something went wrong"));
        assert!(out.contains("input.asm:2:3"));
        assert!(out.contains("help: try not doing that"));
    }

    #[test]
    fn test_err_span_first() {
        assert_eq!(ErrSpan::One(3..5).first(), Some(3..5));
        assert_eq!(ErrSpan::Two([7..9, 2..4]).first(), Some(2..4));
        assert_eq!(ErrSpan::Many(vec![]).first(), None);
    }
}

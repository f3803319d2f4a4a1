//! Source locations for error reporting and tooling.

use std::fmt;
use std::sync::Arc;

/// A position in a source file. Lines and columns are 1-indexed; a column
/// of 0 means "whole line" and is omitted from display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<Arc<str>>, line: u32, col: u32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            col,
        }
    }

    /// Location naming a whole line.
    pub fn line_of(file: impl Into<Arc<str>>, line: u32) -> Self {
        SourceLocation::new(file, line, 0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col == 0 {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.col)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_column() {
        let loc = SourceLocation::new("foo.c", 12, 3);
        assert_eq!(loc.to_string(), "foo.c:12:3");
    }

    #[test]
    fn test_display_whole_line() {
        let loc = SourceLocation::line_of("foo.c", 12);
        assert_eq!(loc.to_string(), "foo.c:12");
    }
}

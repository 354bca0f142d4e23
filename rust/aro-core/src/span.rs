//! Source locations and spans.
//!
//! Locations are 1-indexed. A span's start is inclusive and its end is
//! exclusive, so a single-character token at column 5 spans columns 5..6.

use serde::{Deserialize, Serialize};

/// A 1-indexed line/column position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub col: u32,
}

impl SourceLocation {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// A region of source text, with an optional originating file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: SourceLocation,
    pub end: SourceLocation,
    pub file: Option<String>,
}

impl Span {
    pub fn new(start: SourceLocation, end: SourceLocation) -> Self {
        Self {
            start,
            end,
            file: None,
        }
    }

    pub fn in_file(start: SourceLocation, end: SourceLocation, file: impl Into<String>) -> Self {
        Self {
            start,
            end,
            file: Some(file.into()),
        }
    }

    /// A synthetic span for nodes that have no source position (generated
    /// code, tests).
    pub fn synthetic() -> Self {
        Self::new(SourceLocation::new(1, 1), SourceLocation::new(1, 2))
    }

    /// Width of the caret underline a reporter should draw for this span.
    /// Always at least one column wide, even for empty or reversed spans.
    pub fn underline_width(&self) -> usize {
        let end = self.end.col as i64;
        let start = self.start.col as i64;
        (end - start).max(1) as usize
    }
}

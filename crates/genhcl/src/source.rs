//! source files and ranges used for diagnostics
//!
//! `hcl_edit` keeps byte spans on parsed structures. A [SourceFile] keeps the text those spans point into so they
//! can be turned into a user friendly [SourceRange] (path, line and column) once something goes wrong.
use serde::Serialize;
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    text: String,
    /// byte offset of the first character of every line
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();

        Self {
            path: path.into(),
            text,
            line_starts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolve a byte span of this file
    ///
    /// Structures built programmatically carry no span; those resolve to the start of the file.
    pub fn range(&self, span: Option<Range<usize>>) -> SourceRange {
        let span = span.unwrap_or(0..0);
        SourceRange {
            path: self.path.clone(),
            start: self.position(span.start),
            end: self.position(span.end),
        }
    }

    fn position(&self, byte: usize) -> Position {
        let byte = byte.min(self.text.len());
        let line = self.line_starts.partition_point(|start| *start <= byte);
        let line_start = self.line_starts[line - 1];

        Position {
            line,
            column: self.text[line_start..byte].chars().count() + 1,
            byte,
        }
    }
}

/// Location of a configuration element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRange {
    pub path: PathBuf,
    pub start: Position,
    pub end: Position,
}

/// 1-based line and column, plus the 0-based byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

impl std::fmt::Display for SourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{},{}-{},{}",
            self.path.display(),
            self.start.line,
            self.start.column,
            self.end.line,
            self.end.column
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_and_column() {
        let source = SourceFile::new("gen.tm.hcl", "a = 1\nbb = 22\n");
        let range = source.range(Some(6..13));

        assert_eq!(range.start.line, 2);
        assert_eq!(range.start.column, 1);
        assert_eq!(range.end.line, 2);
        assert_eq!(range.end.column, 8);
        assert_eq!(range.to_string(), "gen.tm.hcl:2,1-2,8");
    }

    #[test]
    fn missing_span_points_to_file_start() {
        let source = SourceFile::new("gen.tm.hcl", "a = 1\n");
        let range = source.range(None);

        assert_eq!(range.start, Position { line: 1, column: 1, byte: 0 });
    }
}

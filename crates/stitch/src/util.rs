//! Small helpers shared by the scanner, the emitter and the source map composer

use std::path::{Component, Path, PathBuf};

use crate::error::SourcePosition;

/// Byte offsets of line starts, for turning spans into line/column pairs
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { text, line_starts }
    }

    /// Number of lines, counting a trailing line without newline
    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    /// 0-based line and UTF-16 column of a byte offset
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.text.len());
        let line = self.line_starts.partition_point(|start| *start <= offset) - 1;
        let start = self.line_starts[line];
        let column = self
            .text
            .get(start..offset)
            .map_or(0, |prefix| utf16_len(prefix));
        (line as u32, column)
    }

    /// 1-based line for human-facing positions
    pub fn position(&self, offset: usize) -> SourcePosition {
        let (line, column) = self.line_col(offset);
        SourcePosition {
            line: line + 1,
            column,
        }
    }
}

/// Length of `text` in UTF-16 code units, the unit of source map columns
pub fn utf16_len(text: &str) -> u32 {
    text.chars().map(char::len_utf16).sum::<usize>() as u32
}

/// `path` relative to `root` with `/` separators, or the full path
pub fn display_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_owned()),
            _ => None,
        })
        .collect();
    if relative.is_absolute() {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}

/// Resolve `.` and `..` components without touching the file system
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let index = LineIndex::new("ab\ncd\n\nλx");
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(0), (0, 0));
        assert_eq!(index.line_col(2), (0, 2));
        assert_eq!(index.line_col(3), (1, 0));
        assert_eq!(index.line_col(6), (2, 0));
        // 'λ' is two bytes but one UTF-16 unit
        assert_eq!(index.line_col(9), (3, 1));
        assert_eq!(index.position(4), SourcePosition { line: 2, column: 1 });
    }

    #[test]
    fn test_utf16_len_counts_surrogate_pairs() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("😀"), 2);
    }

    #[test]
    fn test_display_path() {
        assert_eq!(
            display_path(Path::new("/project/src/a.js"), Path::new("/project")),
            "src/a.js"
        );
        assert_eq!(
            display_path(Path::new("/elsewhere/b.js"), Path::new("/project")),
            "/elsewhere/b.js"
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/project/src/../lib/./a.ts")),
            PathBuf::from("/project/lib/a.ts")
        );
        assert_eq!(normalize_path(Path::new("../a.js")), PathBuf::from("../a.js"));
    }
}

//=====================================================
// File: diagnostic.rs
//=====================================================
// Goal: Positional error context shared by the lexer and parser
// Objective: Map byte offsets to line/column and render caret displays
//=====================================================

use std::fmt;

/// Everything tooling needs to point at a problem in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub filename: String,
    /// 1-based.
    pub line: usize,
    /// 1-based, counted in characters from the start of the line.
    pub column: usize,
    pub source_line: String,
    pub message: String,
}

impl Diagnostic {
    /// Build a diagnostic for the byte offset `index` of `source`.
    pub fn at(filename: &str, source: &str, index: usize, message: impl Into<String>) -> Self {
        let index = clamp_to_boundary(source, index);
        Self {
            filename: filename.to_string(),
            line: line_of(source, index),
            column: index_column(source, index),
            source_line: line_text(source, index).to_string(),
            message: message.into(),
        }
    }

    /// `file:line:column`
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.filename, self.line, self.column)
    }

    /// Multi-line rendering with a caret under the offending column.
    pub fn render(&self) -> String {
        let gutter = self.line.to_string();
        let pad = " ".repeat(gutter.len());
        let caret = " ".repeat(self.column.saturating_sub(1));
        format!(
            "error: {message}\n{pad}--> {location}\n{pad} |\n{gutter} | {text}\n{pad} | {caret}^\n",
            message = self.message,
            location = self.location(),
            text = self.source_line,
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location(), self.message)
    }
}

/// Column of byte offset `index`, found by scanning back to the last newline.
pub fn index_column(text: &str, index: usize) -> usize {
    let index = clamp_to_boundary(text, index);
    let start = line_start(text, index);
    text[start..index].chars().count() + 1
}

/// 1-based line number of byte offset `index`.
pub fn line_of(text: &str, index: usize) -> usize {
    let index = clamp_to_boundary(text, index);
    text[..index].matches('\n').count() + 1
}

/// The full text of the line containing byte offset `index`, without its newline.
pub fn line_text(text: &str, index: usize) -> &str {
    let index = clamp_to_boundary(text, index);
    let start = line_start(text, index);
    let end = text[index..]
        .find('\n')
        .map(|offset| index + offset)
        .unwrap_or(text.len());
    text[start..end].trim_end_matches('\r')
}

fn line_start(text: &str, index: usize) -> usize {
    text[..index].rfind('\n').map(|nl| nl + 1).unwrap_or(0)
}

fn clamp_to_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_one_based() {
        let text = "ab\ncde\n";
        assert_eq!(index_column(text, 0), 1);
        assert_eq!(index_column(text, 1), 2);
        assert_eq!(index_column(text, 3), 1);
        assert_eq!(index_column(text, 5), 3);
        assert_eq!(line_of(text, 5), 2);
        assert_eq!(line_text(text, 5), "cde");
    }

    #[test]
    fn renders_caret_under_column() {
        let diag = Diagnostic::at("demo.tl", "fn f() {\n  x @ y\n}", 13, "Illegal character `@`");
        assert_eq!(diag.line, 2);
        assert_eq!(diag.column, 5);
        let rendered = diag.render();
        assert!(rendered.contains("--> demo.tl:2:5"));
        assert!(rendered.contains("2 |   x @ y\n"));
        assert!(rendered.contains("  |     ^\n"));
    }
}

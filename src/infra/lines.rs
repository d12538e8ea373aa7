//! Filepath: src/infra/lines.rs
//! Per-line byte spans for excerpt slicing.
//!
//! One memchr pass over the bytes materialises, for every line, the byte
//! span of its content with any CRLF terminator already stripped. Excerpt
//! handlers then resolve an inclusive 1-based line range with two vector
//! lookups instead of re-walking the text per request.
//!
//! The line model matches `str::lines()` everywhere in the crate: an empty
//! buffer has no lines, and a trailing '\n' does not open a phantom empty
//! line. Chunking, search documents, and open_file all count lines the
//! same way, so ranges computed against one surface slice cleanly against
//! another.

use memchr::memchr_iter;

/// Byte span of one line's content, terminator excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

/// Precomputed line table over a text buffer.
#[derive(Debug, Clone)]
pub struct LineTable {
    spans: Vec<LineSpan>,
}

impl LineTable {
    /// Scan the buffer once and record every line's content span.
    #[must_use]
    pub fn build(bytes: &[u8]) -> Self {
        let mut spans = Vec::with_capacity(bytes.len() / 40 + 1);
        let mut line_start = 0usize;
        for newline in memchr_iter(b'\n', bytes) {
            let mut content_end = newline;
            // CRLF terminators keep the '\r' out of the content span.
            if content_end > line_start && bytes[content_end - 1] == b'\r' {
                content_end -= 1;
            }
            spans.push(LineSpan {
                start: line_start,
                end: content_end,
            });
            line_start = newline + 1;
        }
        if line_start < bytes.len() {
            spans.push(LineSpan {
                start: line_start,
                end: bytes.len(),
            });
        }
        Self { spans }
    }

    /// Number of content lines, `str::lines()`-compatible.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.spans.len()
    }

    /// Content span of a single 1-based line.
    #[must_use]
    pub fn line(&self, line1: usize) -> Option<LineSpan> {
        if line1 == 0 {
            return None;
        }
        self.spans.get(line1 - 1).copied()
    }

    /// Byte span covering an inclusive 1-based line range.
    ///
    /// The end line clamps to the last line; a start past the end of the
    /// table (or an inverted range) resolves to nothing. Interior line
    /// terminators stay inside the span so callers can re-split, while the
    /// final line's terminator is excluded.
    #[must_use]
    pub fn byte_span(&self, start_line: usize, end_line: usize) -> Option<LineSpan> {
        if start_line == 0 || end_line < start_line || start_line > self.spans.len() {
            return None;
        }
        let clamped_end = end_line.min(self.spans.len());
        Some(LineSpan {
            start: self.spans[start_line - 1].start,
            end: self.spans[clamped_end - 1].end,
        })
    }
}

//! Filepath: src/infra/io.rs
//! Scoped, size-aware file reads.
//!
//! Files over 1 MiB are memory-mapped; smaller files are read into a
//! buffer. Every handle is released when the returned content drops, so no
//! descriptor outlives the current operation. Line spans are sliced
//! through [`LineTable`] which keeps CRLF files honest.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

use crate::infra::lines::LineTable;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

pub enum FileContent {
    Mapped(Mmap),
    Buffered(String),
}

impl AsRef<str> for FileContent {
    fn as_ref(&self) -> &str {
        match self {
            // Indexed files are text by construction (binary sniff at
            // discovery); mapped bytes that fail UTF-8 read as empty.
            FileContent::Mapped(mmap) => std::str::from_utf8(mmap).unwrap_or(""),
            FileContent::Buffered(text) => text.as_str(),
        }
    }
}

/// Read a file, memory-mapping it past the size threshold.
pub fn read_file_smart<P: AsRef<Path>>(path: P) -> Result<FileContent> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        let file =
            File::open(path).with_context(|| format!("open file {}", path.display()))?;
        // Safety: the map is read-only and dropped with the content.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("memory-map {}", path.display()))?;
        Ok(FileContent::Mapped(mmap))
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read file {}", path.display()))?;
        Ok(FileContent::Buffered(content))
    }
}

/// Materialise an inclusive 1-based line span as owned lines.
///
/// The end line is clamped to the real line count; the file handle is
/// released before returning.
pub fn read_line_span(path: &Path, start_line: usize, end_line: usize) -> Result<Vec<String>> {
    let content = read_file_smart(path)?;
    Ok(slice_line_span(content.as_ref(), start_line, end_line))
}

/// Slice an inclusive 1-based line span out of already-loaded text.
pub fn slice_line_span(text: &str, start_line: usize, end_line: usize) -> Vec<String> {
    let table = LineTable::build(text.as_bytes());
    let Some(span) = table.byte_span(start_line, end_line) else {
        return Vec::new();
    };
    text[span.start..span.end]
        .lines()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_small_files_buffered() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("small.txt");
        fs::write(&path, "alpha\nbeta\n").unwrap();
        let content = read_file_smart(&path).unwrap();
        assert_eq!(content.as_ref(), "alpha\nbeta\n");
    }

    #[test]
    fn slices_line_spans_inclusively() {
        let text = "l1\nl2\nl3\nl4\nl5";
        assert_eq!(slice_line_span(text, 2, 3), vec!["l2", "l3"]);
        assert_eq!(slice_line_span(text, 1, 1), vec!["l1"]);
        // End past EOF clamps.
        assert_eq!(slice_line_span(text, 4, 99), vec!["l4", "l5"]);
        // Invalid spans yield nothing.
        assert!(slice_line_span(text, 0, 1).is_empty());
        assert!(slice_line_span(text, 9, 10).is_empty());
    }

    #[test]
    fn crlf_lines_come_back_clean() {
        let text = "a\r\nb\r\nc";
        assert_eq!(slice_line_span(text, 1, 2), vec!["a", "b"]);
    }

    #[test]
    fn read_line_span_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        assert_eq!(read_line_span(&path, 2, 3).unwrap(), vec!["two", "three"]);
    }
}

//! Pattern set transport encoding
//!
//! The pattern set is a list of multi-line text entries whose content is opaque
//! to the coordinator. It travels as a single command argument, so inside each
//! entry tabs and the escape marker become spaces, then newlines become the
//! marker, and the entries are joined with tabs.

use std::fs;
use std::io;
use std::path::Path;

/// Stands in for `\n` inside an encoded entry
pub const ESCAPE_MARKER: char = '\u{1}';

/// Immutable pattern configuration shared by every session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    entries: Vec<String>,
}

impl PatternSet {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// One entry per file, in the given order
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let entries = paths
            .iter()
            .map(|path| {
                fs::read_to_string(path.as_ref()).map_err(|e| {
                    io::Error::new(e.kind(), format!("{}: {e}", path.as_ref().display()))
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Single-argument form sent with `add_patterns`
    ///
    /// Not lossless at the edges: a set holding one empty entry encodes to the
    /// same empty blob as the empty set, and a `\r` ending the last entry is
    /// lost because line readers strip it along with the newline.
    pub fn encode(&self) -> String {
        self.entries.iter().map(|entry| encode_entry(entry)).collect::<Vec<_>>().join("\t")
    }
}

pub fn encode_entry(entry: &str) -> String {
    entry
        .chars()
        .map(|c| match c {
            '\t' | ESCAPE_MARKER => ' ',
            c => c,
        })
        .map(|c| if c == '\n' { ESCAPE_MARKER } else { c })
        .collect()
}

pub fn decode_entry(encoded: &str) -> String {
    encoded.chars().map(|c| if c == ESCAPE_MARKER { '\n' } else { c }).collect()
}

/// Inverse of [`PatternSet::encode`]. An empty blob is an empty set.
pub fn decode(blob: &str) -> Vec<String> {
    if blob.is_empty() {
        return Vec::new();
    }
    blob.split('\t').map(decode_entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_entries_round_trip() {
        let entries = vec![
            "Pattern A\n..X\n.O.\n".to_string(),
            "Pattern B\r\n|.x|\r\n".to_string(),
            "single line".to_string(),
        ];
        let set = PatternSet::new(entries.clone());
        let blob = set.encode();
        assert!(!blob.contains('\n'));
        assert_eq!(blob.matches('\t').count(), 2);
        assert_eq!(decode(&blob), entries);
    }

    #[test]
    fn test_tabs_and_markers_become_spaces() {
        let set = PatternSet::new(vec![format!("a\tb{ESCAPE_MARKER}c\nd")]);
        let blob = set.encode();
        assert_eq!(blob, format!("a b c{ESCAPE_MARKER}d"));
        assert_eq!(decode(&blob), vec!["a b c\nd".to_string()]);
    }

    #[test]
    fn test_empty_set() {
        let set = PatternSet::default();
        assert!(set.is_empty());
        assert_eq!(set.encode(), "");
        assert!(decode("").is_empty());
    }

    #[test]
    fn test_single_empty_entry_reads_back_as_empty_set() {
        let set = PatternSet::new(vec![String::new()]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.encode(), "");
        assert!(decode(&set.encode()).is_empty());

        // empty entries between others survive
        let set = PatternSet::new(vec!["a".to_string(), String::new(), "b".to_string()]);
        assert_eq!(decode(&set.encode()), set.entries());
    }
}

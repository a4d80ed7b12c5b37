//! Streaming loader for line-delimited alignment records.
//!
//! Each line is parsed independently. A line that fails to parse, or a
//! record whose designated text field is empty, is skipped with a warning
//! and never consumes a vector id: ids are dense over kept records only.

use crate::config::TextField;
use crate::error::{RetrievalError, RetrievalResult};
use crate::types::AlignmentRecord;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tracing::warn;

/// An alignment record as it appears on the wire, before id assignment.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    src_text: String,
    #[serde(default)]
    tgt_text: String,
    #[serde(default)]
    part: String,
    #[serde(default)]
    src_indices: Vec<i64>,
    #[serde(default)]
    tgt_indices: Vec<i64>,
    #[serde(default)]
    alignment_type: String,
    #[serde(default)]
    src_chunks: Vec<serde_json::Value>,
    #[serde(default)]
    tgt_chunks: Vec<serde_json::Value>,
}

impl RawRecord {
    fn into_record(self, id: u32) -> AlignmentRecord {
        let alignment_type = if self.alignment_type.is_empty() {
            format!("{}-{}", self.src_indices.len(), self.tgt_indices.len())
        } else {
            self.alignment_type
        };
        AlignmentRecord {
            id,
            src_text: self.src_text,
            tgt_text: self.tgt_text,
            part: self.part,
            src_indices: self.src_indices,
            tgt_indices: self.tgt_indices,
            alignment_type,
            src_chunks: self.src_chunks,
            tgt_chunks: self.tgt_chunks,
        }
    }
}

/// Lazy reader over a line-delimited JSON alignment file.
///
/// Yields kept records in file order with dense 0-based ids. Fails at open
/// time only; mid-stream problems are logged and skipped.
#[derive(Debug)]
pub struct RecordReader {
    lines: Lines<BufReader<File>>,
    text_field: TextField,
    path: PathBuf,
    line_no: usize,
    records_seen: usize,
    next_id: u32,
}

impl RecordReader {
    /// Open an alignment file for streaming.
    ///
    /// An unreadable source (not found, permission denied) is a fatal
    /// resource error naming the path.
    pub fn open(path: impl AsRef<Path>, text_field: TextField) -> RetrievalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| RetrievalError::SourceUnreadable {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            text_field,
            path,
            line_no: 0,
            records_seen: 0,
            next_id: 0,
        })
    }

    /// Records successfully parsed so far, including those skipped for a
    /// missing text field.
    #[must_use]
    pub fn records_seen(&self) -> usize {
        self.records_seen
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for RecordReader {
    type Item = AlignmentRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    // A read error mid-file ends the stream; the usable
                    // prefix keeps its ids.
                    warn!("stopping read of '{}': {e}", self.path.display());
                    return None;
                }
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let raw: RawRecord = match serde_json::from_str(trimmed) {
                Ok(raw) => raw,
                Err(e) => {
                    let err = RetrievalError::MalformedRecord {
                        line: self.line_no,
                        reason: e.to_string(),
                    };
                    warn!("{err}");
                    continue;
                }
            };
            self.records_seen += 1;

            if self.text_field.of_raw(&raw).is_empty() {
                let err = RetrievalError::MalformedRecord {
                    line: self.line_no,
                    reason: format!("missing '{}'", self.text_field.name()),
                };
                warn!("{err}");
                continue;
            }

            let id = self.next_id;
            self.next_id += 1;
            return Some(raw.into_record(id));
        }
    }
}

impl TextField {
    fn of_raw<'a>(&self, raw: &'a RawRecord) -> &'a str {
        match self {
            Self::SrcText => &raw.src_text,
            Self::TgtText => &raw.tgt_text,
        }
    }
}

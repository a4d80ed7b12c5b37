//! Per-vector metadata, stored in vector-id order.
//!
//! The store is a plain ordered sequence: line N of the persisted JSONL
//! file is the metadata of vector id N. The count invariant
//! (`store.len() == index.len()`) is enforced by persistence on load.

use crate::error::{RetrievalError, RetrievalResult};
use crate::types::{AlignmentRecord, VectorId};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Ordered metadata records, keyed by vector id.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    records: Vec<AlignmentRecord>,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_records(records: Vec<AlignmentRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: AlignmentRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn get(&self, id: VectorId) -> Option<&AlignmentRecord> {
        self.records.get(id.as_usize())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlignmentRecord> {
        self.records.iter()
    }

    /// Write one JSON object per line, in vector-id order.
    pub fn write_jsonl(&self, path: &Path) -> RetrievalResult<()> {
        let file = File::create(path).map_err(|source| RetrievalError::ArtifactWrite {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            let line = serde_json::to_string(record).map_err(|e| RetrievalError::Corrupted {
                reason: format!("failed to serialize metadata record {}: {e}", record.id),
            })?;
            writeln!(writer, "{line}").map_err(|source| RetrievalError::ArtifactWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
        writer.flush().map_err(|source| RetrievalError::ArtifactWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Read a store back from a JSONL artifact.
    ///
    /// Unlike the input loader this is strict: we wrote this file, so any
    /// malformed line means the artifact is corrupted.
    pub fn read_jsonl(path: &Path) -> RetrievalResult<Self> {
        let file = File::open(path).map_err(|_| RetrievalError::ArtifactMissing {
            path: path.to_path_buf(),
        })?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| RetrievalError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AlignmentRecord =
                serde_json::from_str(&line).map_err(|e| RetrievalError::Corrupted {
                    reason: format!(
                        "malformed metadata at line {} of '{}': {e}",
                        i + 1,
                        path.display()
                    ),
                })?;
            records.push(record);
        }

        Ok(Self { records })
    }
}

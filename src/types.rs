//! Core types shared across the retrieval system.

use crate::config::IndexKind;
use serde::{Deserialize, Serialize};

/// Dense, 0-based identifier for one embedded record within an index.
///
/// Assigned by insertion order: the N-th kept record gets id N. Ids are
/// never reassigned, so a vector id is also the line number of the matching
/// record in the persisted metadata file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VectorId(u32);

impl VectorId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bilingual aligned text-pair unit plus provenance metadata.
///
/// Records are read-only inputs produced by the upstream alignment step.
/// Absent optional fields default to empty strings/sequences rather than
/// null so they never propagate into scoring logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    /// Vector id of this record, assigned at load time over kept records.
    pub id: u32,

    #[serde(default)]
    pub src_text: String,

    #[serde(default)]
    pub tgt_text: String,

    /// Corpus segment label, e.g. a chapter or file name.
    #[serde(default)]
    pub part: String,

    /// Source line positions this unit was aligned from.
    #[serde(default)]
    pub src_indices: Vec<i64>,

    #[serde(default)]
    pub tgt_indices: Vec<i64>,

    /// Derived label `"{len(src_indices)}-{len(tgt_indices)}"`.
    #[serde(default)]
    pub alignment_type: String,

    /// Page/metadata objects copied verbatim from the source line records.
    #[serde(default)]
    pub src_chunks: Vec<serde_json::Value>,

    #[serde(default)]
    pub tgt_chunks: Vec<serde_json::Value>,
}

/// One ranked query result: vector id, score, and the full metadata record.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    pub id: VectorId,
    /// Similarity by the index's native metric (inner product, or negative
    /// L2 distance). Higher always means more similar. After reranking this
    /// is the scorer's output.
    pub score: f32,
    pub record: AlignmentRecord,
}

/// Summary of one index build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildStats {
    /// Records parsed from the input file, including skipped ones.
    pub records_seen: usize,
    /// Records that received a vector id.
    pub records_indexed: usize,
    pub dimension: usize,
    pub index_kind: IndexKind,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_ordering() {
        let a = VectorId::new(0);
        let b = VectorId::new(42);
        assert!(a < b);
        assert_eq!(b.get(), 42);
        assert_eq!(b.as_usize(), 42);
        assert_eq!(format!("{b}"), "42");
    }

    #[test]
    fn test_record_defaults_on_missing_fields() {
        let record: AlignmentRecord =
            serde_json::from_str(r#"{"id": 0, "src_text": "hello"}"#).unwrap();
        assert_eq!(record.src_text, "hello");
        assert_eq!(record.tgt_text, "");
        assert!(record.src_indices.is_empty());
        assert!(record.src_chunks.is_empty());
    }
}

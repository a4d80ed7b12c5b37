//! End-to-end pipeline tests: load records, build an index, persist it,
//! reload it, and query it with a deterministic embedder.

use alignsearch::builder::IndexBuilder;
use alignsearch::config::{IndexConfig, IndexKind, IndexManifest, RetrievalConfig, TextField};
use alignsearch::embedding::Embedder;
use alignsearch::error::RetrievalResult;
use alignsearch::loader::RecordReader;
use alignsearch::persistence;
use alignsearch::query::{QueryEngine, QueryOptions};
use alignsearch::types::VectorId;
use std::collections::HashMap;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// Embedder with a fixed text-to-vector table. Unknown texts map to a
/// zero vector so they never rank above a known one.
struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(dimension: usize, entries: &[(&str, &[f32])]) -> Self {
        let table = entries
            .iter()
            .map(|(text, vector)| (text.to_string(), vector.to_vec()))
            .collect();
        Self { dimension, table }
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimension])
            })
            .collect())
    }

    fn id(&self) -> &str {
        "table"
    }
}

fn write_jsonl(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn quiet_config() -> IndexConfig {
    IndexConfig {
        show_progress: false,
        batch_size: 2,
        ..IndexConfig::default()
    }
}

/// Four records on three axes. With normalization, the query vector
/// [1, 0, 0] must return record 0 exactly (score 1.0) and record 3 next
/// at 0.9 / sqrt(0.82).
fn axis_embedder() -> TableEmbedder {
    TableEmbedder::new(
        3,
        &[
            ("east gate", &[1.0, 0.0, 0.0]),
            ("north tower", &[0.0, 1.0, 0.0]),
            ("upper hall", &[0.0, 0.0, 1.0]),
            ("east wall", &[0.9, 0.1, 0.0]),
        ],
    )
}

fn axis_corpus() -> NamedTempFile {
    write_jsonl(&[
        r#"{"src_text": "east gate", "tgt_text": "porta orientale", "part": "p1"}"#,
        r#"{"src_text": "north tower", "tgt_text": "torre nord", "part": "p1"}"#,
        r#"{"src_text": "upper hall", "tgt_text": "sala superiore", "part": "p2"}"#,
        r#"{"src_text": "east wall", "tgt_text": "muro orientale", "part": "p2"}"#,
    ])
}

fn build_axis_index(
    config: &IndexConfig,
) -> (
    alignsearch::index::VectorIndex,
    alignsearch::metadata::MetadataStore,
    IndexManifest,
) {
    let file = axis_corpus();
    let embedder = axis_embedder();
    let builder = IndexBuilder::new(config, &embedder).unwrap();
    let reader = RecordReader::open(file.path(), config.text_field).unwrap();
    let (index, metadata, stats) = builder.build(reader).unwrap();
    let manifest = IndexManifest::new(config, stats.dimension, stats.records_indexed);
    (index, metadata, manifest)
}

#[test]
fn query_ranks_exact_match_then_near_neighbor() {
    let config = quiet_config();
    let (index, metadata, manifest) = build_axis_index(&config);
    let engine = QueryEngine::from_parts(
        index,
        metadata,
        manifest,
        RetrievalConfig::default(),
        Box::new(axis_embedder()),
    );

    let results = engine.query("east gate", Some(2)).unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].id, VectorId::new(0));
    assert!((results[0].score - 1.0).abs() < 1e-3);
    assert_eq!(results[0].record.tgt_text, "porta orientale");

    assert_eq!(results[1].id, VectorId::new(3));
    let expected = 0.9 / 0.82f32.sqrt();
    assert!((results[1].score - expected).abs() < 1e-3);
}

#[test]
fn persisted_index_answers_identically_after_reload() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("indices");
    let config = quiet_config();
    let (index, metadata, manifest) = build_axis_index(&config);

    let before = QueryEngine::from_parts(
        index,
        metadata,
        manifest.clone(),
        RetrievalConfig::default(),
        Box::new(axis_embedder()),
    )
    .query("east gate", Some(4))
    .unwrap();

    let (index, metadata, manifest) = build_axis_index(&config);
    persistence::save(&index, &metadata, &manifest, &dir).unwrap();

    let (index, metadata, manifest) = persistence::load(&dir).unwrap();
    let after = QueryEngine::from_parts(
        index,
        metadata,
        manifest,
        RetrievalConfig::default(),
        Box::new(axis_embedder()),
    )
    .query("east gate", Some(4))
    .unwrap();

    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.id, a.id);
        assert!((b.score - a.score).abs() < 1e-6);
        assert_eq!(b.record, a.record);
    }
}

#[test]
fn missing_manifest_is_reported_by_file_name() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("indices");
    let config = quiet_config();
    let (index, metadata, manifest) = build_axis_index(&config);
    persistence::save(&index, &metadata, &manifest, &dir).unwrap();
    std::fs::remove_file(dir.join("index_config.json")).unwrap();

    let err = QueryEngine::open(&dir).unwrap_err();
    assert_eq!(err.category(), "RESOURCE");
    assert!(err.to_string().contains("index_config.json"));
}

#[test]
fn opening_a_nonexistent_directory_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    let err = QueryEngine::open(&temp.path().join("nope")).unwrap_err();
    assert_eq!(err.category(), "RESOURCE");
}

#[test]
fn threshold_and_part_filter_compose() {
    let config = quiet_config();
    let (index, metadata, manifest) = build_axis_index(&config);
    let engine = QueryEngine::from_parts(
        index,
        metadata,
        manifest,
        RetrievalConfig::default(),
        Box::new(axis_embedder()),
    );

    // Threshold 0.5 keeps only the two east-facing records.
    let options = QueryOptions {
        threshold: Some(0.5),
        ..QueryOptions::default()
    };
    let results = engine.query_with("east gate", Some(10), &options).unwrap();
    assert_eq!(results.len(), 2);

    // Adding the part filter narrows it to the p2 record.
    let filter = |r: &alignsearch::AlignmentRecord| r.part == "p2";
    let options = QueryOptions {
        threshold: Some(0.5),
        filter: Some(&filter),
        ..QueryOptions::default()
    };
    let results = engine.query_with("east gate", Some(10), &options).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, VectorId::new(3));
}

#[test]
fn skipped_input_lines_do_not_shift_vector_ids() {
    let file = write_jsonl(&[
        r#"{"src_text": "east gate", "tgt_text": "porta orientale"}"#,
        "this line is not JSON",
        r#"{"tgt_text": "senza sorgente"}"#,
        r#"{"src_text": "north tower", "tgt_text": "torre nord"}"#,
    ]);
    let config = quiet_config();
    let embedder = axis_embedder();
    let builder = IndexBuilder::new(&config, &embedder).unwrap();
    let reader = RecordReader::open(file.path(), TextField::SrcText).unwrap();
    let (index, metadata, stats) = builder.build(reader).unwrap();

    assert_eq!(stats.records_seen, 3);
    assert_eq!(stats.records_indexed, 2);
    assert_eq!(index.len(), metadata.len());
    assert_eq!(metadata.get(VectorId::new(0)).unwrap().src_text, "east gate");
    assert_eq!(
        metadata.get(VectorId::new(1)).unwrap().src_text,
        "north tower"
    );
}

#[test]
fn partitioned_index_round_trips_through_disk() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("indices");

    let lines: Vec<String> = (0..24)
        .map(|i| format!(r#"{{"src_text": "unit {i}", "tgt_text": "unita {i}"}}"#))
        .collect();
    let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let file = write_jsonl(&line_refs);

    // Spread the fixture vectors around a ring so clustering has structure.
    let vectors: Vec<Vec<f32>> = (0..24)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / 24.0;
            vec![angle.cos(), angle.sin(), 0.25]
        })
        .collect();
    let entries: Vec<(String, &[f32])> = (0..24)
        .map(|i| (format!("unit {i}"), vectors[i].as_slice()))
        .collect();
    let entry_refs: Vec<(&str, &[f32])> = entries
        .iter()
        .map(|(text, vector)| (text.as_str(), *vector))
        .collect();
    let embedder = TableEmbedder::new(3, &entry_refs);

    let config = IndexConfig {
        index_kind: IndexKind::IvfFlat,
        nlist: 4,
        nprobe: 4,
        ..quiet_config()
    };
    let builder = IndexBuilder::new(&config, &embedder).unwrap();
    let reader = RecordReader::open(file.path(), config.text_field).unwrap();
    let (index, metadata, stats) = builder.build(reader).unwrap();
    assert_eq!(stats.records_indexed, 24);

    let manifest = IndexManifest::new(&config, stats.dimension, stats.records_indexed);
    persistence::save(&index, &metadata, &manifest, &dir).unwrap();

    let (index, metadata, manifest) = persistence::load(&dir).unwrap();
    assert_eq!(manifest.nlist, Some(4));
    let engine = QueryEngine::from_parts(
        index,
        metadata,
        manifest,
        RetrievalConfig::default(),
        Box::new(TableEmbedder::new(3, &entry_refs)),
    );

    // nprobe == nlist makes the probe exhaustive, so each record is its
    // own best match.
    for i in [0, 7, 23] {
        let results = engine.query(&format!("unit {i}"), Some(1)).unwrap();
        assert_eq!(results[0].id, VectorId::new(i));
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }
}

//! CLI entry point for the alignment retrieval system.
//!
//! Provides commands for building an index from an alignment JSONL file,
//! querying an existing index, and inspecting index metadata.

use alignsearch::builder::IndexBuilder;
use alignsearch::config::{Device, IndexConfig, IndexKind, IndexManifest, RetrievalConfig, TextField};
use alignsearch::embedding::FastEmbedEmbedder;
use alignsearch::loader::RecordReader;
use alignsearch::persistence;
use alignsearch::query::{QueryEngine, QueryOptions};
use alignsearch::types::AlignmentRecord;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(
    name = "alignsearch",
    version,
    about = "Semantic search over bilingual alignment records",
    styles = clap_cargo_style()
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a vector index from an alignment JSONL file
    Build {
        /// Path to the alignment records (one JSON object per line)
        input_file: PathBuf,

        /// Directory to write the index artifacts into
        #[arg(short, long, default_value = "data/indices")]
        output_dir: PathBuf,

        /// Which side of each record to embed
        #[arg(long, value_enum, default_value = "src-text")]
        text_field: TextField,

        /// Embedding model name
        #[arg(long, default_value = alignsearch::config::DEFAULT_MODEL)]
        model: String,

        /// Device hint for the embedding model
        #[arg(long, value_enum, default_value = "accelerator")]
        device: Device,

        /// Texts embedded per model call
        #[arg(long, default_value_t = 32)]
        batch_size: usize,

        /// Index construction strategy
        #[arg(long, value_enum, default_value = "flat-ip")]
        index_type: IndexKind,

        /// Cluster count for the partitioned index
        #[arg(long, default_value_t = 100)]
        nlist: usize,

        /// Clusters probed per search for the partitioned index
        #[arg(long, default_value_t = 10)]
        nprobe: usize,

        /// Skip L2 normalization of embeddings
        #[arg(long)]
        no_normalize: bool,

        /// Suppress the embedding progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Query an existing index
    Query {
        /// Index directory produced by `build`
        index_dir: PathBuf,

        /// Query text
        text: String,

        /// Number of results to return
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,

        /// Minimum similarity score to keep
        #[arg(long)]
        threshold: Option<f32>,

        /// Only return records from this corpus part
        #[arg(long)]
        part: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show metadata about an existing index
    Info {
        /// Index directory produced by `build`
        index_dir: PathBuf,

        /// Print the manifest as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct QueryHit<'a> {
    rank: usize,
    id: u32,
    score: f32,
    src_text: &'a str,
    tgt_text: &'a str,
    part: &'a str,
    alignment_type: &'a str,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error [{}]: {e}", e.category());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> alignsearch::RetrievalResult<()> {
    match cli.command {
        Commands::Build {
            input_file,
            output_dir,
            text_field,
            model,
            device,
            batch_size,
            index_type,
            nlist,
            nprobe,
            no_normalize,
            no_progress,
        } => {
            let config = IndexConfig {
                model,
                device,
                batch_size,
                normalize_embeddings: !no_normalize,
                index_kind: index_type,
                nlist,
                nprobe,
                text_field,
                output_dir,
                show_progress: !no_progress,
            };

            let start = Instant::now();
            let embedder =
                FastEmbedEmbedder::with_options(&config.model, config.device, config.show_progress)?;
            let builder = IndexBuilder::new(&config, &embedder)?;
            let reader = RecordReader::open(&input_file, config.text_field)?;
            let (index, metadata, stats) = builder.build(reader)?;

            let manifest = IndexManifest::new(&config, stats.dimension, stats.records_indexed);
            persistence::save(&index, &metadata, &manifest, &config.output_dir)?;

            println!(
                "Indexed {} of {} records in {:.1}s",
                stats.records_indexed,
                stats.records_seen,
                start.elapsed().as_secs_f64()
            );
            println!(
                "  model: {}  type: {}  dimension: {}",
                stats.model, stats.index_kind, stats.dimension
            );
            println!("  output: {}", config.output_dir.display());
            Ok(())
        }

        Commands::Query {
            index_dir,
            text,
            top_k,
            threshold,
            part,
            json,
        } => {
            let engine = QueryEngine::open_with_config(&index_dir, RetrievalConfig::default())?;

            let part_filter = part.map(|wanted| {
                move |record: &AlignmentRecord| record.part == wanted
            });
            let options = QueryOptions {
                threshold,
                filter: part_filter
                    .as_ref()
                    .map(|f| f as &(dyn Fn(&AlignmentRecord) -> bool + Sync)),
                scorer: None,
            };
            let results = engine.query_with(&text, Some(top_k), &options)?;

            if json {
                let hits: Vec<QueryHit> = results
                    .iter()
                    .enumerate()
                    .map(|(i, r)| QueryHit {
                        rank: i + 1,
                        id: r.id.get(),
                        score: r.score,
                        src_text: &r.record.src_text,
                        tgt_text: &r.record.tgt_text,
                        part: &r.record.part,
                        alignment_type: &r.record.alignment_type,
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&hits).unwrap_or_else(|_| "[]".to_string())
                );
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!(
                        "{:2}. [{:.4}] #{} ({})",
                        i + 1,
                        result.score,
                        result.id,
                        result.record.part
                    );
                    println!("    src: {}", result.record.src_text);
                    println!("    tgt: {}", result.record.tgt_text);
                }
            }
            Ok(())
        }

        Commands::Info { index_dir, json } => {
            let manifest = persistence::load_manifest(&index_dir)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&manifest)
                        .unwrap_or_else(|_| "{}".to_string())
                );
            } else {
                println!("Index: {}", index_dir.display());
                println!("  model: {}", manifest.model_name);
                println!("  type: {}", manifest.index_type);
                println!("  vectors: {}", manifest.num_vectors);
                println!("  dimension: {}", manifest.embedding_dim);
                println!("  normalized: {}", manifest.normalize_embeddings);
                println!("  text field: {}", manifest.text_field.name());
                if let (Some(nlist), Some(nprobe)) = (manifest.nlist, manifest.nprobe) {
                    println!("  nlist: {nlist}  nprobe: {nprobe}");
                }
            }
            Ok(())
        }
    }
}

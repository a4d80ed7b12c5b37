//! On-disk index persistence.
//!
//! One index directory holds three artifacts that are only ever written
//! and loaded together: the binary vector index, the JSONL metadata, and
//! the JSON manifest. A save stages everything in a temporary sibling
//! directory and publishes it with a rename, so readers of the old copy
//! never observe a half-written directory.

use crate::config::IndexManifest;
use crate::error::{RetrievalError, RetrievalResult};
use crate::index::VectorIndex;
use crate::metadata::MetadataStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Binary vector index artifact.
pub const INDEX_FILE: &str = "embeddings.idx";
/// Line-delimited metadata artifact; line N is vector id N.
pub const METADATA_FILE: &str = "metadata.jsonl";
/// JSON manifest with the build parameters queries must reuse.
pub const CONFIG_FILE: &str = "index_config.json";

/// Version of the binary index encoding.
const INDEX_FORMAT_VERSION: u32 = 1;

/// Write all three artifacts into `dir`, atomically replacing any previous
/// index at that path.
pub fn save(
    index: &VectorIndex,
    metadata: &MetadataStore,
    manifest: &IndexManifest,
    dir: &Path,
) -> RetrievalResult<()> {
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|source| RetrievalError::ArtifactWrite {
        path: parent.clone(),
        source,
    })?;

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let stage = parent.join(format!(".{}.tmp.{}", name, std::process::id()));

    let result = write_stage(index, metadata, manifest, &stage)
        .and_then(|()| publish(&stage, dir, &parent, &name));
    if result.is_err() {
        let _ = fs::remove_dir_all(&stage);
    }
    result?;

    info!("index saved to '{}'", dir.display());
    Ok(())
}

fn write_stage(
    index: &VectorIndex,
    metadata: &MetadataStore,
    manifest: &IndexManifest,
    stage: &Path,
) -> RetrievalResult<()> {
    if stage.exists() {
        fs::remove_dir_all(stage).map_err(|source| RetrievalError::ArtifactWrite {
            path: stage.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(stage).map_err(|source| RetrievalError::ArtifactWrite {
        path: stage.to_path_buf(),
        source,
    })?;

    let index_path = stage.join(INDEX_FILE);
    let mut bytes = bincode::encode_to_vec(INDEX_FORMAT_VERSION, bincode::config::standard())
        .map_err(|e| RetrievalError::Corrupted {
            reason: format!("failed to encode index header: {e}"),
        })?;
    bytes.extend(
        bincode::encode_to_vec(index, bincode::config::standard()).map_err(|e| {
            RetrievalError::Corrupted {
                reason: format!("failed to encode index: {e}"),
            }
        })?,
    );
    fs::write(&index_path, bytes).map_err(|source| RetrievalError::ArtifactWrite {
        path: index_path,
        source,
    })?;

    metadata.write_jsonl(&stage.join(METADATA_FILE))?;

    let config_path = stage.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(manifest).map_err(|e| RetrievalError::Corrupted {
        reason: format!("failed to serialize manifest: {e}"),
    })?;
    fs::write(&config_path, json).map_err(|source| RetrievalError::ArtifactWrite {
        path: config_path,
        source,
    })?;

    Ok(())
}

/// Swap the staged directory into place. The previous index (if any) is
/// moved aside first so a concurrent reader keeps a consistent view.
fn publish(stage: &Path, dir: &Path, parent: &Path, name: &str) -> RetrievalResult<()> {
    if dir.exists() {
        let backup = parent.join(format!(".{}.old.{}", name, std::process::id()));
        if backup.exists() {
            let _ = fs::remove_dir_all(&backup);
        }
        fs::rename(dir, &backup).map_err(|source| RetrievalError::ArtifactWrite {
            path: dir.to_path_buf(),
            source,
        })?;
        fs::rename(stage, dir).map_err(|source| RetrievalError::ArtifactWrite {
            path: dir.to_path_buf(),
            source,
        })?;
        let _ = fs::remove_dir_all(&backup);
    } else {
        fs::rename(stage, dir).map_err(|source| RetrievalError::ArtifactWrite {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Load the three artifacts back as a consistent unit.
///
/// Any missing artifact is a fatal error naming that file. A metadata
/// count that disagrees with the index is corruption, never repaired.
/// The embedding model is not touched here; it is lazily instantiated on
/// first query.
pub fn load(dir: &Path) -> RetrievalResult<(VectorIndex, MetadataStore, IndexManifest)> {
    for file in [INDEX_FILE, METADATA_FILE, CONFIG_FILE] {
        let path = dir.join(file);
        if !path.exists() {
            return Err(RetrievalError::ArtifactMissing { path });
        }
    }

    let manifest = load_manifest(dir)?;

    let index_path = dir.join(INDEX_FILE);
    let bytes = fs::read(&index_path).map_err(|source| RetrievalError::SourceUnreadable {
        path: index_path.clone(),
        source,
    })?;
    let (version, header_len): (u32, usize) =
        bincode::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| {
            RetrievalError::Corrupted {
                reason: format!("unreadable index header in '{}': {e}", index_path.display()),
            }
        })?;
    if version != INDEX_FORMAT_VERSION {
        return Err(RetrievalError::VersionMismatch {
            expected: INDEX_FORMAT_VERSION,
            actual: version,
        });
    }
    let (index, _): (VectorIndex, usize) =
        bincode::decode_from_slice(&bytes[header_len..], bincode::config::standard()).map_err(
            |e| RetrievalError::Corrupted {
                reason: format!("unreadable index data in '{}': {e}", index_path.display()),
            },
        )?;

    let metadata = MetadataStore::read_jsonl(&dir.join(METADATA_FILE))?;

    if index.len() != metadata.len() {
        return Err(RetrievalError::Corrupted {
            reason: format!(
                "metadata has {} records but the index holds {} vectors",
                metadata.len(),
                index.len()
            ),
        });
    }
    if manifest.num_vectors != index.len() {
        return Err(RetrievalError::Corrupted {
            reason: format!(
                "manifest claims {} vectors but the index holds {}",
                manifest.num_vectors,
                index.len()
            ),
        });
    }

    info!(
        "index loaded from '{}': {} vectors, dimension {}",
        dir.display(),
        index.len(),
        index.dimension()
    );
    Ok((index, metadata, manifest))
}

/// Read only the manifest, e.g. for index inspection without paying the
/// model load cost.
pub fn load_manifest(dir: &Path) -> RetrievalResult<IndexManifest> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Err(RetrievalError::ArtifactMissing { path });
    }
    let json = fs::read_to_string(&path).map_err(|source| RetrievalError::SourceUnreadable {
        path: path.clone(),
        source,
    })?;
    let manifest: IndexManifest =
        serde_json::from_str(&json).map_err(|e| RetrievalError::Corrupted {
            reason: format!("malformed manifest '{}': {e}", path.display()),
        })?;
    if manifest.version > IndexManifest::CURRENT_VERSION {
        return Err(RetrievalError::VersionMismatch {
            expected: IndexManifest::CURRENT_VERSION,
            actual: manifest.version,
        });
    }
    Ok(manifest)
}

//! In-memory vector index and its on-disk format.
//!
//! An index directory holds three files:
//!
//! | File | Content |
//! |------|---------|
//! | `manifest.json` | [`IndexManifest`]: format version, model, dims, count, checksum |
//! | `records.json` | the [`DocumentRecord`]s, in vector order |
//! | `vectors.bin` | every vector as little-endian `f32`, concatenated |
//!
//! Vectors round-trip bit for bit. Loading verifies the checksum, the
//! record/vector counts, and that the index was produced by the same
//! embedding model and dimensionality the caller is querying with.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::DocumentRecord;

pub const INDEX_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const RECORDS_FILE: &str = "records.json";
const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub model: String,
    pub dims: usize,
    pub count: usize,
    pub created_at: DateTime<Utc>,
    pub vectors_sha256: String,
}

/// Exact nearest-neighbour index over one tenant's records.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    records: Vec<DocumentRecord>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Pair records with their vectors.
    ///
    /// Every vector must have `dims` components and there must be exactly
    /// one vector per record.
    pub fn new(
        model: impl Into<String>,
        dims: usize,
        records: Vec<DocumentRecord>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if records.len() != vectors.len() {
            return Err(RagError::embedding(format!(
                "{} records but {} vectors",
                records.len(),
                vectors.len()
            )));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RagError::embedding(format!(
                "vector has {} dimensions, index expects {}",
                v.len(),
                dims
            )));
        }
        Ok(Self {
            model: model.into(),
            dims,
            created_at: Utc::now(),
            records,
            vectors,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records paired with their vectors, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&DocumentRecord, &[f32])> {
        self.records
            .iter()
            .zip(self.vectors.iter().map(|v| v.as_slice()))
    }

    fn vectors_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.vectors.len() * self.dims * 4);
        for v in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(v));
        }
        blob
    }

    /// Write the index into `dir`, creating it. Files are synced before
    /// returning so a subsequent rename publishes complete data.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| RagError::io("creating index directory", e))?;

        let blob = self.vectors_blob();
        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            count: self.records.len(),
            created_at: self.created_at,
            vectors_sha256: sha256_hex(&blob),
        };

        write_synced(&dir.join(VECTORS_FILE), |w| w.write_all(&blob))?;
        write_synced(&dir.join(RECORDS_FILE), |w| {
            serde_json::to_writer(w, &self.records).map_err(std::io::Error::other)
        })?;
        write_synced(&dir.join(MANIFEST_FILE), |w| {
            serde_json::to_writer_pretty(w, &manifest).map_err(std::io::Error::other)
        })?;
        Ok(())
    }

    /// Read an index from `dir`.
    ///
    /// `tenant` is only used in error messages. Fails with
    /// [`RagError::CorruptIndex`] if any file is missing or unreadable, the
    /// checksum does not match, or the index was built with a different
    /// model or dimensionality than `expected_model`/`expected_dims`.
    pub fn load(
        dir: &Path,
        tenant: &str,
        expected_model: &str,
        expected_dims: usize,
    ) -> Result<Self> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            RagError::corrupt(tenant, format!("{}: {}", what, e))
        };

        let manifest: IndexManifest = File::open(dir.join(MANIFEST_FILE))
            .map_err(|e| corrupt("opening manifest", &e))
            .and_then(|f| {
                serde_json::from_reader(BufReader::new(f)).map_err(|e| corrupt("parsing manifest", &e))
            })?;

        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::corrupt(
                tenant,
                format!("unsupported index format version {}", manifest.format_version),
            ));
        }
        if manifest.dims != expected_dims {
            return Err(RagError::corrupt(
                tenant,
                format!(
                    "index was built with {}-dimensional embeddings, provider produces {}",
                    manifest.dims, expected_dims
                ),
            ));
        }
        if manifest.model != expected_model {
            return Err(RagError::corrupt(
                tenant,
                format!(
                    "index was built with model '{}', provider uses '{}'",
                    manifest.model, expected_model
                ),
            ));
        }

        let blob = fs::read(dir.join(VECTORS_FILE)).map_err(|e| corrupt("reading vectors", &e))?;
        if sha256_hex(&blob) != manifest.vectors_sha256 {
            return Err(RagError::corrupt(tenant, "vector checksum mismatch"));
        }
        if blob.len() != manifest.count * manifest.dims * 4 {
            return Err(RagError::corrupt(
                tenant,
                format!(
                    "vectors.bin holds {} bytes, expected {}",
                    blob.len(),
                    manifest.count * manifest.dims * 4
                ),
            ));
        }

        let records: Vec<DocumentRecord> = File::open(dir.join(RECORDS_FILE))
            .map_err(|e| corrupt("opening records", &e))
            .and_then(|f| {
                serde_json::from_reader(BufReader::new(f)).map_err(|e| corrupt("parsing records", &e))
            })?;
        if records.len() != manifest.count {
            return Err(RagError::corrupt(
                tenant,
                format!(
                    "manifest lists {} records, found {}",
                    manifest.count,
                    records.len()
                ),
            ));
        }

        let vectors = if manifest.dims == 0 {
            Vec::new()
        } else {
            blob.chunks_exact(manifest.dims * 4).map(blob_to_vec).collect()
        };

        Ok(Self {
            model: manifest.model,
            dims: manifest.dims,
            created_at: manifest.created_at,
            records,
            vectors,
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_synced(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<()> {
    let context = format!("writing {}", path.display());
    let file = File::create(path).map_err(|e| RagError::io(&context, e))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer).map_err(|e| RagError::io(&context, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| RagError::io(&context, e.into_error()))?;
    file.sync_all().map_err(|e| RagError::io(&context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordOrigin;
    use tempfile::TempDir;

    fn record(text: &str, row: usize) -> DocumentRecord {
        DocumentRecord::new(
            text,
            RecordOrigin {
                source: "t.csv".into(),
                sheet: None,
                row,
            },
        )
    }

    fn sample() -> VectorIndex {
        VectorIndex::new(
            "m",
            3,
            vec![record("one", 2), record("two", 3)],
            vec![vec![0.1, -0.2, 0.3], vec![f32::MIN_POSITIVE, 1e-30, -7.5]],
        )
        .unwrap()
    }

    #[test]
    fn save_then_load_is_bit_exact() {
        let tmp = TempDir::new().unwrap();
        let index = sample();
        index.save(tmp.path()).unwrap();

        let loaded = VectorIndex::load(tmp.path(), "t", "m", 3).unwrap();
        assert_eq!(loaded.len(), 2);
        for ((r1, v1), (r2, v2)) in index.entries().zip(loaded.entries()) {
            assert_eq!(r1, r2);
            let bits1: Vec<u32> = v1.iter().map(|f| f.to_bits()).collect();
            let bits2: Vec<u32> = v2.iter().map(|f| f.to_bits()).collect();
            assert_eq!(bits1, bits2);
        }
    }

    #[test]
    fn dimension_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        let err = VectorIndex::load(tmp.path(), "t", "m", 4).unwrap_err();
        assert_eq!(err.kind(), "corrupt_index");
        assert!(err.to_string().contains("3-dimensional"));
    }

    #[test]
    fn model_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        let err = VectorIndex::load(tmp.path(), "t", "other", 3).unwrap_err();
        assert_eq!(err.kind(), "corrupt_index");
    }

    #[test]
    fn tampered_vectors_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        fs::write(tmp.path().join(VECTORS_FILE), [0u8; 24]).unwrap();
        let err = VectorIndex::load(tmp.path(), "t", "m", 3).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn missing_records_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        sample().save(tmp.path()).unwrap();
        fs::remove_file(tmp.path().join(RECORDS_FILE)).unwrap();
        let err = VectorIndex::load(tmp.path(), "t", "m", 3).unwrap_err();
        assert_eq!(err.kind(), "corrupt_index");
    }

    #[test]
    fn empty_index_round_trips() {
        let tmp = TempDir::new().unwrap();
        VectorIndex::new("m", 3, Vec::new(), Vec::new())
            .unwrap()
            .save(tmp.path())
            .unwrap();
        let loaded = VectorIndex::load(tmp.path(), "t", "m", 3).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn new_rejects_mismatched_lengths() {
        assert!(VectorIndex::new("m", 2, vec![record("a", 2)], Vec::new()).is_err());
        assert!(VectorIndex::new("m", 2, vec![record("a", 2)], vec![vec![1.0]]).is_err());
    }
}

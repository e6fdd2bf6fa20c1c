//! Flat vector index over the chunks of one query's pages.
//!
//! The whole index is serialized to a single JSON file. It is rebuilt from
//! scratch for every answered query, so the file only ever holds the corpus
//! of the most recent one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::splitter::TextChunk;
use crate::core::errors::RagError;
use crate::vector_math;

/// A stored chunk with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Hex SHA-256 of source, chunk index and content.
    pub chunk_id: String,
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
}

impl StoredChunk {
    pub fn from_text_chunk(chunk: TextChunk) -> Self {
        let chunk_id = chunk_digest(&chunk);
        Self {
            chunk_id,
            content: chunk.text,
            source: chunk.source,
            chunk_index: chunk.chunk_index,
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Similarity score (higher = better).
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk: StoredChunk,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    embedding_model: String,
    dimension: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn build(
        embedding_model: &str,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, RagError> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::Internal(format!(
                "Chunk/embedding count mismatch: {} != {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = embeddings
            .iter()
            .find(|e| e.is_empty() || e.len() != dimension)
        {
            return Err(RagError::Upstream(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            )));
        }

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                chunk: StoredChunk::from_text_chunk(chunk),
                embedding,
            })
            .collect();

        Ok(Self {
            embedding_model: embedding_model.to_string(),
            dimension,
            built_at: Utc::now(),
            entries,
        })
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &StoredChunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    /// The `limit` entries closest to `query_embedding`, best first.
    pub fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, RagError> {
        if self.entries.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if query_embedding.len() != self.dimension {
            return Err(RagError::BadRequest(format!(
                "Query embedding has dimension {}, index expects {}",
                query_embedding.len(),
                self.dimension
            )));
        }

        let ranking = vector_math::rank_descending_by_cosine(
            query_embedding,
            self.entries.iter().map(|entry| entry.embedding.as_slice()),
        )?;

        Ok(ranking
            .into_iter()
            .take(limit)
            .filter_map(|(idx, score)| {
                self.entries.get(idx).map(|entry| ChunkSearchResult {
                    chunk: entry.chunk.clone(),
                    score,
                })
            })
            .collect())
    }

    /// Writes the index to `path`, replacing any previous file.
    pub fn persist(&self, path: &Path) -> Result<(), RagError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = lock_file(path)?;
        FileExt::lock_exclusive(&lock)?;

        let tmp_path = path.with_extension("json.tmp");
        let result = (|| -> Result<(), RagError> {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        let _ = FileExt::unlock(&lock);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result?;

        tracing::info!(
            "Persisted index with {} chunks to {}",
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RagError> {
        if !path.exists() {
            return Err(RagError::NotFound(format!(
                "No index at {}; run a query first",
                path.display()
            )));
        }

        let lock = lock_file(path)?;
        FileExt::lock_shared(&lock)?;
        let result = File::open(path)
            .map_err(RagError::from)
            .and_then(|file| Ok(serde_json::from_reader::<_, Self>(BufReader::new(file))?));
        let _ = FileExt::unlock(&lock);

        let index = result?;
        if index.entries.iter().any(|e| e.embedding.len() != index.dimension) {
            return Err(RagError::Internal(format!(
                "Index at {} is inconsistent",
                path.display()
            )));
        }
        Ok(index)
    }
}

fn lock_file(path: &Path) -> Result<File, RagError> {
    let lock_path: PathBuf = path.with_extension("lock");
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?)
}

fn chunk_digest(chunk: &TextChunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.chunk_index.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, source: &str, chunk_index: usize) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            source: source.to_string(),
            chunk_index,
        }
    }

    fn sample_index() -> VectorIndex {
        VectorIndex::build(
            "test-model",
            vec![
                chunk("The sky is blue and vast.", "https://sky", 0),
                chunk("The ocean is deep.", "https://ocean", 0),
                chunk("Mathematics is about numbers.", "https://math", 0),
            ],
            vec![vec![0.9, 0.1, 0.0], vec![0.5, 0.5, 0.0], vec![0.0, 0.1, 0.9]],
        )
        .expect("index should build")
    }

    #[test]
    fn search_ranks_by_cosine_and_limits() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.0, 0.0], 2).expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source, "https://sky");
        assert_eq!(hits[1].chunk.source, "https://ocean");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let index = sample_index();
        assert!(index.search(&[1.0, 0.0], 2).is_err());
    }

    #[test]
    fn build_rejects_mismatched_inputs() {
        let err = VectorIndex::build("m", vec![chunk("a", "s", 0)], Vec::new())
            .expect_err("count mismatch");
        assert!(matches!(err, RagError::Internal(_)));

        let err = VectorIndex::build(
            "m",
            vec![chunk("a", "s", 0), chunk("b", "s", 1)],
            vec![vec![1.0, 0.0], vec![1.0]],
        )
        .expect_err("dimension mismatch");
        assert!(matches!(err, RagError::Upstream(_)));
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = VectorIndex::build("m", Vec::new(), Vec::new()).expect("empty index");
        assert!(index.is_empty());
        assert!(index.search(&[1.0], 3).expect("search").is_empty());
    }

    #[test]
    fn chunk_ids_are_stable_and_distinct() {
        let a = StoredChunk::from_text_chunk(chunk("same", "https://a", 0));
        let b = StoredChunk::from_text_chunk(chunk("same", "https://a", 0));
        let c = StoredChunk::from_text_chunk(chunk("same", "https://a", 1));
        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_eq!(a.chunk_id.len(), 64);
    }

    #[test]
    fn persist_and_load_replace_previous_index() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("nested").join("index.json");

        sample_index().persist(&path).expect("persist");
        let replacement = VectorIndex::build(
            "other-model",
            vec![chunk("fresh", "https://fresh", 0)],
            vec![vec![0.0, 1.0]],
        )
        .expect("build");
        replacement.persist(&path).expect("persist again");

        let loaded = VectorIndex::load(&path).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.embedding_model(), "other-model");
        assert_eq!(loaded.dimension(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn loading_missing_index_is_not_found() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = VectorIndex::load(&tmp.path().join("index.json")).expect_err("missing");
        assert!(matches!(err, RagError::NotFound(_)));
    }
}

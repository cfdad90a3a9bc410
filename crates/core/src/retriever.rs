use crate::embeddings::EmbeddingEngine;
use crate::error::IndexError;
use crate::index::{FlatIndex, IndexHeader};
use crate::models::{MetadataRecord, RetrievalHit, SNIPPET_PLACEHOLDER};
use crate::store::read_metadata;
use std::path::Path;
use tracing::{debug, info, warn};

/// Query side of a persisted index/metadata pair.
pub struct Retriever {
    index: FlatIndex,
    header: IndexHeader,
    metadata: Vec<MetadataRecord>,
    engine: EmbeddingEngine,
}

impl Retriever {
    /// Loads both files eagerly. A missing, malformed or mismatched pair is an error.
    pub fn open(
        index_path: &Path,
        metadata_path: &Path,
        engine: EmbeddingEngine,
    ) -> Result<Self, IndexError> {
        let (index, header) = FlatIndex::load(index_path)?;
        let (metadata, metadata_sha256) = read_metadata(metadata_path)?;

        if metadata.len() < index.len() {
            return Err(IndexError::Mismatch(format!(
                "{} metadata records for {} vectors",
                metadata.len(),
                index.len()
            )));
        }

        if let Some(position) = metadata
            .iter()
            .take(index.len())
            .enumerate()
            .position(|(position, record)| record.id != position as u64)
        {
            return Err(IndexError::Mismatch(format!(
                "metadata record {position} carries id {}",
                metadata[position].id
            )));
        }

        if let Some(expected) = &header.metadata_sha256 {
            if *expected != metadata_sha256 {
                return Err(IndexError::Mismatch(format!(
                    "{} was not written with this index",
                    metadata_path.display()
                )));
            }
        }

        if header.model != engine.model_id() {
            warn!(
                index_model = %header.model,
                query_model = engine.model_id(),
                "query embedder differs from the one used at build time"
            );
        }
        if !index.is_empty() && header.dimensions != engine.dimensions() {
            warn!(
                index_dimensions = header.dimensions,
                query_dimensions = engine.dimensions(),
                "embedding dimensions differ, queries will fail"
            );
        }

        info!(
            index = %index_path.display(),
            vectors = index.len(),
            build_id = %header.build_id,
            "index loaded"
        );

        Ok(Self {
            index,
            header,
            metadata,
            engine,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Top `k` hits for `query`, best first.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        if self.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.engine.encode_one(query)?;
        let hits = self.index.search(&vector, k)?;
        debug!(k, returned = hits.len(), "searched index");

        Ok(hits
            .into_iter()
            .filter_map(|(position, score)| {
                self.metadata.get(position).map(|meta| RetrievalHit {
                    score,
                    meta: meta.clone(),
                    text_snippet: SNIPPET_PLACEHOLDER.to_string(),
                })
            })
            .collect())
    }
}

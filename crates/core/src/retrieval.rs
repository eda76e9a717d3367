use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::models::{RetrievalOptions, RetrievedChunk};
use crate::traits::KnowledgeStore;
use tracing::debug;

pub struct Retriever<S, E>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
{
    store: S,
    embedder: E,
    options: RetrievalOptions,
}

impl<S, E> Retriever<S, E>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
{
    pub fn new(store: S, embedder: E, options: RetrievalOptions) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Chunks closest to `query`, nearest first.
    ///
    /// When nothing falls under the primary threshold the store is asked
    /// again without one, so a populated knowledge base never answers empty.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(RagError::Input("query is empty".to_string()));
        }
        if limit == 0 {
            return Err(RagError::Input("limit must be greater than zero".to_string()));
        }

        let query_vector = self.embedder.embed(query).await?;

        let mut hits = self
            .store
            .nearest_neighbors(&query_vector, Some(self.options.primary_max_distance), limit)
            .await?;

        if hits.is_empty() {
            debug!(
                threshold = self.options.primary_max_distance,
                "no chunk under the primary threshold, retrying unthresholded"
            );
            hits = self
                .store
                .nearest_neighbors(&query_vector, None, limit)
                .await?;
        }

        let mut hits = apply_quality_cutoff(hits, self.options.quality_max_distance);
        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(limit);

        debug!(returned = hits.len(), limit, "retrieval finished");
        Ok(hits)
    }
}

/// Keeps rows strictly under `max_distance`, unless that would keep none.
fn apply_quality_cutoff(hits: Vec<RetrievedChunk>, max_distance: f64) -> Vec<RetrievedChunk> {
    if hits.iter().any(|hit| hit.distance < max_distance) {
        hits.into_iter()
            .filter(|hit| hit.distance < max_distance)
            .collect()
    } else {
        hits
    }
}

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, warn};

use crate::docs::types::DocumentChunk;
use crate::index::{SearchMode, VectorIndex};

/// One retrieval pass against the index. The declared default list replaces
/// what used to be four near-identical retriever code paths.
#[derive(Debug, Clone, Copy)]
pub enum RetrievalStrategy {
    /// Diversity-maximizing MMR selection.
    Diversity { k: usize, fetch_k: usize, lambda: f32 },
    /// Plain top-k similarity.
    Similarity { k: usize },
    /// Similarity with a score floor.
    Threshold { k: usize, min_score: f32 },
    /// Fixed broad similarity sweep.
    BroadSweep { k: usize },
}

impl RetrievalStrategy {
    fn mode(self) -> SearchMode {
        match self {
            RetrievalStrategy::Diversity { k, fetch_k, lambda } => {
                SearchMode::Mmr { k, fetch_k, lambda }
            }
            RetrievalStrategy::Similarity { k } => SearchMode::Similarity { k },
            RetrievalStrategy::Threshold { k, min_score } => {
                SearchMode::Threshold { k, min_score }
            }
            RetrievalStrategy::BroadSweep { k } => SearchMode::Similarity { k },
        }
    }

    fn name(self) -> &'static str {
        match self {
            RetrievalStrategy::Diversity { .. } => "diversity",
            RetrievalStrategy::Similarity { .. } => "similarity",
            RetrievalStrategy::Threshold { .. } => "threshold",
            RetrievalStrategy::BroadSweep { .. } => "broad_sweep",
        }
    }
}

pub const DEFAULT_STRATEGIES: &[RetrievalStrategy] = &[
    RetrievalStrategy::Diversity {
        k: 4,
        fetch_k: 12,
        lambda: 0.5,
    },
    RetrievalStrategy::Similarity { k: 4 },
    RetrievalStrategy::Threshold {
        k: 4,
        min_score: 0.3,
    },
    RetrievalStrategy::BroadSweep { k: 8 },
];

/// Breadth of the last-resort similarity search when every strategy fails.
const FALLBACK_BREADTH: usize = 6;

/// Fan the query out over every strategy, concatenate in strategy order
/// (no rank fusion), and deduplicate by chunk identity, keeping first-seen
/// order. A failing strategy is logged and skipped; if all fail, one plain
/// similarity search at a fixed breadth is tried before giving up.
pub fn aggregate(
    index: &VectorIndex,
    query_vec: &[f32],
    strategies: &[RetrievalStrategy],
) -> Result<Vec<DocumentChunk>> {
    let mut collected: Vec<DocumentChunk> = Vec::new();
    let mut any_succeeded = false;

    for strategy in strategies {
        match index.search(query_vec, strategy.mode()) {
            Ok(chunks) => {
                debug!(
                    strategy = strategy.name(),
                    hits = chunks.len(),
                    "retrieval strategy succeeded"
                );
                collected.extend(chunks);
                any_succeeded = true;
            }
            Err(e) => {
                warn!(strategy = strategy.name(), "retrieval strategy failed: {}", e);
            }
        }
    }

    if !any_succeeded {
        warn!("All retrieval strategies failed, trying fallback similarity search");
        match index.search(
            query_vec,
            SearchMode::Similarity {
                k: FALLBACK_BREADTH,
            },
        ) {
            Ok(chunks) => collected.extend(chunks),
            Err(e) => {
                warn!("Fallback retrieval failed: {}", e);
                anyhow::bail!("no documents retrievable");
            }
        }
    }

    Ok(dedup_by_identity(collected))
}

/// Drop repeated chunks by identity key, preserving first-seen order.
pub fn dedup_by_identity(chunks: Vec<DocumentChunk>) -> Vec<DocumentChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.identity_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::types::ChunkMeta;

    fn chunk(id: &str, text: &str, vec_hint: usize) -> (DocumentChunk, Vec<f32>) {
        let mut v = vec![0.0_f32; 4];
        v[vec_hint] = 1.0;
        (
            DocumentChunk {
                text: text.to_string(),
                meta: ChunkMeta {
                    id: id.to_string(),
                    doc_id: "doc".to_string(),
                    drive_id: None,
                    title: "t".to_string(),
                    source: "file:t".to_string(),
                    chunk_index: 0,
                },
            },
            v,
        )
    }

    #[test]
    fn test_dedup_keeps_first_seen() {
        let (a, _) = chunk("same", "first occurrence", 0);
        let (b, _) = chunk("same", "second occurrence", 0);
        let (c, _) = chunk("other", "third", 0);
        let out = dedup_by_identity(vec![a, b, c]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "first occurrence");
        assert_eq!(out[1].text, "third");
    }

    #[test]
    fn test_dedup_by_text_prefix_identity() {
        let shared = "z".repeat(100);
        let (mut a, _) = chunk("", &format!("{}one", shared), 0);
        let (mut b, _) = chunk("", &format!("{}two", shared), 0);
        a.meta.id = String::new();
        b.meta.id = String::new();
        let out = dedup_by_identity(vec![a, b]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_aggregate_unions_without_duplicates() {
        let entries = vec![
            chunk("a", "alpha", 0),
            chunk("b", "beta", 1),
            chunk("c", "gamma", 2),
        ];
        let index = VectorIndex::new(entries);
        let out = aggregate(&index, &[1.0, 0.0, 0.0, 0.0], DEFAULT_STRATEGIES).unwrap();
        // Every strategy sees the same three chunks; the union must contain
        // each exactly once.
        assert_eq!(out.len(), 3);
        let ids: HashSet<String> = out.iter().map(|c| c.meta.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_aggregate_empty_index_is_not_retrievable() {
        let index = VectorIndex::new(vec![]);
        let err = aggregate(&index, &[1.0, 0.0, 0.0, 0.0], DEFAULT_STRATEGIES)
            .unwrap_err()
            .to_string();
        assert!(err.contains("no documents retrievable"));
    }
}

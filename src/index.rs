use anyhow::Result;

use crate::docs::types::DocumentChunk;

/// Nearest-neighbor search mode over the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    /// Top-k by cosine similarity.
    Similarity { k: usize },
    /// Top-k by cosine similarity, dropping results under a score floor.
    Threshold { k: usize, min_score: f32 },
    /// Maximal-marginal-relevance diversity selection: fetch `fetch_k`
    /// candidates by similarity, then greedily pick `k` balancing query
    /// relevance against novelty (`lambda` = 1.0 is pure similarity).
    Mmr { k: usize, fetch_k: usize, lambda: f32 },
}

struct IndexedChunk {
    chunk: DocumentChunk,
    embedding: Vec<f32>,
}

/// In-memory similarity index over one user's chunk embeddings, loaded
/// wholesale from the store at session start and reused across queries.
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn new(entries: Vec<(DocumentChunk, Vec<f32>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run one search against the index. Fails on an empty index so the
    /// caller's fault-containment policy has something to contain.
    pub fn search(&self, query_vec: &[f32], mode: SearchMode) -> Result<Vec<DocumentChunk>> {
        if self.entries.is_empty() {
            anyhow::bail!("no documents indexed");
        }

        match mode {
            SearchMode::Similarity { k } => Ok(self
                .ranked(query_vec)
                .into_iter()
                .take(k)
                .map(|(i, _)| self.entries[i].chunk.clone())
                .collect()),
            SearchMode::Threshold { k, min_score } => Ok(self
                .ranked(query_vec)
                .into_iter()
                .filter(|(_, score)| *score >= min_score)
                .take(k)
                .map(|(i, _)| self.entries[i].chunk.clone())
                .collect()),
            SearchMode::Mmr { k, fetch_k, lambda } => {
                let candidates: Vec<(usize, f32)> =
                    self.ranked(query_vec).into_iter().take(fetch_k).collect();
                let selected = self.mmr_select(&candidates, k, lambda);
                Ok(selected
                    .into_iter()
                    .map(|i| self.entries[i].chunk.clone())
                    .collect())
            }
        }
    }

    /// All entries scored against the query, best first.
    fn ranked(&self, query_vec: &[f32]) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query_vec, &e.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Greedy MMR over pre-scored candidates. Each round picks the candidate
    /// maximizing `lambda * sim(query) - (1 - lambda) * max sim(selected)`.
    fn mmr_select(&self, candidates: &[(usize, f32)], k: usize, lambda: f32) -> Vec<usize> {
        let mut remaining: Vec<(usize, f32)> = candidates.to_vec();
        let mut selected: Vec<usize> = Vec::new();

        while selected.len() < k && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (pos, (idx, query_sim)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|s| {
                        cosine_similarity(&self.entries[*idx].embedding, &self.entries[*s].embedding)
                    })
                    .fold(0.0_f32, f32::max);
                let score = lambda * query_sim - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best_pos = pos;
                }
            }

            let (idx, _) = remaining.remove(best_pos);
            selected.push(idx);
        }

        selected
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::types::ChunkMeta;

    fn chunk(id: &str, text: &str) -> DocumentChunk {
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
        }
    }

    fn index() -> VectorIndex {
        VectorIndex::new(vec![
            (chunk("a", "alpha"), vec![1.0, 0.0, 0.0]),
            (chunk("b", "beta"), vec![0.9, 0.1, 0.0]),
            (chunk("c", "gamma"), vec![0.0, 1.0, 0.0]),
            (chunk("d", "delta"), vec![0.0, 0.0, 1.0]),
        ])
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_similarity_orders_by_score() {
        let idx = index();
        let hits = idx
            .search(&[1.0, 0.0, 0.0], SearchMode::Similarity { k: 2 })
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].meta.id, "a");
        assert_eq!(hits[1].meta.id, "b");
    }

    #[test]
    fn test_threshold_drops_low_scores() {
        let idx = index();
        let hits = idx
            .search(
                &[1.0, 0.0, 0.0],
                SearchMode::Threshold {
                    k: 4,
                    min_score: 0.5,
                },
            )
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|c| c.meta.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_mmr_lambda_one_matches_similarity() {
        let idx = index();
        let plain = idx
            .search(&[1.0, 0.0, 0.0], SearchMode::Similarity { k: 3 })
            .unwrap();
        let mmr = idx
            .search(
                &[1.0, 0.0, 0.0],
                SearchMode::Mmr {
                    k: 3,
                    fetch_k: 4,
                    lambda: 1.0,
                },
            )
            .unwrap();
        let plain_ids: Vec<&str> = plain.iter().map(|c| c.meta.id.as_str()).collect();
        let mmr_ids: Vec<&str> = mmr.iter().map(|c| c.meta.id.as_str()).collect();
        assert_eq!(plain_ids, mmr_ids);
    }

    #[test]
    fn test_mmr_prefers_novelty_at_low_lambda() {
        let idx = index();
        let hits = idx
            .search(
                &[1.0, 0.0, 0.0],
                SearchMode::Mmr {
                    k: 2,
                    fetch_k: 4,
                    lambda: 0.3,
                },
            )
            .unwrap();
        // First pick is the closest match; the second should not be its
        // near-duplicate neighbor "b".
        assert_eq!(hits[0].meta.id, "a");
        assert_ne!(hits[1].meta.id, "b");
    }

    #[test]
    fn test_empty_index_is_an_error() {
        let idx = VectorIndex::new(vec![]);
        assert!(idx
            .search(&[1.0, 0.0, 0.0], SearchMode::Similarity { k: 2 })
            .is_err());
    }
}

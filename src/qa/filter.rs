use std::collections::HashSet;

use crate::docs::types::DocumentChunk;

/// Interrogative and filler terms that never count as query subjects.
pub const STOP_WORDS: &[&str] = &[
    "what", "which", "where", "when", "does", "have", "with", "that", "this", "from", "about",
    "some", "there", "their", "they", "your", "been", "were", "how", "could", "would", "should",
    "shall", "will", "into", "also", "just", "like", "make", "using", "used", "need", "want",
    "find", "know", "tell", "many", "much", "very", "really", "please", "help", "more", "most",
    "only", "give", "show", "list", "who", "whose", "whom", "why",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Extracts candidate subject tokens from a query. Pluggable so the
/// heuristic can be swapped for a real NER component without touching the
/// pipeline.
pub trait SubjectExtractor: Send + Sync {
    /// Candidate tokens in priority order; the first is the primary subject.
    fn candidates(&self, query: &str) -> Vec<String>;
}

/// Default extractor: capitalized words first, then lowercase words longer
/// than 3 characters, stop-listed terms excluded throughout.
pub struct HeuristicSubjectExtractor;

impl SubjectExtractor for HeuristicSubjectExtractor {
    fn candidates(&self, query: &str) -> Vec<String> {
        let mut capitalized = Vec::new();
        let mut lowercase = Vec::new();

        for raw in query.split_whitespace() {
            // Drop possessives ("Priya's" -> "Priya"), then punctuation.
            let base = raw.split('\'').next().unwrap_or(raw);
            let clean: String = base.chars().filter(|c| c.is_alphanumeric()).collect();
            if clean.len() < 2 {
                continue;
            }
            if is_stop_word(&clean.to_lowercase()) {
                continue;
            }

            let starts_upper = clean.chars().next().is_some_and(|c| c.is_uppercase());
            if starts_upper {
                capitalized.push(clean);
            } else if clean.len() > 3 {
                lowercase.push(clean);
            }
        }

        capitalized.extend(lowercase);
        capitalized
    }
}

/// Outcome of the relevance filter.
#[derive(Debug)]
pub enum FilterDecision {
    /// Chunks to carry forward, in retrieval order.
    Kept(Vec<DocumentChunk>),
    /// The primary subject matched nothing; the pipeline terminates early
    /// with a user-visible message and no LLM call.
    NoSubjectMatch(String),
}

/// Narrow the retrieved set to chunks relevant to the query. When a subject
/// candidate exists, only chunks whose text or title contains it
/// (case-insensitive substring) survive; zero survivors is a hard stop, not
/// a fall-through to the unfiltered set. With no candidate at all, any chunk
/// sharing a non-stopword token with the query is kept.
pub fn filter_relevant(
    extractor: &dyn SubjectExtractor,
    query: &str,
    chunks: Vec<DocumentChunk>,
) -> FilterDecision {
    let candidates = extractor.candidates(query);

    if let Some(subject) = candidates.first() {
        let needle = subject.to_lowercase();
        let kept: Vec<DocumentChunk> = chunks
            .into_iter()
            .filter(|c| {
                c.text.to_lowercase().contains(&needle)
                    || c.meta.title.to_lowercase().contains(&needle)
            })
            .collect();
        if kept.is_empty() {
            return FilterDecision::NoSubjectMatch(subject.clone());
        }
        return FilterDecision::Kept(kept);
    }

    // No subject at all: fall back to single-token overlap with the query.
    let query_tokens = word_set(query);
    let kept: Vec<DocumentChunk> = chunks
        .into_iter()
        .filter(|c| !word_set(&c.text).is_disjoint(&query_tokens))
        .collect();
    FilterDecision::Kept(kept)
}

/// Walk chunks in order, keeping each while the cumulative character count
/// stays within twice `max_context_length`; stop at the first chunk that
/// would exceed the budget.
pub fn budget_chunks(chunks: Vec<DocumentChunk>, max_context_length: usize) -> Vec<DocumentChunk> {
    let limit = max_context_length * 2;
    let mut total = 0usize;
    let mut kept = Vec::new();

    for chunk in chunks {
        let len = chunk.text.chars().count();
        if total + len > limit {
            break;
        }
        total += len;
        kept.push(chunk);
    }

    kept
}

/// Lowercased non-stopword tokens of a text.
fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| w.len() > 1 && !is_stop_word(w))
        .collect()
}

/// Words of a text that plausibly carry meaning: longer than 3 characters
/// and not stop-listed. Shared by the answer auditor.
pub fn meaningful_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| w.len() > 3 && !is_stop_word(w))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::types::ChunkMeta;

    fn chunk(id: &str, title: &str, text: &str) -> DocumentChunk {
        DocumentChunk {
            text: text.to_string(),
            meta: ChunkMeta {
                id: id.to_string(),
                doc_id: "doc".to_string(),
                drive_id: None,
                title: title.to_string(),
                source: "file:t".to_string(),
                chunk_index: 0,
            },
        }
    }

    #[test]
    fn test_candidates_prefer_capitalized_names() {
        let ex = HeuristicSubjectExtractor;
        let c = ex.candidates("Tell me about Priya's experience");
        assert_eq!(c.first().map(String::as_str), Some("Priya"));
        // "Tell" is capitalized but stop-listed.
        assert!(!c.contains(&"Tell".to_string()));
    }

    #[test]
    fn test_candidates_lowercase_fallback() {
        let ex = HeuristicSubjectExtractor;
        let c = ex.candidates("what about the internship details");
        assert_eq!(
            c,
            vec!["internship".to_string(), "details".to_string()]
        );
    }

    #[test]
    fn test_candidates_empty_for_pure_filler() {
        let ex = HeuristicSubjectExtractor;
        assert!(ex.candidates("what is this about").is_empty());
    }

    #[test]
    fn test_filter_keeps_only_subject_chunks() {
        let chunks = vec![
            chunk("1", "resume", "Priya worked at Acme for three years."),
            chunk("2", "notes", "Quarterly budget discussion."),
            chunk("3", "priya_cv", "Education and awards."),
        ];
        match filter_relevant(
            &HeuristicSubjectExtractor,
            "Tell me about Priya's experience",
            chunks,
        ) {
            FilterDecision::Kept(kept) => {
                let ids: Vec<&str> = kept.iter().map(|c| c.meta.id.as_str()).collect();
                // Chunk 3 matches via its title.
                assert_eq!(ids, vec!["1", "3"]);
            }
            other => panic!("expected Kept, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_no_subject_match_terminates() {
        let chunks = vec![chunk("1", "notes", "Quarterly budget discussion.")];
        match filter_relevant(
            &HeuristicSubjectExtractor,
            "Tell me about Priya's experience",
            chunks,
        ) {
            FilterDecision::NoSubjectMatch(name) => assert_eq!(name, "Priya"),
            other => panic!("expected NoSubjectMatch, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_token_overlap_fallback() {
        let chunks = vec![
            chunk("1", "a", "the sky is blue today"),
            chunk("2", "b", "unrelated content entirely"),
        ];
        // Every query word is stop-listed or too short, except "sky".
        match filter_relevant(&HeuristicSubjectExtractor, "how is sky", chunks) {
            FilterDecision::Kept(kept) => {
                assert_eq!(kept.len(), 1);
                assert_eq!(kept[0].meta.id, "1");
            }
            other => panic!("expected Kept, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_boundary() {
        let chunks: Vec<DocumentChunk> = (0..3)
            .map(|i| chunk(&i.to_string(), "t", &"a".repeat(60)))
            .collect();
        // 2 * 100 = 200: 60 ok, 120 ok, 180 would become 240 -> dropped.
        let kept = budget_chunks(chunks, 100);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_budget_stops_at_first_overflow() {
        let chunks = vec![
            chunk("0", "t", &"a".repeat(150)),
            chunk("1", "t", &"a".repeat(100)),
            chunk("2", "t", &"a".repeat(10)),
        ];
        // 150 kept; 150+100=250 > 200 stops the walk; the small trailing
        // chunk is dropped too, never reordered in.
        let kept = budget_chunks(chunks, 100);
        assert_eq!(kept.len(), 1);
    }
}

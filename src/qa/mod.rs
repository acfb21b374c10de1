pub mod audit;
pub mod filter;
pub mod prompts;
pub mod retrieval;

use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, Stream};
use tracing::{info, warn};

use crate::docs::types::DocumentChunk;
use crate::eval::{EvaluationRecord, Evaluator, RetrievalQualityRecord};
use crate::index::VectorIndex;
use crate::llm::{Embedder, LlmClient};
use crate::state::PipelineConfig;

use audit::{audit_answer, Entities, EntityExtractor};
use filter::{FilterDecision, HeuristicSubjectExtractor, SubjectExtractor};

/// Characters per yielded piece in the streaming variant. Coarser than
/// per-character output to keep the piece count down.
const STREAM_CHUNK_CHARS: usize = 16;

/// Structured query result. Presentation is a separate concern; see
/// [`format_response`].
#[derive(Debug)]
pub struct QaResponse {
    pub answer: String,
    /// Source labels of the chunks the answer was built from, deduplicated.
    pub sources: Vec<String>,
    /// Advisory notes from the answer auditor. Never alter the answer.
    pub advisories: Vec<String>,
    /// Contact details and links found in the context, for display.
    pub contacts: Entities,
    pub evaluation: Option<EvaluationRecord>,
    /// Quality of the retrieval pass itself, scored over the deduplicated
    /// chunks before filtering.
    pub retrieval_quality: Option<RetrievalQualityRecord>,
}

impl QaResponse {
    fn message(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            advisories: Vec::new(),
            contacts: Entities::default(),
            evaluation: None,
            retrieval_quality: None,
        }
    }
}

/// The retrieval-and-answer pipeline: fan-out retrieval, relevance
/// filtering, context budgeting, prompt construction, answer auditing, and
/// optional response evaluation. Holds no per-user state; the caller passes
/// the session's index.
pub struct QaEngine {
    llm: Arc<LlmClient>,
    subject_extractor: Box<dyn SubjectExtractor>,
    entity_extractor: EntityExtractor,
}

impl QaEngine {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            subject_extractor: Box::new(HeuristicSubjectExtractor),
            entity_extractor: EntityExtractor::new(),
        }
    }

    /// Swap in a different query-subject extractor.
    pub fn with_subject_extractor(mut self, extractor: Box<dyn SubjectExtractor>) -> Self {
        self.subject_extractor = extractor;
        self
    }

    /// Answer one query against a user's index. Oracle failures never
    /// escape: they degrade to user-visible messages inside the response.
    pub async fn query(
        &self,
        index: &VectorIndex,
        question: &str,
        config: &PipelineConfig,
    ) -> QaResponse {
        info!(question, "New query received");

        // Embed the query. Without a vector, no retrieval mode can run.
        let query_vec = match self.llm.embed(&[question.to_string()]).await {
            Ok(mut vecs) if !vecs.is_empty() => vecs.remove(0),
            Ok(_) => {
                warn!("Embedding oracle returned no vector");
                return QaResponse::message(
                    "No documents could be retrieved for this question (embedding unavailable).",
                );
            }
            Err(e) => {
                warn!("Query embedding failed: {}", e);
                return QaResponse::message(
                    "No documents could be retrieved for this question (embedding unavailable).",
                );
            }
        };

        // Fan out over the declared strategies; union and dedup.
        let retrieved =
            match retrieval::aggregate(index, &query_vec, retrieval::DEFAULT_STRATEGIES) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("Retrieval failed: {}", e);
                    return QaResponse::message(
                        "No documents could be retrieved for this question.",
                    );
                }
            };
        info!(retrieved = retrieved.len(), "Retrieval fan-out complete");

        let retrieved_texts: Vec<String> = if config.evaluate_responses {
            retrieved.iter().map(|c| c.text.clone()).collect()
        } else {
            Vec::new()
        };

        // Heuristic relevance filter; a missed subject ends the pipeline
        // before any completion call.
        let filtered =
            match filter::filter_relevant(self.subject_extractor.as_ref(), question, retrieved) {
                FilterDecision::Kept(chunks) => chunks,
                FilterDecision::NoSubjectMatch(name) => {
                    info!(subject = %name, "No chunks matched the query subject");
                    return QaResponse::message(format!(
                        "I found no documents containing information about '{}'.",
                        name
                    ));
                }
            };

        let context_chunks = filter::budget_chunks(filtered, config.max_context_length);
        info!(kept = context_chunks.len(), "Context budgeted");

        let context = prompts::format_context(&context_chunks);
        let prompt = prompts::build_answer_prompt(&context, question);

        let answer = match self.llm.complete(&prompt, config.temperature).await {
            Ok(text) => text,
            Err(e) => {
                warn!("LLM query failed: {}", e);
                return QaResponse::message(format!("Error: the model request failed: {}", e));
            }
        };

        let sources = source_labels(&context_chunks);
        let advisories = audit_answer(&answer, &context_chunks);
        let contacts = self.entity_extractor.extract_from_chunks(&context_chunks);

        let (evaluation, retrieval_quality) = if config.evaluate_responses {
            let evaluator = Evaluator::new(self.llm.clone(), config.eval_strategy);
            let source_texts: Vec<String> =
                context_chunks.iter().map(|c| c.text.clone()).collect();
            let evaluation = evaluator.evaluate(question, &answer, &source_texts).await;
            let retrieval_quality = evaluator
                .evaluate_retrieval(question, &retrieved_texts)
                .await;
            (Some(evaluation), Some(retrieval_quality))
        } else {
            (None, None)
        };

        QaResponse {
            answer,
            sources,
            advisories,
            contacts,
            evaluation,
            retrieval_quality,
        }
    }

    /// Streaming variant: the response is computed in full, then replayed
    /// incrementally in small character chunks. Not true token streaming.
    pub async fn query_stream(
        &self,
        index: &VectorIndex,
        question: &str,
        config: &PipelineConfig,
    ) -> impl Stream<Item = String> {
        let response = self.query(index, question, config).await;
        let rendered = format_response(&response);

        let pieces: Vec<String> = rendered
            .chars()
            .collect::<Vec<char>>()
            .chunks(STREAM_CHUNK_CHARS)
            .map(|c| c.iter().collect())
            .collect();

        stream::iter(pieces)
    }
}

/// Deduplicated source labels (source path, falling back to title) of the
/// chunks an answer drew on, in encounter order.
fn source_labels(chunks: &[DocumentChunk]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .iter()
        .map(|c| {
            if c.meta.source.is_empty() {
                c.meta.title.clone()
            } else {
                c.meta.source.clone()
            }
        })
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Render a structured response for the chat surface.
pub fn format_response(response: &QaResponse) -> String {
    let mut out = format!("Answer:\n{}", response.answer);

    if !response.sources.is_empty() {
        out.push_str("\n\nSources:\n");
        for source in &response.sources {
            out.push_str(&format!("- {}\n", source));
        }
    }

    if !response.contacts.is_empty() {
        out.push_str("\nFound in the documents:\n");
        for link in &response.contacts.links {
            out.push_str(&format!("- link: {}\n", link));
        }
        for email in &response.contacts.emails {
            out.push_str(&format!("- email: {}\n", email));
        }
        for phone in &response.contacts.phones {
            out.push_str(&format!("- phone: {}\n", phone));
        }
    }

    if !response.advisories.is_empty() {
        out.push_str("\nNotes:\n");
        for advisory in &response.advisories {
            out.push_str(&format!("- {}\n", advisory));
        }
    }

    if let Some(eval) = &response.evaluation {
        out.push_str(&format!(
            "\nResponse quality:\n- Relevance: {}/5\n- Completeness: {}/5\n",
            eval.relevance_score, eval.completeness_score
        ));
        if let Some(source) = eval.source_relevance_score {
            out.push_str(&format!("- Source relevance: {}/5\n", source));
        }
        out.push_str(&format!("- Overall: {}/5\n", eval.overall_score));
    }

    if let Some(retrieval) = &response.retrieval_quality {
        out.push_str(&format!(
            "\nRetrieval quality:\n- Relevance: {}/5\n- Coverage: {}/5\n- Diversity: {}/5 ({} documents)\n",
            retrieval.retrieval_score,
            retrieval.coverage_score,
            retrieval.diversity_score,
            retrieval.num_documents
        ));
    }

    out
}

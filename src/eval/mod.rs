use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::qa::filter::is_stop_word;

const RELEVANCE_PROMPT: &str = r#"Evaluate how well this answer addresses the user's question.

Question: {query}
Answer: {answer}

Rate the relevance:
- 5 = Perfectly answers the question
- 4 = Very good answer with minor gaps
- 3 = Good answer but missing some details
- 2 = Partially relevant but incomplete
- 1 = Barely relevant
- 0 = Completely irrelevant

Respond ONLY with the number (0-5)."#;

const COMPLETENESS_PROMPT: &str = r#"Evaluate how complete this answer is for the given question.

Question: {query}
Answer: {answer}

Rate the completeness:
- 5 = Complete answer with all necessary details
- 4 = Mostly complete with minor omissions
- 3 = Good coverage but missing some aspects
- 2 = Partial answer with significant gaps
- 1 = Very incomplete
- 0 = No useful information

Respond ONLY with the number (0-5)."#;

const SOURCE_RELEVANCE_PROMPT: &str = r#"Evaluate how relevant the source documents are to the question.

Question: {query}
Source Documents: {sources}

Rate the source relevance:
- 5 = Sources perfectly match the question
- 4 = Sources are very relevant
- 3 = Sources are somewhat relevant
- 2 = Sources are barely relevant
- 1 = Sources are not relevant
- 0 = No sources provided

Respond ONLY with the number (0-5)."#;

const RETRIEVAL_PROMPT: &str = r#"Evaluate how relevant the retrieved documents are to the query.

Query: {query}
Retrieved Documents: {docs}

Rate the retrieval relevance:
- 5 = All documents highly relevant
- 4 = Most documents relevant
- 3 = Some documents relevant
- 2 = Few documents relevant
- 1 = Most documents irrelevant
- 0 = All documents irrelevant

Respond ONLY with the number (0-5)."#;

const COVERAGE_PROMPT: &str = r#"Evaluate how well the retrieved documents cover the information needed for the query.

Query: {query}
Retrieved Documents: {docs}

Rate the coverage:
- 5 = Complete coverage of all aspects
- 4 = Good coverage with minor gaps
- 3 = Adequate coverage
- 2 = Poor coverage with significant gaps
- 1 = Very poor coverage
- 0 = No relevant coverage

Respond ONLY with the number (0-5)."#;

/// At most this many source/retrieved texts feed a rating prompt.
const MAX_SOURCES_FOR_RATING: usize = 3;
const MAX_DOCS_FOR_RATING: usize = 5;

/// How a finished (query, answer) pair gets scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStrategy {
    /// Stopword-free token overlap plus an answer-length curve. No oracle
    /// calls, fully deterministic.
    Lexical,
    /// Two LLM rating calls (relevance, completeness) averaged together.
    LlmJudge,
}

impl EvalStrategy {
    pub fn from_env() -> Self {
        match dotenv::var("EVAL_STRATEGY").as_deref() {
            Ok("llm") => EvalStrategy::LlmJudge,
            _ => EvalStrategy::Lexical,
        }
    }
}

/// One scored response. Appended to the JSON-lines evaluation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    pub query: String,
    pub relevance_score: f64,
    pub completeness_score: f64,
    /// Scored only when source texts accompany the answer; folded into
    /// `overall_score` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_relevance_score: Option<f64>,
    pub overall_score: f64,
    pub answer_length: usize,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Quality of one retrieval pass, scored over the deduplicated chunk texts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalQualityRecord {
    pub retrieval_score: f64,
    pub coverage_score: f64,
    /// Document-count heuristic: `min(5, n * 1.5)`.
    pub diversity_score: f64,
    pub num_documents: usize,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Evaluator {
    llm: Arc<LlmClient>,
    strategy: EvalStrategy,
}

impl Evaluator {
    pub fn new(llm: Arc<LlmClient>, strategy: EvalStrategy) -> Self {
        Self { llm, strategy }
    }

    /// Score an answer, optionally against the source texts it drew on.
    /// With sources present a third relevance rating is taken and averaged
    /// into the overall score. Fails closed: any oracle or parse error
    /// yields a zero-score record carrying the cause, never an Err.
    pub async fn evaluate(
        &self,
        query: &str,
        answer: &str,
        sources: &[String],
    ) -> EvaluationRecord {
        let (relevance, completeness, source_relevance, error) = match self.strategy {
            EvalStrategy::Lexical => {
                let r = lexical_relevance(query, answer);
                let c = completeness_score(answer.chars().count());
                let s = (!sources.is_empty())
                    .then(|| lexical_relevance(query, &joined(sources, MAX_SOURCES_FOR_RATING)));
                (r, c, s, None)
            }
            EvalStrategy::LlmJudge => match self.llm_judge(query, answer, sources).await {
                Ok((r, c, s)) => (r, c, s, None),
                Err(e) => {
                    warn!("Evaluation failed: {}", e);
                    (0.0, 0.0, None, Some(e.to_string()))
                }
            },
        };

        let mut scores = vec![relevance, completeness];
        if let Some(s) = source_relevance {
            scores.push(s);
        }
        let overall = round2(scores.iter().sum::<f64>() / scores.len() as f64);

        EvaluationRecord {
            query: query.to_string(),
            relevance_score: round2(relevance),
            completeness_score: round2(completeness),
            source_relevance_score: source_relevance.map(round2),
            overall_score: overall,
            answer_length: answer.chars().count(),
            timestamp: chrono::Utc::now().timestamp(),
            error,
        }
    }

    /// Score a retrieval pass over the deduplicated chunk texts: relevance
    /// and coverage ratings plus a document-count diversity heuristic. An
    /// empty retrieval is a zero-score record, and oracle failures fail
    /// closed like [`evaluate`](Self::evaluate).
    pub async fn evaluate_retrieval(
        &self,
        query: &str,
        retrieved: &[String],
    ) -> RetrievalQualityRecord {
        let timestamp = chrono::Utc::now().timestamp();
        if retrieved.is_empty() {
            return RetrievalQualityRecord {
                retrieval_score: 0.0,
                coverage_score: 0.0,
                diversity_score: 0.0,
                num_documents: 0,
                timestamp,
                error: Some("No documents retrieved".to_string()),
            };
        }

        let docs_text = joined(retrieved, MAX_DOCS_FOR_RATING);
        let (retrieval, coverage, error) = match self.strategy {
            EvalStrategy::Lexical => {
                let r = lexical_relevance(query, &docs_text);
                let c = completeness_score(docs_text.chars().count());
                (r, c, None)
            }
            EvalStrategy::LlmJudge => match self.llm_judge_retrieval(query, &docs_text).await {
                Ok((r, c)) => (r, c, None),
                Err(e) => {
                    warn!("Retrieval evaluation failed: {}", e);
                    (0.0, 0.0, Some(e.to_string()))
                }
            },
        };

        RetrievalQualityRecord {
            retrieval_score: round2(retrieval),
            coverage_score: round2(coverage),
            diversity_score: diversity_score(retrieved.len()),
            num_documents: retrieved.len(),
            timestamp,
            error,
        }
    }

    async fn llm_judge(
        &self,
        query: &str,
        answer: &str,
        sources: &[String],
    ) -> Result<(f64, f64, Option<f64>)> {
        let relevance_prompt = RELEVANCE_PROMPT
            .replace("{query}", query)
            .replace("{answer}", answer);
        let completeness_prompt = COMPLETENESS_PROMPT
            .replace("{query}", query)
            .replace("{answer}", answer);

        // Deterministic scoring: temperature 0.
        let relevance_reply = self.llm.complete(&relevance_prompt, 0.0).await?;
        let relevance = parse_rating(&relevance_reply)?;

        let completeness_reply = self.llm.complete(&completeness_prompt, 0.0).await?;
        let completeness = parse_rating(&completeness_reply)?;

        let source_relevance = if sources.is_empty() {
            None
        } else {
            let source_prompt = SOURCE_RELEVANCE_PROMPT
                .replace("{query}", query)
                .replace("{sources}", &joined(sources, MAX_SOURCES_FOR_RATING));
            let source_reply = self.llm.complete(&source_prompt, 0.0).await?;
            Some(parse_rating(&source_reply)?)
        };

        Ok((relevance, completeness, source_relevance))
    }

    async fn llm_judge_retrieval(&self, query: &str, docs_text: &str) -> Result<(f64, f64)> {
        let retrieval_prompt = RETRIEVAL_PROMPT
            .replace("{query}", query)
            .replace("{docs}", docs_text);
        let coverage_prompt = COVERAGE_PROMPT
            .replace("{query}", query)
            .replace("{docs}", docs_text);

        let retrieval_reply = self.llm.complete(&retrieval_prompt, 0.0).await?;
        let retrieval = parse_rating(&retrieval_reply)?;

        let coverage_reply = self.llm.complete(&coverage_prompt, 0.0).await?;
        let coverage = parse_rating(&coverage_reply)?;

        Ok((retrieval, coverage))
    }
}

/// Document-count diversity heuristic: 1.5 per document, capped at 5.
pub fn diversity_score(num_documents: usize) -> f64 {
    round2((num_documents as f64 * 1.5).min(5.0))
}

fn joined(texts: &[String], limit: usize) -> String {
    texts
        .iter()
        .take(limit)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// First digit of the reply, as a 0-5 rating.
fn parse_rating(reply: &str) -> Result<f64> {
    let digit = reply
        .trim()
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .context("Rating reply did not start with a digit")?;
    if digit > 5 {
        anyhow::bail!("Rating out of range: {}", digit);
    }
    Ok(digit as f64)
}

/// Token-overlap relevance: the share of the query's non-stopword tokens
/// that appear in the answer, scaled to 0-5.
pub fn lexical_relevance(query: &str, answer: &str) -> f64 {
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let answer_tokens = tokens(answer);
    let hits = query_tokens.intersection(&answer_tokens).count();
    (hits as f64 / query_tokens.len() as f64) * 5.0
}

/// Length-based completeness on a 0-5 scale: 0.5 at 50 characters, ramping
/// linearly to 1.0 at 1000 characters, capped there; below 50 characters the
/// fraction is `len / 100`.
pub fn completeness_score(answer_len: usize) -> f64 {
    let frac = if answer_len >= 1000 {
        1.0
    } else if answer_len >= 50 {
        0.5 + 0.5 * (answer_len as f64 - 50.0) / 950.0
    } else {
        answer_len as f64 / 100.0
    };
    frac * 5.0
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty() && !is_stop_word(w))
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Append-only JSON-lines evaluation log, one record per line.
pub struct EvalLog {
    path: PathBuf,
}

impl EvalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default per-run log file under `dir`.
    pub fn for_run(dir: &Path) -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        Self::new(dir.join(format!("evaluation_results_{}.jsonl", stamp)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EvaluationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open eval log {:?}", self.path))?;
        let line = serde_json::to_string(record).context("serialize evaluation record")?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<EvaluationRecord>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open eval log {:?}", self.path))?;
        let reader = std::io::BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line).context("parse evaluation record")?);
        }
        Ok(records)
    }
}

/// Aggregate statistics over one batch evaluation pass.
#[derive(Debug, Serialize)]
pub struct SuiteStats {
    pub average_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub total_tests: usize,
    pub success_rate: f64,
}

/// Default probe queries for a batch pass over a user's index.
pub const DEFAULT_SUITE_QUERIES: &[&str] = &[
    "What is the main topic of the documents?",
    "Can you summarize the key points?",
    "What are the important dates mentioned?",
    "Who are the main people mentioned?",
    "What are the main conclusions?",
];

/// Run every probe query through `answer`, score the result, and append each
/// record to the log. A query whose answering fails is logged and skipped;
/// it counts against the success rate.
pub async fn run_suite<F, Fut>(
    evaluator: &Evaluator,
    log: &EvalLog,
    queries: &[&str],
    mut answer: F,
) -> Result<SuiteStats>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let mut scores: Vec<f64> = Vec::new();

    for query in queries {
        match answer(query.to_string()).await {
            Ok(text) => {
                let record = evaluator.evaluate(query, &text, &[]).await;
                info!(query, overall = record.overall_score, "suite query evaluated");
                scores.push(record.overall_score);
                log.append(&record)?;
            }
            Err(e) => {
                warn!(query, "suite query failed: {}", e);
            }
        }
    }

    if scores.is_empty() {
        anyhow::bail!("Evaluation suite produced no scores");
    }

    Ok(SuiteStats {
        average_score: round2(scores.iter().sum::<f64>() / scores.len() as f64),
        max_score: scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        min_score: scores.iter().cloned().fold(f64::INFINITY, f64::min),
        total_tests: scores.len(),
        success_rate: round2(scores.len() as f64 / queries.len() as f64 * 100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_relevance_full_overlap() {
        // "apple banana" vs an answer containing both: exact 5.0.
        let score = lexical_relevance("apple banana", "I like apple and banana");
        assert_eq!(score, 5.0);
    }

    #[test]
    fn test_lexical_relevance_partial_overlap() {
        let score = lexical_relevance("apple banana", "I like apple pie");
        assert_eq!(score, 2.5);
    }

    #[test]
    fn test_lexical_relevance_empty_query() {
        assert_eq!(lexical_relevance("what about", "anything"), 0.0);
    }

    #[test]
    fn test_completeness_ramp_floor() {
        assert_eq!(completeness_score(50), 2.5);
    }

    #[test]
    fn test_completeness_cap() {
        assert_eq!(completeness_score(1000), 5.0);
        assert_eq!(completeness_score(5000), 5.0);
    }

    #[test]
    fn test_completeness_below_floor() {
        assert_eq!(completeness_score(0), 0.0);
        assert!(completeness_score(49) < 2.5);
    }

    #[test]
    fn test_completeness_monotonic() {
        let mut prev = 0.0;
        for len in [0, 10, 49, 50, 51, 200, 999, 1000, 2000] {
            let s = completeness_score(len);
            assert!(s >= prev, "curve regressed at {}", len);
            prev = s;
        }
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("4").unwrap(), 4.0);
        assert_eq!(parse_rating("  3 out of 5").unwrap(), 3.0);
        assert!(parse_rating("great answer").is_err());
        assert!(parse_rating("9").is_err());
        assert!(parse_rating("").is_err());
    }

    #[test]
    fn test_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvalLog::new(dir.path().join("run.jsonl"));

        let record = EvaluationRecord {
            query: "what about apples".to_string(),
            relevance_score: 5.0,
            completeness_score: 2.5,
            source_relevance_score: None,
            overall_score: 3.75,
            answer_length: 50,
            timestamp: 1_700_000_000,
            error: None,
        };
        log.append(&record).unwrap();
        log.append(&record).unwrap();

        let read = log.read_all().unwrap();
        assert_eq!(read.len(), 2);
        // Field-level equality, ignoring the timestamp.
        assert_eq!(read[0].query, record.query);
        assert_eq!(read[0].relevance_score, record.relevance_score);
        assert_eq!(read[0].completeness_score, record.completeness_score);
        assert_eq!(read[0].overall_score, record.overall_score);
        assert_eq!(read[0].answer_length, record.answer_length);
    }

    #[test]
    fn test_diversity_heuristic() {
        assert_eq!(diversity_score(0), 0.0);
        assert_eq!(diversity_score(1), 1.5);
        assert_eq!(diversity_score(2), 3.0);
        assert_eq!(diversity_score(3), 4.5);
        // 4 * 1.5 = 6, capped.
        assert_eq!(diversity_score(4), 5.0);
        assert_eq!(diversity_score(20), 5.0);
    }

    #[tokio::test]
    async fn test_lexical_evaluator_never_errors() {
        let llm = Arc::new(LlmClient::from_env().unwrap());
        let evaluator = Evaluator::new(llm, EvalStrategy::Lexical);
        let record = evaluator
            .evaluate("apple banana", "apple banana answer", &[])
            .await;
        assert!(record.error.is_none());
        assert_eq!(record.relevance_score, 5.0);
        assert!(record.source_relevance_score.is_none());
    }

    #[tokio::test]
    async fn test_source_relevance_folds_into_overall() {
        let llm = Arc::new(LlmClient::from_env().unwrap());
        let evaluator = Evaluator::new(llm, EvalStrategy::Lexical);

        let sources = vec!["apple banana orchard notes".to_string()];
        let answer = "a".repeat(1000); // completeness 5.0, relevance 0.0
        let record = evaluator.evaluate("apple banana", &answer, &sources).await;

        assert_eq!(record.relevance_score, 0.0);
        assert_eq!(record.completeness_score, 5.0);
        assert_eq!(record.source_relevance_score, Some(5.0));
        // (0 + 5 + 5) / 3
        assert_eq!(record.overall_score, 3.33);
    }

    #[tokio::test]
    async fn test_retrieval_quality_scores_documents() {
        let llm = Arc::new(LlmClient::from_env().unwrap());
        let evaluator = Evaluator::new(llm, EvalStrategy::Lexical);

        let docs = vec![
            "apple orchard history".to_string(),
            "banana plantation report".to_string(),
        ];
        let record = evaluator.evaluate_retrieval("apple banana", &docs).await;

        assert!(record.error.is_none());
        assert_eq!(record.num_documents, 2);
        assert_eq!(record.retrieval_score, 5.0);
        assert_eq!(record.diversity_score, 3.0);
        assert!(record.coverage_score > 0.0);
    }

    #[tokio::test]
    async fn test_retrieval_quality_empty_is_zero_scored() {
        let llm = Arc::new(LlmClient::from_env().unwrap());
        let evaluator = Evaluator::new(llm, EvalStrategy::Lexical);
        let record = evaluator.evaluate_retrieval("anything", &[]).await;

        assert_eq!(record.retrieval_score, 0.0);
        assert_eq!(record.coverage_score, 0.0);
        assert_eq!(record.diversity_score, 0.0);
        assert_eq!(record.num_documents, 0);
        assert!(record.error.is_some());
    }
}

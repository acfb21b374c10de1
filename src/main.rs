mod docs;
mod eval;
mod index;
mod llm;
mod qa;
mod state;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use docs::ChunkStore;
use index::VectorIndex;
use llm::LlmClient;
use qa::QaEngine;
use state::{AppState, PipelineConfig, Session, SessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let data_dir =
        PathBuf::from(dotenv::var("DATA_DIR").unwrap_or_else(|_| "./data/index".to_string()));
    let docs_dir =
        PathBuf::from(dotenv::var("DOCS_DIR").unwrap_or_else(|_| "./documents".to_string()));

    let store = Arc::new(ChunkStore::new(&data_dir).await?);
    info!("Chunk store initialized at {:?}", data_dir);

    let llm = Arc::new(LlmClient::from_env()?);
    info!("LLM client initialized");

    let engine = Arc::new(QaEngine::new(llm.clone()));
    let app = AppState {
        store,
        llm,
        engine,
        sessions: SessionStore::new(),
        config: PipelineConfig::from_env(),
    };

    // `driveqa evaluate <user_id>` runs the batch evaluation suite and exits.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("evaluate") {
        let user_id = args
            .get(2)
            .context("Usage: driveqa evaluate <user_id>")?
            .clone();
        return run_evaluation(&app, &user_id, &data_dir, &docs_dir).await;
    }

    chat_loop(&app, &docs_dir).await
}

/// Conversational surface: the first turn is a user identifier, every later
/// turn is a question against that user's documents.
async fn chat_loop(app: &AppState, docs_dir: &std::path::Path) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Please enter your user id to start:");
    let mut session: Option<Arc<Session>> = None;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        match &session {
            None => match login(app, input, docs_dir).await {
                Ok(s) => {
                    println!(
                        "Logged in as {}. {} chunks indexed. Ask away, or type 'sources' to list your documents.",
                        s.user_id,
                        s.index.len()
                    );
                    session = Some(s);
                }
                Err(e) => {
                    warn!("Login failed: {:#}", e);
                    println!("Login failed: {}. Try another user id.", e);
                }
            },
            Some(s) => {
                if input == "sources" {
                    print_sources(app, &s.user_id).await;
                    continue;
                }
                let mut stream = app
                    .engine
                    .query_stream(&s.index, input, &app.config)
                    .await;
                while let Some(piece) = stream.next().await {
                    print!("{}", piece);
                    std::io::stdout().flush().ok();
                }
                println!();
            }
        }
    }

    Ok(())
}

/// `sources` command: list the user's indexed documents, newest first.
async fn print_sources(app: &AppState, user_id: &str) {
    match app.store.list_documents(user_id).await {
        Ok(docs) if docs.is_empty() => println!("No documents indexed."),
        Ok(docs) => {
            println!("Indexed documents:");
            for doc in docs {
                println!(
                    "- {} ({} chunks, {} bytes, from {})",
                    doc.name, doc.chunk_count, doc.size, doc.source
                );
            }
        }
        Err(e) => {
            warn!("Failed to list documents: {:#}", e);
            println!("Could not list documents: {}", e);
        }
    }
}

/// Load an existing index for the user, or ingest their document folder on
/// first login. The loaded session handle is reused across queries.
async fn login(app: &AppState, user_id: &str, docs_dir: &std::path::Path) -> Result<Arc<Session>> {
    if let Some(session) = app.sessions.get(user_id).await {
        return Ok(session);
    }

    if !app.store.has_index(user_id).await? {
        let user_docs = docs_dir.join(user_id);
        info!(user_id, "First login, ingesting {:?}", user_docs);
        let stats =
            docs::ingest::ingest_folder(&app.store, app.llm.as_ref(), user_id, &user_docs).await?;
        info!(
            user_id,
            documents = stats.documents,
            chunks = stats.chunks,
            "Ingestion complete"
        );
    }

    let entries = app.store.load_user(user_id).await?;
    if entries.is_empty() {
        anyhow::bail!("No indexed documents for user '{}'", user_id);
    }

    let session = Session {
        user_id: user_id.to_string(),
        index: VectorIndex::new(entries),
    };
    Ok(app.sessions.insert(session).await)
}

/// Batch evaluation pass: answer every probe query, score it, and append
/// the records to a per-run JSON log.
async fn run_evaluation(
    app: &AppState,
    user_id: &str,
    data_dir: &std::path::Path,
    docs_dir: &std::path::Path,
) -> Result<()> {
    let session = login(app, user_id, docs_dir).await?;
    let evaluator = eval::Evaluator::new(app.llm.clone(), app.config.eval_strategy);
    let log = eval::EvalLog::for_run(data_dir);

    let engine = app.engine.clone();
    // The suite scores answers itself; don't evaluate twice.
    let mut config = app.config.clone();
    config.evaluate_responses = false;
    let stats = eval::run_suite(&evaluator, &log, eval::DEFAULT_SUITE_QUERIES, |query| {
        let engine = engine.clone();
        let session = session.clone();
        let config = config.clone();
        async move {
            let response = engine.query(&session.index, &query, &config).await;
            Ok(response.answer)
        }
    })
    .await?;

    info!(
        average = stats.average_score,
        max = stats.max_score,
        min = stats.min_score,
        total = stats.total_tests,
        success_rate = stats.success_rate,
        "Evaluation suite complete"
    );
    println!(
        "Evaluated {} queries: average {}/5 (min {}, max {}). Log: {:?}",
        stats.total_tests,
        stats.average_score,
        stats.min_score,
        stats.max_score,
        log.path()
    );

    Ok(())
}

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::docs::ChunkStore;
use crate::eval::EvalStrategy;
use crate::index::VectorIndex;
use crate::llm::LlmClient;
use crate::qa::QaEngine;

/// Tunable pipeline parameters, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The context budget admits chunks up to twice this many characters.
    pub max_context_length: usize,
    /// Completion temperature for answer generation.
    pub temperature: f32,
    /// Whether each answer gets a quality evaluation appended.
    pub evaluate_responses: bool,
    pub eval_strategy: EvalStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_context_length: 4000,
            temperature: 0.1,
            evaluate_responses: true,
            eval_strategy: EvalStrategy::Lexical,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_context_length: dotenv::var("MAX_CONTEXT_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_context_length),
            temperature: dotenv::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.temperature),
            evaluate_responses: dotenv::var("EVALUATE_RESPONSES")
                .ok()
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.evaluate_responses),
            eval_strategy: EvalStrategy::from_env(),
        }
    }
}

/// One logged-in user: their loaded index, created once and reused.
pub struct Session {
    pub user_id: String,
    pub index: VectorIndex,
}

/// Sessions keyed by opaque user identifier. The map lock guards insertion;
/// a session itself is immutable after load, so handles are shared as Arcs.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    pub async fn insert(&self, session: Session) -> Arc<Session> {
        let handle = Arc::new(session);
        self.sessions
            .write()
            .await
            .insert(handle.user_id.clone(), handle.clone());
        handle
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AppState {
    pub store: Arc<ChunkStore>,
    pub llm: Arc<LlmClient>,
    pub engine: Arc<QaEngine>,
    pub sessions: SessionStore,
    pub config: PipelineConfig,
}

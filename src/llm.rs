use anyhow::{Context, Result};
use async_trait::async_trait;

/// Embedding oracle: turns texts into vectors. Kept behind a trait so the
/// pipeline and ingestion can be exercised with a deterministic stand-in.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Client for an OpenAI-compatible completion + embedding endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embed_model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model =
            dotenv::var("LLM_MODEL").unwrap_or_else(|_| "qwen/qwen3-8b".to_string());
        let embed_model = dotenv::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-nomic-embed-text-v1.5".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            embed_model,
            api_key,
        })
    }

    /// Resolve an API path against the base URL.
    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/{}", base, path)
        } else {
            format!("{}/v1/{}", base, path)
        }
    }

    /// Single-turn completion at the given temperature.
    pub async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "max_tokens": 2048,
        });

        let mut req = self.client.post(self.endpoint("chat/completions")).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let text = resp.text().await.context("Failed to read LLM response")?;
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // Extract content from choices[0].message.content (handle null)
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.embed_model,
            "input": texts,
        });

        let mut req = self.client.post(self.endpoint("embeddings")).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("Embedding request failed")?;
        let text = resp
            .text()
            .await
            .context("Failed to read embedding response")?;
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse embedding JSON")?;

        let data = json["data"]
            .as_array()
            .context("Embedding response missing data array")?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item["embedding"]
                .as_array()
                .context("Embedding entry missing vector")?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            vectors.push(embedding);
        }

        if vectors.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            );
        }

        Ok(vectors)
    }
}

pub mod ingest;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use cnidarium::{StateDelta, StateWrite, Storage};
use futures::StreamExt;
use tracing::{debug, warn};

use types::{DocMeta, DocumentChunk};

// Key prefixes (no trailing slashes — cnidarium convention)
const CHUNK_PREFIX: &str = "chunk/data";
const VEC_PREFIX: &str = "chunk/vec";
const META_PREFIX: &str = "doc/meta";

fn chunk_key(user_id: &str, chunk_id: &str) -> String {
    format!("{}/{}/{}", CHUNK_PREFIX, user_id, chunk_id)
}
fn vec_key(user_id: &str, chunk_id: &str) -> String {
    format!("{}/{}/{}", VEC_PREFIX, user_id, chunk_id)
}
fn meta_key(user_id: &str, doc_id: &str) -> String {
    format!("{}/{}/{}", META_PREFIX, user_id, doc_id)
}

/// Append-only per-user index of chunks, embeddings, and document metadata.
/// Loaded wholesale at session start; never rewritten in place.
pub struct ChunkStore {
    storage: Storage,
}

impl ChunkStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let prefixes = vec![
            CHUNK_PREFIX.to_string(),
            VEC_PREFIX.to_string(),
            META_PREFIX.to_string(),
        ];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self { storage })
    }

    /// Persist one ingested document: its metadata plus every chunk and its
    /// embedding, in a single commit.
    pub async fn store_document(
        &self,
        user_id: &str,
        meta: &DocMeta,
        chunks: &[(DocumentChunk, Vec<f32>)],
    ) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);

        delta.put_raw(
            meta_key(user_id, &meta.id),
            serde_json::to_vec(meta).context("serialize doc meta")?,
        );
        for (chunk, embedding) in chunks {
            delta.put_raw(
                chunk_key(user_id, &chunk.meta.id),
                serde_json::to_vec(chunk).context("serialize chunk")?,
            );
            delta.put_raw(
                vec_key(user_id, &chunk.meta.id),
                serde_json::to_vec(embedding).context("serialize embedding")?,
            );
        }

        self.storage.commit(delta).await?;
        debug!(
            doc_id = %meta.id,
            user_id,
            chunk_count = chunks.len(),
            "document stored"
        );
        Ok(())
    }

    /// Whether this user has any indexed documents.
    pub async fn has_index(&self, user_id: &str) -> Result<bool> {
        let snapshot = self.storage.latest_snapshot();
        use cnidarium::StateRead;
        let prefix = format!("{}/{}/", META_PREFIX, user_id);
        let mut stream = snapshot.prefix_raw(&prefix);
        while let Some(entry) = stream.next().await {
            match entry {
                Ok(_) => return Ok(true),
                Err(e) => warn!("Error reading doc meta stream: {}", e),
            }
        }
        Ok(false)
    }

    /// Load a user's full index: every chunk paired with its embedding,
    /// ordered by (doc id, chunk index). Chunks without a stored embedding
    /// are skipped with a warning.
    pub async fn load_user(&self, user_id: &str) -> Result<Vec<(DocumentChunk, Vec<f32>)>> {
        let snapshot = self.storage.latest_snapshot();
        use cnidarium::StateRead;

        let chunk_prefix = format!("{}/{}/", CHUNK_PREFIX, user_id);
        let mut stream = snapshot.prefix_raw(&chunk_prefix);
        let mut chunks: Vec<DocumentChunk> = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => match serde_json::from_slice::<DocumentChunk>(&value) {
                    Ok(chunk) => chunks.push(chunk),
                    Err(e) => warn!("Skipping undecodable chunk: {}", e),
                },
                Err(e) => {
                    warn!("Error reading chunk stream: {}", e);
                }
            }
        }

        chunks.sort_by(|a, b| {
            a.meta
                .doc_id
                .cmp(&b.meta.doc_id)
                .then(a.meta.chunk_index.cmp(&b.meta.chunk_index))
        });

        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let bytes = snapshot
                .get_raw(&vec_key(user_id, &chunk.meta.id))
                .await?;
            match bytes {
                Some(bytes) => {
                    let embedding: Vec<f32> =
                        serde_json::from_slice(&bytes).context("deserialize embedding")?;
                    entries.push((chunk, embedding));
                }
                None => {
                    warn!(chunk_id = %chunk.meta.id, "chunk has no stored embedding, skipping");
                }
            }
        }

        Ok(entries)
    }

    /// List a user's documents, newest first.
    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<DocMeta>> {
        let snapshot = self.storage.latest_snapshot();
        use cnidarium::StateRead;
        let prefix = format!("{}/{}/", META_PREFIX, user_id);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => {
                    if let Ok(meta) = serde_json::from_slice::<DocMeta>(&value) {
                        results.push(meta);
                    }
                }
                Err(e) => {
                    warn!("Error reading doc meta stream: {}", e);
                }
            }
        }

        results.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::types::ChunkMeta;
    use super::*;

    fn sample_doc(user: &str) -> (DocMeta, Vec<(DocumentChunk, Vec<f32>)>) {
        let meta = DocMeta {
            id: "doc-1".to_string(),
            name: "resume".to_string(),
            source: format!("file:{}/resume.md", user),
            drive_id: None,
            size: 20,
            chunk_count: 2,
            ingested_at: 1_700_000_000,
        };
        let chunks = (0..2)
            .map(|i| {
                (
                    DocumentChunk {
                        text: format!("chunk number {}", i),
                        meta: ChunkMeta {
                            id: format!("c{}", i),
                            doc_id: "doc-1".to_string(),
                            drive_id: None,
                            title: "resume".to_string(),
                            source: meta.source.clone(),
                            chunk_index: i,
                        },
                    },
                    vec![i as f32, 1.0, 0.0],
                )
            })
            .collect();
        (meta, chunks)
    }

    #[tokio::test]
    async fn test_store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).await.unwrap();

        assert!(!store.has_index("alice").await.unwrap());

        let (meta, chunks) = sample_doc("alice");
        store.store_document("alice", &meta, &chunks).await.unwrap();

        assert!(store.has_index("alice").await.unwrap());
        assert!(!store.has_index("bob").await.unwrap());

        let loaded = store.load_user("alice").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0.meta.chunk_index, 0);
        assert_eq!(loaded[1].0.meta.chunk_index, 1);
        assert_eq!(loaded[0].1, vec![0.0, 1.0, 0.0]);

        let docs = store.list_documents("alice").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "resume");
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).await.unwrap();

        let (meta, chunks) = sample_doc("alice");
        store.store_document("alice", &meta, &chunks).await.unwrap();

        assert!(store.load_user("bob").await.unwrap().is_empty());
        assert!(store.list_documents("bob").await.unwrap().is_empty());
    }
}

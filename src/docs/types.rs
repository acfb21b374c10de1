use serde::{Deserialize, Serialize};

/// Content-addressed document ID (blake3 hex hash).
pub type DocId = String;

/// Metadata for an ingested source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMeta {
    pub id: DocId,
    pub name: String,
    /// e.g. "file:resumes/priya.md" or "drive:1AbC..."
    pub source: String,
    /// Drive file identifier, when the document came from a synced export
    /// that carries one. Local files leave this unset.
    #[serde(default)]
    pub drive_id: Option<String>,
    pub size: usize,
    pub chunk_count: usize,
    pub ingested_at: i64,
}

/// Metadata carried by every chunk, fixed at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// blake3 hex of "{doc_id}:{chunk_index}".
    pub id: String,
    pub doc_id: DocId,
    #[serde(default)]
    pub drive_id: Option<String>,
    /// Document title (file stem for local files).
    pub title: String,
    /// Source path of the originating document.
    pub source: String,
    pub chunk_index: usize,
}

/// The retrieval unit: a bounded slice of a document plus its metadata.
/// Immutable after creation; lives as long as the user's index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub meta: ChunkMeta,
}

impl DocumentChunk {
    /// Identity key used for deduplication across retrieval strategies:
    /// the first available of drive file id, chunk id, or the first 100
    /// characters of the text. Two distinct chunks sharing a 100-character
    /// prefix collide under the last tier; that approximation is inherited
    /// behavior and deliberately kept.
    pub fn identity_key(&self) -> String {
        if let Some(drive_id) = &self.meta.drive_id {
            if !drive_id.is_empty() {
                return format!("drive:{}", drive_id);
            }
        }
        if !self.meta.id.is_empty() {
            return format!("id:{}", self.meta.id);
        }
        let prefix: String = self.text.chars().take(100).collect();
        format!("text:{}", prefix)
    }
}

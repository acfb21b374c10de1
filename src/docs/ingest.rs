use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::types::{ChunkMeta, DocMeta, DocumentChunk};
use super::ChunkStore;
use crate::llm::Embedder;

/// Chunking parameters matching the ingestion splitter: 1000-char chunks
/// with 200 chars of overlap.
pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;

/// How many chunks to embed per oracle call.
const EMBED_BATCH: usize = 32;

pub struct IngestStats {
    pub documents: usize,
    pub chunks: usize,
}

/// Ingest every readable document under `dir` for one user: read, split,
/// embed, persist. Unreadable or unsupported files are skipped with a
/// warning; an empty folder is an error.
pub async fn ingest_folder(
    store: &ChunkStore,
    embedder: &dyn Embedder,
    user_id: &str,
    dir: &Path,
) -> Result<IngestStats> {
    let files = collect_files(dir)
        .with_context(|| format!("Failed to read document folder {:?}", dir))?;
    if files.is_empty() {
        anyhow::bail!("No documents found under {:?}", dir);
    }

    info!(user_id, file_count = files.len(), "Ingesting document folder");

    let mut stats = IngestStats {
        documents: 0,
        chunks: 0,
    };

    for path in files {
        let text = match read_document(&path) {
            Ok(Some(text)) => text,
            Ok(None) => continue, // unsupported extension
            Err(e) => {
                warn!(path = %path.display(), "Skipping unreadable file: {}", e);
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }

        let doc_id = blake3::hash(text.as_bytes()).to_hex().to_string();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        let source = format!("file:{}", path.display());

        let pieces = split_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| DocumentChunk {
                text: piece,
                meta: ChunkMeta {
                    id: blake3::hash(format!("{}:{}", doc_id, i).as_bytes())
                        .to_hex()
                        .to_string(),
                    doc_id: doc_id.clone(),
                    drive_id: None,
                    title: title.clone(),
                    source: source.clone(),
                    chunk_index: i,
                },
            })
            .collect();

        let mut embedded: Vec<(DocumentChunk, Vec<f32>)> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .with_context(|| format!("Embedding failed for {}", source))?;
            for (chunk, vector) in batch.iter().zip(vectors) {
                embedded.push((chunk.clone(), vector));
            }
        }

        let meta = DocMeta {
            id: doc_id.clone(),
            name: title,
            source,
            drive_id: None,
            size: text.len(),
            chunk_count: embedded.len(),
            ingested_at: chrono::Utc::now().timestamp(),
        };

        store.store_document(user_id, &meta, &embedded).await?;
        stats.documents += 1;
        stats.chunks += embedded.len();
        info!(doc_id = %doc_id, name = %meta.name, chunks = embedded.len(), "document ingested");
    }

    if stats.documents == 0 {
        anyhow::bail!("No readable documents under {:?}", dir);
    }

    Ok(stats)
}

/// Recursively collect file paths under `dir`, sorted for stable ids.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Read one document as plain text. Returns `Ok(None)` for unsupported
/// extensions. HTML exports are converted through html2text.
fn read_document(path: &Path) -> Result<Option<String>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" | "csv" => {
            let bytes = std::fs::read(path)?;
            Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
        }
        "html" | "htm" => {
            let bytes = std::fs::read(path)?;
            let text = html2text::from_read(&bytes[..], 120)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).to_string());
            Ok(Some(text))
        }
        _ => Ok(None),
    }
}

/// Split text into overlapping chunks, preferring a sentence boundary near
/// the end of each chunk. Character-based, so multibyte input is safe.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }
    if total <= chunk_size {
        return vec![text.trim().to_string()];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + chunk_size).min(total);
        let window: String = chars[start..end].iter().collect();

        let piece = if end < total {
            trim_to_sentence_boundary(&window)
        } else {
            window
        };

        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        start += step;
    }

    chunks
}

/// Cut the chunk at the last sentence ending found in its final fifth.
/// Falls back to the full window when no boundary exists there.
fn trim_to_sentence_boundary(window: &str) -> String {
    const ENDINGS: [&str; 6] = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

    let chars: Vec<char> = window.chars().collect();
    let search_start_char = (chars.len() * 4) / 5;
    let search_start_byte: usize = chars[..search_start_char].iter().map(|c| c.len_utf8()).sum();
    let tail = &window[search_start_byte..];

    let mut best: Option<usize> = None;
    for ending in ENDINGS {
        if let Some(pos) = tail.rfind(ending) {
            let cut = search_start_byte + pos + ending.len();
            best = Some(best.map_or(cut, |b: usize| b.max(cut)));
        }
    }

    match best {
        Some(cut) => window[..cut].to_string(),
        None => window.to_string(),
    }
}

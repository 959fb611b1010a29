//! Knowledge index and corpus ingestion
//!
//! The corpus is versioned as a whole: ingestion produces a complete new
//! index generation, and the handle swaps it atomically. Queries see either
//! the old or the new generation, never a partial one. Chunks are immutable
//! after ingestion.

use crate::error::{CoreError, Result};
use crate::models::{ChunkMetadata, FreshnessTier, KnowledgeChunk};
use crate::retrieval::EmbeddingProvider;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A source document from the external content pipeline: front-matter
/// metadata plus pre-chunked text.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    pub doc_id: String,
    pub doc_type: String,
    /// Refresh cadence from the front matter, mapped to a freshness tier
    pub freshness: FreshnessTier,
    pub tags: Vec<String>,
    pub chunks: Vec<String>,
}

/// One immutable generation of the knowledge base.
pub struct KnowledgeIndex {
    pub generation: u64,
    chunks: Vec<KnowledgeChunk>,
}

impl KnowledgeIndex {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            chunks: Vec::new(),
        }
    }

    pub fn chunks(&self) -> &[KnowledgeChunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Stable id for deduplication: `source:chunk_index` when a source exists,
/// else a hash of the leading content.
pub fn stable_chunk_id(source: &str, chunk_index: usize, text: &str) -> String {
    if !source.is_empty() {
        return format!("{}:{}", source, chunk_index);
    }
    let mut hasher = Sha256::new();
    hasher.update(&text.as_bytes()[..text.len().min(256)]);
    format!("hash:{}", hex::encode(hasher.finalize()))
}

/// Build a new index generation from a versioned document set, embedding
/// each chunk through the provider.
pub async fn build_index(
    documents: &[CorpusDocument],
    embedder: &dyn EmbeddingProvider,
    generation: u64,
) -> Result<KnowledgeIndex> {
    let mut chunks = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for doc in documents {
        let total = doc.chunks.len();
        for (i, text) in doc.chunks.iter().enumerate() {
            if text.trim().is_empty() {
                continue;
            }
            let id = stable_chunk_id(&doc.doc_id, i, text);
            if !seen.insert(id.clone()) {
                return Err(CoreError::IndexError(format!("duplicate chunk id {}", id)));
            }

            let embedding = embedder.embed(text).await?;
            chunks.push(KnowledgeChunk {
                id,
                doc_id: doc.doc_id.clone(),
                text: text.clone(),
                embedding,
                metadata: ChunkMetadata {
                    source: doc.doc_id.clone(),
                    doc_type: doc.doc_type.clone(),
                    chunk_index: i,
                    total_chunks: total,
                    freshness: doc.freshness,
                    tags: doc.tags.clone(),
                },
            });
        }
    }

    info!(
        generation,
        chunk_count = chunks.len(),
        document_count = documents.len(),
        "Built knowledge index"
    );

    Ok(KnowledgeIndex { generation, chunks })
}

/// Parse one markdown corpus document: optional `---` front matter with
/// `key: value` lines (type, refresh, tags), body split into paragraph
/// chunks on blank lines.
pub fn parse_document(doc_id: &str, raw: &str) -> CorpusDocument {
    let mut doc_type = "note".to_string();
    let mut freshness = FreshnessTier::Evergreen;
    let mut tags = Vec::new();

    let body = match raw.strip_prefix("---") {
        Some(rest) => match rest.split_once("\n---") {
            Some((front, body)) => {
                for line in front.lines() {
                    let Some((key, value)) = line.split_once(':') else {
                        continue;
                    };
                    let value = value.trim();
                    match key.trim() {
                        "type" => doc_type = value.to_string(),
                        "refresh" => {
                            freshness = match value {
                                "live" | "intraday" => FreshnessTier::Live,
                                "daily" | "weekly" => FreshnessTier::Recent,
                                _ => FreshnessTier::Evergreen,
                            }
                        }
                        "tags" => {
                            tags = value
                                .split(',')
                                .map(|t| t.trim().to_string())
                                .filter(|t| !t.is_empty())
                                .collect()
                        }
                        _ => {}
                    }
                }
                body
            }
            None => raw,
        },
        None => raw,
    };

    let chunks = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    CorpusDocument {
        doc_id: doc_id.to_string(),
        doc_type,
        freshness,
        tags,
        chunks,
    }
}

/// Read every `.md` file in a directory into corpus documents, keyed by
/// file name. Ordering is stable so index builds are reproducible.
pub fn load_corpus_dir(dir: &std::path::Path) -> Result<Vec<CorpusDocument>> {
    let mut documents = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let doc_id = entry.file_name().to_string_lossy().into_owned();
        let raw = std::fs::read_to_string(&path)?;
        documents.push(parse_document(&doc_id, &raw));
    }

    info!(directory = %dir.display(), document_count = documents.len(), "Loaded corpus");
    Ok(documents)
}

/// Shared handle over the current index generation. Reads clone an `Arc`
/// and never block queries; rebuilds swap the whole generation at once.
#[derive(Clone)]
pub struct IndexHandle {
    current: Arc<RwLock<Arc<KnowledgeIndex>>>,
}

impl IndexHandle {
    pub fn new(index: KnowledgeIndex) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    pub fn empty() -> Self {
        Self::new(KnowledgeIndex::empty())
    }

    /// Snapshot of the current generation.
    pub async fn snapshot(&self) -> Arc<KnowledgeIndex> {
        self.current.read().await.clone()
    }

    /// Atomically replace the index. In-flight queries keep their old
    /// snapshot; new queries see the new generation.
    pub async fn swap(&self, index: KnowledgeIndex) {
        let generation = index.generation;
        let mut guard = self.current.write().await;
        *guard = Arc::new(index);
        info!(generation, "Swapped knowledge index generation");
    }
}

//! Retrieval fusion engine
//!
//! Two independent strategies run against the same index snapshot (dense
//! embedding similarity and sparse lexical overlap) and their ranked
//! candidate lists are merged with reciprocal-rank fusion. The merge is a
//! pure function over the lists, so the scoring and tie-break rules are
//! unit-testable without an embedding backend.

pub mod index;

use crate::error::Result;
use crate::models::{KnowledgeChunk, RetrievalResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use index::{
    build_index, load_corpus_dir, parse_document, stable_chunk_id, CorpusDocument, IndexHandle,
    KnowledgeIndex,
};

/// RRF constant: score contribution is `1 / (RRF_K + rank)`, rank from 1.
pub const RRF_K: f64 = 60.0;

/// Floor on how many candidates each strategy contributes before fusion.
/// Widened to `top_k` when the caller asks for more.
const CANDIDATES_PER_STRATEGY: usize = 8;

pub const STRATEGY_DENSE: &str = "dense";
pub const STRATEGY_SPARSE: &str = "sparse";

//
// ================= Embeddings =================
//

/// Per-query embedding function. Remote providers may suspend; the hashing
/// provider below is local and deterministic.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hashing embedder. Tokens are hashed into a fixed
/// number of buckets and the vector is L2-normalized. No network, identical
/// output for identical input. Used for tests and offline corpora.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0; 8]))
                as usize
                % self.dims;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

//
// ================= Fusion (pure) =================
//

/// Merge ranked candidate-id lists with reciprocal-rank fusion.
///
/// For each id, the fused score is the sum over lists of `1/(RRF_K + rank)`
/// with rank starting at 1; ids absent from a list contribute nothing from
/// it. Output is deduplicated and ordered by descending score; ties break
/// by first appearance across the lists in order, then by id.
pub fn rrf_merge(lists: &[(&'static str, Vec<String>)]) -> Vec<(String, f64, Vec<&'static str>)> {
    struct Entry {
        score: f64,
        first_seen: usize,
        strategies: Vec<&'static str>,
    }

    let mut entries: HashMap<String, Entry> = HashMap::new();
    let mut order = 0usize;

    for (strategy, ids) in lists {
        for (rank, id) in ids.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f64);
            let entry = entries.entry(id.clone()).or_insert_with(|| {
                let e = Entry {
                    score: 0.0,
                    first_seen: order,
                    strategies: Vec::new(),
                };
                order += 1;
                e
            });
            entry.score += contribution;
            if !entry.strategies.contains(strategy) {
                entry.strategies.push(strategy);
            }
        }
    }

    let mut merged: Vec<(String, f64, Vec<&'static str>, usize)> = entries
        .into_iter()
        .map(|(id, e)| (id, e.score, e.strategies, e.first_seen))
        .collect();

    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.3.cmp(&b.3))
            .then(a.0.cmp(&b.0))
    });

    merged
        .into_iter()
        .map(|(id, score, strategies, _)| (id, score, strategies))
        .collect()
}

//
// ================= Strategies =================
//

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Dense ranking: cosine similarity of normalized embeddings. Ties break
/// by chunk id so identical inputs produce identical rankings.
fn dense_candidates(index: &KnowledgeIndex, query_embedding: &[f32], k: usize) -> Vec<String> {
    let mut scored: Vec<(&KnowledgeChunk, f32)> = index
        .chunks()
        .iter()
        .map(|c| (c, cosine(&c.embedding, query_embedding)))
        .filter(|(_, s)| *s > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.id.cmp(&b.0.id))
    });
    scored.into_iter().take(k).map(|(c, _)| c.id.clone()).collect()
}

/// Sparse ranking: count of distinct query tokens appearing in the chunk
/// text or tags.
fn sparse_candidates(index: &KnowledgeIndex, query: &str, k: usize) -> Vec<String> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(&KnowledgeChunk, usize)> = index
        .chunks()
        .iter()
        .map(|c| {
            let haystack = c.text.to_lowercase();
            let overlap = tokens
                .iter()
                .filter(|t| haystack.contains(*t) || c.metadata.tags.iter().any(|tag| tag == *t))
                .count();
            (c, overlap)
        })
        .filter(|(_, s)| *s > 0)
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
    scored.into_iter().take(k).map(|(c, _)| c.id.clone()).collect()
}

//
// ================= Engine =================
//

pub struct RetrievalEngine {
    handle: IndexHandle,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalEngine {
    pub fn new(handle: IndexHandle, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { handle, embedder }
    }

    pub fn handle(&self) -> &IndexHandle {
        &self.handle
    }

    /// Ranked, deduplicated results, at most `top_k`. Idempotent for the
    /// same index generation and query. Empty corpus or empty query is an
    /// empty result, not an error.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let index = self.handle.snapshot().await;
        if index.is_empty() || query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let per_strategy = CANDIDATES_PER_STRATEGY.max(top_k);
        let query_embedding = self.embedder.embed(query).await?;
        let dense = dense_candidates(&index, &query_embedding, per_strategy);
        let sparse = sparse_candidates(&index, query, per_strategy);

        let merged = rrf_merge(&[(STRATEGY_DENSE, dense), (STRATEGY_SPARSE, sparse)]);

        let by_id: HashMap<&str, &KnowledgeChunk> =
            index.chunks().iter().map(|c| (c.id.as_str(), c)).collect();

        let results: Vec<RetrievalResult> = merged
            .into_iter()
            .take(top_k)
            .filter_map(|(id, fused_score, strategies)| {
                by_id.get(id.as_str()).map(|chunk| RetrievalResult {
                    chunk: (*chunk).clone(),
                    fused_score,
                    strategies,
                })
            })
            .collect();

        debug!(
            generation = index.generation,
            query_len = query.len(),
            result_count = results.len(),
            "Retrieval complete"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FreshnessTier;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    async fn engine_with(docs: &[CorpusDocument]) -> RetrievalEngine {
        let embedder = Arc::new(HashingEmbedder::default());
        let index = build_index(docs, embedder.as_ref(), 1).await.unwrap();
        RetrievalEngine::new(IndexHandle::new(index), embedder)
    }

    fn doc(id: &str, tags: &[&str], chunks: &[&str]) -> CorpusDocument {
        CorpusDocument {
            doc_id: id.to_string(),
            doc_type: "playbook".to_string(),
            freshness: FreshnessTier::Evergreen,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            chunks: chunks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_rrf_reference_value_for_double_first_place() {
        // A chunk ranked 1st in both strategy lists scores exactly
        // 2 * 1/(RRF_K + 1).
        let merged = rrf_merge(&[
            ("dense", ids(&["a", "b"])),
            ("sparse", ids(&["a", "c"])),
        ]);

        assert_eq!(merged[0].0, "a");
        let expected = 2.0 / (RRF_K + 1.0);
        assert!((merged[0].1 - expected).abs() < 1e-12);
        assert_eq!(merged[0].2, vec!["dense", "sparse"]);
    }

    #[test]
    fn test_rrf_dedup_and_ordering() {
        let merged = rrf_merge(&[
            ("dense", ids(&["x", "y", "z"])),
            ("sparse", ids(&["y", "x"])),
        ]);

        let names: Vec<&str> = merged.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(names.len(), 3);
        // x: 1/61 + 1/62, y: 1/62 + 1/61. Tied; x was seen first.
        assert_eq!(names[0], "x");
        assert_eq!(names[1], "y");
        assert_eq!(names[2], "z");

        for pair in merged.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_rrf_tie_break_by_id_within_one_list() {
        // Single list: each id has a distinct rank, no score ties. Two
        // lists granting equal ranks to unseen ids tie-break by insertion
        // order then id.
        let merged = rrf_merge(&[("dense", ids(&["b"])), ("sparse", ids(&["a"]))]);
        assert_eq!(merged[0].0, "b");
        assert_eq!(merged[1].0, "a");
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let embedder = Arc::new(HashingEmbedder::default());
        let engine = RetrievalEngine::new(IndexHandle::empty(), embedder);
        let results = engine.retrieve("sector rotation", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let engine = engine_with(&[doc("a.md", &[], &["inflation and rates"])]).await;
        assert!(engine.retrieve("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_bounded_sorted_unique() {
        let engine = engine_with(&[
            doc("rotation.md", &["sectors", "rotation"], &[
                "sector rotation in high inflation regimes favors energy",
                "defensive sectors hold up in risk-off environments",
            ]),
            doc("macro.md", &["macro"], &[
                "inflation and growth drive the macro regime",
            ]),
        ])
        .await;

        let results = engine.retrieve("sector rotation inflation", 2).await.unwrap();
        assert!(results.len() <= 2);

        let mut seen = std::collections::HashSet::new();
        for r in &results {
            assert!(seen.insert(r.chunk.id.clone()), "duplicate chunk id");
        }
        for pair in results.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
        }
    }

    #[tokio::test]
    async fn test_top_k_larger_than_corpus_returns_all() {
        let engine = engine_with(&[doc("one.md", &[], &["sector rotation basics"])]).await;
        let results = engine.retrieve("sector rotation", 50).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_large_top_k_not_capped_by_strategy_floor() {
        // 12 matching chunks, more than the per-strategy candidate floor.
        let chunks: Vec<String> = (0..12)
            .map(|i| format!("sector rotation note number {}", i))
            .collect();
        let refs: Vec<&str> = chunks.iter().map(|s| s.as_str()).collect();
        let engine = engine_with(&[doc("notes.md", &["rotation"], &refs)]).await;

        let results = engine.retrieve("sector rotation note", 20).await.unwrap();
        assert_eq!(results.len(), 12);
    }

    #[tokio::test]
    async fn test_idempotent_for_same_snapshot() {
        let engine = engine_with(&[
            doc("a.md", &[], &["energy leads in inflationary regimes"]),
            doc("b.md", &[], &["tech leads in disinflationary growth"]),
        ])
        .await;

        let first = engine.retrieve("inflation regime", 5).await.unwrap();
        let second = engine.retrieve("inflation regime", 5).await.unwrap();
        let ids_a: Vec<_> = first.iter().map(|r| r.chunk.id.clone()).collect();
        let ids_b: Vec<_> = second.iter().map(|r| r.chunk.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_results_carry_freshness_metadata() {
        let engine = engine_with(&[doc("play.md", &["sectors"], &["rotation playbook"])]).await;
        let results = engine.retrieve("rotation playbook", 3).await.unwrap();
        assert_eq!(results[0].chunk.metadata.freshness, FreshnessTier::Evergreen);
        assert_eq!(results[0].chunk.metadata.source, "play.md");
    }
}

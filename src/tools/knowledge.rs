//! Knowledge base search tool
//!
//! Thin adapter between the registry and the retrieval engine: the fusion
//! logic stays in `retrieval`, this tool only shapes results into payloads
//! and citations.

use crate::error::Result;
use crate::models::Citation;
use crate::retrieval::RetrievalEngine;
use crate::tools::{ArgField, ArgSchema, Tool, ToolPayload};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_TOP_K: usize = 4;
const SNIPPET_CHARS: usize = 600;

pub struct KnowledgeSearchTool {
    engine: Arc<RetrievalEngine>,
}

impl KnowledgeSearchTool {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

/// Truncate on a char boundary so multi-byte text never splits mid-glyph.
pub(crate) fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[async_trait::async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &'static str {
        "knowledge_search"
    }

    fn description(&self) -> &'static str {
        "Search the curated market knowledge base (playbooks, sector notes, macro frameworks) \
         for passages relevant to a question"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![ArgField::required_string(
            "query",
            "Natural-language question to search the knowledge base for",
        )])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let query = args["query"].as_str().unwrap_or_default();
        let results = self.engine.retrieve(query, DEFAULT_TOP_K).await?;
        debug!(query, hits = results.len(), "Knowledge search");

        let mut passages = Vec::with_capacity(results.len());
        let mut citations = Vec::with_capacity(results.len());
        for r in &results {
            let meta = &r.chunk.metadata;
            passages.push(json!({
                "source": meta.source,
                "chunk": meta.chunk_index,
                "doc_type": meta.doc_type,
                "score": r.fused_score,
                "text": snippet(&r.chunk.text),
            }));
            citations.push(Citation {
                source: meta.source.clone(),
                chunk: Some(meta.chunk_index),
                freshness: meta.freshness,
            });
        }

        Ok(ToolPayload {
            payload: json!({ "passages": passages }),
            citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FreshnessTier;
    use crate::retrieval::{build_index, CorpusDocument, HashingEmbedder, IndexHandle};

    async fn engine_with(docs: &[CorpusDocument]) -> Arc<RetrievalEngine> {
        let embedder = Arc::new(HashingEmbedder::default());
        let index = build_index(docs, embedder.as_ref(), 1).await.unwrap();
        Arc::new(RetrievalEngine::new(IndexHandle::new(index), embedder))
    }

    fn doc(id: &str, chunks: &[&str]) -> CorpusDocument {
        CorpusDocument {
            doc_id: id.to_string(),
            doc_type: "playbook".to_string(),
            freshness: FreshnessTier::Evergreen,
            tags: Vec::new(),
            chunks: chunks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_search_returns_passages_with_citations() {
        let engine = engine_with(&[doc(
            "macro_drivers.md",
            &["Rising rates pressure growth sectors", "Utilities act defensively"],
        )])
        .await;
        let tool = KnowledgeSearchTool::new(engine);

        let output = tool
            .execute(&json!({ "query": "rates and growth sectors" }))
            .await
            .unwrap();

        let passages = output.payload["passages"].as_array().unwrap();
        assert!(!passages.is_empty());
        assert_eq!(passages[0]["source"], "macro_drivers.md");
        assert_eq!(output.citations.len(), passages.len());
        assert_eq!(output.citations[0].source, "macro_drivers.md");
    }

    #[tokio::test]
    async fn test_empty_corpus_yields_empty_payload() {
        let embedder = Arc::new(HashingEmbedder::default());
        let engine = Arc::new(RetrievalEngine::new(IndexHandle::empty(), embedder));
        let tool = KnowledgeSearchTool::new(engine);

        let output = tool.execute(&json!({ "query": "anything" })).await.unwrap();
        assert!(output.payload["passages"].as_array().unwrap().is_empty());
        assert!(output.citations.is_empty());
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "é".repeat(SNIPPET_CHARS + 50);
        let s = snippet(&long);
        assert!(s.chars().count() <= SNIPPET_CHARS + 1);
        assert!(s.ends_with('…'));
    }
}

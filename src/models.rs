//! Core data models for the market intelligence desk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RespondLanguage {
    #[default]
    English,
    Spanish,
    French,
    German,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Concise,
    Detailed,
}

/// How quickly a data category is expected to become stale. Governs
/// disclosure language downstream; the retrieval engine only carries it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessTier {
    /// Intraday market data
    Live,
    /// Refreshed daily/weekly (sector stats, regime reads)
    Recent,
    /// Playbooks and educational material
    Evergreen,
}

//
// ================= Turns =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// A tool Turn pairs the model's calls with their results for the round.
    pub fn tool_round(calls: Vec<ToolCall>, results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            text: String::new(),
            tool_calls: calls,
            tool_results: results,
            created_at: Utc::now(),
        }
    }
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id matching this call to exactly one ToolResult
    pub id: Uuid,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: Uuid,
    pub success: bool,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl ToolResult {
    pub fn ok(call_id: Uuid, payload: serde_json::Value, citations: Vec<Citation>) -> Self {
        Self {
            call_id,
            success: true,
            payload,
            citations,
        }
    }

    pub fn failed(call_id: Uuid, kind: &str, detail: impl fmt::Display) -> Self {
        Self {
            call_id,
            success: false,
            payload: serde_json::json!({ "error": kind, "detail": detail.to_string() }),
            citations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<usize>,
    pub freshness: FreshnessTier,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk {
            Some(n) => write!(f, "{} (chunk {})", self.source, n),
            None => write!(f, "{}", self.source),
        }
    }
}

//
// ================= Knowledge base =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Stable id: `source:chunk_index`, else a content hash
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub doc_type: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub freshness: FreshnessTier,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A chunk surfaced for one query, with its fused score. Transient,
/// never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: KnowledgeChunk,
    pub fused_score: f64,
    pub strategies: Vec<&'static str>,
}

//
// ================= Cost tracking =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CostRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

//
// ================= Generation config =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub language: RespondLanguage,
    pub verbosity: Verbosity,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
            language: RespondLanguage::English,
            verbosity: Verbosity::Concise,
        }
    }
}

impl GenerationConfig {
    /// Clamp sampling knobs into [0, 1] and cap max_tokens at 1024.
    pub fn clamped(mut self) -> Self {
        self.temperature = self.temperature.clamp(0.0, 1.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self.max_tokens = self.max_tokens.min(1024);
        self
    }
}

//
// ================= Presentation boundary =================
//

/// The sole output contract consumed by the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// USD cost of this turn only
    pub cost_delta: f64,
    pub language: RespondLanguage,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RespondLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RespondLanguage::English => "English",
            RespondLanguage::Spanish => "Spanish",
            RespondLanguage::French => "French",
            RespondLanguage::German => "German",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_clamping() {
        let cfg = GenerationConfig {
            temperature: 3.0,
            top_p: -0.5,
            max_tokens: 9000,
            ..Default::default()
        }
        .clamped();

        assert_eq!(cfg.temperature, 1.0);
        assert_eq!(cfg.top_p, 0.0);
        assert_eq!(cfg.max_tokens, 1024);
    }

    #[test]
    fn test_citation_display() {
        let with_chunk = Citation {
            source: "macro_drivers.md".to_string(),
            chunk: Some(2),
            freshness: FreshnessTier::Evergreen,
        };
        assert_eq!(with_chunk.to_string(), "macro_drivers.md (chunk 2)");

        let without = Citation {
            source: "sector_notes.md".to_string(),
            chunk: None,
            freshness: FreshnessTier::Recent,
        };
        assert_eq!(without.to_string(), "sector_notes.md");
    }
}

//! Market-data tools
//!
//! HTTP-backed collaborators behind the typed tool contract. The market
//! data service exposes sector performance, regime snapshots, ticker
//! comparisons and reference lookups; this module only shapes requests
//! and responses, the analysis itself happens upstream or in the model.

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::models::Citation;
use crate::prompts::{market_pulse_query, sector_analysis_query, ticker_fundamentals_query};
use crate::retrieval::RetrievalEngine;
use crate::tools::knowledge::{snippet, KnowledgeSearchTool};
use crate::tools::{ArgField, ArgKind, ArgSchema, Tool, ToolPayload, ToolRegistry};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ANALYSIS_PERIODS: &[&str] = &["1wk", "1mo", "3mo", "6mo", "1y"];

/// Yahoo-style sector names to their SPDR sector ETF symbols.
const SECTOR_ETF_MAP: &[(&str, &str)] = &[
    ("Technology", "XLK"),
    ("Financial Services", "XLF"),
    ("Healthcare", "XLV"),
    ("Consumer Cyclical", "XLY"),
    ("Consumer Defensive", "XLP"),
    ("Energy", "XLE"),
    ("Industrials", "XLI"),
    ("Basic Materials", "XLB"),
    ("Utilities", "XLU"),
    ("Real Estate", "XLRE"),
    ("Communication Services", "XLC"),
];

/// Resolve a sector name to its ETF symbol. An unmatched name is an
/// explicit error, never a silent default symbol.
pub fn sector_etf(sector: &str) -> Result<&'static str> {
    SECTOR_ETF_MAP
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(sector.trim()))
        .map(|(_, etf)| *etf)
        .ok_or_else(|| CoreError::NoMapping(format!("no ETF mapping for sector '{}'", sector)))
}

//
// ================= HTTP client =================
//

#[derive(Clone)]
pub struct MarketApiClient {
    client: Client,
    base_url: String,
}

impl MarketApiClient {
    pub fn new(base_url: &str, call_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(call_timeout)
            .build()
            .map_err(|e| CoreError::ConfigError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST with one bounded retry on transport failure. HTTP error
    /// statuses are not retried; the upstream already saw the request.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let mut last_err = None;
        for attempt in 0..2 {
            let sent = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    warn!(path, attempt, error = %e, "Market API request failed");
                    last_err = Some(e);
                    continue;
                }
            };

            let status = response.status();
            let body: Value = response.json().await.map_err(|e| {
                CoreError::ToolExecutionFailed(format!("invalid JSON from {}: {}", path, e))
            })?;

            if !status.is_success() {
                return Err(CoreError::ToolExecutionFailed(format!(
                    "market API returned {} for {}: {}",
                    status, path, body
                )));
            }

            debug!(path, attempt, "Market API call succeeded");
            return Ok(body);
        }

        Err(CoreError::ToolExecutionFailed(format!(
            "market API unreachable for {}: {}",
            path,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }
}

fn period_field() -> ArgField {
    ArgField::optional_choice("period", ANALYSIS_PERIODS, "Analysis period")
}

fn period_of(args: &Value) -> &str {
    args["period"].as_str().unwrap_or("1wk")
}

/// Passages attached to a structured payload under `knowledge_context`.
const KNOWLEDGE_CONTEXT_K: usize = 3;

/// Pull knowledge-base passages for a canned query and attach them to the
/// tool payload, so one round carries both the numbers and the playbook
/// context. An empty corpus leaves the payload untouched.
async fn enrich_with_knowledge(
    engine: &RetrievalEngine,
    query: &str,
    data: &mut Value,
) -> Result<Vec<Citation>> {
    let results = engine.retrieve(query, KNOWLEDGE_CONTEXT_K).await?;
    if results.is_empty() {
        return Ok(Vec::new());
    }

    let mut passages = Vec::with_capacity(results.len());
    let mut citations = Vec::with_capacity(results.len());
    for r in &results {
        let meta = &r.chunk.metadata;
        passages.push(json!({
            "source": meta.source,
            "chunk": meta.chunk_index,
            "text": snippet(&r.chunk.text),
        }));
        citations.push(Citation {
            source: meta.source.clone(),
            chunk: Some(meta.chunk_index),
            freshness: meta.freshness,
        });
    }
    data["knowledge_context"] = json!(passages);
    Ok(citations)
}

//
// ================= Tools =================
//

/// Sector ETF performance ranking over a period.
pub struct SectorStrengthTool {
    api: MarketApiClient,
    engine: Arc<RetrievalEngine>,
}

impl SectorStrengthTool {
    pub fn new(api: MarketApiClient, engine: Arc<RetrievalEngine>) -> Self {
        Self { api, engine }
    }
}

#[async_trait::async_trait]
impl Tool for SectorStrengthTool {
    fn name(&self) -> &'static str {
        "sector_strength"
    }

    fn description(&self) -> &'static str {
        "Rank sector ETF performance over a period (1wk to 1y) to identify rotation \
         and relative strength"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![
            period_field(),
            ArgField {
                name: "focus_sector",
                kind: ArgKind::String,
                required: false,
                one_of: &[],
                description: "Sector name to pull knowledge-base context for, e.g. 'Energy'",
            },
        ])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let body = json!({ "period": period_of(args) });
        let mut data = self.api.post_json("/api/v1/sectors/performance", &body).await?;

        let citations = match args["focus_sector"].as_str() {
            Some(sector) => {
                enrich_with_knowledge(&self.engine, &sector_analysis_query(sector), &mut data)
                    .await?
            }
            None => Vec::new(),
        };
        Ok(ToolPayload {
            payload: data,
            citations,
        })
    }
}

/// Regime classification plus key indicator snapshot (SPX, VIX, DXY, 10Y).
pub struct MarketRegimeTool {
    api: MarketApiClient,
    engine: Arc<RetrievalEngine>,
}

impl MarketRegimeTool {
    pub fn new(api: MarketApiClient, engine: Arc<RetrievalEngine>) -> Self {
        Self { api, engine }
    }
}

#[async_trait::async_trait]
impl Tool for MarketRegimeTool {
    fn name(&self) -> &'static str {
        "market_regime"
    }

    fn description(&self) -> &'static str {
        "Classify the market regime (risk-on vs risk-off) from SPX, VIX, DXY and 10Y \
         Treasury moves, with top-performing sectors"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![
            period_field(),
            ArgField {
                name: "top_n_sectors",
                kind: ArgKind::Number,
                required: false,
                one_of: &[],
                description: "Number of top sectors to include (1-10)",
            },
        ])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let top_n = args["top_n_sectors"].as_u64().unwrap_or(3).clamp(1, 10);
        let body = json!({ "period": period_of(args), "top_n_sectors": top_n });
        let mut data = self.api.post_json("/api/v1/market/regime", &body).await?;

        let citations = enrich_with_knowledge(&self.engine, market_pulse_query(), &mut data).await?;
        Ok(ToolPayload {
            payload: data,
            citations,
        })
    }
}

/// Single-ticker performance compared to the S&P 500 and its sector ETF.
pub struct TickerAnalysisTool {
    api: MarketApiClient,
    engine: Arc<RetrievalEngine>,
}

impl TickerAnalysisTool {
    pub fn new(api: MarketApiClient, engine: Arc<RetrievalEngine>) -> Self {
        Self { api, engine }
    }
}

#[async_trait::async_trait]
impl Tool for TickerAnalysisTool {
    fn name(&self) -> &'static str {
        "ticker_analysis"
    }

    fn description(&self) -> &'static str {
        "Analyze one ticker's performance versus the S&P 500 and its sector ETF"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![
            ArgField::required_string("ticker", "Ticker symbol, e.g. AAPL"),
            period_field(),
        ])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let ticker = args["ticker"].as_str().unwrap_or_default().to_uppercase();
        let body = json!({ "ticker": ticker, "period": period_of(args) });
        let mut data = self.api.post_json("/api/v1/ticker/analysis", &body).await?;

        // The upstream reports the company's sector by name; resolve it to
        // the benchmark ETF here so a gap surfaces as a hard error.
        let mut citations = Vec::new();
        if let Some(sector) = data["sector"].as_str().map(str::to_string) {
            let etf = sector_etf(&sector)?;
            data["sector_etf"] = json!(etf);
            citations = enrich_with_knowledge(
                &self.engine,
                &ticker_fundamentals_query(&ticker, &sector),
                &mut data,
            )
            .await?;
        }
        Ok(ToolPayload {
            payload: data,
            citations,
        })
    }
}

/// US market holiday calendar check.
pub struct MarketHolidayTool {
    api: MarketApiClient,
}

impl MarketHolidayTool {
    pub fn new(api: MarketApiClient) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for MarketHolidayTool {
    fn name(&self) -> &'static str {
        "market_holiday"
    }

    fn description(&self) -> &'static str {
        "Check whether US markets are open on a date, and list upcoming market holidays"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![ArgField {
            name: "date",
            kind: ArgKind::String,
            required: false,
            one_of: &[],
            description: "Date to check (YYYY-MM-DD), defaults to today",
        }])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let body = match args["date"].as_str() {
            Some(d) => json!({ "date": d }),
            None => json!({}),
        };
        let data = self.api.post_json("/api/v1/market/holidays", &body).await?;
        Ok(ToolPayload::data(data))
    }
}

/// Background/reference lookup for companies, indices and financial terms.
pub struct WikipediaLookupTool {
    api: MarketApiClient,
}

impl WikipediaLookupTool {
    pub fn new(api: MarketApiClient) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for WikipediaLookupTool {
    fn name(&self) -> &'static str {
        "wikipedia_lookup"
    }

    fn description(&self) -> &'static str {
        "Look up encyclopedic background on a company, index or financial concept"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![ArgField::required_string(
            "topic",
            "Topic to look up, e.g. 'S&P 500' or 'NVIDIA'",
        )])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let body = json!({ "topic": args["topic"].as_str().unwrap_or_default() });
        let data = self.api.post_json("/api/v1/reference/wikipedia", &body).await?;
        Ok(ToolPayload::data(data))
    }
}

/// Live web search. Registered only when explicitly enabled.
pub struct WebSearchTool {
    api: MarketApiClient,
}

impl WebSearchTool {
    pub fn new(api: MarketApiClient) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for current market news and information not in the knowledge base"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new(vec![ArgField::required_string("query", "Search query")])
    }

    async fn execute(&self, args: &Value) -> Result<ToolPayload> {
        let body = json!({ "query": args["query"].as_str().unwrap_or_default() });
        let data = self.api.post_json("/api/v1/search/web", &body).await?;
        Ok(ToolPayload::data(data))
    }
}

/// Build the production registry: knowledge search always, market tools
/// when a data service is configured, web search only when enabled.
pub fn create_default_registry(
    config: &CoreConfig,
    engine: Arc<RetrievalEngine>,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(KnowledgeSearchTool::new(Arc::clone(&engine))));

    if let Some(base_url) = &config.market_api_base {
        let api = MarketApiClient::new(base_url, config.call_timeout)?;
        registry.register(Arc::new(SectorStrengthTool::new(
            api.clone(),
            Arc::clone(&engine),
        )));
        registry.register(Arc::new(MarketRegimeTool::new(
            api.clone(),
            Arc::clone(&engine),
        )));
        registry.register(Arc::new(TickerAnalysisTool::new(
            api.clone(),
            Arc::clone(&engine),
        )));
        registry.register(Arc::new(MarketHolidayTool::new(api.clone())));
        registry.register(Arc::new(WikipediaLookupTool::new(api.clone())));

        if config.enable_web_search {
            registry.register(Arc::new(WebSearchTool::new(api)));
        }
    } else {
        warn!("MARKET_API_BASE_URL not set; market-data tools disabled");
    }

    Ok(registry)
}

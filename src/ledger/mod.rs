//! Rate limiting and cost accounting
//!
//! Every model call is gated by `authorize` (60-second sliding window per
//! session) and followed by `record`. Cost records are append/accumulate
//! only; a correction requires a new offsetting record, so the history
//! stays auditable. Unknown model ids fail closed rather than reporting
//! zero cost.

use crate::error::{CoreError, Result};
use crate::models::CostRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(60);

/// Estimated-token budget per session per window, enforced alongside the
/// operation count so a few huge prompts cannot ride under the op cap.
const WINDOW_TOKEN_BUDGET: u64 = 100_000;

//
// ================= Pricing =================
//

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Price {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

/// Immutable mapping from model id to per-token pricing.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, Price>,
}

impl PriceTable {
    pub fn new(prices: HashMap<String, Price>) -> Self {
        Self { prices }
    }

    /// Built-in table for the supported models.
    pub fn default_table() -> Self {
        let mut prices = HashMap::new();
        prices.insert(
            "gpt-4o".to_string(),
            Price {
                input_per_1m: 2.50,
                output_per_1m: 10.00,
            },
        );
        prices.insert(
            "gpt-4.1-mini".to_string(),
            Price {
                input_per_1m: 0.40,
                output_per_1m: 1.60,
            },
        );
        prices.insert(
            "gpt-4o-mini".to_string(),
            Price {
                input_per_1m: 0.15,
                output_per_1m: 0.60,
            },
        );
        Self { prices }
    }

    /// Parse an operator-supplied table, `{"model": {"input_per_1m": ..,
    /// "output_per_1m": ..}, ...}`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let prices: HashMap<String, Price> = serde_json::from_str(raw)?;
        Ok(Self { prices })
    }

    /// Fails closed: an unknown model is an error, never a free call.
    pub fn estimate_cost(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Result<f64> {
        let price = self
            .prices
            .get(model)
            .ok_or_else(|| CoreError::UnknownModelPricing(model.to_string()))?;

        Ok((prompt_tokens as f64 / 1_000_000.0) * price.input_per_1m
            + (completion_tokens as f64 / 1_000_000.0) * price.output_per_1m)
    }
}

/// Fast character-based token estimate, ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u64 {
    let t = text.trim();
    if t.is_empty() {
        return 0;
    }
    ((t.len() + 3) / 4) as u64
}

//
// ================= Authorization =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny { retry_after_secs: u64 },
}

//
// ================= Ledger =================
//

#[derive(Default)]
struct SessionAccount {
    /// Authorized operations inside the sliding window, with their
    /// estimated token load
    events: VecDeque<(Instant, u64)>,
    /// Accumulated usage per model id
    usage: HashMap<String, CostRecord>,
}

/// Per-session rate limiter and cost ledger.
pub struct Ledger {
    max_ops_per_min: usize,
    prices: PriceTable,
    accounts: Arc<RwLock<HashMap<Uuid, SessionAccount>>>,
}

impl Ledger {
    pub fn new(max_ops_per_min: usize, prices: PriceTable) -> Self {
        Self {
            max_ops_per_min,
            prices,
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check the sliding window and, if allowed, record the operation.
    /// Both the op count and the estimated-token budget must have room.
    /// Denials carry a retry-after hint instead of queueing.
    pub async fn authorize(&self, session_id: Uuid, estimated_tokens: u64) -> Authorization {
        let now = Instant::now();
        let mut accounts = self.accounts.write().await;
        let account = accounts.entry(session_id).or_default();

        while let Some((front, _)) = account.events.front() {
            if now.duration_since(*front) > WINDOW {
                account.events.pop_front();
            } else {
                break;
            }
        }

        let window_tokens: u64 = account.events.iter().map(|(_, t)| t).sum();
        let ops_ok = account.events.len() < self.max_ops_per_min;
        // An oversized single request through an empty window is let
        // through rather than wedged forever.
        let tokens_ok = account.events.is_empty()
            || window_tokens.saturating_add(estimated_tokens) <= WINDOW_TOKEN_BUDGET;

        if ops_ok && tokens_ok {
            account.events.push_back((now, estimated_tokens));
            Authorization::Allow
        } else {
            let oldest = account.events.front().map(|(t, _)| *t).unwrap_or(now);
            let elapsed = now.duration_since(oldest);
            let retry_after_secs = WINDOW.saturating_sub(elapsed).as_secs().max(1);
            debug!(
                session_id = %session_id,
                retry_after_secs,
                window_tokens,
                "Rate limit denial"
            );
            Authorization::Deny { retry_after_secs }
        }
    }

    /// Append actual usage for a completed model call. Totals only grow.
    pub async fn record(
        &self,
        session_id: Uuid,
        prompt_tokens: u64,
        completion_tokens: u64,
        model_id: &str,
    ) -> Result<f64> {
        let cost = self
            .prices
            .estimate_cost(model_id, prompt_tokens, completion_tokens)?;

        let mut accounts = self.accounts.write().await;
        let account = accounts.entry(session_id).or_default();
        let record = account.usage.entry(model_id.to_string()).or_default();

        record.prompt_tokens += prompt_tokens;
        record.completion_tokens += completion_tokens;
        record.cost_usd += cost;

        debug!(
            session_id = %session_id,
            model = model_id,
            prompt_tokens,
            completion_tokens,
            cost_usd = cost,
            "Usage recorded"
        );

        Ok(cost)
    }

    /// Total accumulated cost for a session across all models.
    pub async fn total_cost(&self, session_id: Uuid) -> f64 {
        let accounts = self.accounts.read().await;
        accounts
            .get(&session_id)
            .map(|a| a.usage.values().map(|r| r.cost_usd).sum())
            .unwrap_or(0.0)
    }

    /// Per-model breakdown for a session, sorted by model id.
    pub async fn usage_summary(&self, session_id: Uuid) -> Vec<(String, CostRecord)> {
        let accounts = self.accounts.read().await;
        let mut rows: Vec<(String, CostRecord)> = accounts
            .get(&session_id)
            .map(|a| {
                a.usage
                    .iter()
                    .map(|(model, record)| (model.clone(), record.clone()))
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(ops: usize) -> Ledger {
        Ledger::new(ops, PriceTable::default_table())
    }

    #[tokio::test]
    async fn test_authorize_within_limit() {
        let ledger = ledger(3);
        let session = Uuid::new_v4();

        for _ in 0..3 {
            assert_eq!(ledger.authorize(session, 100).await, Authorization::Allow);
        }
        match ledger.authorize(session, 100).await {
            Authorization::Deny { retry_after_secs } => assert!(retry_after_secs >= 1),
            Authorization::Allow => panic!("fourth op should be denied"),
        }
    }

    #[tokio::test]
    async fn test_token_budget_denies_before_op_cap() {
        let ledger = ledger(10);
        let session = Uuid::new_v4();

        assert_eq!(ledger.authorize(session, 60_000).await, Authorization::Allow);
        // Second op would push the window past the token budget despite
        // plenty of op-count headroom.
        assert!(matches!(
            ledger.authorize(session, 60_000).await,
            Authorization::Deny { .. }
        ));
        // A small request still fits.
        assert_eq!(ledger.authorize(session, 1_000).await, Authorization::Allow);
    }

    #[tokio::test]
    async fn test_oversized_request_allowed_through_empty_window() {
        let ledger = ledger(10);
        let session = Uuid::new_v4();
        assert_eq!(
            ledger.authorize(session, 500_000).await,
            Authorization::Allow
        );
    }

    #[tokio::test]
    async fn test_sessions_limited_independently() {
        let ledger = ledger(1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(ledger.authorize(a, 10).await, Authorization::Allow);
        assert_eq!(ledger.authorize(b, 10).await, Authorization::Allow);
        assert!(matches!(
            ledger.authorize(a, 10).await,
            Authorization::Deny { .. }
        ));
    }

    #[tokio::test]
    async fn test_record_accumulates_monotonically() {
        let ledger = ledger(10);
        let session = Uuid::new_v4();

        let mut last_total = 0.0;
        for _ in 0..4 {
            ledger.record(session, 1000, 500, "gpt-4o-mini").await.unwrap();
            let total = ledger.total_cost(session).await;
            assert!(total > last_total);
            last_total = total;
        }

        let summary = ledger.usage_summary(session).await;
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].1.prompt_tokens, 4000);
        assert_eq!(summary[0].1.completion_tokens, 2000);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_closed() {
        let ledger = ledger(10);
        let err = ledger
            .record(Uuid::new_v4(), 100, 100, "mystery-model")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_model_pricing");
    }

    #[test]
    fn test_price_table_from_json() {
        let table = PriceTable::from_json(
            r#"{ "custom-model": { "input_per_1m": 1.0, "output_per_1m": 2.0 } }"#,
        )
        .unwrap();
        let cost = table
            .estimate_cost("custom-model", 1_000_000, 500_000)
            .unwrap();
        assert!((cost - 2.0).abs() < 1e-9);
        assert!(PriceTable::from_json("not json").is_err());
    }

    #[test]
    fn test_cost_math() {
        let table = PriceTable::default_table();
        // 1M prompt + 1M completion tokens of gpt-4o = 2.50 + 10.00
        let cost = table.estimate_cost("gpt-4o", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn test_token_estimate_heuristic() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}

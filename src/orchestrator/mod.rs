//! Session Orchestrator
//!
//! Drives one conversational turn through a bounded state machine:
//!
//! AwaitingModel → ExecutingTools → AwaitingModel → … → Done | Failed
//!
//! Every model consultation passes the ledger first; every tool round
//! fans out in parallel and waits for all results so each ToolCall has
//! exactly one ToolResult before the next consultation. Safety Gate
//! rejections are terminal and cost nothing.

use crate::error::{CoreError, Result};
use crate::gateway::{ModelGateway, ModelReply};
use crate::ledger::{estimate_tokens, Authorization, Ledger};
use crate::models::{AssistantAnswer, Citation, ToolCall, ToolResult, Turn};
use crate::prompts;
use crate::safety::{Direction, SafetyGate};
use crate::session::SessionStore;
use crate::tools::ToolRegistry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum TurnState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    Done(String),
}

pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    registry: Arc<ToolRegistry>,
    gate: SafetyGate,
    ledger: Arc<Ledger>,
    sessions: SessionStore,
    max_rounds: u32,
    tool_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        registry: Arc<ToolRegistry>,
        ledger: Arc<Ledger>,
        sessions: SessionStore,
        max_rounds: u32,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            gate: SafetyGate::new(),
            ledger,
            sessions,
            max_rounds,
            tool_timeout,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    /// Run one full turn for a session. Holds the session's lock for the
    /// whole turn; a second concurrent turn on the same session is
    /// rejected rather than queued.
    pub async fn run_turn(&self, session_id: Uuid, user_text: &str) -> Result<AssistantAnswer> {
        let session = self.sessions.get(session_id).await?;
        let mut session = session.try_lock().map_err(|_| CoreError::SessionBusy)?;

        // Gate before anything is appended or billed.
        let safe_input = self.gate.check(user_text, Direction::Input)?;

        let config = session.config.clone();
        let system_prompt = prompts::system_prompt(&config);
        let tool_specs = self.registry.specs();

        session.push_turn(Turn::user(safe_input.text));

        let mut state = TurnState::AwaitingModel;
        let mut citations: Vec<Citation> = Vec::new();
        let mut cost_delta = 0.0;
        let mut rounds = 0u32;

        loop {
            match state {
                TurnState::AwaitingModel => {
                    if rounds >= self.max_rounds {
                        warn!(session_id = %session_id, rounds, "Round limit exceeded");
                        return Err(CoreError::RoundLimitExceeded(self.max_rounds));
                    }
                    rounds += 1;

                    let estimated = session
                        .turns()
                        .iter()
                        .map(|t| estimate_tokens(&t.text))
                        .sum();
                    match self.ledger.authorize(session_id, estimated).await {
                        Authorization::Allow => {}
                        Authorization::Deny { retry_after_secs } => {
                            return Err(CoreError::RateLimited { retry_after_secs });
                        }
                    }

                    // After a tool round the model is steered toward
                    // synthesis over the gathered results.
                    let prompt = if rounds > 1 {
                        format!(
                            "{}\n\n{}",
                            system_prompt,
                            prompts::synthesis_instruction(&citations)
                        )
                    } else {
                        system_prompt.clone()
                    };

                    debug!(session_id = %session_id, round = rounds, "Consulting model");
                    let reply = self
                        .gateway
                        .complete(&prompt, session.turns(), &tool_specs, &config)
                        .await?;

                    let usage = reply.usage();
                    cost_delta += self
                        .ledger
                        .record(
                            session_id,
                            usage.prompt_tokens,
                            usage.completion_tokens,
                            &config.model,
                        )
                        .await?;

                    state = match reply {
                        ModelReply::Answer { text, .. } => TurnState::Done(text),
                        ModelReply::ToolCalls { calls, .. } => TurnState::ExecutingTools(calls),
                    };
                }

                TurnState::ExecutingTools(calls) => {
                    let results = self.execute_round(&calls).await;
                    debug_assert_eq!(calls.len(), results.len());

                    for result in &results {
                        for citation in &result.citations {
                            if !citations.contains(citation) {
                                citations.push(citation.clone());
                            }
                        }
                    }

                    session.push_turn(Turn::tool_round(calls, results));
                    state = TurnState::AwaitingModel;
                }

                TurnState::Done(text) => {
                    let safe_output = self.gate.check(&text, Direction::Output)?;
                    session.push_turn(Turn::assistant(safe_output.text.clone()));

                    info!(
                        session_id = %session_id,
                        rounds,
                        citations = citations.len(),
                        cost_usd = cost_delta,
                        "Turn complete"
                    );
                    return Ok(AssistantAnswer {
                        text: safe_output.text,
                        citations,
                        cost_delta,
                        language: config.language,
                    });
                }
            }
        }
    }

    /// Fan one call batch out in parallel and wait for every result.
    /// Each call resolves to exactly one result; a hung tool is cut off
    /// by the per-call timeout and reported as a failure.
    async fn execute_round(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let futures = calls.iter().map(|call| {
            let registry = Arc::clone(&self.registry);
            let timeout = self.tool_timeout;
            async move {
                match tokio::time::timeout(timeout, registry.dispatch(call)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(tool = %call.name, call_id = %call.id, "Tool call timed out");
                        ToolResult::failed(
                            call.id,
                            "tool_execution_failed",
                            format!("timed out after {:?}", timeout),
                        )
                    }
                }
            }
        });

        join_all(futures).await
    }
}

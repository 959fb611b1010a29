//! Model Gateway
//!
//! The orchestrator's only path to the language model. A long-lived pooled
//! reqwest client speaks the chat-completions wire format; transient
//! failures are retried with exponential backoff before surfacing as
//! `ModelUnavailable`. `MockGateway` scripts replies for tests so the loop
//! can be exercised without a network.

use crate::error::{CoreError, Result};
use crate::ledger::estimate_tokens;
use crate::models::{GenerationConfig, Role, TokenUsage, ToolCall, Turn};
use crate::tools::ToolSpec;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// One model consultation outcome: either a final answer or a batch of
/// tool calls to execute.
#[derive(Debug, Clone)]
pub enum ModelReply {
    Answer { text: String, usage: TokenUsage },
    ToolCalls { calls: Vec<ToolCall>, usage: TokenUsage },
}

impl ModelReply {
    pub fn usage(&self) -> TokenUsage {
        match self {
            ModelReply::Answer { usage, .. } => *usage,
            ModelReply::ToolCalls { usage, .. } => *usage,
        }
    }
}

#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    /// One consultation: full history plus the declared tool set.
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolSpec],
        config: &GenerationConfig,
    ) -> Result<ModelReply>;
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object, per the chat-completions contract
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

//
// ================= OpenAI-style client =================
//

pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiGateway {
    pub fn new(api_key: String, base_url: String, call_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(call_timeout)
            .build()
            .map_err(|e| CoreError::ConfigError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn render_messages(system_prompt: &str, history: &[Turn]) -> Vec<WireMessage> {
        let mut messages = vec![WireMessage::text("system", system_prompt)];

        for turn in history {
            match turn.role {
                Role::User => messages.push(WireMessage::text("user", &turn.text)),
                Role::Assistant => messages.push(WireMessage::text("assistant", &turn.text)),
                Role::Tool => {
                    // A tool round renders as the assistant's call batch
                    // followed by one tool message per result, correlated
                    // by the call id.
                    messages.push(WireMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: Some(
                            turn.tool_calls
                                .iter()
                                .map(|c| WireToolCall {
                                    id: c.id.to_string(),
                                    kind: "function".to_string(),
                                    function: WireFunction {
                                        name: c.name.clone(),
                                        arguments: c.arguments.to_string(),
                                    },
                                })
                                .collect(),
                        ),
                        tool_call_id: None,
                    });
                    for result in &turn.tool_results {
                        messages.push(WireMessage {
                            role: "tool".to_string(),
                            content: Some(result.payload.to_string()),
                            tool_calls: None,
                            tool_call_id: Some(result.call_id.to_string()),
                        });
                    }
                }
            }
        }
        messages
    }

    fn parse_reply(response: ChatResponse) -> Result<ModelReply> {
        let usage = response.usage.unwrap_or_default();
        let usage = TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        };

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::ModelUnavailable("empty choices in response".to_string()))?;

        if let Some(wire_calls) = choice.message.tool_calls {
            if !wire_calls.is_empty() {
                let mut calls = Vec::with_capacity(wire_calls.len());
                for wc in wire_calls {
                    // Provider ids are re-keyed to our correlation ids; the
                    // full history is re-rendered with ours on every call.
                    let arguments = serde_json::from_str(&wc.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    calls.push(ToolCall {
                        id: Uuid::new_v4(),
                        name: wc.function.name,
                        arguments,
                    });
                }
                return Ok(ModelReply::ToolCalls { calls, usage });
            }
        }

        let text = choice.message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(CoreError::ModelUnavailable(
                "model returned neither text nor tool calls".to_string(),
            ));
        }
        Ok(ModelReply::Answer { text, usage })
    }

    fn retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

#[async_trait::async_trait]
impl ModelGateway for OpenAiGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[ToolSpec],
        config: &GenerationConfig,
    ) -> Result<ModelReply> {
        let config = config.clone().clamped();
        let request = ChatRequest {
            model: &config.model,
            messages: Self::render_messages(system_prompt, history),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            tools: tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        };

        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }

            let sent = self
                .client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, error = %e, "Model request failed");
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(attempt, %status, "Model returned error status");
                last_error = format!("{}: {}", status, body);
                if Self::retryable(status) {
                    continue;
                }
                return Err(CoreError::ModelUnavailable(last_error));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| CoreError::ModelUnavailable(format!("malformed response: {}", e)))?;

            debug!(attempt, model = %config.model, "Model reply received");
            return Ok(backfill_usage(Self::parse_reply(parsed)?, &request.messages));
        }

        Err(CoreError::ModelUnavailable(format!(
            "exhausted {} attempts: {}",
            MAX_ATTEMPTS, last_error
        )))
    }
}

/// Providers occasionally omit the usage block. The ledger fails closed on
/// unknown models but would undercount at zero tokens, so estimate from the
/// rendered text instead.
fn backfill_usage(reply: ModelReply, messages: &[WireMessage]) -> ModelReply {
    let usage = reply.usage();
    if usage.prompt_tokens > 0 || usage.completion_tokens > 0 {
        return reply;
    }

    let prompt_tokens = messages
        .iter()
        .map(|m| estimate_tokens(m.content.as_deref().unwrap_or_default()))
        .sum();

    match reply {
        ModelReply::Answer { text, .. } => {
            let completion_tokens = estimate_tokens(&text);
            ModelReply::Answer {
                text,
                usage: TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                },
            }
        }
        ModelReply::ToolCalls { calls, .. } => {
            let completion_tokens = calls
                .iter()
                .map(|c| estimate_tokens(&c.arguments.to_string()))
                .sum();
            ModelReply::ToolCalls {
                calls,
                usage: TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                },
            }
        }
    }
}

//
// ================= Mock =================
//

/// Scripted gateway for tests: pops pre-seeded replies in order.
pub struct MockGateway {
    replies: Mutex<VecDeque<Result<ModelReply>>>,
}

impl MockGateway {
    pub fn new(replies: Vec<Result<ModelReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn answer(text: &str, prompt_tokens: u64, completion_tokens: u64) -> Result<ModelReply> {
        Ok(ModelReply::Answer {
            text: text.to_string(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Result<ModelReply> {
        Ok(ModelReply::ToolCalls {
            calls,
            usage: TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 10,
            },
        })
    }
}

#[async_trait::async_trait]
impl ModelGateway for MockGateway {
    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[Turn],
        _tools: &[ToolSpec],
        _config: &GenerationConfig,
    ) -> Result<ModelReply> {
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::ModelUnavailable("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolResult;

    #[test]
    fn test_render_messages_interleaves_tool_rounds() {
        let call = ToolCall {
            id: Uuid::new_v4(),
            name: "knowledge_search".to_string(),
            arguments: json!({ "query": "rates" }),
        };
        let result = ToolResult::ok(call.id, json!({ "passages": [] }), Vec::new());

        let history = vec![
            Turn::user("what about rates?"),
            Turn::tool_round(vec![call.clone()], vec![result]),
            Turn::assistant("Rates are rising."),
        ];

        let messages = OpenAiGateway::render_messages("be helpful", &history);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(
            messages[2].tool_calls.as_ref().unwrap()[0].id,
            call.id.to_string()
        );
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some(call.id.to_string().as_str()));
        assert_eq!(messages[4].role, "assistant");
    }

    #[test]
    fn test_parse_reply_prefers_tool_calls() {
        let response = ChatResponse {
            choices: vec![Choice {
                message: WireMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![WireToolCall {
                        id: "call_1".to_string(),
                        kind: "function".to_string(),
                        function: WireFunction {
                            name: "sector_strength".to_string(),
                            arguments: r#"{"period":"1mo"}"#.to_string(),
                        },
                    }]),
                    tool_call_id: None,
                },
            }],
            usage: Some(WireUsage {
                prompt_tokens: 120,
                completion_tokens: 15,
            }),
        };

        match OpenAiGateway::parse_reply(response).unwrap() {
            ModelReply::ToolCalls { calls, usage } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "sector_strength");
                assert_eq!(calls[0].arguments["period"], "1mo");
                assert_eq!(usage.prompt_tokens, 120);
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_reply_rejects_empty_message() {
        let response = ChatResponse {
            choices: vec![Choice {
                message: WireMessage::text("assistant", "   "),
            }],
            usage: None,
        };
        let err = OpenAiGateway::parse_reply(response).unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[test]
    fn test_usage_backfilled_when_provider_omits_it() {
        let reply = ModelReply::Answer {
            text: "a twelve char".to_string(),
            usage: TokenUsage::default(),
        };
        let messages = vec![WireMessage::text("user", "abcdefgh")];

        match backfill_usage(reply, &messages) {
            ModelReply::Answer { usage, .. } => {
                assert_eq!(usage.prompt_tokens, 2);
                assert!(usage.completion_tokens > 0);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        // Reported usage is left untouched.
        let reported = ModelReply::Answer {
            text: "x".to_string(),
            usage: TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
            },
        };
        match backfill_usage(reported, &messages) {
            ModelReply::Answer { usage, .. } => assert_eq!(usage.prompt_tokens, 7),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_gateway_pops_in_order() {
        let mock = MockGateway::new(vec![
            MockGateway::answer("first", 10, 5),
            MockGateway::answer("second", 10, 5),
        ]);
        let cfg = GenerationConfig::default();

        for expected in ["first", "second"] {
            match mock.complete("", &[], &[], &cfg).await.unwrap() {
                ModelReply::Answer { text, .. } => assert_eq!(text, expected),
                other => panic!("unexpected reply {:?}", other),
            }
        }
        assert!(mock.complete("", &[], &[], &cfg).await.is_err());
    }
}

//! OpenAI-compatible chat-completions client.
//!
//! Implements the [`Planner`] trait via the `/chat/completions` endpoint
//! with function tools, so any API-compatible provider can stand in by
//! pointing `CSVQ_API_BASE` elsewhere.

use async_trait::async_trait;
use tracing::debug;

use csvq_common::types::{Message, Role, TokenUsage, ToolCall, ToolDefinition};

use crate::{Planner, PlannerError, PlannerResponse};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub temperature: f64,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            temperature: 0.0,
        }
    }

    /// Create config from the environment: `OPENAI_API_KEY` (required),
    /// `CSVQ_MODEL` and `CSVQ_API_BASE` (optional overrides).
    pub fn from_env() -> Result<Self, PlannerError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PlannerError::Api("OPENAI_API_KEY not set".into()))?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("CSVQ_MODEL") {
            config.model = model;
        }
        if let Ok(base) = std::env::var("CSVQ_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// OpenAI API client.
pub struct OpenAiClient {
    config: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Build the JSON request body for the chat-completions API.
    fn build_request_body(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let msgs: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::Assistant => "assistant",
                    // Tool results travel as user turns; the loop has
                    // already prefixed them with the tool name.
                    Role::User | Role::Tool => "user",
                };
                serde_json::json!({
                    "role": role,
                    "content": msg.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": msgs,
        });

        if !tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tool_defs);
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<PlannerResponse, PlannerError> {
        let message = &json["choices"][0]["message"];
        if message.is_null() {
            return Err(PlannerError::Parse("response has no choices".into()));
        }

        let content = message["content"].as_str().unwrap_or_default().to_string();

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| {
                        // Arguments arrive as a JSON-encoded string.
                        let arguments = call["function"]["arguments"]
                            .as_str()
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or(serde_json::Value::Null);
                        ToolCall {
                            id: call["id"].as_str().unwrap_or("").to_string(),
                            name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                            arguments,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(PlannerResponse {
            content,
            tool_calls,
            usage,
        })
    }
}

#[async_trait]
impl Planner for OpenAiClient {
    async fn plan(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<PlannerResponse, PlannerError> {
        let body = self.build_request_body(messages, tools);
        let url = format!("{}/chat/completions", self.config.api_base);

        debug!(model = %self.config.model, messages = messages.len(), "planner request");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlannerError::Timeout
                } else {
                    PlannerError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PlannerError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(PlannerError::Api(format!("HTTP {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PlannerError::Parse(e.to_string()))?;

        self.parse_response(json)
    }
}

//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint speaking the `/chat/completions` protocol with
//! function calling (OpenAI, OpenRouter, LiteLLM proxies, vLLM, ...).

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::cost::{Pricing, Usage, UsageTotals};
use super::types::{AssistantMessage, Message, ToolCallRequest, ToolSchema};
use super::Model;
use crate::error::LlmError;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Configuration for an OpenAI-compatible model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier sent with every request.
    pub model_name: String,
    /// Base URL of the API (without `/chat/completions`).
    pub base_url: Option<String>,
    /// Bearer token. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Extra sampling parameters merged into each request (temperature, ...).
    pub model_kwargs: Map<String, Value>,
    /// Token prices used for cost accounting.
    pub pricing: Option<Pricing>,
    /// HTTP request timeout in seconds.
    pub request_timeout: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            model_kwargs: Map::new(),
            pricing: None,
            request_timeout: REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ModelConfig {
    /// Create a configuration for the given model.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Add a sampling parameter.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.model_kwargs.insert(key.into(), value.into());
        self
    }

    /// Set token pricing.
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Fill the API key and base URL from `OPENAI_API_KEY` / `OPENAI_BASE_URL`
    /// when they are not configured.
    pub fn with_env_fallbacks(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = env::var("OPENAI_API_KEY").ok();
        }
        if self.base_url.is_none() {
            self.base_url = env::var("OPENAI_BASE_URL").ok();
        }
        self
    }
}

/// Client for OpenAI-compatible chat-completions APIs.
pub struct OpenAiModel {
    config: ModelConfig,
    http_client: Client,
    totals: UsageTotals,
}

impl OpenAiModel {
    /// Create a new client from its configuration.
    pub fn new(config: ModelConfig) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| LlmError::ClientBuild(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            totals: UsageTotals::default(),
        })
    }

    /// Get the model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Usage accumulated so far.
    pub fn totals(&self) -> &UsageTotals {
        &self.totals
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Check if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn build_body(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Value, LlmError> {
        let request = ApiRequest {
            model: &self.config.model_name,
            messages,
            tools: tools.iter().map(ToolSchema::to_function_json).collect(),
        };
        let mut body = serde_json::to_value(&request)
            .map_err(|e| LlmError::ParseError(format!("Failed to encode request: {}", e)))?;
        if let Value::Object(ref mut map) = body {
            for (key, value) in &self.config.model_kwargs {
                map.insert(key.clone(), value.clone());
            }
        }
        Ok(body)
    }
}

/// Internal request structure for the chat-completions API.
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

/// Internal response structure from the chat-completions API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Internal choice structure from the API response.
#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

/// Internal message structure from the API response.
#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Convert a decoded response into the assistant message and its usage.
fn into_assistant(response: ApiResponse) -> Result<(AssistantMessage, Option<Usage>), LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;

    let message = AssistantMessage::with_tool_calls(
        choice.message.content,
        choice.message.tool_calls.unwrap_or_default(),
    );
    Ok((message, response.usage))
}

#[async_trait]
impl Model for OpenAiModel {
    async fn query(
        &mut self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<AssistantMessage, LlmError> {
        let body = self.build_body(messages, tools)?;
        let url = format!("{}/chat/completions", self.api_base().trim_end_matches('/'));

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.config.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                if status_code == 429 {
                    return Err(LlmError::RateLimited(error_response.error.message));
                }

                return Err(LlmError::ApiError {
                    code: status_code,
                    message: error_response.error.message,
                });
            }

            return Err(LlmError::ApiError {
                code: status_code,
                message: error_text,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let (message, usage) = into_assistant(api_response)?;
        self.totals
            .record(usage.as_ref(), self.config.pricing.as_ref());

        if let Some(usage) = usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                n_calls = self.totals.n_calls,
                cost = self.totals.cost,
                "Model call completed"
            );
        }

        Ok(message)
    }

    fn n_calls(&self) -> u64 {
        self.totals.n_calls
    }

    fn cost(&self) -> f64 {
        self.totals.cost
    }

    fn template_vars(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

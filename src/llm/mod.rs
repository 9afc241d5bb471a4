//! LLM integration for bashloop.
//!
//! The agent loop talks to a language model through the [`Model`] trait.
//! [`OpenAiModel`] implements it for OpenAI-compatible chat-completions
//! endpoints with function calling.
//!
//! ```ignore
//! use bashloop::llm::{Message, Model, ModelConfig, OpenAiModel};
//!
//! let mut model = OpenAiModel::new(ModelConfig::new("gpt-4o").with_env_fallbacks())?;
//! let reply = model.query(&[Message::user("Hello!")], &[]).await?;
//! println!("{:?} after {} call(s)", reply.content, model.n_calls());
//! ```

pub mod cost;
pub mod openai;
pub mod types;

pub use cost::{Pricing, Usage, UsageTotals};
pub use openai::{ModelConfig, OpenAiModel, DEFAULT_BASE_URL};
pub use types::{AssistantMessage, FunctionCall, Message, ToolCallRequest, ToolSchema};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::LlmError;

/// A language model that answers a conversation with exactly one message.
#[async_trait]
pub trait Model: Send + Sync {
    /// Send the conversation and tool definitions, returning the reply.
    ///
    /// Successful calls increment [`Model::n_calls`]; failed calls do not.
    async fn query(
        &mut self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<AssistantMessage, LlmError>;

    /// Number of completed calls.
    fn n_calls(&self) -> u64;

    /// Accumulated cost in dollars.
    fn cost(&self) -> f64;

    /// Configuration fields exposed to templates.
    fn template_vars(&self) -> Map<String, Value>;
}

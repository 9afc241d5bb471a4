//! bashloop: a tool-calling LLM agent that solves tasks with shell commands.
//!
//! The agent loop ([`scaffold::ToolCallingAgent`]) sends the conversation to
//! a [`llm::Model`], dispatches the returned tool calls to the bash tool, and
//! runs each command in an [`environment::Environment`] that streams output
//! live while capturing it for the model.

pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod llm;
pub mod scaffold;
pub mod template;
pub mod trajectory;

// Re-export commonly used types
pub use config::RunConfig;
pub use error::{ConfigError, ExecutionError, LlmError, TemplateError};
pub use scaffold::{AgentConfig, RunOutcome, ToolCallingAgent};

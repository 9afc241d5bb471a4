//! Scaffold system for agent execution.
//!
//! The scaffold provides tools to the LLM and manages the agent loop:
//! 1. Check step and cost limits
//! 2. Get the next LLM message
//! 3. Dispatch its tool calls
//! 4. Record each observation
//! 5. Stop when the model answers without tool calls
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bashloop::environment::{EnvironmentConfig, StreamingEnvironment};
//! use bashloop::llm::{ModelConfig, OpenAiModel};
//! use bashloop::scaffold::{AgentConfig, ToolCallingAgent};
//!
//! let model = OpenAiModel::new(ModelConfig::new("gpt-4o").with_env_fallbacks())?;
//! let env = StreamingEnvironment::new(EnvironmentConfig::container("my-container"));
//! let mut agent = ToolCallingAgent::new(Box::new(model), Arc::new(env), AgentConfig::default());
//! let (status, detail) = agent.run("Fix the failing test").await.into_pair();
//! ```

pub mod agent_loop;
pub mod prompts;
pub mod tools;

pub use agent_loop::{
    AgentConfig, AgentError, RunOutcome, StepOutcome, SubmitPolicy, ToolCallingAgent,
};
pub use prompts::{
    DEFAULT_ACTION_OBSERVATION_TEMPLATE, DEFAULT_INSTANCE_TEMPLATE, DEFAULT_SYSTEM_TEMPLATE,
    DEFAULT_TIMEOUT_TEMPLATE,
};
pub use tools::{BashArgs, BashTool, Tool, ToolContext, ToolError, ToolRegistry, BASH_TOOL_NAME};

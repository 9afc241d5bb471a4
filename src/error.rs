//! Error types for bashloop operations.
//!
//! Defines the error enums shared across subsystems:
//! - LLM API interactions
//! - Template rendering
//! - Sandboxed command execution
//! - Configuration loading

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: OPENAI_BASE_URL environment variable not set")]
    MissingApiBase,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM response contained no choices")]
    EmptyResponse,
}

/// Errors that can occur while rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to render template: {0}")]
    Render(String),

    #[error("Template variable '{name}' could not be serialized: {message}")]
    Variable { name: String, message: String },
}

impl From<tera::Error> for TemplateError {
    fn from(err: tera::Error) -> Self {
        // Tera keeps the useful part (missing variable, syntax position) in the source chain.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        TemplateError::Render(message)
    }
}

/// Errors that can occur while executing a command in an environment.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while streaming command output: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

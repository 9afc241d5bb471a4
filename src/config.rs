//! Run configuration loaded from YAML.
//!
//! A config file has three optional sections, each falling back to its
//! defaults:
//!
//! ```yaml
//! agent:
//!   step_limit: 50
//!   cost_limit: 2.0
//!   submit:
//!     type: command
//!     command: git diff
//! environment:
//!   container_id: sandbox
//!   cwd: /testbed
//!   timeout: 60
//! model:
//!   model_name: gpt-4o
//!   model_kwargs:
//!     temperature: 0.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentConfig;
use crate::error::ConfigError;
use crate::llm::ModelConfig;
use crate::scaffold::AgentConfig;

/// Configuration for one agent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Agent loop settings and templates.
    pub agent: AgentConfig,
    /// Where and how commands run.
    pub environment: EnvironmentConfig,
    /// Language model settings.
    pub model: ModelConfig,
}

impl RunConfig {
    /// Creates a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Serialize to YAML. The API key is never written.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Sets the agent configuration.
    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    /// Sets the environment configuration.
    pub fn with_environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the model configuration.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Check values that would make a run fail before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.timeout == 0 {
            return Err(ConfigError::ValidationFailed(
                "environment.timeout must be greater than 0".to_string(),
            ));
        }

        if self.environment.shell.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "environment.shell must name a program".to_string(),
            ));
        }

        if self.environment.container_id.is_some() && self.environment.executable.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "environment.executable is required with a container_id".to_string(),
            ));
        }

        if self.model.model_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model.model_name cannot be empty".to_string(),
            ));
        }

        self.agent.validate()
    }
}

//! Tool-calling agent loop.
//!
//! One step of the loop:
//! 1. Check the step and cost limits
//! 2. Query the model with the full conversation and the tool schemas
//! 3. Append the reply; a reply without tool calls is the final answer
//! 4. Dispatch each tool call in order, appending every result before the
//!    next call runs
//!
//! `run` drives steps until the model submits, a limit is hit, or a step
//! fails, and reports the outcome as a `(status, detail)` pair.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::prompts::{
    DEFAULT_ACTION_OBSERVATION_TEMPLATE, DEFAULT_INSTANCE_TEMPLATE, DEFAULT_SYSTEM_TEMPLATE,
    DEFAULT_TIMEOUT_TEMPLATE,
};
use super::tools::{ToolContext, ToolRegistry};
use crate::environment::Environment;
use crate::error::{ConfigError, ExecutionError, LlmError, TemplateError};
use crate::llm::{Message, Model};
use crate::template::{platform_vars, process_env_vars, TemplateVars};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The step or cost budget is exhausted.
    #[error("{0}")]
    LimitsExceeded(String),

    /// A template could not be rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The model call failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The submit command could not be executed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The agent configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AgentError {
    /// Short name of the error kind, reported as the run status.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::LimitsExceeded(_) => "LimitsExceeded",
            AgentError::Template(_) => "TemplateError",
            AgentError::Llm(_) => "LlmError",
            AgentError::Execution(_) => "ExecutionError",
            AgentError::Config(_) => "ConfigError",
        }
    }
}

/// How the final answer is reported once the model stops calling tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitPolicy {
    /// Report the content of the final assistant message.
    #[default]
    Content,
    /// Run a command (e.g. `git diff`) and report its output.
    Command { command: String },
}

/// Configuration for the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// First message of every conversation, sent verbatim.
    pub system_template: String,
    /// Renders the task into the first user message.
    pub instance_template: String,
    /// Renders the result of a completed command.
    pub action_observation_template: String,
    /// Renders the result of a command killed on timeout.
    pub timeout_template: String,
    /// Maximum model calls per run; 0 or negative means unlimited.
    pub step_limit: i64,
    /// Maximum cost in dollars per run; 0 or negative means unlimited.
    pub cost_limit: f64,
    /// Final answer reporting.
    pub submit: SubmitPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
            instance_template: DEFAULT_INSTANCE_TEMPLATE.to_string(),
            action_observation_template: DEFAULT_ACTION_OBSERVATION_TEMPLATE.to_string(),
            timeout_template: DEFAULT_TIMEOUT_TEMPLATE.to_string(),
            step_limit: 0,
            cost_limit: 3.0,
            submit: SubmitPolicy::Content,
        }
    }
}

impl AgentConfig {
    /// Create a new agent configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the system prompt.
    pub fn with_system_template(mut self, template: impl Into<String>) -> Self {
        self.system_template = template.into();
        self
    }

    /// Set the task template.
    pub fn with_instance_template(mut self, template: impl Into<String>) -> Self {
        self.instance_template = template.into();
        self
    }

    /// Set the observation template for completed commands.
    pub fn with_action_observation_template(mut self, template: impl Into<String>) -> Self {
        self.action_observation_template = template.into();
        self
    }

    /// Set the observation template for timed out commands.
    pub fn with_timeout_template(mut self, template: impl Into<String>) -> Self {
        self.timeout_template = template.into();
        self
    }

    /// Set the maximum number of model calls.
    pub fn with_step_limit(mut self, step_limit: i64) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Set the maximum cost in dollars.
    pub fn with_cost_limit(mut self, cost_limit: f64) -> Self {
        self.cost_limit = cost_limit;
        self
    }

    /// Set how the final answer is reported.
    pub fn with_submit(mut self, submit: SubmitPolicy) -> Self {
        self.submit = submit;
        self
    }

    /// Check values that would make the loop misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cost_limit.is_nan() {
            return Err(ConfigError::ValidationFailed(
                "agent.cost_limit must be a number".to_string(),
            ));
        }

        if let SubmitPolicy::Command { command } = &self.submit {
            if command.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "agent.submit.command cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Tool calls were dispatched; the loop continues.
    Continue,
    /// The model answered without tool calls.
    Submitted(String),
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail")]
pub enum RunOutcome {
    /// The model submitted a final answer.
    Submitted(String),
    /// The step or cost budget was exhausted.
    LimitsExceeded(String),
    /// A step failed.
    Error { kind: String, message: String },
}

impl RunOutcome {
    /// Status name: `Submitted`, `LimitsExceeded`, or the error kind.
    pub fn kind(&self) -> &str {
        match self {
            RunOutcome::Submitted(_) => "Submitted",
            RunOutcome::LimitsExceeded(_) => "LimitsExceeded",
            RunOutcome::Error { kind, .. } => kind,
        }
    }

    /// Final answer, limit description, or error message.
    pub fn detail(&self) -> &str {
        match self {
            RunOutcome::Submitted(detail) | RunOutcome::LimitsExceeded(detail) => detail,
            RunOutcome::Error { message, .. } => message,
        }
    }

    /// Whether the model submitted.
    pub fn is_submitted(&self) -> bool {
        matches!(self, RunOutcome::Submitted(_))
    }

    /// The `(status, detail)` pair reported to callers.
    pub fn into_pair(self) -> (String, String) {
        match self {
            RunOutcome::Submitted(detail) => ("Submitted".to_string(), detail),
            RunOutcome::LimitsExceeded(detail) => ("LimitsExceeded".to_string(), detail),
            RunOutcome::Error { kind, message } => (kind, message),
        }
    }
}

impl From<AgentError> for RunOutcome {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::LimitsExceeded(detail) => RunOutcome::LimitsExceeded(detail),
            other => RunOutcome::Error {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Agent that solves tasks by letting a model call tools against an environment.
pub struct ToolCallingAgent {
    config: AgentConfig,
    model: Box<dyn Model>,
    env: Arc<dyn Environment>,
    tools: ToolRegistry,
    messages: Vec<Message>,
    /// Model call count and cost when the current run started.
    baseline: (u64, f64),
}

impl ToolCallingAgent {
    /// Create an agent with the default tools.
    pub fn new(model: Box<dyn Model>, env: Arc<dyn Environment>, config: AgentConfig) -> Self {
        Self::with_tools(model, env, config, ToolRegistry::with_default_tools())
    }

    /// Create an agent with a custom tool registry.
    pub fn with_tools(
        model: Box<dyn Model>,
        env: Arc<dyn Environment>,
        config: AgentConfig,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            config,
            model,
            env,
            tools,
            messages: Vec::new(),
            baseline: (0, 0.0),
        }
    }

    /// Get the agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Conversation of the current or last run.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The model driving this agent.
    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    /// Model calls made in the current run.
    pub fn n_calls(&self) -> u64 {
        self.model.n_calls().saturating_sub(self.baseline.0)
    }

    /// Cost spent in the current run.
    pub fn cost(&self) -> f64 {
        (self.model.cost() - self.baseline.1).max(0.0)
    }

    /// Layered template variables without the call layer.
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars::new()
            .layer("agent", config_vars(&self.config))
            .layer("environment", self.env.template_vars())
            .layer("model", self.model.template_vars())
            .layer("platform", platform_vars())
            .layer("process_env", process_env_vars())
    }

    /// Render `template` with the layered variables plus `call_vars`.
    pub fn render_template<I>(&self, template: &str, call_vars: I) -> Result<String, TemplateError>
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        self.template_vars().call_layer(call_vars)?.render(template)
    }

    /// Solve `task`, returning how the run ended. Never fails.
    pub async fn run(&mut self, task: &str) -> RunOutcome {
        info!(task_len = task.len(), "Starting agent run");

        let outcome = match self.reset(task) {
            Ok(()) => self.drive().await,
            Err(e) => e.into(),
        };

        info!(
            status = %outcome.kind(),
            n_calls = self.n_calls(),
            cost = self.cost(),
            messages = self.messages.len(),
            "Agent run finished"
        );
        outcome
    }

    async fn drive(&mut self) -> RunOutcome {
        loop {
            match self.step().await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Submitted(detail)) => return RunOutcome::Submitted(detail),
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "Agent run stopped");
                    return e.into();
                }
            }
        }
    }

    /// Start a new conversation for `task`.
    fn reset(&mut self, task: &str) -> Result<(), AgentError> {
        self.baseline = (self.model.n_calls(), self.model.cost());
        self.messages.clear();
        self.config.validate()?;
        self.messages
            .push(Message::system(self.config.system_template.clone()));
        let instance = self.render_template(
            &self.config.instance_template,
            [("task", Value::from(task))],
        )?;
        self.messages.push(Message::user(instance));
        Ok(())
    }

    fn check_limits(&self) -> Result<(), AgentError> {
        let n_calls = self.n_calls();
        if self.config.step_limit > 0 && n_calls >= self.config.step_limit as u64 {
            return Err(AgentError::LimitsExceeded(format!(
                "Step limit of {} reached",
                self.config.step_limit
            )));
        }

        let cost = self.cost();
        if self.config.cost_limit > 0.0 && cost >= self.config.cost_limit {
            return Err(AgentError::LimitsExceeded(format!(
                "Cost limit of ${:.2} reached (spent ${:.4})",
                self.config.cost_limit, cost
            )));
        }

        Ok(())
    }

    /// Run one query-and-dispatch cycle.
    pub async fn step(&mut self) -> Result<StepOutcome, AgentError> {
        self.check_limits()?;

        let schemas = self.tools.schemas();
        let reply = self.model.query(&self.messages, &schemas).await?;
        debug!(
            step = self.n_calls(),
            tool_calls = reply.tool_calls.len(),
            "Model replied"
        );

        let tool_calls = reply.tool_calls.clone();
        let content = reply.content.clone().unwrap_or_default();
        self.messages.push(Message::Assistant(reply));

        if tool_calls.is_empty() {
            let detail = self.submission(content).await?;
            return Ok(StepOutcome::Submitted(detail));
        }

        for call in &tool_calls {
            let vars = self.template_vars();
            let ctx = ToolContext {
                env: self.env.as_ref(),
                vars: &vars,
                config: &self.config,
            };
            let result = self.tools.dispatch(call, &ctx).await;
            self.messages.push(result);
        }

        Ok(StepOutcome::Continue)
    }

    async fn submission(&self, content: String) -> Result<String, AgentError> {
        match &self.config.submit {
            SubmitPolicy::Content => Ok(content),
            SubmitPolicy::Command { command } => {
                info!(command = %command, "Collecting submission");
                let result = self.env.execute(command, "").await?;
                Ok(result.output)
            }
        }
    }
}

/// Agent configuration fields as template variables.
fn config_vars(config: &AgentConfig) -> Map<String, Value> {
    match serde_json::to_value(config) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentConfig, NullSink, StreamingEnvironment};
    use crate::llm::{AssistantMessage, ToolCallRequest, ToolSchema};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Model replaying canned replies.
    struct ScriptedModel {
        replies: VecDeque<AssistantMessage>,
        calls: u64,
        cost_per_call: f64,
    }

    impl ScriptedModel {
        fn new(replies: Vec<AssistantMessage>) -> Self {
            Self {
                replies: replies.into(),
                calls: 0,
                cost_per_call: 0.0,
            }
        }
    }

    #[async_trait]
    impl Model for ScriptedModel {
        async fn query(
            &mut self,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<AssistantMessage, LlmError> {
            let reply = self.replies.pop_front().ok_or(LlmError::EmptyResponse)?;
            self.calls += 1;
            Ok(reply)
        }

        fn n_calls(&self) -> u64 {
            self.calls
        }

        fn cost(&self) -> f64 {
            self.calls as f64 * self.cost_per_call
        }

        fn template_vars(&self) -> Map<String, Value> {
            let mut vars = Map::new();
            vars.insert("model_name".to_string(), Value::from("scripted"));
            vars
        }
    }

    fn local_env() -> Arc<dyn Environment> {
        Arc::new(
            StreamingEnvironment::new(EnvironmentConfig::local().with_shell(["sh", "-c"]))
                .with_sink(Arc::new(NullSink)),
        )
    }

    fn bash_call(id: &str, command: &str) -> ToolCallRequest {
        ToolCallRequest::new(
            id,
            "execute_bash_command",
            serde_json::json!({ "bash_command": command }).to_string(),
        )
    }

    fn simple_config() -> AgentConfig {
        AgentConfig::default()
            .with_system_template("You are an agent.")
            .with_instance_template("{{ task }}")
            .with_action_observation_template("{{ output.output }}")
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.step_limit, 0);
        assert!((config.cost_limit - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.submit, SubmitPolicy::Content);
    }

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new()
            .with_step_limit(10)
            .with_cost_limit(0.5)
            .with_submit(SubmitPolicy::Command {
                command: "git diff".to_string(),
            });

        assert_eq!(config.step_limit, 10);
        assert!((config.cost_limit - 0.5).abs() < f64::EPSILON);
        assert!(matches!(config.submit, SubmitPolicy::Command { .. }));
    }

    #[test]
    fn test_submit_policy_yaml() {
        let policy: SubmitPolicy =
            serde_yaml::from_str("type: command\ncommand: git diff\n").unwrap();
        assert_eq!(
            policy,
            SubmitPolicy::Command {
                command: "git diff".to_string()
            }
        );
    }

    #[test]
    fn test_run_outcome_pairs() {
        assert_eq!(
            RunOutcome::Submitted("Done.".to_string()).into_pair(),
            ("Submitted".to_string(), "Done.".to_string())
        );
        let err: RunOutcome = AgentError::Llm(LlmError::EmptyResponse).into();
        assert_eq!(err.kind(), "LlmError");
        assert_eq!(err.detail(), "LLM response contained no choices");
    }

    #[tokio::test]
    async fn test_run_submits_without_tool_calls() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("Done.")]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_step_limit(1),
        );

        let outcome = agent.run("fix bug").await;
        assert_eq!(
            outcome.into_pair(),
            ("Submitted".to_string(), "Done.".to_string())
        );

        let messages = agent.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::system("You are an agent."));
        assert_eq!(messages[1], Message::user("fix bug"));
        assert_eq!(messages[2], Message::assistant("Done."));
    }

    #[tokio::test]
    async fn test_step_appends_tool_results_in_order() {
        let model = ScriptedModel::new(vec![AssistantMessage::with_tool_calls(
            None,
            vec![
                bash_call("a", "echo first"),
                ToolCallRequest::new("b", "foo", "{}"),
                bash_call("c", "echo third"),
            ],
        )]);
        let mut agent = ToolCallingAgent::new(Box::new(model), local_env(), simple_config());
        agent.reset("task").unwrap();

        let outcome = agent.step().await.unwrap();
        assert_eq!(outcome, StepOutcome::Continue);

        let messages = agent.messages();
        assert_eq!(messages.len(), 2 + 1 + 3);
        assert_eq!(messages[3], Message::tool("a", "execute_bash_command", "first\n"));
        assert_eq!(
            messages[4],
            Message::tool("b", "foo", "`foo` is not a valid function name.")
        );
        assert_eq!(messages[5], Message::tool("c", "execute_bash_command", "third\n"));
    }

    #[tokio::test]
    async fn test_step_limit_blocks_before_query() {
        let model = ScriptedModel::new(vec![
            AssistantMessage::with_tool_calls(None, vec![bash_call("a", "true")]),
            AssistantMessage::with_tool_calls(None, vec![bash_call("b", "true")]),
            AssistantMessage::text("never reached"),
        ]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_step_limit(2),
        );

        let outcome = agent.run("loop").await;
        assert_eq!(outcome.kind(), "LimitsExceeded");
        assert_eq!(agent.n_calls(), 2);
        assert_eq!(agent.model().n_calls(), 2);
    }

    #[tokio::test]
    async fn test_cost_limit() {
        let mut model = ScriptedModel::new(vec![
            AssistantMessage::with_tool_calls(None, vec![bash_call("a", "true")]),
            AssistantMessage::text("never reached"),
        ]);
        model.cost_per_call = 1.0;
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_cost_limit(1.0),
        );

        let outcome = agent.run("spend").await;
        assert_eq!(outcome.kind(), "LimitsExceeded");
        assert_eq!(agent.n_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_reported_as_config_error() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("Done.")]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_cost_limit(f64::NAN),
        );

        let (status, detail) = agent.run("task").await.into_pair();
        assert_eq!(status, "ConfigError");
        assert!(detail.contains("cost_limit"));
        assert_eq!(agent.model().n_calls(), 0);
    }

    #[test]
    fn test_validate_rejects_empty_submit_command() {
        let config = AgentConfig::default().with_submit(SubmitPolicy::Command {
            command: "  ".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_model_error_terminates_run() {
        let model = ScriptedModel::new(vec![]);
        let mut agent = ToolCallingAgent::new(Box::new(model), local_env(), simple_config());

        let (status, detail) = agent.run("task").await.into_pair();
        assert_eq!(status, "LlmError");
        assert_eq!(detail, "LLM response contained no choices");
    }

    #[tokio::test]
    async fn test_instance_template_error_terminates_run() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("Done.")]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_instance_template("{{ task }} {{ undefined_thing }}"),
        );

        let outcome = agent.run("task").await;
        assert_eq!(outcome.kind(), "TemplateError");
        assert_eq!(agent.model().n_calls(), 0);
    }

    #[tokio::test]
    async fn test_templates_see_all_layers() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("ok")]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_instance_template(
                "{{ task }}|{{ model_name }}|{{ timeout }}|{{ step_limit }}|{{ system }}",
            ),
        );

        agent.run("t").await;
        let user = agent.messages()[1].content().unwrap().to_string();
        let parts: Vec<&str> = user.split('|').collect();
        assert_eq!(&parts[..4], &["t", "scripted", "30", "0"]);
        assert!(!parts[4].is_empty());
    }

    #[tokio::test]
    async fn test_submit_command_policy() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("I am done")]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_submit(SubmitPolicy::Command {
                command: "echo diff-output".to_string(),
            }),
        );

        let outcome = agent.run("task").await;
        assert_eq!(outcome, RunOutcome::Submitted("diff-output\n".to_string()));
    }

    #[tokio::test]
    async fn test_rerun_resets_conversation_and_limits() {
        let model = ScriptedModel::new(vec![
            AssistantMessage::text("first"),
            AssistantMessage::text("second"),
        ]);
        let mut agent = ToolCallingAgent::new(
            Box::new(model),
            local_env(),
            simple_config().with_step_limit(1),
        );

        assert_eq!(agent.run("one").await.detail(), "first");
        assert_eq!(agent.run("two").await.detail(), "second");
        assert_eq!(agent.messages().len(), 3);
        assert_eq!(agent.messages()[1], Message::user("two"));
    }
}

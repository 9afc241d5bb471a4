//! Bash tool for executing shell commands in the environment.
//!
//! Completed commands are reported through the action observation template;
//! commands killed on timeout through the timeout template, with whatever
//! output they produced before being killed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{Tool, ToolContext, ToolError};
use crate::llm::ToolSchema;

/// Name under which the bash tool is registered.
pub const BASH_TOOL_NAME: &str = "execute_bash_command";

/// Parameters for the bash tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BashArgs {
    /// The shell command to execute.
    pub bash_command: String,
}

/// Tool for executing shell commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    type Args = BashArgs;

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            BASH_TOOL_NAME,
            "Executes `bash_command` in the terminal and returns all outputs.",
            json!({
                "type": "object",
                "properties": {
                    "bash_command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["bash_command"]
            }),
        )
    }

    async fn call(&self, args: BashArgs, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        info!(command = %args.bash_command, "Running bash command");
        let result = ctx.env.execute(&args.bash_command, "").await?;

        let rendered = if result.timed_out {
            ctx.vars
                .clone()
                .call_layer([
                    ("action", json!({ "action": args.bash_command })),
                    ("output", json!(result.output)),
                ])?
                .render(&ctx.config.timeout_template)?
        } else {
            ctx.vars
                .clone()
                .call_layer([("output", json!(result))])?
                .render(&ctx.config.action_observation_template)?
        };

        Ok(rendered)
    }
}

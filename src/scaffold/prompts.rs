//! Default templates for the tool-calling agent.
//!
//! All templates except the system prompt are rendered with Tera; see
//! [`crate::template`] for the variables available to them.

/// System prompt sent verbatim as the first message.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = r#"You are a helpful assistant that can interact with a computer shell to solve programming tasks.

You act by calling the `execute_bash_command` tool. Every call runs one command in a fresh shell; directory changes and environment variables do not persist between calls, so chain dependent commands with `&&` or prefix them with `cd`.

When the task is done, reply without calling any tool. That reply is your final answer."#;

/// First user message; `task` holds the task text.
pub const DEFAULT_INSTANCE_TEMPLATE: &str = r#"Please solve this task:

<task>
{{ task }}
</task>

You are working on a {{ system }} {{ machine }} machine. Commands time out after {{ timeout }} seconds, so avoid interactive programs and long-running servers.

Work step by step: inspect the relevant files, make your changes, verify them, then reply with a short summary and no tool call."#;

/// Observation for a command that completed; `output` has `output` and `returncode`.
pub const DEFAULT_ACTION_OBSERVATION_TEMPLATE: &str = r#"<returncode>{{ output.returncode }}</returncode>
{% if output.output | length < 10000 -%}
<output>
{{ output.output -}}
</output>
{%- else -%}
<warning>
The output of your last command was too long ({{ output.output | length }} characters). Use head, tail, grep or sed to narrow it down.
</warning>
<output_head>
{{ output.output | truncate(length=5000, end="") }}
</output_head>
{%- endif %}"#;

/// Observation for a command that timed out; `action.action` is the command
/// and `output` the text captured before it was killed.
pub const DEFAULT_TIMEOUT_TEMPLATE: &str = r#"The last command <command>{{ action.action }}</command> timed out and has been killed.
The output of the command was:
{% if output | length < 10000 -%}
<output>
{{ output }}
</output>
{%- else -%}
<warning>Output was too long and has been truncated.</warning>
<output_head>
{{ output | truncate(length=5000, end="") }}
</output_head>
{%- endif %}
Please try another command and make sure to avoid those requiring interactive input."#;

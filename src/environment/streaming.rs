//! Streaming command execution.
//!
//! Output is relayed to an [`OutputSink`] chunk by chunk while the command
//! runs, so long-running commands can be watched as they progress, and is
//! captured for the caller at the same time.
//!
//! The child writes stdout and stderr to the same pipe, so the captured text
//! keeps the exact order the command produced it in. Each command runs in its
//! own process group; on timeout the whole group is killed.

use std::io;
use std::os::fd::OwnedFd;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConsoleSink, Environment, EnvironmentConfig, ExecutionResult, OutputSink};
use crate::error::ExecutionError;

/// Size of the read buffer.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Environment that streams command output while capturing it.
pub struct StreamingEnvironment {
    config: EnvironmentConfig,
    sink: Arc<dyn OutputSink>,
}

/// Output read so far, plus the tail of a UTF-8 sequence split across reads.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    pending: Vec<u8>,
}

impl Capture {
    /// Record a chunk and relay every complete character of it.
    fn push(&mut self, chunk: &[u8], sink: &dyn OutputSink) {
        self.bytes.extend_from_slice(chunk);
        self.pending.extend_from_slice(chunk);
        let text = decode_complete(&mut self.pending);
        if !text.is_empty() {
            sink.chunk(&text);
        }
    }

    /// Relay whatever is still held back and return the captured text.
    fn finish(mut self, sink: &dyn OutputSink) -> String {
        if !self.pending.is_empty() {
            sink.chunk(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Decode the longest prefix of `pending` that does not end inside a UTF-8
/// sequence, leaving the incomplete tail in place. Invalid bytes become U+FFFD.
fn decode_complete(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

/// Send SIGKILL to every process in the child's process group.
fn kill_process_group(child: &Child) -> io::Result<()> {
    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "child already reaped"))?;
    // SAFETY: killpg only reads its integer arguments.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl StreamingEnvironment {
    /// Create an environment relaying output to the console.
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            config,
            sink: Arc::new(ConsoleSink),
        }
    }

    /// Replace the sink output is relayed to.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Get the environment configuration.
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Program and arguments used to run `command` in `cwd`.
    ///
    /// In container mode this is a `docker exec` invocation carrying the
    /// working directory and variables; on the host it is the bare shell
    /// invocation and the variables are set on the child instead.
    pub fn command_line(&self, command: &str, cwd: &str) -> (String, Vec<String>) {
        let cwd = self.resolve_cwd(cwd);

        match &self.config.container_id {
            Some(container_id) => {
                let mut args = vec!["exec".to_string()];
                if !cwd.is_empty() {
                    args.push("-w".to_string());
                    args.push(cwd.to_string());
                }
                for (key, value) in self.config.resolved_env() {
                    args.push("-e".to_string());
                    args.push(format!("{}={}", key, value));
                }
                args.push(container_id.clone());
                args.extend(self.config.shell.iter().cloned());
                args.push(command.to_string());
                (self.config.executable.clone(), args)
            }
            None => {
                let mut shell = self.config.shell.iter().cloned();
                let program = shell.next().unwrap_or_else(|| "sh".to_string());
                let mut args: Vec<String> = shell.collect();
                if self.config.shell.is_empty() {
                    args.push("-c".to_string());
                }
                args.push(command.to_string());
                (program, args)
            }
        }
    }

    fn resolve_cwd<'a>(&'a self, cwd: &'a str) -> &'a str {
        if cwd.is_empty() {
            &self.config.cwd
        } else {
            cwd
        }
    }

    /// Build the command with stdout and stderr both attached to `output`.
    fn build_command(
        &self,
        command: &str,
        cwd: &str,
        output: io::PipeWriter,
    ) -> Result<(String, Command), ExecutionError> {
        let (program, args) = self.command_line(command, cwd);
        let stderr = output.try_clone()?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(true);

        if self.config.container_id.is_none() {
            let cwd = self.resolve_cwd(cwd);
            if !cwd.is_empty() {
                cmd.current_dir(cwd);
            }
            for (key, value) in self.config.resolved_env() {
                cmd.env(key, value);
            }
        }

        Ok((program, cmd))
    }

    /// Read the output pipe until every writer has closed it, then reap the child.
    ///
    /// Chunks go into `capture` as they arrive, so whatever was read stays
    /// available if this future is dropped on timeout.
    async fn pump(
        &self,
        child: &mut Child,
        mut output: pipe::Receiver,
        capture: &mut Capture,
    ) -> Result<i32, ExecutionError> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = output.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            capture.push(&buf[..n], self.sink.as_ref());
        }

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Kill the child's process group and reap the child.
    async fn terminate(&self, child: &mut Child) {
        if let Err(e) = kill_process_group(child) {
            warn!(error = %e, "Failed to kill process group, killing child only");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill timed out command");
            }
        }
        if let Err(e) = child.wait().await {
            warn!(error = %e, "Failed to reap timed out command");
        }
    }
}

#[async_trait]
impl Environment for StreamingEnvironment {
    async fn execute(&self, command: &str, cwd: &str) -> Result<ExecutionResult, ExecutionError> {
        let (reader, writer) = io::pipe()?;
        let (program, mut cmd) = self.build_command(command, cwd, writer)?;
        debug!(program = %program, command = %command, cwd = %cwd, "Executing command");

        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.timeout);

        let mut child = cmd
            .spawn()
            .map_err(|source| ExecutionError::Spawn { program, source })?;
        // The command still holds our copies of the write end; EOF needs them closed.
        drop(cmd);
        let output = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;

        let mut capture = Capture::default();
        let pumped =
            tokio::time::timeout_at(deadline, self.pump(&mut child, output, &mut capture)).await;

        match pumped {
            Ok(Ok(returncode)) => {
                info!(
                    returncode,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Command finished"
                );
                Ok(ExecutionResult::completed(
                    capture.finish(self.sink.as_ref()),
                    returncode,
                ))
            }
            Ok(Err(e)) => {
                self.terminate(&mut child).await;
                Err(e)
            }
            Err(_) => {
                self.terminate(&mut child).await;
                let output = capture.finish(self.sink.as_ref());
                self.sink.diagnostic(&format!(
                    "\nCommand timed out after {}s",
                    self.config.timeout
                ));
                warn!(timeout_secs = self.config.timeout, "Command timed out");
                Ok(ExecutionResult::timed_out(output))
            }
        }
    }

    fn template_vars(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NullSink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<String>>,
        diagnostics: Mutex<Vec<String>>,
    }

    impl OutputSink for RecordingSink {
        fn chunk(&self, text: &str) {
            self.chunks.lock().unwrap().push(text.to_string());
        }

        fn diagnostic(&self, text: &str) {
            self.diagnostics.lock().unwrap().push(text.to_string());
        }
    }

    fn local_env(timeout: u64) -> StreamingEnvironment {
        StreamingEnvironment::new(
            EnvironmentConfig::local()
                .with_shell(["sh", "-c"])
                .with_timeout(timeout),
        )
        .with_sink(Arc::new(NullSink))
    }

    #[test]
    fn test_command_line_container() {
        let config = EnvironmentConfig::container("abc123")
            .with_cwd("/testbed")
            .with_env("PAGER", "cat");
        let env = StreamingEnvironment::new(config);

        let (program, args) = env.command_line("ls -la", "");
        assert_eq!(program, "docker");
        assert_eq!(
            args,
            vec![
                "exec", "-w", "/testbed", "-e", "PAGER=cat", "abc123", "bash", "-lc", "ls -la"
            ]
        );
    }

    #[test]
    fn test_command_line_explicit_cwd_wins() {
        let env = StreamingEnvironment::new(EnvironmentConfig::container("c").with_cwd("/a"));
        let (_, args) = env.command_line("pwd", "/b");
        assert_eq!(&args[..3], &["exec", "-w", "/b"]);
    }

    #[test]
    fn test_command_line_local() {
        let env = StreamingEnvironment::new(EnvironmentConfig::local());
        let (program, args) = env.command_line("echo hi", "/tmp");
        assert_eq!(program, "bash");
        assert_eq!(args, vec!["-lc", "echo hi"]);
    }

    #[tokio::test]
    async fn test_execute_captures_output_and_exit_code() {
        let env = local_env(10);
        let result = env.execute("echo hi; exit 3", "").await.unwrap();
        assert_eq!(result.output, "hi\n");
        assert_eq!(result.returncode, 3);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_execute_merges_stderr_in_write_order() {
        let env = local_env(10);
        for _ in 0..50 {
            let result = env
                .execute("printf a; printf b 1>&2; printf c", "")
                .await
                .unwrap();
            assert_eq!(result.output, "abc");
        }
    }

    #[test]
    fn test_capture_holds_back_split_utf8() {
        let sink = RecordingSink::default();
        let mut capture = Capture::default();
        let bytes = "é!".as_bytes();

        capture.push(&bytes[..1], &sink);
        capture.push(&bytes[1..], &sink);

        assert_eq!(sink.chunks.lock().unwrap().as_slice(), ["é!"]);
        assert_eq!(capture.finish(&sink), "é!");
    }

    #[test]
    fn test_capture_replaces_invalid_bytes() {
        let sink = RecordingSink::default();
        let mut capture = Capture::default();

        capture.push(b"a\xffb", &sink);
        capture.push(b"\xc3", &sink);
        let output = capture.finish(&sink);

        assert_eq!(sink.chunks.lock().unwrap().concat(), "a\u{FFFD}b\u{FFFD}");
        assert_eq!(output, "a\u{FFFD}b\u{FFFD}");
    }

    #[tokio::test]
    async fn test_execute_relays_chunks_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let env = StreamingEnvironment::new(EnvironmentConfig::local().with_shell(["sh", "-c"]))
            .with_sink(sink.clone());

        let result = env.execute("echo streamed", "").await.unwrap();
        let relayed: String = sink.chunks.lock().unwrap().concat();
        assert_eq!(relayed, result.output);
        assert!(sink.diagnostics.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_and_keeps_partial_output() {
        let sink = Arc::new(RecordingSink::default());
        let env = StreamingEnvironment::new(
            EnvironmentConfig::local()
                .with_shell(["sh", "-c"])
                .with_timeout(1),
        )
        .with_sink(sink.clone());

        let started = std::time::Instant::now();
        let result = env.execute("echo start; sleep 30", "").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.timed_out);
        assert_eq!(result.returncode, -1);
        assert_eq!(result.output, "start\n");
        let diagnostics = sink.diagnostics.lock().unwrap();
        assert_eq!(diagnostics.as_slice(), ["\nCommand timed out after 1s"]);
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_forked_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let env = local_env(1);

        // The subshell is a separate process from the shell that runs it.
        let command = format!("(sleep 2; touch '{}'); true", marker.display());
        let result = env.execute(&command, "").await.unwrap();
        assert!(result.timed_out);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "forked command outlived the timeout");
    }

    #[tokio::test]
    async fn test_execute_timeout_with_background_writer() {
        let env = local_env(1);
        let started = std::time::Instant::now();
        let result = env.execute("echo bg; sleep 30 & wait", "").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.timed_out);
        assert_eq!(result.output, "bg\n");
    }

    #[tokio::test]
    async fn test_execute_timeout_without_output() {
        let env = local_env(1);
        let result = env.execute("sleep 30", "").await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.returncode, -1);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_execute_uses_cwd_and_static_env() {
        let dir = tempfile::tempdir().unwrap();
        let env = StreamingEnvironment::new(
            EnvironmentConfig::local()
                .with_shell(["sh", "-c"])
                .with_env("BASHLOOP_GREETING", "hello"),
        )
        .with_sink(Arc::new(NullSink));

        let cwd = dir.path().to_string_lossy().to_string();
        let result = env
            .execute("echo $BASHLOOP_GREETING; pwd", &cwd)
            .await
            .unwrap();
        let mut lines = result.output.lines();
        assert_eq!(lines.next(), Some("hello"));
        let reported = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_execute_spawn_failure() {
        let env = StreamingEnvironment::new(
            EnvironmentConfig::local().with_shell(["/nonexistent/shell/for/bashloop", "-c"]),
        )
        .with_sink(Arc::new(NullSink));

        let result = env.execute("true", "").await;
        assert!(matches!(result, Err(ExecutionError::Spawn { .. })));
    }

    #[test]
    fn test_template_vars_expose_config() {
        let env = StreamingEnvironment::new(EnvironmentConfig::container("abc").with_timeout(7));
        let vars = env.template_vars();
        assert_eq!(vars["container_id"], "abc");
        assert_eq!(vars["timeout"], 7);
    }
}

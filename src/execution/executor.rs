//! Safe command executor.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

use super::command::{ExecOptions, SafeArg, SafeCommand};
use super::result::ExecutionOutput;
use crate::error::GuardError;
use crate::security::{sanitize_for_display, CommandPolicy};
use crate::Result;

/// Default execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default shell used to run composed command lines.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Upper bound on captured bytes per stream.
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// How long to wait for pipes to close after the child has exited or been killed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs policy-approved commands with individually quoted arguments.
///
/// There is no global execution lock: concurrent calls spawn independent
/// children.
#[derive(Debug, Clone)]
pub struct SafeExecutor {
    policy: Arc<CommandPolicy>,
    shell: PathBuf,
    default_timeout: Duration,
}

impl SafeExecutor {
    /// Create an executor enforcing `policy`.
    pub fn new(policy: Arc<CommandPolicy>) -> Self {
        Self {
            policy,
            shell: PathBuf::from(DEFAULT_SHELL),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Change the timeout applied when [`ExecOptions::timeout`] is unset.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Check the policy and compose the command without running it.
    pub fn prepare(&self, command: &str, action: &str, args: &[SafeArg]) -> Result<SafeCommand> {
        if !self.policy.is_action_allowed(command, action) {
            tracing::warn!(
                command = %sanitize_for_display(command),
                action = %sanitize_for_display(action),
                "command policy violation"
            );
            return Err(GuardError::PolicyViolation {
                command: command.to_string(),
                action: action.to_string(),
            });
        }

        Ok(SafeCommand::new(command, action, args))
    }

    /// Run `command action args...` through the shell.
    ///
    /// Non-zero exits, spawn failures and timeouts are classified into
    /// [`GuardError`]; raw stderr and system errors only reach the log.
    pub async fn execute(
        &self,
        command: &str,
        action: &str,
        args: &[SafeArg],
        options: &ExecOptions,
    ) -> Result<ExecutionOutput> {
        let prepared = self.prepare(command, action, args)?;
        self.run(&prepared, options).await
    }

    async fn run(&self, command: &SafeCommand, options: &ExecOptions) -> Result<ExecutionOutput> {
        let line = command.render();
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        let mut process = tokio::process::Command::new(&self.shell);
        process
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &options.working_dir {
            process.current_dir(dir.as_path());
        }
        for (key, value) in &options.env {
            process.env(key.as_str(), value.as_text().as_ref());
        }

        // Own process group, so a timeout can take down every descendant.
        #[cfg(unix)]
        process.process_group(0);

        tracing::debug!(command = %command.program(), action = %command.action(), "spawning command");

        let mut child = process.spawn().map_err(|e| {
            tracing::warn!(command = %command.program(), error = %e, "failed to spawn command");
            GuardError::ExecutionFailed { exit_code: None }
        })?;

        let mut stdout = drain(child.stdout.take());
        let mut stderr = drain(child.stderr.take());

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::warn!(command = %command.program(), error = %e, "failed to wait for command");
                kill_tree(&mut child).await;
                return Err(GuardError::ExecutionFailed { exit_code: None });
            }
            Err(_) => {
                kill_tree(&mut child).await;
                let out = collect(&mut stdout).await;
                let err = collect(&mut stderr).await;

                tracing::warn!(
                    command = %command.program(),
                    action = %command.action(),
                    timeout_ms = timeout.as_millis() as u64,
                    "command timed out"
                );

                let partial_output = options.include_partial_output.then(|| {
                    let mut text = String::from_utf8_lossy(&out).into_owned();
                    text.push_str(&String::from_utf8_lossy(&err));
                    text
                });
                return Err(GuardError::Timeout { partial_output });
            }
        };

        let out = collect(&mut stdout).await;
        let err = collect(&mut stderr).await;
        let output = ExecutionOutput::new(&out, &err, start.elapsed()).with_exit_code(status.code());

        if !status.success() {
            tracing::warn!(
                command = %command.program(),
                action = %command.action(),
                exit_code = ?status.code(),
                stderr = %sanitize_for_display(output.stderr.trim()),
                "command exited unsuccessfully"
            );
            return Err(GuardError::ExecutionFailed {
                exit_code: status.code(),
            });
        }

        tracing::debug!(
            command = %command.program(),
            duration_ms = output.duration.as_millis() as u64,
            "command completed"
        );
        Ok(output)
    }
}

/// Read a child pipe to its end (bounded) on a separate task.
fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = pipe {
            if let Err(e) = pipe.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "failed to read child output");
            }
        }
        buf
    })
}

/// Wait for a drain task, giving up after [`DRAIN_TIMEOUT`].
async fn collect(handle: &mut JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut *handle).await {
        Ok(Ok(buf)) => buf,
        _ => {
            handle.abort();
            Vec::new()
        }
    }
}

/// Kill the child's whole process group, then the child itself.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: killpg has no memory-safety preconditions. The group id
            // is the child's pid because it was spawned with process_group(0).
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "child already exited");
    }
}

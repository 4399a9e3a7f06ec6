//! Execution result types.

use std::time::Duration;

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit code (if the process was not killed by a signal).
    pub exit_code: Option<i32>,
    /// Execution duration.
    pub duration: Duration,
}

impl ExecutionOutput {
    pub(crate) fn new(stdout: &[u8], stderr: &[u8], duration: Duration) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            exit_code: None,
            duration,
        }
    }

    /// Set the exit code.
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Check if command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get stdout, trimmed.
    pub fn output_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stdout lines.
    pub fn output_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_output_new() {
        let output = ExecutionOutput::new(b"hello\n", b"", Duration::from_millis(100))
            .with_exit_code(Some(0));

        assert_eq!(output.stdout, "hello\n");
        assert!(output.stderr.is_empty());
        assert_eq!(output.duration, Duration::from_millis(100));
        assert!(output.success());
    }

    #[test]
    fn test_execution_output_lossy_decode() {
        let output = ExecutionOutput::new(&[0x66, 0xff, 0x6f], b"", Duration::ZERO);
        assert_eq!(output.stdout, "f\u{fffd}o");
    }

    #[test]
    fn test_signal_exit_is_not_success() {
        let output = ExecutionOutput::default().with_exit_code(None);
        assert!(!output.success());
    }

    #[test]
    fn test_output_trimmed_and_lines() {
        let output = ExecutionOutput::new(b"  line1\nline2  \n", b"", Duration::ZERO);
        assert_eq!(output.output_trimmed(), "line1\nline2");
        let lines: Vec<_> = output.output_lines().collect();
        assert_eq!(lines, vec!["  line1", "line2  "]);
    }
}

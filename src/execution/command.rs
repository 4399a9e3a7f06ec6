//! Command building and representation.

use std::borrow::Cow;
use std::time::Duration;

use crate::security::{
    Canonical, ConfinedPath, DomainName, Identifier, Port, SqlIdentifier,
};

/// An argument that is allowed to reach a shell line.
///
/// Every variant except [`SafeArg::Literal`] wraps the output of a sanitizer.
/// Literals are compile-time constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeArg {
    Identifier(Identifier),
    Port(Port),
    Domain(DomainName),
    Sql(SqlIdentifier),
    Path(ConfinedPath),
    Literal(&'static str),
}

impl SafeArg {
    /// Unquoted text of the argument.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Identifier(v) => Cow::Borrowed(v.as_str()),
            Self::Port(p) => Cow::Owned(p.get().to_string()),
            Self::Domain(d) => Cow::Borrowed(d.as_str()),
            Self::Sql(s) => Cow::Borrowed(s.as_str()),
            Self::Path(p) => p.as_path().to_string_lossy(),
            Self::Literal(s) => Cow::Borrowed(s),
        }
    }
}

impl From<Identifier> for SafeArg {
    fn from(value: Identifier) -> Self {
        Self::Identifier(value)
    }
}

impl From<Port> for SafeArg {
    fn from(value: Port) -> Self {
        Self::Port(value)
    }
}

impl From<DomainName> for SafeArg {
    fn from(value: DomainName) -> Self {
        Self::Domain(value)
    }
}

impl From<SqlIdentifier> for SafeArg {
    fn from(value: SqlIdentifier) -> Self {
        Self::Sql(value)
    }
}

impl From<ConfinedPath> for SafeArg {
    fn from(value: ConfinedPath) -> Self {
        Self::Path(value)
    }
}

impl From<Canonical> for SafeArg {
    fn from(value: Canonical) -> Self {
        match value {
            Canonical::Identifier(v) => Self::Identifier(v),
            Canonical::Port(v) => Self::Port(v),
            Canonical::Domain(v) => Self::Domain(v),
            Canonical::Sql(v) => Self::Sql(v),
            Canonical::Path(v) => Self::Path(v),
        }
    }
}

/// Wrap `arg` in single quotes, rendering embedded `'` as `'\''`.
///
/// Inside single quotes a POSIX shell performs no expansion at all, so the
/// result is always exactly one literal word.
pub fn quote_arg(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// A base command, its sub-action and sanitized arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCommand {
    program: String,
    action: String,
    args: Vec<SafeArg>,
}

impl SafeCommand {
    pub(crate) fn new(program: &str, action: &str, args: &[SafeArg]) -> Self {
        Self {
            program: program.to_string(),
            action: action.to_string(),
            args: args.to_vec(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn args(&self) -> &[SafeArg] {
        &self.args
    }

    /// Compose the shell line: bare program, then every other token quoted.
    ///
    /// The program name is a policy key and matches `[A-Za-z0-9._-]+`.
    pub fn render(&self) -> String {
        let mut line = self.program.clone();
        line.push(' ');
        line.push_str(&quote_arg(&self.action));
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(&arg.as_text()));
        }
        line
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Maximum execution time; the executor default applies when unset.
    pub timeout: Option<Duration>,
    /// Working directory for the child.
    pub working_dir: Option<ConfinedPath>,
    /// Extra environment variables.
    pub env: Vec<(Identifier, SafeArg)>,
    /// Attach captured output to timeout errors.
    pub include_partial_output: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: ConfinedPath) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: Identifier, value: impl Into<SafeArg>) -> Self {
        self.env.push((key, value.into()));
        self
    }

    /// Set whether timeouts report partial output.
    pub fn include_partial_output(mut self, include: bool) -> Self {
        self.include_partial_output = include;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{sanitize_app_name, sanitize_identifier, sanitize_port};
    use std::collections::BTreeSet;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote_arg("hello"), "'hello'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn test_quote_embedded_single_quote() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_arg("''"), "''\\'''\\'''");
    }

    #[test]
    fn test_quote_metacharacters_are_inert() {
        let quoted = quote_arg("$(rm -rf /); `id` | cat > x & \\ \n");
        assert!(quoted.starts_with('\''));
        assert!(quoted.ends_with('\''));
        assert_eq!(&quoted[1..quoted.len() - 1], "$(rm -rf /); `id` | cat > x & \\ \n");
    }

    #[test]
    fn test_render_quotes_every_token_after_program() {
        let name = sanitize_app_name("web").unwrap();
        let cmd = SafeCommand::new("pm2", "restart", &[name.into(), SafeArg::Literal("--update-env")]);
        assert_eq!(cmd.render(), "pm2 'restart' 'web' '--update-env'");
    }

    #[test]
    fn test_render_injection_literal_stays_one_word() {
        let cmd = SafeCommand::new(
            "printf",
            "%s",
            &[SafeArg::Literal("x'; touch /tmp/pwned; `echo y`")],
        );
        assert_eq!(
            cmd.render(),
            "printf '%s' 'x'\\''; touch /tmp/pwned; `echo y`'"
        );
    }

    #[test]
    fn test_safe_arg_text() {
        let reserved = BTreeSet::new();
        let port = sanitize_port("8500", &reserved).unwrap();
        assert_eq!(SafeArg::from(port).as_text(), "8500");
        assert_eq!(SafeArg::Literal("--json").as_text(), "--json");
    }

    #[test]
    fn test_exec_options_builder() {
        let key = sanitize_identifier("NODE_ENV", 64).unwrap();
        let options = ExecOptions::new()
            .timeout(Duration::from_secs(5))
            .env(key, SafeArg::Literal("production"))
            .include_partial_output(true);

        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.env.len(), 1);
        assert!(options.include_partial_output);
        assert!(options.working_dir.is_none());
    }
}

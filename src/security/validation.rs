//! Canonical-form sanitizers.
//!
//! Each sanitizer maps one raw string into a constrained domain or rejects it.
//! The returned newtypes can only be built here, so holding an [`Identifier`]
//! (or any sibling type) proves the value went through its sanitizer.
//!
//! Identifier-style sanitizers strip characters outside their class instead of
//! rejecting the input: `"my app"` and `"myapp"` both become `"myapp"`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::paths::{ConfinedPath, PathPolicy};
use crate::error::GuardError;

/// Maximum length of an application or process name.
pub const MAX_APP_NAME_LEN: usize = 100;

/// Maximum length of a project id.
pub const MAX_PROJECT_ID_LEN: usize = 50;

/// Maximum length of an SQL identifier.
pub const MAX_SQL_IDENTIFIER_LEN: usize = 64;

/// Ports that may never be handed to an application.
pub const DEFAULT_RESERVED_PORTS: &[u16] = &[22, 25, 53, 80, 443, 3306, 5432, 6379, 27017];

/// Validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing was left after removing disallowed characters.
    Empty,
    /// Canonical value exceeds its length bound.
    TooLong { length: usize, max: usize },
    /// Port is not an integer.
    NotANumber,
    /// Port outside 1..=65535.
    PortOutOfRange(i64),
    /// Port is in the reserved set.
    ReservedPort(u16),
    /// A dot-separated domain segment failed the label rule.
    InvalidDomainLabel { position: usize },
    /// Value contains a character that can never be accepted.
    InvalidCharacter(char),
    /// Value is not valid JSON scalar input for this field.
    UnsupportedType,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "value is empty after removing invalid characters"),
            Self::TooLong { length, max } => {
                write!(f, "value too long: {} chars (max: {})", length, max)
            }
            Self::NotANumber => write!(f, "port must be an integer"),
            Self::PortOutOfRange(port) => {
                write!(f, "port {} is outside the range 1-65535", port)
            }
            Self::ReservedPort(port) => write!(f, "port {} is reserved", port),
            Self::InvalidDomainLabel { position } => {
                write!(f, "invalid domain label at segment {}", position + 1)
            }
            Self::InvalidCharacter(c) => write!(f, "value contains invalid character: {:?}", c),
            Self::UnsupportedType => write!(f, "value must be a string or number"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A string restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A port in 1..=65535 outside the reserved set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port(u16);

impl Port {
    pub fn get(self) -> u16 {
        self.0
    }
}

/// One or more lower-cased, dot-separated DNS labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(String);

impl DomainName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of dot-separated labels.
    pub fn label_count(&self) -> usize {
        self.0.split('.').count()
    }
}

/// A string restricted to `[A-Za-z0-9_]`, for CLI-built queries only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlIdentifier(String);

impl SqlIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        })*
    };
}

display_inner!(Identifier, Port, DomainName, SqlIdentifier);

/// Strip every character outside `keep` and enforce `1..=max_len`.
fn strip_to_class(raw: &str, max_len: usize, keep: fn(char) -> bool) -> Result<String, ValidationError> {
    let stripped: String = raw.chars().filter(|c| keep(*c)).collect();

    if stripped.is_empty() {
        return Err(ValidationError::Empty);
    }

    if stripped.len() > max_len {
        return Err(ValidationError::TooLong {
            length: stripped.len(),
            max: max_len,
        });
    }

    Ok(stripped)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_sql_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Reduce `raw` to `[A-Za-z0-9_-]` and require `1..=max_len` characters.
pub fn sanitize_identifier(raw: &str, max_len: usize) -> Result<Identifier, ValidationError> {
    strip_to_class(raw, max_len, is_identifier_char).map(Identifier)
}

/// Sanitize an application or process name.
pub fn sanitize_app_name(raw: &str) -> Result<Identifier, ValidationError> {
    sanitize_identifier(raw, MAX_APP_NAME_LEN)
}

/// Sanitize a project id.
pub fn sanitize_project_id(raw: &str) -> Result<Identifier, ValidationError> {
    sanitize_identifier(raw, MAX_PROJECT_ID_LEN)
}

/// Reduce `raw` to `[A-Za-z0-9_]` and require `1..=max_len` characters.
pub fn sanitize_sql_identifier(raw: &str, max_len: usize) -> Result<SqlIdentifier, ValidationError> {
    strip_to_class(raw, max_len, is_sql_identifier_char).map(SqlIdentifier)
}

/// Parse a port and check it against range and the reserved set.
pub fn sanitize_port(raw: &str, reserved: &BTreeSet<u16>) -> Result<Port, ValidationError> {
    let value: i64 = raw.trim().parse().map_err(|_| ValidationError::NotANumber)?;

    let port = u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ValidationError::PortOutOfRange(value))?;

    if reserved.contains(&port) {
        return Err(ValidationError::ReservedPort(port));
    }

    Ok(Port(port))
}

fn domain_label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,61}[A-Za-z0-9]?$").expect("valid label regex")
    })
}

/// Validate every dot-separated segment and return the lower-cased name.
pub fn sanitize_domain_label(raw: &str) -> Result<DomainName, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }

    let pattern = domain_label_pattern();
    for (position, segment) in raw.split('.').enumerate() {
        if !pattern.is_match(segment) {
            return Err(ValidationError::InvalidDomainLabel { position });
        }
    }

    Ok(DomainName(raw.to_ascii_lowercase()))
}

/// Strip control characters and cap length, for logging rejected input.
pub fn sanitize_for_display(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .take(200)
        .collect()
}

/// The semantic domain a request field must be mapped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Application or process name (1-100).
    AppName,
    /// Project id (1-50).
    ProjectId,
    /// Generic identifier with a custom bound.
    Identifier(usize),
    /// Network port outside the reserved set.
    Port,
    /// DNS name made of one or more labels.
    Domain,
    /// SQL identifier (1-64).
    SqlIdentifier,
    /// Filesystem path confined to the allowed roots.
    Path,
}

/// A sanitized value of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Identifier(Identifier),
    Port(Port),
    Domain(DomainName),
    Sql(SqlIdentifier),
    Path(ConfinedPath),
}

impl Canonical {
    /// JSON representation written back into request bodies.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Identifier(v) => v.as_str().into(),
            Self::Port(p) => p.get().into(),
            Self::Domain(d) => d.as_str().into(),
            Self::Sql(s) => s.as_str().into(),
            Self::Path(p) => p.as_path().to_string_lossy().into_owned().into(),
        }
    }
}

/// Sanitizer context: the immutable configuration some sanitizers need.
#[derive(Debug, Clone)]
pub struct Validator {
    reserved_ports: BTreeSet<u16>,
    paths: PathPolicy,
}

impl Validator {
    /// Create a validator with the given reserved ports and path policy.
    pub fn new(reserved_ports: impl IntoIterator<Item = u16>, paths: PathPolicy) -> Self {
        Self {
            reserved_ports: reserved_ports.into_iter().collect(),
            paths,
        }
    }

    /// Validate a port against this validator's reserved set.
    pub fn port(&self, raw: &str) -> Result<Port, ValidationError> {
        sanitize_port(raw, &self.reserved_ports)
    }

    /// Confine a path to the allowed roots.
    pub fn path(&self, raw: impl AsRef<Path>) -> Result<ConfinedPath, GuardError> {
        self.paths.confine(raw)
    }

    /// Path policy backing [`Validator::path`].
    pub fn paths(&self) -> &PathPolicy {
        &self.paths
    }

    /// Whether `port` is in the reserved set.
    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved_ports.contains(&port)
    }

    /// Map `raw` into the domain named by `kind`.
    pub fn apply(&self, kind: FieldKind, raw: &str) -> Result<Canonical, GuardError> {
        let canonical = match kind {
            FieldKind::AppName => Canonical::Identifier(sanitize_app_name(raw)?),
            FieldKind::ProjectId => Canonical::Identifier(sanitize_project_id(raw)?),
            FieldKind::Identifier(max) => Canonical::Identifier(sanitize_identifier(raw, max)?),
            FieldKind::Port => Canonical::Port(self.port(raw)?),
            FieldKind::Domain => Canonical::Domain(sanitize_domain_label(raw)?),
            FieldKind::SqlIdentifier => {
                Canonical::Sql(sanitize_sql_identifier(raw, MAX_SQL_IDENTIFIER_LEN)?)
            }
            FieldKind::Path => Canonical::Path(self.path(raw)?),
        };
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserved() -> BTreeSet<u16> {
        DEFAULT_RESERVED_PORTS.iter().copied().collect()
    }

    fn matches_identifier_class(s: &str, max: usize) -> bool {
        !s.is_empty() && s.len() <= max && s.chars().all(is_identifier_char)
    }

    #[test]
    fn test_identifier_passthrough() {
        let id = sanitize_identifier("my-app_01", 100).unwrap();
        assert_eq!(id.as_str(), "my-app_01");
    }

    #[test]
    fn test_identifier_strips_invalid_characters() {
        assert_eq!(sanitize_app_name("my app").unwrap().as_str(), "myapp");
        assert_eq!(sanitize_app_name("api;rm -rf /").unwrap().as_str(), "apirm-rf");
        assert_eq!(
            sanitize_app_name("x'; touch /tmp/pwned; `echo y`").unwrap().as_str(),
            "xtouchtmppwnedechoy"
        );
    }

    #[test]
    fn test_identifier_collision_is_documented_behavior() {
        assert_eq!(
            sanitize_app_name("my app").unwrap(),
            sanitize_app_name("myapp").unwrap()
        );
    }

    #[test]
    fn test_identifier_empty_after_strip() {
        assert_eq!(sanitize_app_name(""), Err(ValidationError::Empty));
        assert_eq!(sanitize_app_name("../;|&"), Err(ValidationError::Empty));
        assert_eq!(sanitize_app_name("ñ日本"), Err(ValidationError::Empty));
    }

    #[test]
    fn test_identifier_too_long() {
        let long = "a".repeat(101);
        assert_eq!(
            sanitize_app_name(&long),
            Err(ValidationError::TooLong {
                length: 101,
                max: 100
            })
        );
        assert!(sanitize_app_name(&"a".repeat(100)).is_ok());
        assert!(sanitize_project_id(&"p".repeat(51)).is_err());
        assert!(sanitize_project_id(&"p".repeat(50)).is_ok());
    }

    #[test]
    fn test_identifier_length_counts_after_strip() {
        let padded = format!("{}{}", "a".repeat(50), " ".repeat(200));
        assert!(sanitize_project_id(&padded).is_ok());
    }

    #[test]
    fn test_identifier_output_class_and_idempotence() {
        let inputs = [
            "plain",
            "with space",
            "../../etc/passwd",
            "$(whoami)",
            "a`b`c",
            "tab\tand\nnewline",
            "unicode-ünïcödé",
            "--flag",
            "'quoted'",
            "__under__",
        ];
        for max in [5, 50, 100] {
            for input in inputs {
                if let Ok(once) = sanitize_identifier(input, max) {
                    assert!(matches_identifier_class(once.as_str(), max), "{input}");
                    let twice = sanitize_identifier(once.as_str(), max).unwrap();
                    assert_eq!(once, twice, "{input}");
                }
            }
        }
    }

    #[test]
    fn test_project_id_traversal_is_stripped() {
        assert_eq!(sanitize_project_id("../../etc").unwrap().as_str(), "etc");
    }

    #[test]
    fn test_port_valid() {
        assert_eq!(sanitize_port("8500", &reserved()).unwrap().get(), 8500);
        assert_eq!(sanitize_port(" 3000 ", &reserved()).unwrap().get(), 3000);
        assert_eq!(sanitize_port("65535", &reserved()).unwrap().get(), 65535);
        assert_eq!(sanitize_port("1", &reserved()).unwrap().get(), 1);
    }

    #[test]
    fn test_port_reserved() {
        assert_eq!(
            sanitize_port("80", &reserved()),
            Err(ValidationError::ReservedPort(80))
        );
        assert!(sanitize_port("22", &reserved()).is_err());
        assert!(sanitize_port("5432", &reserved()).is_err());
    }

    #[test]
    fn test_port_out_of_range() {
        assert_eq!(
            sanitize_port("70000", &reserved()),
            Err(ValidationError::PortOutOfRange(70000))
        );
        assert!(sanitize_port("0", &reserved()).is_err());
        assert!(sanitize_port("-1", &reserved()).is_err());
    }

    #[test]
    fn test_port_not_a_number() {
        assert_eq!(
            sanitize_port("not-a-number", &reserved()),
            Err(ValidationError::NotANumber)
        );
        assert!(sanitize_port("", &reserved()).is_err());
        assert!(sanitize_port("80; ls", &reserved()).is_err());
        assert!(sanitize_port("8500.5", &reserved()).is_err());
    }

    #[test]
    fn test_port_custom_reserved_set() {
        let custom: BTreeSet<u16> = [8080].into_iter().collect();
        assert!(sanitize_port("80", &custom).is_ok());
        assert!(sanitize_port("8080", &custom).is_err());
    }

    #[test]
    fn test_domain_label_valid() {
        assert_eq!(sanitize_domain_label("api").unwrap().as_str(), "api");
        assert_eq!(
            sanitize_domain_label("My-App.Example.COM").unwrap().as_str(),
            "my-app.example.com"
        );
        assert_eq!(
            sanitize_domain_label("a.b.c").unwrap().label_count(),
            3
        );
        assert!(sanitize_domain_label(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_domain_label_invalid() {
        assert_eq!(sanitize_domain_label(""), Err(ValidationError::Empty));
        assert_eq!(
            sanitize_domain_label("-leading"),
            Err(ValidationError::InvalidDomainLabel { position: 0 })
        );
        assert_eq!(
            sanitize_domain_label("ok..double"),
            Err(ValidationError::InvalidDomainLabel { position: 1 })
        );
        assert!(sanitize_domain_label("trailing.").is_err());
        assert!(sanitize_domain_label("under_score").is_err());
        assert!(sanitize_domain_label("space here").is_err());
        assert!(sanitize_domain_label("evil;rm").is_err());
        assert!(sanitize_domain_label(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_sql_identifier_strips() {
        let sql = sanitize_sql_identifier("table; DROP TABLE users;--", MAX_SQL_IDENTIFIER_LEN)
            .unwrap();
        assert_eq!(sql.as_str(), "tableDROPTABLEusers");
        assert_eq!(
            sanitize_sql_identifier("user-events", 64).unwrap().as_str(),
            "userevents"
        );
    }

    #[test]
    fn test_sql_identifier_bounds() {
        assert_eq!(sanitize_sql_identifier("--;", 64), Err(ValidationError::Empty));
        assert!(sanitize_sql_identifier(&"t".repeat(65), 64).is_err());
        assert!(sanitize_sql_identifier(&"t".repeat(64), 64).is_ok());
    }

    #[test]
    fn test_sanitize_for_display() {
        assert_eq!(sanitize_for_display("a\x00b\nc"), "abc");
        assert_eq!(sanitize_for_display(&"x".repeat(500)).len(), 200);
    }

    #[test]
    fn test_canonical_to_json() {
        let port = sanitize_port("8500", &reserved()).unwrap();
        assert_eq!(Canonical::Port(port).to_json(), serde_json::json!(8500));

        let id = sanitize_app_name("web app").unwrap();
        assert_eq!(Canonical::Identifier(id).to_json(), serde_json::json!("webapp"));
    }

    #[test]
    fn test_validator_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new([dir.path()]).unwrap();
        let validator = Validator::new(DEFAULT_RESERVED_PORTS.iter().copied(), policy);

        assert!(matches!(
            validator.apply(FieldKind::Port, "8500"),
            Ok(Canonical::Port(p)) if p.get() == 8500
        ));
        assert!(matches!(
            validator.apply(FieldKind::Port, "443"),
            Err(GuardError::Validation(ValidationError::ReservedPort(443)))
        ));
        assert!(matches!(
            validator.apply(FieldKind::Identifier(3), "abcd"),
            Err(GuardError::Validation(ValidationError::TooLong { .. }))
        ));
        assert!(matches!(
            validator.apply(FieldKind::Path, "/etc"),
            Err(GuardError::PathNotAllowed)
        ));
        assert!(validator.is_reserved(22));
        assert!(!validator.is_reserved(8500));
    }
}

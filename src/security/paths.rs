//! Path confinement.
//!
//! Paths are resolved component by component: existing prefixes are
//! canonicalized (following symlinks), and the first missing component onward
//! is normalized lexically. Containment is then checked on the resolved form
//! with [`Path::starts_with`], which compares whole components.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::config::ConfigError;
use crate::error::GuardError;

/// Maximum accepted raw path length in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// An absolute, resolved path under one of the allowed roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfinedPath {
    path: PathBuf,
    is_root: bool,
}

impl ConfinedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Whether this path is exactly one of the allowed roots.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for ConfinedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Allow-list of root directories, fixed at construction.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    roots: Vec<PathBuf>,
}

impl PathPolicy {
    /// Build a policy from configured roots.
    ///
    /// Roots must be absolute and must not resolve to `/`.
    pub fn new<I, P>(roots: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut resolved = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.is_absolute() {
                return Err(ConfigError::InvalidRoot(root.display().to_string()));
            }
            let canonical = resolve(root)
                .map_err(|_| ConfigError::InvalidRoot(root.display().to_string()))?;
            if canonical.parent().is_none() {
                return Err(ConfigError::InvalidRoot(root.display().to_string()));
            }
            if !resolved.contains(&canonical) {
                resolved.push(canonical);
            }
        }

        if resolved.is_empty() {
            return Err(ConfigError::InvalidRoot("<empty>".to_string()));
        }

        Ok(Self { roots: resolved })
    }

    /// Resolved roots, in configuration order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve `raw` and require it to equal or descend from an allowed root.
    ///
    /// Relative inputs are resolved against the process working directory.
    /// Existence is not required.
    pub fn confine(&self, raw: impl AsRef<Path>) -> Result<ConfinedPath, GuardError> {
        let raw = raw.as_ref();
        let raw_str = raw.to_string_lossy();

        if raw_str.contains('\0') {
            return Err(super::ValidationError::InvalidCharacter('\0').into());
        }
        if raw_str.len() > MAX_PATH_LEN {
            return Err(super::ValidationError::TooLong {
                length: raw_str.len(),
                max: MAX_PATH_LEN,
            }
            .into());
        }
        if raw_str.is_empty() {
            return Err(super::ValidationError::Empty.into());
        }

        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            std::env::current_dir()?.join(raw)
        };

        let resolved = resolve(&absolute).map_err(|e| {
            tracing::debug!(error = %e, "path resolution failed");
            GuardError::PathNotAllowed
        })?;

        match self.roots.iter().find(|root| resolved.starts_with(root)) {
            Some(root) => Ok(ConfinedPath {
                is_root: resolved == *root,
                path: resolved,
            }),
            None => {
                tracing::debug!(path = %resolved.display(), "path outside allowed roots");
                Err(GuardError::PathNotAllowed)
            }
        }
    }

    /// Confine `name` as a direct child of `base`.
    pub fn confine_child(&self, base: &Path, name: &str) -> Result<ConfinedPath, GuardError> {
        self.confine(base.join(name))
    }
}

/// Resolve `.`, `..` and symlinks of an absolute path that may not exist.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    // Trailing components of `resolved` that do not exist on disk.
    let mut missing_depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
                missing_depth = missing_depth.saturating_sub(1);
            }
            Component::Normal(name) => {
                resolved.push(name);
                if missing_depth > 0 {
                    missing_depth += 1;
                    continue;
                }
                match resolved.canonicalize() {
                    Ok(canonical) => resolved = canonical,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => missing_depth = 1,
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(resolved)
}

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::BuildIssue;

#[derive(Error, Debug)]
pub enum UnifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed {operation} {path}: {source}")]
    FileSystem {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {message}")]
    TomlParse { path: PathBuf, message: String },

    #[error("YAML parse error in {path}: {message}")]
    YamlParse { path: PathBuf, message: String },

    #[error("JSON parse error in {path}: {message}")]
    JsonParse { path: PathBuf, message: String },

    #[error("Invalid frontmatter in file: {path}")]
    InvalidFrontmatter { path: PathBuf },

    #[error("Directory walk error in {path}: {message}")]
    WalkDir { path: PathBuf, message: String },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("Source directory not found: {path}")]
    SourceRootMissing { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Include not found: {target} (included from {from})")]
    IncludeNotFound { target: PathBuf, from: PathBuf },

    #[error("Layout not found: '{layout}' (requested by {page})")]
    LayoutNotFound { layout: String, page: PathBuf },

    #[error("Path traversal blocked: '{target}' resolves outside the source root (in {from})")]
    PathTraversal { target: String, from: PathBuf },

    #[error("Maximum include depth of {max_depth} exceeded in {path}")]
    MaxDepthExceeded { path: PathBuf, max_depth: usize },

    #[error("Circular dependency: {}", ChainDisplay(chain))]
    CircularDependency { chain: Vec<PathBuf> },

    #[error("Malformed directive in {path}: {message}")]
    MalformedDirective { path: PathBuf, message: String },

    #[error("Build failed: {failed} page(s) had errors")]
    Build {
        failed: usize,
        issues: Vec<BuildIssue>,
    },
}

pub type Result<T> = std::result::Result<T, UnifyError>;

struct ChainDisplay<'a>(&'a [PathBuf]);

impl fmt::Display for ChainDisplay<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, path) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str(" → ")?;
            }
            write!(formatter, "{}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Usage,
    FileSystem,
    Parse,
    IncludeNotFound,
    LayoutNotFound,
    PathTraversal,
    MaxDepthExceeded,
    CircularDependency,
    MalformedDirective,
    Build,
}

impl ErrorKind {
    /// Recoverable kinds degrade to a warning unless a fail-on threshold promotes them.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::IncludeNotFound
                | ErrorKind::LayoutNotFound
                | ErrorKind::PathTraversal
                | ErrorKind::MaxDepthExceeded
        )
    }

    pub fn suggestion(self) -> Option<&'static str> {
        match self {
            ErrorKind::IncludeNotFound => Some(
                "Check the include path. `virtual` paths resolve from the source root, `file` paths from the including file's directory.",
            ),
            ErrorKind::LayoutNotFound => Some(
                "Check the layout name. Layouts are looked up in the layouts directory first, then relative to the source root.",
            ),
            ErrorKind::PathTraversal => Some(
                "Keep include and layout paths inside the source directory; remove leading '../' segments.",
            ),
            ErrorKind::MaxDepthExceeded => Some(
                "Flatten deeply nested includes or raise `max_depth` in unify.toml.",
            ),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Usage => "UsageError",
            ErrorKind::FileSystem => "FileSystemError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::IncludeNotFound => "IncludeNotFound",
            ErrorKind::LayoutNotFound => "LayoutNotFound",
            ErrorKind::PathTraversal => "PathTraversalAttempt",
            ErrorKind::MaxDepthExceeded => "MaxDepthExceeded",
            ErrorKind::CircularDependency => "CircularDependencyError",
            ErrorKind::MalformedDirective => "MalformedDirective",
            ErrorKind::Build => "BuildError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

impl UnifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnifyError::Io(_) | UnifyError::FileSystem { .. } | UnifyError::WalkDir { .. } => {
                ErrorKind::FileSystem
            }
            UnifyError::TomlParse { .. }
            | UnifyError::YamlParse { .. }
            | UnifyError::JsonParse { .. }
            | UnifyError::InvalidFrontmatter { .. } => ErrorKind::Parse,
            UnifyError::InvalidGlob { .. }
            | UnifyError::SourceRootMissing { .. }
            | UnifyError::InvalidConfig { .. } => ErrorKind::Usage,
            UnifyError::IncludeNotFound { .. } => ErrorKind::IncludeNotFound,
            UnifyError::LayoutNotFound { .. } => ErrorKind::LayoutNotFound,
            UnifyError::PathTraversal { .. } => ErrorKind::PathTraversal,
            UnifyError::MaxDepthExceeded { .. } => ErrorKind::MaxDepthExceeded,
            UnifyError::CircularDependency { .. } => ErrorKind::CircularDependency,
            UnifyError::MalformedDirective { .. } => ErrorKind::MalformedDirective,
            UnifyError::Build { .. } => ErrorKind::Build,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Usage => 2,
            _ => 1,
        }
    }
}

pub trait IoContext<T> {
    fn io_context(self, operation: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, operation: &str, path: &Path) -> Result<T> {
        self.map_err(|source| UnifyError::FileSystem {
            operation: operation.to_string(),
            path: path.to_path_buf(),
            source,
        })
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, UnifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Page,
    Partial,
    Asset,
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub content: Vec<u8>,
    pub frontmatter: Option<Frontmatter>,
}

impl SourceDocument {
    pub fn new(path: impl Into<PathBuf>, kind: SourceKind, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            kind,
            content,
            frontmatter: None,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn is_markdown(&self) -> bool {
        is_markdown_path(&self.path)
    }
}

pub fn is_markdown_path(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

pub fn is_page_path(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let extension = extension.to_ascii_lowercase();
            extension == "html" || extension == "htm" || extension == "md"
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl Frontmatter {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.raw
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.raw.get(key).and_then(|v| v.as_str().map(String::from))
    }

    /// Scalar values rendered as strings, for template variable substitution.
    pub fn scalars(&self) -> impl Iterator<Item = (&str, String)> {
        self.raw.iter().filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((key.as_str(), rendered))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetReference {
    pub page: PathBuf,
    pub resource: PathBuf,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Include,
    Layout,
    Asset,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: PathBuf,
    pub to: PathBuf,
    pub kind: DependencyKind,
}

impl DependencyEdge {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>, kind: DependencyKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIssue {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub path: PathBuf,
    pub message: String,
}

impl BuildIssue {
    pub fn warning(path: impl Into<PathBuf>, error: &UnifyError) -> Self {
        Self {
            kind: error.kind(),
            severity: Severity::Warning,
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub fn error(path: impl Into<PathBuf>, error: &UnifyError) -> Self {
        Self {
            kind: error.kind(),
            severity: Severity::Error,
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub processed: usize,
    pub copied: usize,
    pub skipped: usize,
    pub removed: usize,
    pub issues: Vec<BuildIssue>,
    pub affected_outputs: Vec<PathBuf>,
}

impl BuildResult {
    pub fn errors(&self) -> impl Iterator<Item = &BuildIssue> {
        self.issues.iter().filter(|issue| issue.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &BuildIssue> {
        self.issues.iter().filter(|issue| !issue.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_success(&self) -> bool {
        !self.has_errors()
    }

    pub fn failed_pages(&self) -> usize {
        let mut pages: Vec<&Path> = self.errors().map(|issue| issue.path.as_path()).collect();
        pages.sort();
        pages.dedup();
        pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frontmatter_scalars_skip_nested_values() {
        let mut raw = Map::new();
        raw.insert("title".to_string(), json!("Hello"));
        raw.insert("weight".to_string(), json!(3));
        raw.insert("tags".to_string(), json!(["a", "b"]));
        raw.insert("draft".to_string(), json!(false));
        let frontmatter = Frontmatter { raw };

        let scalars: Vec<(&str, String)> = frontmatter.scalars().collect();
        assert!(scalars.contains(&("title", "Hello".to_string())));
        assert!(scalars.contains(&("weight", "3".to_string())));
        assert!(scalars.contains(&("draft", "false".to_string())));
        assert!(!scalars.iter().any(|(key, _)| *key == "tags"));
        assert_eq!(
            frontmatter.get::<Vec<String>>("tags"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_page_path_detection() {
        assert!(is_page_path(Path::new("index.html")));
        assert!(is_page_path(Path::new("docs/intro.MD")));
        assert!(is_page_path(Path::new("legacy.htm")));
        assert!(!is_page_path(Path::new("style.css")));
        assert!(!is_page_path(Path::new("README")));
        assert!(is_markdown_path(Path::new("a/b.md")));
        assert!(!is_markdown_path(Path::new("a/b.html")));
    }

    #[test]
    fn test_build_result_counts_failed_pages_once() {
        let error = UnifyError::MalformedDirective {
            path: PathBuf::from("a.html"),
            message: "missing src".to_string(),
        };
        let result = BuildResult {
            issues: vec![
                BuildIssue::error("a.html", &error),
                BuildIssue::error("a.html", &error),
                BuildIssue::warning("b.html", &error),
            ],
            ..Default::default()
        };
        assert!(result.has_errors());
        assert_eq!(result.failed_pages(), 1);
        assert_eq!(result.warnings().count(), 1);
    }
}

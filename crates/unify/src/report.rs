use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::types::{BuildIssue, Severity};

/// Issues of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueGroup {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub entries: Vec<(PathBuf, String)>,
    pub suggestion: Option<&'static str>,
}

impl IssueGroup {
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

/// Build issues grouped by kind, errors first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueReport {
    pub groups: Vec<IssueGroup>,
}

impl IssueReport {
    pub fn from_issues(issues: &[BuildIssue]) -> Self {
        let mut grouped: BTreeMap<ErrorKind, IssueGroup> = BTreeMap::new();

        for issue in issues {
            let group = grouped.entry(issue.kind).or_insert_with(|| IssueGroup {
                kind: issue.kind,
                severity: issue.severity,
                entries: Vec::new(),
                suggestion: if issue.kind.is_recoverable() {
                    issue.kind.suggestion()
                } else {
                    None
                },
            });
            group.severity = group.severity.max(issue.severity);
            group.entries.push((issue.path.clone(), issue.message.clone()));
        }

        let mut groups: Vec<IssueGroup> = grouped.into_values().collect();
        groups.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.kind.cmp(&b.kind)));
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.groups
            .iter()
            .filter(|group| group.severity == severity)
            .map(IssueGroup::count)
            .sum()
    }
}

impl fmt::Display for IssueReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.groups {
            let noun = match (group.severity, group.count()) {
                (Severity::Error, 1) => "error",
                (Severity::Error, _) => "errors",
                (Severity::Warning, 1) => "warning",
                (Severity::Warning, _) => "warnings",
            };
            writeln!(formatter, "{} ({} {})", group.kind, group.count(), noun)?;
            for (path, message) in &group.entries {
                writeln!(formatter, "  - {}: {}", path.display(), message)?;
            }
            if let Some(suggestion) = group.suggestion {
                writeln!(formatter, "  hint: {}", suggestion)?;
            }
        }
        Ok(())
    }
}

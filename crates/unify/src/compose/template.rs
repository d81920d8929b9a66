use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::html::{Document, NodeData, NodeId};
use crate::types::Frontmatter;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").expect("template variable pattern")
});

/// Page values available to `{{ name }}` placeholders in layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVariables {
    values: BTreeMap<String, String>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frontmatter(frontmatter: &Frontmatter) -> Self {
        let mut variables = Self::new();
        for (key, value) in frontmatter.scalars() {
            variables.set(key, value);
        }
        variables
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn set_default(&mut self, name: &str, value: impl Into<String>) {
        self.values
            .entry(name.to_string())
            .or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replaces known placeholders with escaped values. Unknown names stay
    /// in the text untouched.
    pub fn substitute<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !text.contains("{{") {
            return Cow::Borrowed(text);
        }
        VARIABLE.replace_all(text, |captures: &Captures<'_>| match self.get(&captures[1]) {
            Some(value) => escape(value),
            None => captures[0].to_string(),
        })
    }

    fn replacement(&self, text: &str) -> Option<String> {
        match self.substitute(text) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        }
    }

    pub fn apply(&self, document: &mut Document, scope: NodeId) {
        for node in document.descendants(scope) {
            match document.data_mut(node) {
                NodeData::Text(text) => {
                    if let Some(replaced) = self.replacement(text) {
                        *text = replaced;
                    }
                }
                NodeData::Element(element) => {
                    for attribute in &mut element.attrs {
                        let Some(value) = attribute.value.as_mut() else {
                            continue;
                        };
                        if let Some(replaced) = self.replacement(value) {
                            *value = replaced;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

pub fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

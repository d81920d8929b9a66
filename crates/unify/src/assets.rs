use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::trace;

use crate::classify::FileClassifier;
use crate::config::BuildConfig;
use crate::error::Result;
use crate::html::{Document, NodeData};
use crate::resources::{ResourceReader, resolve_reference};
use crate::types::{AssetReference, DependencyEdge, DependencyKind, is_page_path};

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#).expect("css url pattern")
});

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("css import pattern")
});

const URL_ATTRIBUTES: &[&str] = &["src", "href", "poster", "data"];
const SRCSET_ATTRIBUTES: &[&str] = &["srcset", "imagesrcset"];
const NON_LOCAL_PREFIXES: &[&str] = &[
    "http:", "https:", "//", "mailto:", "tel:", "data:", "javascript:", "ftp:", "#",
];

fn capture(captures: &regex::Captures<'_>) -> Option<String> {
    captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .map(|matched| matched.as_str().trim().to_string())
}

/// `url(...)` targets and `@import` strings in a stylesheet, in source order.
/// `@font-face` `src` lists are `url()` entries and come out of the same scan.
pub fn css_urls(css: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = CSS_URL
        .captures_iter(css)
        .chain(CSS_IMPORT.captures_iter(css))
        .filter_map(|captures| {
            let start = captures.get(0)?.start();
            capture(&captures).map(|url| (start, url))
        })
        .collect();
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, url)| url).collect()
}

/// Strips query and fragment, and rejects anything that cannot name a local
/// file.
fn local_reference(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains("{{") {
        return None;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if NON_LOCAL_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return None;
    }

    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    let reference = &trimmed[..end];
    (!reference.is_empty()).then_some(reference)
}

fn srcset_urls(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}

fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("css"))
}

/// Assets one page references, plus the stylesheet edges found on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedAssets {
    pub references: BTreeSet<AssetReference>,
    pub edges: Vec<DependencyEdge>,
}

impl TrackedAssets {
    pub fn resources(&self) -> impl Iterator<Item = &Path> {
        self.references
            .iter()
            .map(|reference| reference.resource.as_path())
    }
}

pub struct ReferenceScanner<'a> {
    config: &'a BuildConfig,
    resources: &'a dyn ResourceReader,
}

impl<'a> ReferenceScanner<'a> {
    pub fn new(config: &'a BuildConfig, resources: &'a dyn ResourceReader) -> Self {
        Self { config, resources }
    }

    /// Every existing local file `document` points at, directly or through
    /// the stylesheets it links to.
    pub fn track_references(&self, document: &Document, page: &Path) -> Result<TrackedAssets> {
        let base = page.parent().unwrap_or(page);
        let mut raw: Vec<(String, PathBuf)> = Vec::new();
        let mut inline_css: Vec<String> = Vec::new();

        for node in document.descendants(document.root()) {
            let NodeData::Element(element) = document.data(node) else {
                continue;
            };

            for attribute in &element.attrs {
                let Some(value) = attribute.value.as_deref() else {
                    continue;
                };
                let name = attribute.name.to_ascii_lowercase();
                if URL_ATTRIBUTES.contains(&name.as_str()) {
                    raw.push((value.to_string(), base.to_path_buf()));
                } else if SRCSET_ATTRIBUTES.contains(&name.as_str()) {
                    raw.extend(srcset_urls(value).map(|url| (url.to_string(), base.to_path_buf())));
                } else if name == "style" {
                    inline_css.push(value.to_string());
                }
            }

            if element.is("style") {
                inline_css.push(document.text_content(node));
            }
        }

        for css in &inline_css {
            raw.extend(
                css_urls(css)
                    .into_iter()
                    .map(|url| (url, base.to_path_buf())),
            );
        }

        let mut tracked = TrackedAssets::default();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        for (reference, base) in raw {
            let Some(resource) = self.resolve(&reference, &base) else {
                continue;
            };
            self.add(page, resource, 0, &mut visited, &mut tracked)?;
        }

        Ok(tracked)
    }

    fn resolve(&self, raw: &str, base: &Path) -> Option<PathBuf> {
        let reference = local_reference(raw)?;
        let resolved = resolve_reference(self.config.source_root(), base, reference)?;
        if is_page_path(&resolved) || !self.resources.exists(&resolved) {
            return None;
        }
        Some(resolved)
    }

    fn add(
        &self,
        page: &Path,
        resource: PathBuf,
        depth: usize,
        visited: &mut HashSet<PathBuf>,
        tracked: &mut TrackedAssets,
    ) -> Result<()> {
        if !visited.insert(resource.clone()) {
            return Ok(());
        }
        if depth == 0 {
            tracked
                .edges
                .push(DependencyEdge::new(page, &resource, DependencyKind::Asset));
        }
        tracked.references.insert(AssetReference {
            page: page.to_path_buf(),
            resource: resource.clone(),
            depth,
        });

        if is_stylesheet(&resource) {
            self.scan_stylesheet(page, &resource, depth, visited, tracked)?;
        }
        Ok(())
    }

    /// Follows `url()` and `@import` chains. `visited` holds every resource
    /// already recorded for the page, so import cycles terminate.
    fn scan_stylesheet(
        &self,
        page: &Path,
        stylesheet: &Path,
        depth: usize,
        visited: &mut HashSet<PathBuf>,
        tracked: &mut TrackedAssets,
    ) -> Result<()> {
        if depth >= self.config.max_depth {
            trace!(stylesheet = %stylesheet.display(), "Stylesheet nesting limit reached");
            return Ok(());
        }
        let Some(css) = self.resources.read_to_string(stylesheet)? else {
            return Ok(());
        };
        let base = stylesheet.parent().unwrap_or(stylesheet);

        for url in css_urls(&css) {
            let Some(child) = self.resolve(&url, base) else {
                continue;
            };
            let edge = DependencyEdge::new(stylesheet, &child, DependencyKind::Asset);
            if !tracked.edges.contains(&edge) {
                tracked.edges.push(edge);
            }
            self.add(page, child, depth + 1, visited, tracked)?;
        }
        Ok(())
    }
}

/// Which pages reference which assets in the current build.
#[derive(Debug, Clone, Default)]
pub struct AssetTracker {
    references: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    counts: HashMap<PathBuf, usize>,
}

impl AssetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set recorded for `page`.
    pub fn record<'r>(&mut self, page: &Path, resources: impl IntoIterator<Item = &'r Path>) {
        self.remove_page(page);
        let set: BTreeSet<PathBuf> = resources.into_iter().map(Path::to_path_buf).collect();
        for resource in &set {
            *self.counts.entry(resource.clone()).or_insert(0) += 1;
        }
        self.references.insert(page.to_path_buf(), set);
    }

    pub fn remove_page(&mut self, page: &Path) {
        let Some(previous) = self.references.remove(page) else {
            return;
        };
        for resource in previous {
            if let Some(count) = self.counts.get_mut(&resource) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(&resource);
                }
            }
        }
    }

    pub fn is_referenced(&self, resource: &Path) -> bool {
        self.counts.contains_key(resource)
    }

    /// An asset is copied when something references it, it sits under an
    /// always-copy path, or a copy glob names it.
    pub fn is_eligible(
        &self,
        resource: &Path,
        config: &BuildConfig,
        classifier: &FileClassifier,
    ) -> bool {
        self.is_referenced(resource)
            || config.is_always_copy(resource)
            || classifier.is_explicit_copy(resource)
    }

    pub fn clear(&mut self) {
        self.references.clear();
        self.counts.clear();
    }
}

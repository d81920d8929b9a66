use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cache::{BuildCache, KeyValueStore};
use crate::classify::{FileAction, FileClassifier};
use crate::config::BuildConfig;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::resources::{FileStamp, ResourceReader};

/// What one build pass has to touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    /// Pages to recompose.
    pub pages: BTreeSet<PathBuf>,
    /// Static files whose output must be refreshed if still eligible.
    pub assets: BTreeSet<PathBuf>,
    /// Source paths that no longer exist.
    pub removed: BTreeSet<PathBuf>,
}

impl RebuildPlan {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.assets.is_empty() && self.removed.is_empty()
    }
}

pub struct Planner<'a> {
    config: &'a BuildConfig,
    classifier: &'a FileClassifier,
    graph: &'a DependencyGraph,
    cache: &'a BuildCache,
    stamps: &'a dyn KeyValueStore<FileStamp>,
    resources: &'a dyn ResourceReader,
}

impl<'a> Planner<'a> {
    pub fn new(
        config: &'a BuildConfig,
        classifier: &'a FileClassifier,
        graph: &'a DependencyGraph,
        cache: &'a BuildCache,
        stamps: &'a dyn KeyValueStore<FileStamp>,
        resources: &'a dyn ResourceReader,
    ) -> Self {
        Self {
            config,
            classifier,
            graph,
            cache,
            stamps,
            resources,
        }
    }

    /// Plans a rebuild for one changed path, or for whatever differs from
    /// the recorded state when no path is given.
    pub fn plan(&self, changed: Option<&Path>) -> Result<RebuildPlan> {
        let plan = match changed {
            Some(path) => self.plan_changed(path)?,
            None => self.plan_from_state()?,
        };
        debug!(
            pages = plan.pages.len(),
            assets = plan.assets.len(),
            removed = plan.removed.len(),
            "Planned rebuild"
        );
        Ok(plan)
    }

    fn plan_changed(&self, path: &Path) -> Result<RebuildPlan> {
        let mut plan = RebuildPlan::default();
        if !path.starts_with(self.config.source_root()) {
            return Ok(plan);
        }

        let action = self.classifier.classify(path);
        if action == FileAction::Skip {
            return Ok(plan);
        }

        if !self.resources.exists(path) {
            debug!(path = %path.display(), "Source removed");
            plan.removed.insert(path.to_path_buf());
            plan.pages.extend(self.existing(self.graph.affected_pages(path)));
            return Ok(plan);
        }

        match action {
            FileAction::Emit => {
                plan.pages.insert(path.to_path_buf());
                plan.pages.extend(self.graph.affected_pages(path));
            }
            FileAction::Ignore => {
                if self.graph.contains(path) {
                    plan.pages.extend(self.graph.affected_pages(path));
                } else if self.is_layout_convention(path) {
                    let scope = path.parent().unwrap_or(path);
                    plan.pages.extend(self.pages_under(scope)?);
                } else if path.starts_with(self.config.layouts_root()) {
                    plan.pages.extend(self.pages_under(self.config.source_root())?);
                }
            }
            FileAction::Copy => {
                plan.assets.insert(path.to_path_buf());
                if self.graph.contains(path) || self.cache.contains(path) {
                    plan.pages.extend(self.graph.affected_pages(path));
                } else {
                    debug!(path = %path.display(), "New asset, re-rendering every page");
                    plan.pages.extend(self.pages_under(self.config.source_root())?);
                }
            }
            FileAction::Skip => {}
        }

        Ok(plan)
    }

    fn plan_from_state(&self) -> Result<RebuildPlan> {
        let mut plan = RebuildPlan::default();
        let mut new_asset = false;
        let mut present: BTreeSet<PathBuf> = BTreeSet::new();

        for (path, action) in self.classifier.walk(self.resources)? {
            present.insert(path.clone());
            match action {
                FileAction::Emit => {
                    let fresh = match self.resources.read(&path)? {
                        Some(content) => self.cache.is_page_fresh(&path, &content, self.resources),
                        None => false,
                    };
                    if !fresh {
                        plan.pages.insert(path);
                    }
                }
                FileAction::Copy => {
                    if !self.cache.contains(&path) {
                        new_asset = true;
                        plan.assets.insert(path);
                    } else if self.has_changed(&path)? {
                        plan.pages.extend(self.graph.affected_pages(&path));
                        plan.assets.insert(path);
                    }
                }
                FileAction::Ignore | FileAction::Skip => {}
            }
        }

        if new_asset && !self.cache.is_empty() {
            plan.pages.extend(self.pages_under(self.config.source_root())?);
        }

        for path in self.cache.paths().into_iter().chain(self.stamps.keys()) {
            if path.starts_with(self.config.source_root()) && !present.contains(&path) {
                plan.pages.extend(self.existing(self.graph.affected_pages(&path)));
                plan.removed.insert(path);
            }
        }

        Ok(plan)
    }

    /// Modification stamp first, content hash when the stamp moved.
    fn has_changed(&self, path: &Path) -> Result<bool> {
        let current = self.resources.stamp(path)?;
        if current.is_some() && self.stamps.get(path) == current.as_ref() {
            return Ok(false);
        }
        Ok(match self.resources.read(path)? {
            Some(content) => self.cache.has_changed(path, &content),
            None => true,
        })
    }

    fn is_layout_convention(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy() == self.config.layout_filename)
    }

    fn pages_under(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .classifier
            .walk(self.resources)?
            .into_iter()
            .filter(|(path, action)| *action == FileAction::Emit && path.starts_with(directory))
            .map(|(path, _)| path)
            .collect())
    }

    fn existing(&self, pages: Vec<PathBuf>) -> Vec<PathBuf> {
        pages
            .into_iter()
            .filter(|page| self.resources.exists(page))
            .collect()
    }
}

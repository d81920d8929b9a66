use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::assets::{AssetTracker, ReferenceScanner, TrackedAssets};
use crate::cache::{BuildCache, CachedDependency, KeyValueStore, MemoryStore, content_hash};
use crate::classify::{FileAction, FileClassifier};
use crate::compose::{Composer, PageFailure, PageOutput};
use crate::config::{BuildConfig, CONFIG_FILE_NAME, FailOn};
use crate::error::{IoContext, Result, UnifyError};
use crate::graph::DependencyGraph;
use crate::html;
use crate::minify::minify_html;
use crate::parsing::MarkdownRenderer;
use crate::planner::{Planner, RebuildPlan};
use crate::resources::{FileStamp, FsResources, ResourceReader};
use crate::types::{BuildIssue, BuildResult, DependencyEdge, DependencyKind, is_markdown_path};

pub type RebuildCallback = Box<dyn Fn(&[PathBuf]) + Send + Sync>;

/// Loads configuration and applies caller overrides before opening a
/// [`BuildSession`].
pub struct SiteBuilder {
    base_dir: PathBuf,
    config_file: Option<PathBuf>,
    source: Option<PathBuf>,
    output: Option<PathBuf>,
    pretty_urls: Option<bool>,
    minify: Option<bool>,
    cache: Option<bool>,
    clean: Option<bool>,
    fail_on: Option<FailOn>,
}

impl SiteBuilder {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            config_file: None,
            source: None,
            output: None,
            pretty_urls: None,
            minify: None,
            cache: None,
            clean: None,
            fail_on: None,
        }
    }

    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn pretty_urls(mut self, enabled: bool) -> Self {
        self.pretty_urls = Some(enabled);
        self
    }

    pub fn minify(mut self, enabled: bool) -> Self {
        self.minify = Some(enabled);
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = Some(enabled);
        self
    }

    pub fn clean(mut self, enabled: bool) -> Self {
        self.clean = Some(enabled);
        self
    }

    pub fn fail_on(mut self, threshold: FailOn) -> Self {
        self.fail_on = Some(threshold);
        self
    }

    pub fn load_config(&self) -> Result<BuildConfig> {
        let config_file = self
            .config_file
            .clone()
            .unwrap_or_else(|| self.base_dir.join(CONFIG_FILE_NAME));
        let mut config = BuildConfig::load(&config_file)?;

        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(pretty_urls) = self.pretty_urls {
            config.pretty_urls = pretty_urls;
        }
        if let Some(minify) = self.minify {
            config.minify = minify;
        }
        if let Some(cache) = self.cache {
            config.cache = cache;
        }
        if let Some(clean) = self.clean {
            config.clean = clean;
        }
        if let Some(fail_on) = self.fail_on {
            config.fail_on = fail_on;
        }

        config.resolve(&self.base_dir)
    }

    pub fn session(&self) -> Result<BuildSession> {
        BuildSession::new(self.load_config()?)
    }

    /// One-shot full build.
    pub fn build(&self) -> Result<BuildResult> {
        self.session()?.full_build()
    }
}

/// Emitted path of `page` below the output directory.
pub fn output_path(config: &BuildConfig, page: &Path) -> PathBuf {
    let relative = config.relative_to_source(page);
    let mut emitted = if is_markdown_path(relative) {
        relative.with_extension("html")
    } else {
        relative.to_path_buf()
    };

    if config.pretty_urls
        && let Some(stem) = emitted.file_stem().map(|stem| stem.to_string_lossy().into_owned())
        && stem != "index"
    {
        emitted = emitted.with_file_name(stem).join("index.html");
    }

    config.output.join(emitted)
}

fn asset_output_path(config: &BuildConfig, asset: &Path) -> PathBuf {
    config.output.join(config.relative_to_source(asset))
}

/// Everything phase one computes for a page, without touching shared state.
struct RenderedPage {
    output: PageOutput,
    assets: TrackedAssets,
    hash: String,
    dependencies: Vec<CachedDependency>,
}

impl RenderedPage {
    fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges = self.output.edges.clone();
        for edge in &self.assets.edges {
            if !edges.contains(edge) {
                edges.push(edge.clone());
            }
        }
        edges
    }
}

/// Long-lived build state: the graph, cache and tracker survive between
/// watch-mode rebuilds.
pub struct BuildSession {
    config: BuildConfig,
    classifier: FileClassifier,
    markdown: MarkdownRenderer,
    resources: Box<dyn ResourceReader>,
    graph: DependencyGraph,
    tracker: AssetTracker,
    cache: BuildCache,
    stamps: MemoryStore<FileStamp>,
    on_rebuild_complete: Option<RebuildCallback>,
}

impl BuildSession {
    pub fn new(config: BuildConfig) -> Result<Self> {
        Self::with_resources(config, Box::new(FsResources))
    }

    pub fn with_resources(config: BuildConfig, resources: Box<dyn ResourceReader>) -> Result<Self> {
        let classifier = FileClassifier::new(&config)?;
        let cache = BuildCache::load(&config);
        Ok(Self {
            config,
            classifier,
            markdown: MarkdownRenderer::new(),
            resources,
            graph: DependencyGraph::new(),
            tracker: AssetTracker::new(),
            cache,
            stamps: MemoryStore::new(),
            on_rebuild_complete: None,
        })
    }

    /// Called with the output paths written or removed by every build.
    pub fn on_rebuild_complete(&mut self, callback: impl Fn(&[PathBuf]) + Send + Sync + 'static) {
        self.on_rebuild_complete = Some(Box::new(callback));
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn tracker(&self) -> &AssetTracker {
        &self.tracker
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn plan(&self, changed: Option<&Path>) -> Result<RebuildPlan> {
        Planner::new(
            &self.config,
            &self.classifier,
            &self.graph,
            &self.cache,
            &self.stamps,
            self.resources.as_ref(),
        )
        .plan(changed)
    }

    /// Builds every page whose cached state is stale and settles the asset
    /// set of the whole site.
    pub fn full_build(&mut self) -> Result<BuildResult> {
        if self.config.clean {
            self.clean_output()?;
        }
        let plan = self.plan(None)?;
        let skipped = self.restore_fresh_pages(&plan)?;
        let mut result = self.execute(plan)?;
        result.skipped = skipped;
        Ok(result)
    }

    /// Incremental rebuild for one changed path, or for everything that
    /// differs from the recorded state.
    pub fn rebuild(&mut self, changed: Option<&Path>) -> Result<BuildResult> {
        let plan = self.plan(changed)?;
        if plan.is_empty() {
            debug!(changed = ?changed, "Nothing to rebuild");
            return Ok(BuildResult::default());
        }
        self.execute(plan)
    }

    fn clean_output(&mut self) -> Result<()> {
        if self.config.output.exists() {
            fs::remove_dir_all(&self.config.output)
                .io_context("cleaning output directory", &self.config.output)?;
        }
        self.cache.clear();
        self.graph.clear();
        self.tracker.clear();
        self.stamps.clear();
        Ok(())
    }

    /// Seeds the graph and tracker for pages the plan skips, from their
    /// cached dependency snapshots.
    fn restore_fresh_pages(&mut self, plan: &RebuildPlan) -> Result<usize> {
        let mut skipped = 0;
        for (page, action) in self.classifier.walk(self.resources.as_ref())? {
            if action != FileAction::Emit || plan.pages.contains(&page) {
                continue;
            }
            skipped += 1;
            if self.graph.is_page(&page) {
                continue;
            }
            let Some(entry) = self.cache.entry(&page) else {
                continue;
            };

            let edges: Vec<DependencyEdge> = entry
                .dependencies
                .iter()
                .map(|dependency| DependencyEdge::new(&page, &dependency.path, dependency.kind))
                .collect();
            let assets: Vec<PathBuf> = entry
                .dependencies
                .iter()
                .filter(|dependency| dependency.kind == DependencyKind::Asset)
                .map(|dependency| dependency.path.clone())
                .collect();

            debug!(page = %self.config.relative_to_source(&page).display(), "Up to date");
            self.graph.record_page(&page, edges);
            self.tracker
                .record(&page, assets.iter().map(PathBuf::as_path));
        }
        Ok(skipped)
    }

    fn execute(&mut self, plan: RebuildPlan) -> Result<BuildResult> {
        let mut result = BuildResult::default();

        for removed in &plan.removed {
            self.forget(removed, &mut result)?;
        }

        let pages: Vec<PathBuf> = plan
            .pages
            .iter()
            .filter(|page| {
                self.classifier.classify(page) == FileAction::Emit && self.resources.exists(page)
            })
            .cloned()
            .collect();

        // Phase one: compose and track every planned page in parallel.
        let rendered: Vec<(PathBuf, std::result::Result<RenderedPage, PageFailure>)> = {
            let composer = Composer::new(&self.config, self.resources.as_ref(), &self.markdown);
            let scanner = ReferenceScanner::new(&self.config, self.resources.as_ref());
            let resources = self.resources.as_ref();
            pages
                .par_iter()
                .map(|page| (page.clone(), render_page(&composer, &scanner, resources, page)))
                .collect()
        };

        // Merge results one page at a time.
        for (page, outcome) in rendered {
            match outcome {
                Ok(rendered) => self.commit_page(rendered, &mut result)?,
                Err(PageFailure { error, edges }) => {
                    if self.config.fail_on.is_fail_fast() {
                        return Err(error);
                    }
                    warn!(page = %self.config.relative_to_source(&page).display(), "{}", error);
                    result.issues.push(BuildIssue::error(
                        self.config.relative_to_source(&page),
                        &error,
                    ));
                    self.cache.remove(&page);
                    self.graph.record_page(&page, edges);
                }
            }
        }

        // Phase two: asset copy decisions, after every page is tracked.
        self.copy_assets(&plan, &mut result)?;
        self.record_stamps()?;

        if self.config.cache && result.is_success() {
            self.cache.persist()?;
        }

        info!(
            processed = result.processed,
            copied = result.copied,
            removed = result.removed,
            warnings = result.warnings().count(),
            errors = result.errors().count(),
            "Build finished"
        );

        if let Some(callback) = &self.on_rebuild_complete {
            callback(&result.affected_outputs);
        }
        Ok(result)
    }

    fn commit_page(&mut self, rendered: RenderedPage, result: &mut BuildResult) -> Result<()> {
        let page = rendered.output.page.clone();
        let output = output_path(&self.config, &page);
        let html = if self.config.minify {
            minify_html(&rendered.output.html)
        } else {
            rendered.output.html.clone()
        };
        self.resources.write(&output, html.as_bytes())?;

        self.graph.record_page(&page, rendered.edges());
        self.tracker.record(&page, rendered.assets.resources());
        self.cache.record_page(
            &page,
            rendered.hash.clone(),
            rendered.dependencies.clone(),
            output.clone(),
        );

        debug!(
            page = %self.config.relative_to_source(&page).display(),
            output = %output.display(),
            "Wrote page"
        );
        result
            .issues
            .extend(rendered.output.issues.into_iter().map(|mut issue| {
                issue.path = self.config.relative_to_source(&issue.path).to_path_buf();
                issue
            }));
        result.processed += 1;
        result.affected_outputs.push(output);
        Ok(())
    }

    /// Drops every trace of a deleted source and its emitted file.
    fn forget(&mut self, path: &Path, result: &mut BuildResult) -> Result<()> {
        let output = match self.cache.remove(path).and_then(|entry| entry.output) {
            Some(output) => Some(output),
            None if self.classifier.classify(path) == FileAction::Emit => {
                Some(output_path(&self.config, path))
            }
            None => Some(asset_output_path(&self.config, path)),
        };

        self.graph.remove_page(path);
        self.tracker.remove_page(path);
        self.stamps.remove(path);

        if let Some(output) = output
            && output.is_file()
        {
            fs::remove_file(&output).io_context("removing stale output", &output)?;
            debug!(output = %output.display(), "Removed stale output");
            result.removed += 1;
            result.affected_outputs.push(output);
        }
        Ok(())
    }

    fn copy_assets(&mut self, plan: &RebuildPlan, result: &mut BuildResult) -> Result<()> {
        for (asset, action) in self.classifier.walk(self.resources.as_ref())? {
            if action != FileAction::Copy {
                continue;
            }
            let output = asset_output_path(&self.config, &asset);

            if !self
                .tracker
                .is_eligible(&asset, &self.config, &self.classifier)
            {
                if output.is_file() {
                    fs::remove_file(&output).io_context("removing unreferenced asset", &output)?;
                    debug!(asset = %output.display(), "Removed unreferenced asset");
                    result.removed += 1;
                    result.affected_outputs.push(output);
                }
                if !self.cache.contains(&asset)
                    && let Some(content) = self.resources.read(&asset)?
                {
                    self.cache.record_hash(&asset, &content);
                }
                continue;
            }

            let Some(content) = self.resources.read(&asset)? else {
                continue;
            };
            let stale = plan.assets.contains(&asset)
                || !output.is_file()
                || self.cache.has_changed(&asset, &content);
            if stale {
                self.resources.write(&output, &content)?;
                debug!(asset = %self.config.relative_to_source(&asset).display(), "Copied asset");
                result.copied += 1;
                result.affected_outputs.push(output);
            }
            self.cache.record_hash(&asset, &content);
        }
        Ok(())
    }

    fn record_stamps(&mut self) -> Result<()> {
        for (path, _) in self.classifier.walk(self.resources.as_ref())? {
            if let Some(stamp) = self.resources.stamp(&path)? {
                self.stamps.insert(path, stamp);
            }
        }
        Ok(())
    }
}

/// Phase one work for a single page: pure with respect to session state.
fn render_page(
    composer: &Composer<'_>,
    scanner: &ReferenceScanner<'_>,
    resources: &dyn ResourceReader,
    page: &Path,
) -> std::result::Result<RenderedPage, PageFailure> {
    let source = resources
        .read(page)?
        .ok_or_else(|| UnifyError::FileSystem {
            operation: "reading page".to_string(),
            path: page.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;

    let output = composer.compose_page_tracked(page)?;
    let document = html::parse(&output.html);
    let assets = scanner
        .track_references(&document, page)
        .map_err(|error| PageFailure {
            error,
            edges: output.edges.clone(),
        })?;

    let mut seen: HashSet<&Path> = HashSet::new();
    let mut dependencies = Vec::new();
    for edge in output.edges.iter().chain(assets.edges.iter()) {
        if edge.to == page || !seen.insert(edge.to.as_path()) {
            continue;
        }
        let hash = resources.read(&edge.to)?.map(|bytes| content_hash(&bytes));
        dependencies.push(CachedDependency {
            path: edge.to.clone(),
            kind: edge.kind,
            hash,
        });
    }

    Ok(RenderedPage {
        output,
        assets,
        hash: content_hash(&source),
        dependencies,
    })
}

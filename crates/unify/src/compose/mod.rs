//! Composition engine: includes, slots, layouts and head merge.

mod head;
mod include;
mod layout;
mod slots;
mod template;

pub use head::{HeadKey, head_key, merge_head};
pub use include::{DirectiveSyntax, IncludeDirective};
pub use slots::{SLOT_ATTR, SlotProviders, collect_providers, fill_slots};
pub use template::TemplateVariables;

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::error::{Result, UnifyError};
use crate::html::{self, Document, NodeId};
use crate::parsing::MarkdownRenderer;
use crate::resources::ResourceReader;
use crate::types::{BuildIssue, DependencyEdge, DependencyKind, SourceDocument};

/// A composed document plus the `<style>` and inline `<script>` elements
/// hoisted out of DOM-style includes. Hoisted nodes are detached nodes of
/// `document`, in the order they must be emitted.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub document: Document,
    pub styles: Vec<NodeId>,
    pub scripts: Vec<NodeId>,
}

impl Fragment {
    fn new(document: Document) -> Self {
        Self {
            document,
            styles: Vec::new(),
            scripts: Vec::new(),
        }
    }
}

/// Result of composing one source document below the page level.
#[derive(Debug, Clone)]
pub struct Composition {
    pub fragment: Fragment,
    pub edges: Vec<DependencyEdge>,
    pub issues: Vec<BuildIssue>,
}

/// Final output of one page.
#[derive(Debug, Clone)]
pub struct PageOutput {
    pub page: PathBuf,
    pub html: String,
    pub title: Option<String>,
    pub edges: Vec<DependencyEdge>,
    pub issues: Vec<BuildIssue>,
}

/// A page that failed to compose.
#[derive(Debug)]
pub struct PageFailure {
    pub error: UnifyError,
    /// Dependencies discovered before the failure.
    pub edges: Vec<DependencyEdge>,
}

impl From<UnifyError> for PageFailure {
    fn from(error: UnifyError) -> Self {
        Self {
            error,
            edges: Vec::new(),
        }
    }
}

/// Edges and recoverable issues gathered while composing one page.
#[derive(Debug)]
pub(crate) struct PageContext {
    page: PathBuf,
    edges: Vec<DependencyEdge>,
    issues: Vec<BuildIssue>,
}

impl PageContext {
    fn new(page: &Path) -> Self {
        Self {
            page: page.to_path_buf(),
            edges: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn edge(&mut self, from: &Path, to: &Path, kind: DependencyKind) {
        let edge = DependencyEdge::new(from, to, kind);
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }
}

pub struct Composer<'a> {
    config: &'a BuildConfig,
    resources: &'a dyn ResourceReader,
    markdown: &'a MarkdownRenderer,
}

impl<'a> Composer<'a> {
    pub fn new(
        config: &'a BuildConfig,
        resources: &'a dyn ResourceReader,
        markdown: &'a MarkdownRenderer,
    ) -> Self {
        Self {
            config,
            resources,
            markdown,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        self.config
    }

    /// Resolves every include below `document`. `visited` holds the paths on
    /// the current inclusion stack, outermost first.
    pub fn compose(
        &self,
        document: &SourceDocument,
        depth: usize,
        visited: &mut Vec<PathBuf>,
    ) -> Result<Composition> {
        let mut context = PageContext::new(&document.path);
        let text = if document.is_markdown() {
            self.markdown.render(&document.text(), &document.path)?.html
        } else {
            document.text().into_owned()
        };

        let pushed = !visited.contains(&document.path);
        if pushed {
            visited.push(document.path.clone());
        }
        let fragment = self.compose_source(&document.path, &text, depth, visited, &mut context);
        if pushed {
            visited.pop();
        }

        Ok(Composition {
            fragment: fragment?,
            edges: context.edges,
            issues: context.issues,
        })
    }

    /// Composes `page` into its final HTML: includes, layout chain, head
    /// merge, hoisted styles and scripts.
    pub fn compose_page(&self, page: &Path) -> Result<PageOutput> {
        self.compose_page_tracked(page).map_err(|failure| failure.error)
    }

    /// Like [`Composer::compose_page`], but a failed page keeps the edges
    /// discovered before the failure so a later fix can still reach it.
    pub fn compose_page_tracked(&self, page: &Path) -> std::result::Result<PageOutput, PageFailure> {
        let mut context = PageContext::new(page);
        match self.compose_in(page, &mut context) {
            Ok((html, title)) => Ok(PageOutput {
                page: page.to_path_buf(),
                html,
                title,
                edges: context.edges,
                issues: context.issues,
            }),
            Err(error) => Err(PageFailure {
                error,
                edges: context.edges,
            }),
        }
    }

    fn compose_in(&self, page: &Path, context: &mut PageContext) -> Result<(String, Option<String>)> {
        let bytes = self
            .resources
            .read(page)?
            .ok_or_else(|| UnifyError::FileSystem {
                operation: "reading page".to_string(),
                path: page.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
        let source = String::from_utf8_lossy(&bytes);

        let mut variables = TemplateVariables::new();
        let mut layout_override = None;
        let body = if crate::types::is_markdown_path(page) {
            let rendered = self.markdown.render(&source, page)?;
            variables = TemplateVariables::from_frontmatter(&rendered.frontmatter);
            if let Some(title) = &rendered.title {
                variables.set("title", title.clone());
            }
            if let Some(excerpt) = &rendered.excerpt {
                variables.set_default("description", excerpt.clone());
            }
            layout_override = rendered.frontmatter.get_string("layout");
            rendered.html
        } else {
            source.into_owned()
        };

        let mut stack = vec![page.to_path_buf()];
        let fragment = self.compose_source(page, &body, 0, &mut stack, context)?;

        let document = self.apply_layout(fragment, page, layout_override, &mut variables, context)?;
        debug!(
            page = %self.display_path(page).display(),
            edges = context.edges.len(),
            "Composed page"
        );

        Ok((document.to_html(), variables.get("title").map(String::from)))
    }

    /// Records a recoverable condition as a warning, or returns it as the
    /// page's error when the fail-on threshold promotes it.
    fn recover(&self, context: &mut PageContext, error: UnifyError) -> Result<()> {
        if self.config.fail_on.promotes_recoverable() {
            return Err(error);
        }
        warn!(page = %self.display_path(&context.page).display(), "{}", error);
        context.issues.push(BuildIssue::warning(&context.page, &error));
        Ok(())
    }

    fn display_path(&self, path: &Path) -> PathBuf {
        self.config.relative_to_source(path).to_path_buf()
    }

    fn compose_source(
        &self,
        path: &Path,
        text: &str,
        depth: usize,
        stack: &mut Vec<PathBuf>,
        context: &mut PageContext,
    ) -> Result<Fragment> {
        let mut fragment = Fragment::new(html::parse(text));
        let root = fragment.document.root();
        self.resolve_includes(&mut fragment, root, path, depth, stack, context)?;
        Ok(fragment)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::resources::FsResources;
    use std::fs;
    use tempfile::TempDir;

    pub struct Site {
        pub dir: TempDir,
        pub config: BuildConfig,
        pub markdown: MarkdownRenderer,
    }

    impl Site {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("src")).unwrap();
            let config = BuildConfig::default().resolve(dir.path()).unwrap();
            Self {
                dir,
                config,
                markdown: MarkdownRenderer::new(),
            }
        }

        pub fn with_config(mut self, update: impl FnOnce(&mut BuildConfig)) -> Self {
            update(&mut self.config);
            self
        }

        pub fn write(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.config.source.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        pub fn compose(&self, relative: &str) -> Result<PageOutput> {
            let composer = Composer::new(&self.config, &FsResources, &self.markdown);
            composer.compose_page(&self.config.source.join(relative))
        }

        pub fn path(&self, relative: &str) -> PathBuf {
            self.config.source.join(relative)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Site;
    use super::*;
    use crate::config::FailOn;
    use crate::error::ErrorKind;
    use crate::resources::FsResources;
    use std::fs;

    #[test]
    fn test_concrete_ssi_scenario() {
        let site = Site::new();
        site.write(
            "index.html",
            "<!--#include virtual=\"/.components/header.html\" --><p>Body</p>",
        );
        site.write(".components/header.html", "<header><!--#include file=\"nav.html\" --></header>");
        site.write(".components/nav.html", "<ul><li><a href=\"/\">Home</a></li></ul>");

        let output = site.compose("index.html").unwrap();
        assert!(output.html.contains("<ul><li><a href=\"/\">Home</a></li></ul>"));
        assert!(!output.html.contains("<!--#include"));
        assert!(output.edges.contains(&DependencyEdge::new(
            site.path(".components/header.html"),
            site.path(".components/nav.html"),
            DependencyKind::Include,
        )));
    }

    #[test]
    fn test_compose_contract_reports_edges() {
        let site = Site::new();
        site.write("card.html", "<div class=\"card\"><slot></slot></div>");
        let path = site.write("page.html", "<include src=\"card.html\"><p>x</p></include>");

        let composer = Composer::new(&site.config, &FsResources, &site.markdown);
        let document = SourceDocument::new(
            &path,
            crate::types::SourceKind::Page,
            fs::read(&path).unwrap(),
        );
        let mut visited = Vec::new();
        let composition = composer.compose(&document, 0, &mut visited).unwrap();

        assert_eq!(
            composition.fragment.document.to_html(),
            "<div class=\"card\"><p>x</p></div>"
        );
        assert_eq!(composition.edges.len(), 1);
        assert!(visited.is_empty());
    }

    #[test]
    fn test_failed_page_keeps_edges_seen_before_failure() {
        let site = Site::new();
        site.write("_p.html", "<include>broken</include>");
        site.write("index.html", "<!--#include file=\"_p.html\" -->");

        let composer = Composer::new(&site.config, &FsResources, &site.markdown);
        let failure = composer
            .compose_page_tracked(&site.path("index.html"))
            .unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::MalformedDirective);
        assert!(failure.edges.contains(&DependencyEdge::new(
            site.path("index.html"),
            site.path("_p.html"),
            DependencyKind::Include,
        )));
    }

    #[test]
    fn test_missing_include_warns_with_placeholder() {
        let site = Site::new();
        site.write("index.html", "<main><!--#include file=\"missing.html\" --></main>");

        let output = site.compose("index.html").unwrap();
        assert!(output.html.contains("<!-- include not found: missing.html -->"));
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].kind, ErrorKind::IncludeNotFound);
    }

    #[test]
    fn test_missing_include_without_placeholder_is_removed() {
        let site = Site::new().with_config(|config| config.missing_include_placeholder = false);
        site.write("index.html", "<main>a<include src=\"missing.html\">x</include>b</main>");

        let output = site.compose("index.html").unwrap();
        assert!(output.html.contains("<main>ab</main>"));
    }

    #[test]
    fn test_missing_include_promoted_by_fail_on() {
        let site = Site::new().with_config(|config| config.fail_on = FailOn::Warning);
        site.write("index.html", "<!--#include file=\"missing.html\" -->");

        let error = site.compose("index.html").unwrap_err();
        assert!(matches!(error, UnifyError::IncludeNotFound { .. }));
    }
}

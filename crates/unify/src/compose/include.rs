use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::head::{is_hoistable_script, is_hoistable_style};
use super::slots::{collect_providers, fill_slots};
use super::{Composer, Fragment, PageContext};
use crate::error::{Result, UnifyError};
use crate::html::{Document, Element, NodeData, NodeId};
use crate::resources::resolve_reference;
use crate::types::{DependencyKind, is_markdown_path};

static SSI_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(virtual|file)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("ssi attribute pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveSyntax {
    /// `<!--#include virtual="..." -->` / `<!--#include file="..." -->`
    SsiComment,
    /// `<include src="...">...</include>`
    DomElement,
}

enum Included {
    Fragment(Fragment),
    Missing,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub syntax: DirectiveSyntax,
    pub node: NodeId,
    /// As written by the author.
    pub reference: String,
    /// `None` when the reference escapes the source root.
    pub target: Option<PathBuf>,
}

fn is_ssi_comment(text: &str) -> bool {
    text.trim_start().starts_with("#include")
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

impl Composer<'_> {
    fn parse_directive(
        &self,
        document: &Document,
        node: NodeId,
        includer: &Path,
    ) -> Result<Option<IncludeDirective>> {
        let root = self.config.source_root();

        match document.data(node) {
            NodeData::Comment(text) if is_ssi_comment(text) => {
                let captures = SSI_ATTRIBUTE.captures(text).ok_or_else(|| {
                    UnifyError::MalformedDirective {
                        path: self.display_path(includer),
                        message: format!(
                            "include comment needs a virtual or file attribute: <!--{}-->",
                            text
                        ),
                    }
                })?;
                let mode = captures[1].to_ascii_lowercase();
                let reference = captures
                    .get(2)
                    .or_else(|| captures.get(3))
                    .map(|value| value.as_str().trim().to_string())
                    .unwrap_or_default();
                if reference.is_empty() {
                    return Err(UnifyError::MalformedDirective {
                        path: self.display_path(includer),
                        message: format!("empty {} attribute in include comment", mode),
                    });
                }

                let base = if mode == "virtual" {
                    root
                } else {
                    parent_dir(includer)
                };
                let target = resolve_reference(root, base, &reference);

                Ok(Some(IncludeDirective {
                    syntax: DirectiveSyntax::SsiComment,
                    node,
                    reference,
                    target,
                }))
            }
            NodeData::Element(element) if element.is("include") => {
                let reference = element
                    .attr("src")
                    .map(str::trim)
                    .filter(|src| !src.is_empty())
                    .ok_or_else(|| UnifyError::MalformedDirective {
                        path: self.display_path(includer),
                        message: "<include> element without a src attribute".to_string(),
                    })?
                    .to_string();
                let target = resolve_reference(root, parent_dir(includer), &reference);

                Ok(Some(IncludeDirective {
                    syntax: DirectiveSyntax::DomElement,
                    node,
                    reference,
                    target,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Directives under `scope` in document order. The contents of an
    /// `<include>` element belong to that include and are not descended into.
    fn collect_directives(
        &self,
        document: &Document,
        scope: NodeId,
        includer: &Path,
    ) -> Result<Vec<IncludeDirective>> {
        let mut directives = Vec::new();
        let mut stack: Vec<NodeId> = document.children(scope).into_iter().rev().collect();

        while let Some(node) = stack.pop() {
            if let Some(directive) = self.parse_directive(document, node, includer)? {
                let is_element = directive.syntax == DirectiveSyntax::DomElement;
                directives.push(directive);
                if is_element {
                    continue;
                }
            }
            stack.extend(document.children(node).into_iter().rev());
        }

        Ok(directives)
    }

    pub(super) fn resolve_includes(
        &self,
        fragment: &mut Fragment,
        scope: NodeId,
        includer: &Path,
        depth: usize,
        stack: &mut Vec<PathBuf>,
        context: &mut PageContext,
    ) -> Result<()> {
        let directives = self.collect_directives(&fragment.document, scope, includer)?;

        for directive in directives {
            match directive.syntax {
                DirectiveSyntax::SsiComment => {
                    self.splice_ssi(fragment, &directive, includer, depth, stack, context)?
                }
                DirectiveSyntax::DomElement => {
                    self.splice_element(fragment, &directive, includer, depth, stack, context)?
                }
            }
        }

        Ok(())
    }

    fn splice_ssi(
        &self,
        fragment: &mut Fragment,
        directive: &IncludeDirective,
        includer: &Path,
        depth: usize,
        stack: &mut Vec<PathBuf>,
        context: &mut PageContext,
    ) -> Result<()> {
        let included = match self.include_target(directive, includer, depth, stack, context)? {
            Included::Fragment(included) => included,
            unresolved => {
                self.leave_placeholder(&mut fragment.document, directive, &unresolved);
                return Ok(());
            }
        };

        let document = &mut fragment.document;
        let nodes = document.import_children(&included.document, included.document.root());
        for style in &included.styles {
            let copy = document.import(&included.document, *style);
            fragment.styles.push(copy);
        }
        for script in &included.scripts {
            let copy = document.import(&included.document, *script);
            fragment.scripts.push(copy);
        }
        document.replace_with(directive.node, &nodes);
        Ok(())
    }

    fn splice_element(
        &self,
        fragment: &mut Fragment,
        directive: &IncludeDirective,
        includer: &Path,
        depth: usize,
        stack: &mut Vec<PathBuf>,
        context: &mut PageContext,
    ) -> Result<()> {
        // Caller content may carry its own includes.
        self.resolve_includes(fragment, directive.node, includer, depth, stack, context)?;
        let providers = collect_providers(&mut fragment.document, directive.node);

        let included = match self.include_target(directive, includer, depth, stack, context)? {
            Included::Fragment(included) => included,
            unresolved => {
                self.leave_placeholder(&mut fragment.document, directive, &unresolved);
                return Ok(());
            }
        };

        let document = &mut fragment.document;
        let container = document.create_element(Element::new("include"));
        for node in document.import_children(&included.document, included.document.root()) {
            document.append(container, node);
        }

        for style in &included.styles {
            let copy = document.import(&included.document, *style);
            fragment.styles.push(copy);
        }
        for script in &included.scripts {
            let copy = document.import(&included.document, *script);
            fragment.scripts.push(copy);
        }
        for node in document.descendants(container) {
            if is_hoistable_style(document, node) {
                document.detach(node);
                fragment.styles.push(node);
            } else if is_hoistable_script(document, node) {
                document.detach(node);
                fragment.scripts.push(node);
            }
        }

        fill_slots(document, container, &providers);
        let nodes = document.children(container);
        document.replace_with(directive.node, &nodes);
        Ok(())
    }

    fn leave_placeholder(
        &self,
        document: &mut Document,
        directive: &IncludeDirective,
        unresolved: &Included,
    ) {
        if matches!(unresolved, Included::Missing) && self.config.missing_include_placeholder {
            let placeholder =
                document.create_comment(format!(" include not found: {} ", directive.reference));
            document.replace_with(directive.node, &[placeholder]);
        } else {
            document.detach(directive.node);
        }
    }

    /// Fetches and fully composes the target of `directive`, unless a
    /// recoverable problem was recorded instead.
    fn include_target(
        &self,
        directive: &IncludeDirective,
        includer: &Path,
        depth: usize,
        stack: &mut Vec<PathBuf>,
        context: &mut PageContext,
    ) -> Result<Included> {
        let Some(target) = directive.target.clone() else {
            self.recover(
                context,
                UnifyError::PathTraversal {
                    target: directive.reference.clone(),
                    from: self.display_path(includer),
                },
            )?;
            return Ok(Included::Skipped);
        };

        if stack.contains(&target) {
            let start = stack
                .iter()
                .position(|path| *path == target)
                .unwrap_or_default();
            let mut chain: Vec<PathBuf> = stack[start..]
                .iter()
                .map(|path| self.display_path(path))
                .collect();
            chain.push(self.display_path(&target));
            return Err(UnifyError::CircularDependency { chain });
        }

        context.edge(includer, &target, DependencyKind::Include);

        if depth + 1 > self.config.max_depth {
            self.recover(
                context,
                UnifyError::MaxDepthExceeded {
                    path: self.display_path(&target),
                    max_depth: self.config.max_depth,
                },
            )?;
            return Ok(Included::Skipped);
        }

        let Some(bytes) = self.resources.read(&target)? else {
            self.recover(
                context,
                UnifyError::IncludeNotFound {
                    target: self.display_path(&target),
                    from: self.display_path(includer),
                },
            )?;
            return Ok(Included::Missing);
        };

        let source = String::from_utf8_lossy(&bytes);
        let text = if is_markdown_path(&target) {
            self.markdown.render(&source, &target)?.html
        } else {
            source.into_owned()
        };

        stack.push(target.clone());
        let composed = self.compose_source(&target, &text, depth + 1, stack, context);
        stack.pop();
        composed.map(Included::Fragment)
    }
}

#[cfg(test)]
mod tests {
    use crate::compose::testing::Site;
    use crate::config::FailOn;
    use crate::error::{ErrorKind, UnifyError};

    #[test]
    fn test_dom_include_with_slots_and_fallback() {
        let site = Site::new();
        site.write(
            ".components/card.html",
            "<article><h2 data-slot=\"title\">Untitled</h2><div><slot name=\"body\">No body yet</slot></div></article>",
        );
        site.write(
            "index.html",
            "<include src=\"/.components/card.html\"><span data-slot=\"title\">Hello</span></include>",
        );

        let output = site.compose("index.html").unwrap();
        assert!(output.html.contains("<article><span>Hello</span><div>No body yet</div></article>"));
        assert!(!output.html.contains("data-slot"));
        assert!(!output.html.contains("<include"));
    }

    #[test]
    fn test_dom_include_hoists_styles_and_scripts() {
        let site = Site::new();
        site.write(
            ".components/widget.html",
            "<style>.w{color:red}</style><div class=\"w\">W</div><script>initWidget()</script><script src=\"/lib.js\"></script>",
        );
        site.write(
            "index.html",
            "<html><head><title>T</title></head><body><include src=\"/.components/widget.html\"></include><footer>F</footer></body></html>",
        );

        let output = site.compose("index.html").unwrap();
        let html = output.html;
        assert!(html.contains("<title>T</title><style>.w{color:red}</style></head>"));
        assert!(html.contains("<footer>F</footer><script>initWidget()</script></body>"));
        assert!(html.contains("<div class=\"w\">W</div><script src=\"/lib.js\"></script>"));
    }

    #[test]
    fn test_ssi_include_keeps_styles_in_place() {
        let site = Site::new();
        site.write(
            ".components/widget.html",
            "<style>.w{color:red}</style><div class=\"w\">W</div><script>initWidget()</script>",
        );
        site.write(
            "index.html",
            "<html><head></head><body><!--#include virtual=\"/.components/widget.html\" --></body></html>",
        );

        let html = site.compose("index.html").unwrap().html;
        assert!(html.contains(
            "<body><style>.w{color:red}</style><div class=\"w\">W</div><script>initWidget()</script></body>"
        ));
    }

    #[test]
    fn test_circular_include_names_chain() {
        let site = Site::new();
        site.write("a.html", "<!--#include file=\"b.html\" -->");
        site.write("b.html", "<include src=\"a.html\"></include>");

        let error = site.compose("a.html").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::CircularDependency);
        assert_eq!(error.to_string(), "Circular dependency: a.html → b.html → a.html");
    }

    #[test]
    fn test_self_include_is_circular() {
        let site = Site::new();
        site.write("loop.html", "<include src=\"loop.html\"></include>");
        let error = site.compose("loop.html").unwrap_err();
        assert!(matches!(error, UnifyError::CircularDependency { .. }));
    }

    #[test]
    fn test_depth_limit() {
        let site = Site::new().with_config(|config| config.max_depth = 2);
        site.write("index.html", "<!--#include file=\"one.html\" -->");
        site.write("one.html", "1<!--#include file=\"two.html\" -->");
        site.write("two.html", "2<!--#include file=\"three.html\" -->");
        site.write("three.html", "3");

        let output = site.compose("index.html").unwrap();
        assert!(output.html.contains("12"));
        assert!(!output.html.contains('3'));
        assert_eq!(output.issues[0].kind, ErrorKind::MaxDepthExceeded);
    }

    #[test]
    fn test_path_traversal_is_blocked() {
        let site = Site::new();
        site.write("index.html", "<!--#include file=\"../../etc/passwd\" -->");

        let output = site.compose("index.html").unwrap();
        assert_eq!(output.issues[0].kind, ErrorKind::PathTraversal);
        assert!(!output.html.contains("root:"));

        let strict = Site::new().with_config(|config| config.fail_on = FailOn::Error);
        strict.write("index.html", "<include src=\"../outside.html\"></include>");
        let error = strict.compose("index.html").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::PathTraversal);
    }

    #[test]
    fn test_malformed_directives() {
        let site = Site::new();
        site.write("index.html", "<!--#include nothing -->");
        let error = site.compose("index.html").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MalformedDirective);

        site.write("index.html", "<include>child</include>");
        let error = site.compose("index.html").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MalformedDirective);
    }

    #[test]
    fn test_markdown_include_is_rendered() {
        let site = Site::new();
        site.write("notes.md", "# Notes\n\nSome *text*.");
        site.write("index.html", "<section><!--#include file=\"notes.md\" --></section>");

        let html = site.compose("index.html").unwrap().html;
        assert!(html.contains("<em>text</em>"));
        assert!(!html.contains("# Notes"));
    }

    #[test]
    fn test_nested_include_inside_caller_content() {
        let site = Site::new();
        site.write("box.html", "<div class=\"box\"><slot></slot></div>");
        site.write("inner.html", "<b>inner</b>");
        site.write(
            "index.html",
            "<include src=\"box.html\"><!--#include file=\"inner.html\" --></include>",
        );

        let html = site.compose("index.html").unwrap().html;
        assert!(html.contains("<div class=\"box\"><b>inner</b></div>"));
    }
}

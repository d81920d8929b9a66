use std::path::{Path, PathBuf};

use super::head::{has_description, has_title, merge_head, title_text};
use super::slots::{SLOT_ATTR, collect_providers, fill_slots};
use super::template::{TemplateVariables, escape};
use super::{Composer, Fragment, PageContext};
use crate::error::{Result, UnifyError};
use crate::html::{self, Document, Element, NodeId};
use crate::resources::resolve_reference;
use crate::types::DependencyKind;

pub const LAYOUT_ATTR: &str = "data-layout";

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

fn is_layout_link(document: &Document, node: NodeId) -> bool {
    document
        .element(node)
        .map(|element| {
            element.is("link")
                && element
                    .attr("rel")
                    .is_some_and(|rel| rel.trim().eq_ignore_ascii_case("layout"))
        })
        .unwrap_or(false)
}

/// Removes every top-level layout declaration and returns the first one.
fn take_layout_declaration(document: &mut Document) -> Option<String> {
    let mut declared: Option<String> = None;

    for node in document.children(document.root()) {
        let value = if is_layout_link(document, node) {
            let href = document
                .element(node)
                .and_then(|element| element.attr("href"))
                .map(str::to_string);
            document.detach(node);
            href
        } else {
            document
                .element_mut(node)
                .and_then(|element| element.remove_attr(LAYOUT_ATTR))
        };

        if declared.is_none() {
            declared = value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
    }

    declared
}

/// Moves the children of a top-level `<head>` into a document of their own.
fn take_head_block(document: &mut Document) -> Option<Document> {
    let root = document.root();
    let head = document
        .children(root)
        .into_iter()
        .find(|node| document.is_element(*node, "head"))?;

    let mut block = Document::new();
    let block_root = block.root();
    for node in block.import_children(document, head) {
        block.append(block_root, node);
    }
    document.detach(head);
    Some(block)
}

fn nodes_to_document(source: &Document, nodes: &[NodeId]) -> Document {
    let mut document = Document::new();
    let root = document.root();
    for node in nodes {
        let copy = document.import(source, *node);
        document.append(root, copy);
    }
    document
}

/// Detaches the hoisted styles and scripts of `fragment` into standalone
/// documents.
fn take_hoisted(fragment: &mut Fragment) -> (Document, Document) {
    let styles = nodes_to_document(&fragment.document, &fragment.styles);
    let scripts = nodes_to_document(&fragment.document, &fragment.scripts);
    fragment.styles.clear();
    fragment.scripts.clear();
    (styles, scripts)
}

fn find_content_target(document: &Document) -> NodeId {
    let root = document.root();
    document
        .find_first(root, "main")
        .or_else(|| document.find_first(root, "body"))
        .unwrap_or(root)
}

/// Projects `content` into the slots of `layout`. Default content lands in
/// the default slot, or in `<main>`, `<body>` or the root when the layout
/// has no default slot.
fn inject(layout: &mut Document, content: &Document) {
    let container = layout.create_element(Element::new("slot"));
    for node in layout.import_children(content, content.root()) {
        layout.append(container, node);
    }

    let providers = collect_providers(layout, container);
    let root = layout.root();
    let placed = fill_slots(layout, root, &providers);

    if !placed && providers.has_default(layout) {
        let target = find_content_target(layout);
        for node in providers.default_nodes() {
            layout.append(target, *node);
        }
    }
}

fn ensure_head(document: &mut Document) -> NodeId {
    if let Some(head) = document.head() {
        return head;
    }
    let head = document.create_element(Element::new("head"));
    match document.html_element() {
        Some(html) => document.prepend(html, head),
        None => {
            let root = document.root();
            document.prepend(root, head);
        }
    }
    head
}

/// Drops every trace of the slot and layout vocabulary.
pub fn strip_templating(document: &mut Document) {
    let root = document.root();
    for node in document.descendants(root) {
        let Some(element) = document.element(node) else {
            continue;
        };
        let unwrap = element.is("slot") || (element.is("template") && element.has_attr(SLOT_ATTR));

        if unwrap {
            document.unwrap(node);
        } else if is_layout_link(document, node) {
            document.detach(node);
        } else if let Some(element) = document.element_mut(node) {
            element.remove_attr(SLOT_ATTR);
            element.remove_attr(LAYOUT_ATTR);
        }
    }
}

impl Composer<'_> {
    /// Resolves a layout named by front matter or a declaration. Absolute
    /// names anchor at the source root, others are tried in the layouts
    /// directory (with and without `.html`), next to the requester, then at
    /// the source root.
    fn resolve_layout_name(
        &self,
        name: &str,
        requester: &Path,
        context: &mut PageContext,
    ) -> Result<Option<PathBuf>> {
        let root = self.config.source_root();
        let layouts = self.config.layouts_root();
        let with_extension = if Path::new(name).extension().is_some() {
            None
        } else {
            Some(format!("{}.html", name))
        };

        let mut attempts: Vec<(PathBuf, String)> = Vec::new();
        if name.starts_with('/') {
            attempts.push((root.to_path_buf(), name.to_string()));
            if let Some(extended) = &with_extension {
                attempts.push((root.to_path_buf(), extended.clone()));
            }
        } else {
            attempts.push((layouts.clone(), name.to_string()));
            if let Some(extended) = &with_extension {
                attempts.push((layouts.clone(), extended.clone()));
            }
            attempts.push((parent_dir(requester).to_path_buf(), name.to_string()));
            attempts.push((root.to_path_buf(), name.to_string()));
        }

        let mut escaped = false;
        for (base, reference) in attempts {
            match resolve_reference(root, &base, &reference) {
                Some(candidate) if self.resources.exists(&candidate) => return Ok(Some(candidate)),
                Some(_) => {}
                None => escaped = true,
            }
        }

        let error = if escaped {
            UnifyError::PathTraversal {
                target: name.to_string(),
                from: self.display_path(requester),
            }
        } else {
            UnifyError::LayoutNotFound {
                layout: name.to_string(),
                page: self.display_path(requester),
            }
        };
        self.recover(context, error)?;
        Ok(None)
    }

    /// Folder-scoped `_layout.html` nearest to the page, then the default
    /// layout. Candidates checked and found absent become dependencies of the
    /// page, so creating one later invalidates it.
    fn discover_layout(&self, page: &Path, context: &mut PageContext) -> Option<PathBuf> {
        let root = self.config.source_root();
        let mut directory = page.parent();

        while let Some(current) = directory {
            if !current.starts_with(root) {
                break;
            }
            let candidate = current.join(&self.config.layout_filename);
            if candidate != page {
                if self.resources.exists(&candidate) {
                    return Some(candidate);
                }
                context.edge(page, &candidate, DependencyKind::Layout);
            }
            if current == root {
                break;
            }
            directory = current.parent();
        }

        let default = self.config.default_layout_path();
        if self.resources.exists(&default) {
            return Some(default);
        }
        context.edge(page, &default, DependencyKind::Layout);
        None
    }

    fn page_title(&self, fragment: &Document, page_head: Option<&Document>) -> Option<String> {
        if let Some(head) = page_head
            && let Some(title) = title_text(head, head.root())
        {
            return Some(title);
        }
        fragment
            .find_first(fragment.root(), "h1")
            .map(|heading| fragment.text_content(heading).trim().to_string())
            .filter(|title| !title.is_empty())
    }

    pub(super) fn apply_layout(
        &self,
        mut fragment: Fragment,
        page: &Path,
        layout_override: Option<String>,
        variables: &mut TemplateVariables,
        context: &mut PageContext,
    ) -> Result<Document> {
        let (page_styles, page_scripts) = take_hoisted(&mut fragment);

        if fragment.document.is_full_document() {
            let mut document = fragment.document;
            self.finish(&mut document, Vec::new(), vec![page_styles], vec![page_scripts], variables);
            return Ok(document);
        }

        let page_head = take_head_block(&mut fragment.document);
        let declared = take_layout_declaration(&mut fragment.document);
        if variables.get("title").is_none()
            && let Some(title) = self.page_title(&fragment.document, page_head.as_ref())
        {
            variables.set("title", title);
        }

        let mut next = match layout_override.or(declared) {
            Some(name) => match self.resolve_layout_name(&name, page, context)? {
                Some(layout) => Some(layout),
                None => self.discover_layout(page, context),
            },
            None => self.discover_layout(page, context),
        };

        let mut content = fragment.document;
        let mut chain: Vec<PathBuf> = Vec::new();
        let mut head_blocks: Vec<Document> = Vec::new();
        let mut styles: Vec<Document> = Vec::new();
        let mut scripts: Vec<Document> = Vec::new();
        let mut from = page.to_path_buf();

        while let Some(layout_path) = next.take() {
            if let Some(start) = chain.iter().position(|path| *path == layout_path) {
                let mut cycle: Vec<PathBuf> = chain[start..]
                    .iter()
                    .map(|path| self.display_path(path))
                    .collect();
                cycle.push(self.display_path(&layout_path));
                return Err(UnifyError::CircularDependency { chain: cycle });
            }
            context.edge(&from, &layout_path, DependencyKind::Layout);
            chain.push(layout_path.clone());

            let Some(bytes) = self.resources.read(&layout_path)? else {
                self.recover(
                    context,
                    UnifyError::LayoutNotFound {
                        layout: self.display_path(&layout_path).display().to_string(),
                        page: self.display_path(&from),
                    },
                )?;
                break;
            };

            let text = String::from_utf8_lossy(&bytes);
            let mut stack = vec![layout_path.clone()];
            let mut layout = self.compose_source(&layout_path, &text, 0, &mut stack, context)?;
            let (layout_styles, layout_scripts) = take_hoisted(&mut layout);
            styles.push(layout_styles);
            scripts.push(layout_scripts);

            let is_full_document = layout.document.is_full_document();
            let parent = if is_full_document {
                None
            } else {
                take_layout_declaration(&mut layout.document)
            };

            if self.config.template_variables {
                let root = layout.document.root();
                variables.apply(&mut layout.document, root);
            }
            if !is_full_document && let Some(block) = take_head_block(&mut layout.document) {
                head_blocks.push(block);
            }

            inject(&mut layout.document, &content);
            content = layout.document;

            next = match parent {
                Some(name) => self.resolve_layout_name(&name, &layout_path, context)?,
                None => None,
            };
            from = layout_path;
        }

        let mut document = if content.is_full_document() {
            content
        } else {
            self.skeleton(&content, page, variables, chain.is_empty())
        };

        // Layout blocks arrive innermost first; the head merge wants the
        // outermost first and the page last.
        head_blocks.reverse();
        head_blocks.extend(page_head);
        styles.reverse();
        styles.push(page_styles);
        scripts.reverse();
        scripts.push(page_scripts);

        self.finish(&mut document, head_blocks, styles, scripts, variables);
        Ok(document)
    }

    fn skeleton(
        &self,
        content: &Document,
        page: &Path,
        variables: &TemplateVariables,
        wrap_in_main: bool,
    ) -> Document {
        let stem = page
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = variables.get("title").unwrap_or(stem.as_str());

        let mut markup = String::from(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        markup.push_str(&format!("<title>{}</title>\n", escape(title)));
        if let Some(description) = variables.get("description") {
            markup.push_str(&format!(
                "<meta name=\"description\" content=\"{}\">\n",
                escape(description)
            ));
        }
        markup.push_str("</head>\n<body>\n");
        if wrap_in_main {
            markup.push_str("<main></main>\n");
        }
        markup.push_str("</body>\n</html>\n");

        let mut document = html::parse(&markup);
        let target = find_content_target(&document);
        for node in document.import_children(content, content.root()) {
            document.append(target, node);
        }
        document
    }

    /// Head merge, hoisted nodes, metadata fallbacks and the final sweep of
    /// templating markers.
    fn finish(
        &self,
        document: &mut Document,
        head_blocks: Vec<Document>,
        styles: Vec<Document>,
        scripts: Vec<Document>,
        variables: &TemplateVariables,
    ) {
        let head = ensure_head(document);

        let mut blocks: Vec<Vec<NodeId>> = head_blocks
            .iter()
            .map(|block| document.import_children(block, block.root()))
            .collect();
        let hoisted_styles: Vec<NodeId> = styles
            .iter()
            .flat_map(|block| document.import_children(block, block.root()))
            .collect();
        blocks.push(hoisted_styles);
        merge_head(document, head, &blocks);

        if !has_title(document, head)
            && let Some(title) = variables.get("title")
        {
            let element = document.create_element(Element::new("title"));
            let text = document.create_text(escape(title));
            document.append(element, text);
            document.append(head, element);
        }
        if !has_description(document, head)
            && let Some(description) = variables.get("description")
        {
            let mut meta = Element::new("meta");
            meta.set_attr("name", "description");
            meta.set_attr("content", escape(description));
            let element = document.create_element(meta);
            document.append(head, element);
        }

        let root = document.root();
        let script_target = document
            .body()
            .or_else(|| document.html_element())
            .unwrap_or(root);
        for block in &scripts {
            for node in document.import_children(block, block.root()) {
                document.append(script_target, node);
            }
        }

        strip_templating(document);
    }
}

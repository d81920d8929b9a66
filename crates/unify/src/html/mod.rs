//! Mutable HTML document tree.
//!
//! Nodes live in an arena owned by [`Document`] and are addressed by
//! [`NodeId`]. Detached nodes keep their slot in the arena, so ids collected
//! before a mutation stay valid afterwards.

mod parser;
mod serialize;

pub use parser::parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            self_closing: false,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attribute| attribute.name.eq_ignore_ascii_case(name))
            .map(|attribute| attribute.value.as_deref().unwrap_or(""))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs
            .iter()
            .any(|attribute| attribute.name.eq_ignore_ascii_case(name))
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self
            .attrs
            .iter_mut()
            .find(|attribute| attribute.name.eq_ignore_ascii_case(name))
        {
            Some(attribute) => attribute.value = value,
            None => self.attrs.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let position = self
            .attrs
            .iter()
            .position(|attribute| attribute.name.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(position).value.unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Root,
    Doctype(String),
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS
        .iter()
        .any(|void| void.eq_ignore_ascii_case(name))
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Root,
                parent: None,
                first_child: None,
                last_child: None,
                prev_sibling: None,
                next_sibling: None,
            }],
        }
    }

    pub fn parse(html: &str) -> Self {
        parse(html)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn create(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_element(&mut self, element: Element) -> NodeId {
        self.create(NodeData::Element(element))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.create(NodeData::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.create(NodeData::Comment(text.into()))
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0].data
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId, name: &str) -> bool {
        self.element(id).map(|element| element.is(name)).unwrap_or(false)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].next_sibling
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = Vec::new();
        let mut current = self.nodes[id.0].first_child;
        while let Some(child) = current {
            children.push(child);
            current = self.nodes[child.0].next_sibling;
        }
        children
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .into_iter()
            .filter(|child| self.element(*child).is_some())
            .collect()
    }

    /// Pre-order walk of everything below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            found.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }
        found
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current == self.root()
    }

    pub fn find_elements(&self, scope: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|node| self.is_element(*node, name))
            .collect()
    }

    pub fn find_first(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|node| self.is_element(*node, name))
    }

    /// The `html` element when it sits at the top level of the document.
    pub fn html_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .into_iter()
            .find(|child| self.is_element(*child, "html"))
    }

    pub fn is_full_document(&self) -> bool {
        self.html_element().is_some()
    }

    pub fn head(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.children(html)
            .into_iter()
            .find(|child| self.is_element(*child, "head"))
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.children(html)
            .into_iter()
            .find(|child| self.is_element(*child, "body"))
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        if let NodeData::Text(value) = self.data(id) {
            text.push_str(value);
        }
        for node in self.descendants(id) {
            if let NodeData::Text(value) = self.data(node) {
                text.push_str(value);
            }
        }
        text
    }

    pub fn is_whitespace(&self, id: NodeId) -> bool {
        match self.data(id) {
            NodeData::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = {
            let node = &self.nodes[id.0];
            (node.parent, node.prev_sibling, node.next_sibling)
        };

        if let Some(prev) = prev {
            self.nodes[prev.0].next_sibling = next;
        } else if let Some(parent) = parent {
            self.nodes[parent.0].first_child = next;
        }

        if let Some(next) = next {
            self.nodes[next.0].prev_sibling = prev;
        } else if let Some(parent) = parent {
            self.nodes[parent.0].last_child = prev;
        }

        let node = &mut self.nodes[id.0];
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let last = self.nodes[parent.0].last_child;
        {
            let node = &mut self.nodes[child.0];
            node.parent = Some(parent);
            node.prev_sibling = last;
        }
        match last {
            Some(last) => self.nodes[last.0].next_sibling = Some(child),
            None => self.nodes[parent.0].first_child = Some(child),
        }
        self.nodes[parent.0].last_child = Some(child);
    }

    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        match self.nodes[parent.0].first_child {
            Some(first) => self.insert_before(first, child),
            None => self.append(parent, child),
        }
    }

    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        self.detach(node);
        let Some(parent) = self.nodes[sibling.0].parent else {
            return;
        };
        let prev = self.nodes[sibling.0].prev_sibling;
        {
            let inserted = &mut self.nodes[node.0];
            inserted.parent = Some(parent);
            inserted.prev_sibling = prev;
            inserted.next_sibling = Some(sibling);
        }
        self.nodes[sibling.0].prev_sibling = Some(node);
        match prev {
            Some(prev) => self.nodes[prev.0].next_sibling = Some(node),
            None => self.nodes[parent.0].first_child = Some(node),
        }
    }

    /// Puts `replacements` where `target` was and detaches `target`.
    pub fn replace_with(&mut self, target: NodeId, replacements: &[NodeId]) {
        for replacement in replacements {
            self.insert_before(target, *replacement);
        }
        self.detach(target);
    }

    /// Replaces `id` by its own children.
    pub fn unwrap(&mut self, id: NodeId) {
        let children = self.children(id);
        self.replace_with(id, &children);
    }

    pub fn remove_children(&mut self, id: NodeId) {
        for child in self.children(id) {
            self.detach(child);
        }
    }

    /// Deep-copies `node` out of `other` into this arena, returning the
    /// detached copy.
    pub fn import(&mut self, other: &Document, node: NodeId) -> NodeId {
        let copy = self.create(other.data(node).clone());
        for child in other.children(node) {
            let child_copy = self.import(other, child);
            self.append(copy, child_copy);
        }
        copy
    }

    pub fn import_children(&mut self, other: &Document, parent: NodeId) -> Vec<NodeId> {
        other
            .children(parent)
            .into_iter()
            .map(|child| self.import(other, child))
            .collect()
    }

    pub fn deep_clone(&mut self, node: NodeId) -> NodeId {
        let copy = self.create(self.data(node).clone());
        for child in self.children(node) {
            let child_copy = self.deep_clone(child);
            self.append(copy, child_copy);
        }
        copy
    }

    pub fn to_html(&self) -> String {
        serialize::serialize_children(self, self.root())
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        serialize::serialize_node(self, id)
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        serialize::serialize_children(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_children_order() {
        let mut document = Document::new();
        let root = document.root();
        let first = document.create_text("a");
        let second = document.create_text("b");
        document.append(root, first);
        document.append(root, second);

        assert_eq!(document.children(root), vec![first, second]);
        assert_eq!(document.to_html(), "ab");
    }

    #[test]
    fn test_replace_with_keeps_position() {
        let mut document = Document::parse("<p>one</p><!--x--><p>three</p>");
        let root = document.root();
        let comment = document.children(root)[1];
        let replacement = document.create_text("two");

        document.replace_with(comment, &[replacement]);
        assert_eq!(document.to_html(), "<p>one</p>two<p>three</p>");
        assert!(!document.is_attached(comment));
    }

    #[test]
    fn test_unwrap_lifts_children() {
        let mut document = Document::parse("<div><slot><b>x</b>y</slot></div>");
        let slot = document.find_first(document.root(), "slot").unwrap();
        document.unwrap(slot);
        assert_eq!(document.to_html(), "<div><b>x</b>y</div>");
    }

    #[test]
    fn test_import_copies_subtree_between_documents() {
        let source = Document::parse("<ul><li>a</li><li>b</li></ul>");
        let mut target = Document::parse("<nav></nav>");
        let nav = target.find_first(target.root(), "nav").unwrap();
        let list = source.children(source.root())[0];

        let copy = target.import(&source, list);
        target.append(nav, copy);
        assert_eq!(target.to_html(), "<nav><ul><li>a</li><li>b</li></ul></nav>");
        assert_eq!(source.to_html(), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn test_attribute_helpers_are_case_insensitive() {
        let mut element = Element::new("meta");
        element.set_attr("Name", "viewport");
        assert_eq!(element.attr("name"), Some("viewport"));
        element.set_attr("name", "author");
        assert_eq!(element.attrs.len(), 1);
        assert_eq!(element.remove_attr("NAME"), Some("author".to_string()));
        assert!(!element.has_attr("name"));
    }

    #[test]
    fn test_full_document_accessors() {
        let document = Document::parse(
            "<!DOCTYPE html><html><head><title>T</title></head><body><p>x</p></body></html>",
        );
        assert!(document.is_full_document());
        let head = document.head().unwrap();
        let title = document.find_first(head, "title").unwrap();
        assert_eq!(document.text_content(title), "T");
        assert!(document.body().is_some());
        assert!(!Document::parse("<main></main>").is_full_document());
    }
}

use crate::html::{Document, NodeData, NodeId};

pub const SLOT_ATTR: &str = "data-slot";
pub const DEFAULT_SLOT: &str = "default";

/// Caller-side content captured from an `<include>` element or a page body.
#[derive(Debug, Default)]
pub struct SlotProviders {
    named: Vec<(String, Vec<NodeId>)>,
    default: Vec<NodeId>,
}

impl SlotProviders {
    pub fn named(&self, name: &str) -> Option<&[NodeId]> {
        self.named
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, nodes)| nodes.as_slice())
    }

    pub fn default_nodes(&self) -> &[NodeId] {
        &self.default
    }

    pub fn has_default(&self, document: &Document) -> bool {
        self.default.iter().any(|node| match document.data(*node) {
            NodeData::Text(text) => !text.trim().is_empty(),
            NodeData::Comment(_) => false,
            _ => true,
        })
    }

    fn push_named(&mut self, name: String, nodes: Vec<NodeId>) {
        match self.named.iter_mut().find(|(slot, _)| *slot == name) {
            Some((_, existing)) => existing.extend(nodes),
            None => self.named.push((name, nodes)),
        }
    }
}

fn normalize_slot_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case(DEFAULT_SLOT) {
        String::new()
    } else {
        name.to_string()
    }
}

/// Detaches every child of `parent` and sorts it into named or default
/// providers. `data-slot` markers are stripped from the captured nodes.
pub fn collect_providers(document: &mut Document, parent: NodeId) -> SlotProviders {
    let mut providers = SlotProviders::default();

    for child in document.children(parent) {
        document.detach(child);

        let slot_name = document
            .element(child)
            .and_then(|element| element.attr(SLOT_ATTR).map(normalize_slot_name));
        let Some(name) = slot_name else {
            providers.default.push(child);
            continue;
        };

        let nodes = if document.is_element(child, "template") {
            let children = document.children(child);
            for node in &children {
                document.detach(*node);
            }
            children
        } else {
            if let Some(element) = document.element_mut(child) {
                element.remove_attr(SLOT_ATTR);
            }
            vec![child]
        };

        if name.is_empty() {
            providers.default.extend(nodes);
        } else {
            providers.push_named(name, nodes);
        }
    }

    providers
}

enum Placeholder {
    Slot(String),
    Marked(String),
}

fn placeholder(document: &Document, node: NodeId) -> Option<Placeholder> {
    let element = document.element(node)?;
    if element.is("slot") {
        return Some(Placeholder::Slot(normalize_slot_name(
            element.attr("name").unwrap_or_default(),
        )));
    }
    if element.is("template") {
        return None;
    }
    element
        .attr(SLOT_ATTR)
        .map(|name| Placeholder::Marked(normalize_slot_name(name)))
}

fn is_inside(document: &Document, node: NodeId, ancestor: NodeId) -> bool {
    let mut current = document.parent(node);
    while let Some(parent) = current {
        if parent == ancestor {
            return true;
        }
        current = document.parent(parent);
    }
    false
}

/// Projects `providers` into the placeholders found under `scope`.
/// Returns `true` when a default placeholder received the default content.
pub fn fill_slots(document: &mut Document, scope: NodeId, providers: &SlotProviders) -> bool {
    let candidates: Vec<NodeId> = document
        .descendants(scope)
        .into_iter()
        .filter(|node| placeholder(document, *node).is_some())
        .collect();
    let has_default = providers.has_default(document);
    let mut used: Vec<String> = Vec::new();
    let mut default_placed = false;

    for node in candidates {
        if !is_inside(document, node, scope) {
            continue;
        }
        let Some(kind) = placeholder(document, node) else {
            continue;
        };
        let name = match &kind {
            Placeholder::Slot(name) | Placeholder::Marked(name) => name.clone(),
        };

        let provided: Option<&[NodeId]> = if name.is_empty() {
            has_default.then(|| providers.default_nodes())
        } else {
            providers.named(&name)
        };

        match provided {
            Some(nodes) => {
                let nodes: Vec<NodeId> = if used.contains(&name) {
                    nodes.iter().map(|node| document.deep_clone(*node)).collect()
                } else {
                    used.push(name.clone());
                    nodes.to_vec()
                };
                document.replace_with(node, &nodes);
                if name.is_empty() {
                    default_placed = true;
                }
            }
            None => match kind {
                Placeholder::Slot(_) => document.unwrap(node),
                Placeholder::Marked(_) => {
                    if let Some(element) = document.element_mut(node) {
                        element.remove_attr(SLOT_ATTR);
                    }
                }
            },
        }
    }

    default_placed
}

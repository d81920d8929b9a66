use crate::html::{Document, NodeId};

/// Identity of a head element for deduplication. Elements without a key
/// (`style`, inline `script`, comments) are never collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeadKey {
    Title,
    Base,
    Charset,
    Meta { attribute: &'static str, value: String },
    Canonical,
    Link { rel: String, href: String },
    Script { src: String },
}

const META_KEY_ATTRIBUTES: &[&str] = &["name", "property", "http-equiv", "itemprop"];

pub fn head_key(document: &Document, node: NodeId) -> Option<HeadKey> {
    let element = document.element(node)?;
    let name = element.name.to_ascii_lowercase();

    match name.as_str() {
        "title" => Some(HeadKey::Title),
        "base" => Some(HeadKey::Base),
        "meta" => {
            if element.has_attr("charset") {
                return Some(HeadKey::Charset);
            }
            META_KEY_ATTRIBUTES.iter().find_map(|attribute| {
                element.attr(attribute).map(|value| HeadKey::Meta {
                    attribute: *attribute,
                    value: value.trim().to_ascii_lowercase(),
                })
            })
        }
        "link" => {
            let rel = element.attr("rel")?.trim().to_ascii_lowercase();
            if rel == "canonical" {
                return Some(HeadKey::Canonical);
            }
            Some(HeadKey::Link {
                rel,
                href: element.attr("href").unwrap_or_default().trim().to_string(),
            })
        }
        "script" => element.attr("src").map(|src| HeadKey::Script {
            src: src.trim().to_string(),
        }),
        _ => None,
    }
}

/// Folds `blocks` (ordered outermost to innermost, the page last) into the
/// children of `head`. A keyed element replaces the earlier element with the
/// same key at that element's position; everything else is appended in order.
/// Whitespace-only text in the blocks is dropped.
pub fn merge_head(document: &mut Document, head: NodeId, blocks: &[Vec<NodeId>]) {
    let mut merged: Vec<(Option<HeadKey>, NodeId)> = document
        .children(head)
        .into_iter()
        .map(|node| (head_key(document, node), node))
        .collect();

    for block in blocks {
        for node in block {
            let node = *node;
            if document.is_whitespace(node) {
                document.detach(node);
                continue;
            }

            let key = head_key(document, node);
            let existing = key.as_ref().and_then(|key| {
                merged
                    .iter()
                    .position(|(candidate, _)| candidate.as_ref() == Some(key))
            });

            match existing {
                Some(index) => {
                    let previous = merged[index].1;
                    document.replace_with(previous, &[node]);
                    merged[index].1 = node;
                }
                None => {
                    document.append(head, node);
                    merged.push((key, node));
                }
            }
        }
    }
}

pub fn has_title(document: &Document, head: NodeId) -> bool {
    document
        .children(head)
        .into_iter()
        .any(|node| matches!(head_key(document, node), Some(HeadKey::Title)))
}

pub fn has_description(document: &Document, head: NodeId) -> bool {
    document.children(head).into_iter().any(|node| {
        matches!(
            head_key(document, node),
            Some(HeadKey::Meta { attribute: "name", ref value }) if value == "description"
        )
    })
}

pub fn title_text(document: &Document, head: NodeId) -> Option<String> {
    document
        .children(head)
        .into_iter()
        .find(|node| document.is_element(*node, "title"))
        .map(|node| document.text_content(node).trim().to_string())
        .filter(|title| !title.is_empty())
}

pub fn is_hoistable_style(document: &Document, node: NodeId) -> bool {
    document.is_element(node, "style")
}

pub fn is_hoistable_script(document: &Document, node: NodeId) -> bool {
    document
        .element(node)
        .map(|element| element.is("script") && !element.has_attr("src"))
        .unwrap_or(false)
}

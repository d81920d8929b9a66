use super::{Attribute, Document, Element, NodeData, NodeId, RAW_TEXT_ELEMENTS, is_void_element};

/// Lenient HTML parser. Never fails: unknown or broken markup is kept as text.
/// Entities are not decoded, so text and attribute values serialize back
/// byte-for-byte.
pub fn parse(html: &str) -> Document {
    let mut document = Document::new();
    let mut stack: Vec<NodeId> = vec![document.root()];
    let mut position = 0;
    let mut text_start = 0;

    while let Some(offset) = html[position..].find('<') {
        let tag_start = position + offset;
        let rest = &html[tag_start..];

        let consumed = if rest.starts_with("<!--") {
            flush_text(&mut document, &stack, &html[text_start..tag_start]);
            let body_start = tag_start + 4;
            let (comment, end) = match html[body_start..].find("-->") {
                Some(close) => (&html[body_start..body_start + close], body_start + close + 3),
                None => (&html[body_start..], html.len()),
            };
            let node = document.create(NodeData::Comment(comment.to_string()));
            append_to_current(&mut document, &stack, node);
            Some(end)
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            flush_text(&mut document, &stack, &html[text_start..tag_start]);
            let end = html[tag_start..]
                .find('>')
                .map(|close| tag_start + close + 1)
                .unwrap_or(html.len());
            let inner = html[tag_start + 2..end].trim_end_matches('>');
            let data = if rest.starts_with("<!") {
                NodeData::Doctype(inner.to_string())
            } else {
                NodeData::Comment(format!("?{inner}"))
            };
            let node = document.create(data);
            append_to_current(&mut document, &stack, node);
            Some(end)
        } else if rest.starts_with("</") {
            match parse_end_tag(rest) {
                Some((name, length)) => {
                    flush_text(&mut document, &stack, &html[text_start..tag_start]);
                    close_element(&document, &mut stack, &name);
                    Some(tag_start + length)
                }
                None => None,
            }
        } else {
            match parse_start_tag(rest) {
                Some((element, length)) => {
                    flush_text(&mut document, &stack, &html[text_start..tag_start]);
                    let mut end = tag_start + length;
                    close_implied(&document, &mut stack, &element.name);

                    let name = element.name.clone();
                    let opens_scope = !element.self_closing && !is_void_element(&name);
                    let node = document.create_element(element);
                    append_to_current(&mut document, &stack, node);

                    if opens_scope {
                        if is_raw_text(&name) {
                            let (text, after) = raw_text_content(html, end, &name);
                            if !text.is_empty() {
                                let text_node = document.create_text(text);
                                document.append(node, text_node);
                            }
                            end = after;
                        } else {
                            stack.push(node);
                        }
                    }
                    Some(end)
                }
                None => None,
            }
        };

        match consumed {
            Some(end) => {
                position = end;
                text_start = end;
            }
            None => position = tag_start + 1,
        }
    }

    flush_text(&mut document, &stack, &html[text_start..]);
    document
}

fn current(stack: &[NodeId]) -> NodeId {
    stack[stack.len() - 1]
}

fn append_to_current(document: &mut Document, stack: &[NodeId], node: NodeId) {
    document.append(current(stack), node);
}

fn flush_text(document: &mut Document, stack: &[NodeId], text: &str) {
    if text.is_empty() {
        return;
    }
    let node = document.create_text(text);
    append_to_current(document, stack, node);
}

fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS
        .iter()
        .any(|raw| raw.eq_ignore_ascii_case(name))
}

fn is_name_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | ':' | '.')
}

fn parse_end_tag(rest: &str) -> Option<(String, usize)> {
    let after = &rest[2..];
    if !after.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    let name_length = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
    let name = after[..name_length].to_string();
    let close = after[name_length..].find('>')?;
    Some((name, 2 + name_length + close + 1))
}

fn parse_start_tag(rest: &str) -> Option<(Element, usize)> {
    let after = &rest[1..];
    if !after.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let name_length = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
    let mut element = Element::new(&after[..name_length]);
    let mut cursor = 1 + name_length;

    loop {
        cursor += whitespace_length(&rest[cursor..]);
        let remaining = &rest[cursor..];

        if remaining.is_empty() {
            return None;
        }
        if remaining.starts_with('>') {
            return Some((element, cursor + 1));
        }
        if remaining.starts_with("/>") {
            element.self_closing = true;
            return Some((element, cursor + 2));
        }
        if remaining.starts_with('/') {
            cursor += 1;
            continue;
        }

        let attr_length = remaining
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '>') || c == '/')
            .unwrap_or(remaining.len());
        let attr_length = attr_length.max(remaining.chars().next().map(char::len_utf8).unwrap_or(1));
        let name = remaining[..attr_length].to_string();
        cursor += attr_length;

        let lookahead = whitespace_length(&rest[cursor..]);
        if rest[cursor + lookahead..].starts_with('=') {
            cursor += lookahead + 1;
            cursor += whitespace_length(&rest[cursor..]);
            let (value, length) = parse_attribute_value(&rest[cursor..])?;
            cursor += length;
            element.attrs.push(Attribute {
                name,
                value: Some(value),
            });
        } else {
            element.attrs.push(Attribute { name, value: None });
        }
    }
}

fn parse_attribute_value(input: &str) -> Option<(String, usize)> {
    let quote = input.chars().next()?;
    if quote == '"' || quote == '\'' {
        let close = input[1..].find(quote)?;
        return Some((input[1..1 + close].to_string(), close + 2));
    }

    let length = input
        .find(|c: char| c.is_whitespace() || c == '>')
        .unwrap_or(input.len());
    Some((input[..length].to_string(), length))
}

fn whitespace_length(input: &str) -> usize {
    input.len() - input.trim_start().len()
}

fn raw_text_content<'a>(html: &'a str, start: usize, name: &str) -> (&'a str, usize) {
    let closing = format!("</{}", name.to_ascii_lowercase());
    let lowered = html[start..].to_ascii_lowercase();
    match lowered.find(&closing) {
        Some(offset) => {
            let close_start = start + offset;
            let end = html[close_start..]
                .find('>')
                .map(|close| close_start + close + 1)
                .unwrap_or(html.len());
            (&html[start..close_start], end)
        }
        None => (&html[start..], html.len()),
    }
}

fn close_element(document: &Document, stack: &mut Vec<NodeId>, name: &str) {
    let position = stack
        .iter()
        .rposition(|node| document.is_element(*node, name));
    if let Some(position) = position
        && position > 0
    {
        stack.truncate(position);
    }
}

const BLOCK_OPENERS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "footer", "form", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol", "p", "pre", "section",
    "table", "ul",
];

/// Elements whose start tag ends an open sibling of the same family, and the
/// ancestors that bound the search.
fn implied_end(name: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
    let lowered = name.to_ascii_lowercase();
    match lowered.as_str() {
        "li" => Some((&["li"], &["ul", "ol", "menu"])),
        "option" => Some((&["option"], &["select", "datalist", "optgroup"])),
        "dt" | "dd" => Some((&["dt", "dd"], &["dl"])),
        "tr" => Some((&["tr", "td", "th"], &["table", "thead", "tbody", "tfoot"])),
        "td" | "th" => Some((&["td", "th"], &["tr", "table"])),
        _ => None,
    }
}

fn close_implied(document: &Document, stack: &mut Vec<NodeId>, name: &str) {
    if BLOCK_OPENERS.iter().any(|block| block.eq_ignore_ascii_case(name))
        && stack.len() > 1
        && document.is_element(current(stack), "p")
    {
        stack.pop();
    }

    let Some((closable, boundaries)) = implied_end(name) else {
        return;
    };
    for index in (1..stack.len()).rev() {
        let Some(element) = document.element(stack[index]) else {
            continue;
        };
        if boundaries.iter().any(|boundary| element.is(boundary)) {
            return;
        }
        if closable.iter().any(|candidate| element.is(candidate)) {
            stack.truncate(index);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(html: &str) -> String {
        parse(html).to_html()
    }

    #[test]
    fn test_round_trip_preserves_markup() {
        let html = "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>A &amp; B</title></head><body><p class=\"x\">Hi &copy;</p></body></html>";
        assert_eq!(round_trip(html), html);
    }

    #[test]
    fn test_comments_and_ssi_markers_are_comment_nodes() {
        let document = parse("<div><!--#include virtual=\"/nav.html\" --></div>");
        let div = document.children(document.root())[0];
        let comment = document.children(div)[0];
        assert_eq!(
            document.data(comment),
            &NodeData::Comment("#include virtual=\"/nav.html\" ".to_string())
        );
    }

    #[test]
    fn test_raw_text_elements_keep_markup_as_text() {
        let html = "<script>if (a < b) { document.write('<p>'); }</script><style>a > b { color: red }</style>";
        let document = parse(html);
        let script = document.children(document.root())[0];
        assert_eq!(
            document.text_content(script),
            "if (a < b) { document.write('<p>'); }"
        );
        assert_eq!(document.to_html(), html);
    }

    #[test]
    fn test_attribute_forms() {
        let document = parse("<input type=checkbox checked data-x='say \"hi\"' value = \"1\">");
        let input = document.element(document.children(document.root())[0]).unwrap();
        assert_eq!(input.attr("type"), Some("checkbox"));
        assert!(input.has_attr("checked"));
        assert_eq!(input.attr("data-x"), Some("say \"hi\""));
        assert_eq!(input.attr("value"), Some("1"));
    }

    #[test]
    fn test_self_closing_non_void_element_is_empty() {
        let document = parse("<div><slot name=\"title\"/><p>after</p></div>");
        let div = document.children(document.root())[0];
        let children = document.children(div);
        assert_eq!(children.len(), 2);
        assert!(document.children(children[0]).is_empty());
    }

    #[test]
    fn test_implied_list_item_close() {
        let document = parse("<ul><li>one<li>two</ul>");
        let list = document.children(document.root())[0];
        assert_eq!(document.element_children(list).len(), 2);
    }

    #[test]
    fn test_stray_end_tag_and_lone_angle_bracket() {
        let document = parse("a < b</span><b>c</b>");
        assert_eq!(document.to_html(), "a < b<b>c</b>");
    }

    #[test]
    fn test_void_elements_do_not_nest() {
        let document = parse("<p>a<br>b<img src=\"x.png\">c</p>");
        let p = document.children(document.root())[0];
        assert_eq!(document.children(p).len(), 5);
    }

    #[test]
    fn test_uppercase_tags_match_case_insensitively() {
        let document = parse("<DIV><Span>x</SPAN></div>");
        let div = document.children(document.root())[0];
        assert!(document.is_element(div, "div"));
        assert_eq!(document.to_html(), "<DIV><Span>x</Span></DIV>");
    }
}

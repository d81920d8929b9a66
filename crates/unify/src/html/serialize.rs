use super::{Attribute, Document, NodeData, NodeId, is_void_element};

pub(super) fn serialize_node(document: &Document, id: NodeId) -> String {
    let mut output = String::new();
    write_node(document, id, &mut output);
    output
}

pub(super) fn serialize_children(document: &Document, id: NodeId) -> String {
    let mut output = String::new();
    for child in document.children(id) {
        write_node(document, child, &mut output);
    }
    output
}

fn write_node(document: &Document, id: NodeId, output: &mut String) {
    match document.data(id) {
        NodeData::Root => {
            for child in document.children(id) {
                write_node(document, child, output);
            }
        }
        NodeData::Doctype(doctype) => {
            output.push_str("<!");
            output.push_str(doctype);
            output.push('>');
        }
        NodeData::Text(text) => output.push_str(text),
        NodeData::Comment(comment) => {
            output.push_str("<!--");
            output.push_str(comment);
            output.push_str("-->");
        }
        NodeData::Element(element) => {
            output.push('<');
            output.push_str(&element.name);
            for attribute in &element.attrs {
                write_attribute(attribute, output);
            }

            if is_void_element(&element.name) {
                output.push_str(if element.self_closing { " />" } else { ">" });
                return;
            }

            output.push('>');
            for child in document.children(id) {
                write_node(document, child, output);
            }
            output.push_str("</");
            output.push_str(&element.name);
            output.push('>');
        }
    }
}

fn write_attribute(attribute: &Attribute, output: &mut String) {
    output.push(' ');
    output.push_str(&attribute.name);
    let Some(value) = &attribute.value else {
        return;
    };

    if value.contains('"') && !value.contains('\'') {
        output.push_str("='");
        output.push_str(value);
        output.push('\'');
    } else {
        output.push_str("=\"");
        output.push_str(&value.replace('"', "&quot;"));
        output.push('"');
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Element, parse};
    use super::*;

    #[test]
    fn test_quote_choice_for_attribute_values() {
        let mut document = Document::new();
        let mut element = Element::new("div");
        element.set_attr("data-a", "say \"hi\"");
        element.set_attr("data-b", "it's \"mixed\"");
        let node = document.create_element(element);
        document.append(document.root(), node);

        assert_eq!(
            document.to_html(),
            "<div data-a='say \"hi\"' data-b=\"it's &quot;mixed&quot;\"></div>"
        );
    }

    #[test]
    fn test_boolean_attribute_and_self_closing_void() {
        let document = parse("<input disabled><br/>");
        assert_eq!(document.to_html(), "<input disabled><br />");
    }

    #[test]
    fn test_inner_and_outer_html() {
        let document = parse("<main><h1>T</h1><p>x</p></main>");
        let main = document.children(document.root())[0];
        assert_eq!(document.inner_html(main), "<h1>T</h1><p>x</p>");
        assert_eq!(document.outer_html(main), "<main><h1>T</h1><p>x</p></main>");
    }
}

//! Subtree and document serialization.
//!
//! Output is formatted: sibling elements are placed on their own lines and
//! indented two spaces per depth, except under mixed content (any text
//! child), which is emitted inline to preserve it verbatim. Namespace
//! declarations are written before ordinary attributes.

use super::{NodeId, Payload, Tree};
use crate::core::escape::{escape_attr, escape_text};

/// Serialize a single subtree rooted at `id`.
pub fn dump_node(tree: &Tree, id: NodeId) -> String {
    let mut out = String::new();
    write_node(tree, id, 0, &mut out);
    out
}

/// Serialize a whole document: declaration line, then the document node's
/// children in order.
pub fn dump_document(tree: &Tree) -> Vec<u8> {
    let mut out = String::new();
    let Some(doc) = tree.doc_root() else {
        return Vec::new();
    };

    let (version, encoding) = match &tree.node(doc).payload {
        Payload::Document { version, encoding } => (
            version.as_deref().unwrap_or("1.0"),
            encoding.as_deref().unwrap_or("UTF-8"),
        ),
        _ => ("1.0", "UTF-8"),
    };
    out.push_str(&format!("<?xml version=\"{version}\" encoding=\"{encoding}\"?>\n"));

    for child in tree.children_vec(doc) {
        write_node(tree, child, 0, &mut out);
        out.push('\n');
    }
    out.into_bytes()
}

/// Qualified name as serialized: binding prefix plus raw name.
pub fn qualified_name(tree: &Tree, id: NodeId) -> String {
    let name = tree.name(id).unwrap_or_default();
    let prefix = tree
        .node_ns(id)
        .and_then(|ns| tree.ns_def(ns))
        .and_then(|def| def.prefix.clone());
    match prefix {
        Some(p) => format!("{p}:{name}"),
        None => name.to_string(),
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_node(tree: &Tree, id: NodeId, depth: usize, out: &mut String) {
    let Some(node) = tree.get(id) else { return };
    match &node.payload {
        Payload::Element { .. } => write_element(tree, id, depth, out),
        Payload::Text { content } => escape_text(content, out),
        Payload::Comment { content } => {
            out.push_str("<!--");
            out.push_str(content);
            out.push_str("-->");
        }
        Payload::Pi { target, data } => {
            out.push_str("<?");
            out.push_str(target);
            if let Some(data) = data {
                out.push(' ');
                out.push_str(data);
            }
            out.push_str("?>");
        }
        Payload::DocType { name } => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            out.push('>');
        }
        Payload::Attribute { value, .. } => {
            out.push_str(&qualified_name(tree, id));
            out.push_str("=\"");
            escape_attr(value, out);
            out.push('"');
        }
        Payload::Document { .. } => {
            for child in tree.children_vec(id) {
                write_node(tree, child, depth, out);
                out.push('\n');
            }
        }
    }
}

fn write_element(tree: &Tree, id: NodeId, depth: usize, out: &mut String) {
    let qname = qualified_name(tree, id);
    out.push('<');
    out.push_str(&qname);

    for def_id in tree.ns_defs_of(id) {
        if let Some(def) = tree.ns_def(def_id) {
            match def.prefix.as_deref() {
                Some(p) => out.push_str(&format!(" xmlns:{p}=\"")),
                None => out.push_str(" xmlns=\""),
            }
            escape_attr(&def.uri, out);
            out.push('"');
        }
    }

    for attr in tree.attrs_vec(id) {
        out.push(' ');
        write_node(tree, attr, depth, out);
    }

    let children = tree.children_vec(id);
    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let mixed = children.iter().any(|&c| {
        matches!(
            tree.get(c).map(|n| &n.payload),
            Some(Payload::Text { .. })
        )
    });
    if mixed {
        for child in children {
            write_node(tree, child, depth + 1, out);
        }
    } else {
        for child in children {
            out.push('\n');
            indent(depth + 1, out);
            write_node(tree, child, depth + 1, out);
        }
        out.push('\n');
        indent(depth, out);
    }

    out.push_str("</");
    out.push_str(&qname);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Payload;

    fn element(tree: &mut Tree, name: &str) -> NodeId {
        let name = tree.strings.intern(name);
        tree.create_node(Payload::Element {
            name,
            ns: None,
            ns_defs: Vec::new(),
            first_attr: None,
        })
    }

    #[test]
    fn test_empty_element() {
        let mut tree = Tree::new();
        let e = element(&mut tree, "a");
        assert_eq!(dump_node(&tree, e), "<a/>");
    }

    #[test]
    fn test_text_content_inline() {
        let mut tree = Tree::new();
        let e = element(&mut tree, "a");
        let t = tree.create_node(Payload::Text {
            content: "x < y".to_string(),
        });
        tree.link_child(e, t);
        assert_eq!(dump_node(&tree, e), "<a>x &lt; y</a>");
    }

    #[test]
    fn test_nested_elements_indented() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        tree.link_child(root, child);
        assert_eq!(dump_node(&tree, root), "<root>\n  <child/>\n</root>");
    }

    #[test]
    fn test_attributes_and_ns_decls() {
        let mut tree = Tree::new();
        let e = element(&mut tree, "a");
        let def = tree.create_ns(Some("p"), "http://example.com/p");
        tree.add_ns_def(e, def);
        tree.set_node_ns(e, Some(def));
        let name = tree.strings.intern("k");
        let attr = tree.create_node(Payload::Attribute {
            name,
            ns: None,
            value: "v\"w".to_string(),
        });
        tree.link_attr(e, attr);
        assert_eq!(
            dump_node(&tree, e),
            "<p:a xmlns:p=\"http://example.com/p\" k=\"v&quot;w\"/>"
        );
    }

    #[test]
    fn test_document_dump_declares_version_and_encoding() {
        let (mut tree, doc) = Tree::new_document();
        let root = element(&mut tree, "root");
        tree.link_child(doc, root);
        let bytes = dump_document(&tree);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<root/>\n");
    }
}

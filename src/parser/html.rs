//! Lenient HTML parser.
//!
//! Tag soup goes in, a document comes out; this front end never fails.
//! Diagnostics a strict parser would raise are suppressed and emitted as
//! debug-level trace events instead.
//!
//! The output always has the HTML-implied shape: an `html` root element
//! with a `body` wrapper around ordinary content, even when the input is a
//! fragment like `<doc/>`. Root-level path queries against HTML documents
//! therefore resolve against `html`, never the fragment's own tag name.
//! Tag and attribute names are lowercased; HTML is case-insensitive.

use crate::core::escape::decode_entities;
use crate::core::Scanner;
use crate::tree::{NodeId, Payload, Tree};

/// Elements that never have content or end tags.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

struct HtmlParser<'a> {
    scanner: Scanner<'a>,
    tree: Tree,
    doc: NodeId,
    html: Option<NodeId>,
    body: Option<NodeId>,
    /// Open elements below the implied html/body pair.
    stack: Vec<(String, NodeId)>,
}

/// Parse HTML text leniently. Never fails.
pub fn parse_html(input: &str) -> Tree {
    let (tree, doc) = Tree::new_document();
    let mut parser = HtmlParser {
        scanner: Scanner::new(input.as_bytes()),
        tree,
        doc,
        html: None,
        body: None,
        stack: Vec::new(),
    };
    parser.run();
    parser.tree
}

impl<'a> HtmlParser<'a> {
    fn create_element(&mut self, name: &str) -> NodeId {
        let name = self.tree.strings.intern(name);
        self.tree.create_node(Payload::Element {
            name,
            ns: None,
            ns_defs: Vec::new(),
            first_attr: None,
        })
    }

    fn ensure_html(&mut self) -> NodeId {
        if let Some(html) = self.html {
            return html;
        }
        let html = self.create_element("html");
        self.tree.link_child(self.doc, html);
        self.html = Some(html);
        html
    }

    fn ensure_body(&mut self) -> NodeId {
        if let Some(body) = self.body {
            return body;
        }
        let html = self.ensure_html();
        let body = self.create_element("body");
        self.tree.link_child(html, body);
        self.body = Some(body);
        body
    }

    /// Insertion point for ordinary content.
    fn insertion_parent(&mut self) -> NodeId {
        match self.stack.last() {
            Some(&(_, id)) => id,
            None => self.ensure_body(),
        }
    }

    fn run(&mut self) {
        loop {
            let start = self.scanner.position();
            match self.scanner.find_tag_start() {
                Some(lt) => {
                    if lt > start {
                        let text = self.scanner.slice(start, lt).to_vec();
                        self.handle_text(&text);
                    }
                    self.scanner.set_position(lt);
                    self.handle_markup();
                }
                None => {
                    self.scanner.set_position(usize::MAX);
                    let end = self.scanner.position();
                    if end > start {
                        let text = self.scanner.slice(start, end).to_vec();
                        self.handle_text(&text);
                    }
                    break;
                }
            }
            if self.scanner.is_eof() {
                break;
            }
        }

        if !self.stack.is_empty() {
            tracing::debug!(open = self.stack.len(), "auto-closing unclosed HTML tags");
        }
        // a document always comes out with the implied root in place
        self.ensure_html();
    }

    fn handle_text(&mut self, raw: &[u8]) {
        let raw = String::from_utf8_lossy(raw);
        if raw.bytes().all(|b| b.is_ascii_whitespace()) {
            return;
        }
        let (content, unknown) = decode_entities(&raw);
        if let Some(entity) = unknown {
            tracing::debug!(%entity, "unknown entity in HTML text");
        }
        let parent = self.insertion_parent();
        let text = self.tree.create_node(Payload::Text { content });
        self.tree.link_child(parent, text);
    }

    fn handle_markup(&mut self) {
        if self.scanner.starts_with(b"<!--") {
            self.scanner.advance(4);
            let start = self.scanner.position();
            let (end, next) = match self.scanner.find_sequence(b"-->") {
                Some(e) => (e, e + 3),
                None => (self.scanner.len(), usize::MAX),
            };
            let content = String::from_utf8_lossy(self.scanner.slice(start, end)).into_owned();
            self.scanner.set_position(next);

            let parent = self.insertion_parent();
            let comment = self.tree.create_node(Payload::Comment { content });
            self.tree.link_child(parent, comment);
            return;
        }
        if self.scanner.starts_with(b"<!") || self.scanner.starts_with(b"<?") {
            // DOCTYPE, processing instructions, and other declarations are
            // dropped by the lenient front end
            match self.scanner.find_byte(b'>') {
                Some(gt) => self.scanner.set_position(gt + 1),
                None => self.scanner.set_position(usize::MAX),
            }
            tracing::debug!("dropped HTML declaration or processing instruction");
            return;
        }
        if self.scanner.starts_with(b"</") {
            self.handle_end_tag();
            return;
        }
        self.handle_start_tag();
    }

    fn handle_end_tag(&mut self) {
        self.scanner.advance(2);
        let start = self.scanner.position();
        let (end, next) = match self.scanner.find_byte(b'>') {
            Some(gt) => (gt, gt + 1),
            None => (self.scanner.len(), usize::MAX),
        };
        let name = String::from_utf8_lossy(self.scanner.slice(start, end))
            .trim()
            .to_ascii_lowercase();
        self.scanner.set_position(next);

        if name == "html" || name == "body" {
            self.stack.clear();
            return;
        }
        match self.stack.iter().rposition(|(n, _)| *n == name) {
            Some(pos) => self.stack.truncate(pos),
            None => {
                tracing::debug!(tag = %name, "ignoring unmatched HTML end tag");
            }
        }
    }

    fn handle_start_tag(&mut self) {
        self.scanner.advance(1);
        let Some(gt) = self.scanner.find_tag_end_quoted() else {
            tracing::debug!("unterminated HTML tag; dropping the rest of the input");
            self.scanner.set_position(usize::MAX);
            return;
        };
        let raw_tag = self.scanner.slice(self.scanner.position(), gt).to_vec();
        self.scanner.set_position(gt + 1);

        let (self_closing, raw_tag) = match raw_tag.strip_suffix(b"/") {
            Some(stripped) => (true, stripped.to_vec()),
            None => (false, raw_tag),
        };
        let tag = String::from_utf8_lossy(&raw_tag).into_owned();
        let mut rest = tag.trim_start();
        let name_end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = &rest[name_end..];
        if name.is_empty() {
            tracing::debug!("dropping HTML tag with no name");
            return;
        }

        let attrs = scan_attrs(rest);

        // implied-structure targets
        let elem = match name.as_str() {
            "html" => {
                let html = self.ensure_html();
                self.apply_attrs(html, &attrs);
                return;
            }
            "body" => {
                let body = self.ensure_body();
                self.apply_attrs(body, &attrs);
                return;
            }
            "head" => {
                let html = self.ensure_html();
                let head = self.create_element("head");
                self.tree.link_child(html, head);
                self.apply_attrs(head, &attrs);
                self.stack.push((name, head));
                return;
            }
            _ => {
                let parent = self.insertion_parent();
                let elem = self.create_element(&name);
                self.tree.link_child(parent, elem);
                self.apply_attrs(elem, &attrs);
                elem
            }
        };

        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            self.consume_raw_text(elem, &name);
            return;
        }
        if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            self.stack.push((name, elem));
        }
    }

    fn apply_attrs(&mut self, elem: NodeId, attrs: &[(String, String)]) {
        for (name, value) in attrs {
            // first declaration wins, as with duplicate attributes
            let exists = self
                .tree
                .attrs_vec(elem)
                .iter()
                .any(|&a| self.tree.name(a) == Some(name.as_str()));
            if exists {
                continue;
            }
            let interned = self.tree.strings.intern(name);
            let attr = self.tree.create_node(Payload::Attribute {
                name: interned,
                ns: None,
                value: value.clone(),
            });
            self.tree.link_attr(elem, attr);
        }
    }

    /// Script/style content runs raw until the matching end tag.
    fn consume_raw_text(&mut self, elem: NodeId, name: &str) {
        let close = format!("</{name}");
        let start = self.scanner.position();
        let end = self.scanner.find_sequence(close.as_bytes());
        let content_end = end.unwrap_or_else(|| self.scanner.len());
        let content =
            String::from_utf8_lossy(self.scanner.slice(start, content_end)).into_owned();
        match end {
            Some(e) => {
                self.scanner.set_position(e);
                match self.scanner.find_byte(b'>') {
                    Some(gt) => self.scanner.set_position(gt + 1),
                    None => self.scanner.set_position(usize::MAX),
                }
            }
            None => self.scanner.set_position(usize::MAX),
        }
        if !content.is_empty() {
            let text = self.tree.create_node(Payload::Text { content });
            self.tree.link_child(elem, text);
        }
    }
}

/// Lenient attribute scanning: quoted, unquoted, and bare names all accepted.
fn scan_attrs(mut rest: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        if name_end == 0 {
            rest = &rest[1..];
            continue;
        }
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let value = if let Some(stripped) = rest.strip_prefix('=') {
            rest = stripped.trim_start();
            match rest.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &rest[1..];
                    match body.find(q) {
                        Some(close) => {
                            let v = &body[..close];
                            rest = &body[close + 1..];
                            v.to_string()
                        }
                        None => {
                            rest = "";
                            body.to_string()
                        }
                    }
                }
                _ => {
                    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                    let v = &rest[..end];
                    rest = &rest[end..];
                    v.to_string()
                }
            }
        } else {
            String::new()
        };

        let (decoded, _) = decode_entities(&value);
        out.push((name, decoded));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html_root(tree: &Tree) -> NodeId {
        let doc = tree.doc_root().unwrap();
        tree.children_vec(doc)
            .into_iter()
            .find(|&c| tree.name(c) == Some("html"))
            .expect("implied html root")
    }

    fn body_of(tree: &Tree) -> NodeId {
        tree.children_vec(html_root(tree))
            .into_iter()
            .find(|&c| tree.name(c) == Some("body"))
            .expect("implied body")
    }

    #[test]
    fn test_fragment_gets_implied_root() {
        let tree = parse_html("<doc/>");
        let body = body_of(&tree);
        let kids = tree.children_vec(body);
        assert_eq!(kids.len(), 1);
        assert_eq!(tree.name(kids[0]), Some("doc"));
    }

    #[test]
    fn test_malformed_tag_tolerated() {
        let tree = parse_html("<doc aa>\n<node attr=\"val1\"/>\n<node attr=\"val2\"/>\n</doc>");
        let body = body_of(&tree);
        let doc = tree.children_vec(body)[0];
        assert_eq!(tree.name(doc), Some("doc"));
        let attrs = tree.attrs_vec(doc);
        assert_eq!(attrs.len(), 1);
        assert_eq!(tree.name(attrs[0]), Some("aa"));
        assert_eq!(tree.string_value(attrs[0]), "");
        assert_eq!(tree.children_vec(doc).len(), 2);
    }

    #[test]
    fn test_names_lowercased() {
        let tree = parse_html("<DIV CLASS=\"x\">hi</DIV>");
        let body = body_of(&tree);
        let div = tree.children_vec(body)[0];
        assert_eq!(tree.name(div), Some("div"));
        assert_eq!(tree.name(tree.attrs_vec(div)[0]), Some("class"));
    }

    #[test]
    fn test_void_elements_do_not_nest() {
        let tree = parse_html("<p>a<br>b</p>");
        let body = body_of(&tree);
        let p = tree.children_vec(body)[0];
        // text, br, text all siblings under p
        assert_eq!(tree.children_vec(p).len(), 3);
    }

    #[test]
    fn test_unclosed_tags_auto_close() {
        let tree = parse_html("<div><span>x");
        let body = body_of(&tree);
        let div = tree.children_vec(body)[0];
        let span = tree.children_vec(div)[0];
        assert_eq!(tree.string_value(span), "x");
    }

    #[test]
    fn test_unmatched_end_tag_ignored() {
        let tree = parse_html("<div>a</span></div>");
        let body = body_of(&tree);
        assert_eq!(tree.children_vec(body).len(), 1);
    }

    #[test]
    fn test_explicit_html_body_merge() {
        let tree = parse_html("<html lang=\"en\"><body><p>x</p></body></html>");
        let html = html_root(&tree);
        assert_eq!(tree.attrs_vec(html).len(), 1);
        let body = body_of(&tree);
        assert_eq!(tree.children_vec(body).len(), 1);
    }

    #[test]
    fn test_doctype_dropped() {
        let tree = parse_html("<!DOCTYPE html><p>x</p>");
        let doc = tree.doc_root().unwrap();
        // only the implied html root under the document
        assert_eq!(tree.children_vec(doc).len(), 1);
    }

    #[test]
    fn test_script_content_raw() {
        let tree = parse_html("<script>if (a < b) { go(); }</script>");
        let body = body_of(&tree);
        let script = tree.children_vec(body)[0];
        assert_eq!(tree.string_value(script), "if (a < b) { go(); }");
    }
}

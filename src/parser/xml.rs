//! XML parser: strict or recovering, namespace-aware.
//!
//! Builds a tree directly with a stack of open elements. Namespace
//! declarations are attached to their element as soon as its start tag is
//! processed, so prefix resolution is the same ancestor-chain search the
//! rest of the engine uses.
//!
//! Defaults match the wrapped engine's fixed options: whitespace-only text
//! is dropped and CDATA sections are folded into plain text. In strict
//! mode the first fatal problem aborts with `ParseError`; in recovery mode
//! it is recorded as a diagnostic and parsing continues.
//!
//! An undeclared namespace prefix is never fatal: the name keeps its
//! prefix embedded and stays unbound, the same dangling state standalone
//! construction produces, and later reconciliation may resolve it.

use crate::core::escape::decode_entities;
use crate::core::Scanner;
use crate::error::{ParseDiagnostic, ParseError, Severity, SourceLocation};
use crate::tree::{NodeId, Payload, Tree};

/// Parse-time configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Tolerate malformed XML instead of failing: errors become
    /// diagnostics and the parser keeps going.
    pub recover_on_errors: bool,
}

struct XmlParser<'a> {
    scanner: Scanner<'a>,
    tree: Tree,
    doc: NodeId,
    stack: Vec<NodeId>,
    /// Open tag names, parallel to `stack[1..]`, for end-tag matching.
    tags: Vec<String>,
    diagnostics: Vec<ParseDiagnostic>,
    recover: bool,
    root_seen: bool,
}

/// Parse XML text into a document tree.
pub fn parse_xml(input: &str, options: ParseOptions) -> Result<Tree, ParseError> {
    let (tree, doc) = Tree::new_document();
    let mut parser = XmlParser {
        scanner: Scanner::new(input.as_bytes()),
        tree,
        doc,
        stack: vec![doc],
        tags: Vec::new(),
        diagnostics: Vec::new(),
        recover: options.recover_on_errors,
        root_seen: false,
    };
    parser.run()?;
    Ok(parser.tree)
}

impl<'a> XmlParser<'a> {
    fn location(&self, offset: usize) -> SourceLocation {
        let (line, column) = self.scanner.line_column(offset);
        SourceLocation {
            line,
            column,
            byte_offset: offset,
        }
    }

    /// Fatal in strict mode; a collected diagnostic in recovery mode.
    fn report(&mut self, message: impl Into<String>, offset: usize) -> Result<(), ParseError> {
        let message = message.into();
        let location = self.location(offset);
        if self.recover {
            tracing::debug!(%message, line = location.line, "recovered XML error");
            self.diagnostics.push(ParseDiagnostic {
                severity: Severity::Error,
                message,
                location,
            });
            Ok(())
        } else {
            let mut err = ParseError::new(message, location);
            err.diagnostics = std::mem::take(&mut self.diagnostics);
            Err(err)
        }
    }

    fn warn(&mut self, message: impl Into<String>, offset: usize) {
        self.diagnostics.push(ParseDiagnostic {
            severity: Severity::Warning,
            message: message.into(),
            location: self.location(offset),
        });
    }

    fn parent(&self) -> NodeId {
        *self.stack.last().expect("stack holds at least the document")
    }

    fn run(&mut self) -> Result<(), ParseError> {
        loop {
            let start = self.scanner.position();
            match self.scanner.find_tag_start() {
                Some(lt) => {
                    if lt > start {
                        let text = self.scanner.slice(start, lt).to_vec();
                        self.handle_text(&text, start)?;
                    }
                    self.scanner.set_position(lt);
                    self.handle_markup()?;
                }
                None => {
                    self.scanner.set_position(usize::MAX);
                    let end = self.scanner.position();
                    if end > start {
                        let text = self.scanner.slice(start, end).to_vec();
                        self.handle_text(&text, start)?;
                    }
                    break;
                }
            }
            if self.scanner.is_eof() {
                break;
            }
        }

        if self.stack.len() > 1 {
            let unclosed = self.tags.first().cloned().unwrap_or_default();
            self.report(format!("unclosed tag: <{unclosed}>"), self.scanner.position())?;
        }
        if !self.root_seen {
            self.report("document has no root element", self.scanner.position())?;
        }
        Ok(())
    }

    fn handle_text(&mut self, raw: &[u8], offset: usize) -> Result<(), ParseError> {
        let raw = String::from_utf8_lossy(raw);
        let is_blank = raw.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'));
        if is_blank {
            return Ok(());
        }
        if self.stack.len() == 1 {
            return self.report("text content not allowed at document level", offset);
        }

        let (content, unknown) = decode_entities(&raw);
        if let Some(name) = unknown {
            self.report(format!("undefined entity: &{name};"), offset)?;
        }
        let parent = self.parent();
        let text = self.tree.create_node(Payload::Text { content });
        self.tree.link_child(parent, text);
        Ok(())
    }

    fn handle_markup(&mut self) -> Result<(), ParseError> {
        let offset = self.scanner.position();
        if self.scanner.starts_with(b"<!--") {
            return self.handle_comment(offset);
        }
        if self.scanner.starts_with(b"<![CDATA[") {
            return self.handle_cdata(offset);
        }
        if self.scanner.starts_with(b"<!DOCTYPE") {
            return self.handle_doctype(offset);
        }
        if self.scanner.starts_with(b"<?") {
            return self.handle_pi(offset);
        }
        if self.scanner.starts_with(b"</") {
            return self.handle_end_tag(offset);
        }
        self.handle_start_tag(offset)
    }

    fn handle_comment(&mut self, offset: usize) -> Result<(), ParseError> {
        self.scanner.advance(4);
        let start = self.scanner.position();
        let Some(end) = self.scanner.find_sequence(b"-->") else {
            self.report("unterminated comment", offset)?;
            self.scanner.set_position(usize::MAX);
            return Ok(());
        };
        let content = String::from_utf8_lossy(self.scanner.slice(start, end)).into_owned();
        self.scanner.set_position(end + 3);

        let parent = self.parent();
        let comment = self.tree.create_node(Payload::Comment { content });
        self.tree.link_child(parent, comment);
        Ok(())
    }

    fn handle_cdata(&mut self, offset: usize) -> Result<(), ParseError> {
        if self.stack.len() == 1 {
            self.report("CDATA section not allowed at document level", offset)?;
        }
        self.scanner.advance(9);
        let start = self.scanner.position();
        let Some(end) = self.scanner.find_sequence(b"]]>") else {
            self.report("unterminated CDATA section", offset)?;
            self.scanner.set_position(usize::MAX);
            return Ok(());
        };
        let content = String::from_utf8_lossy(self.scanner.slice(start, end)).into_owned();
        self.scanner.set_position(end + 3);

        if self.stack.len() > 1 {
            // CDATA folds into plain text
            let parent = self.parent();
            let text = self.tree.create_node(Payload::Text { content });
            self.tree.link_child(parent, text);
        }
        Ok(())
    }

    fn handle_doctype(&mut self, offset: usize) -> Result<(), ParseError> {
        if self.root_seen {
            self.report("DOCTYPE must come before the root element", offset)?;
        }
        self.scanner.advance(9);
        self.scanner.skip_whitespace();
        let name_start = self.scanner.position();
        while let Some(b) = self.scanner.peek() {
            if b.is_ascii_whitespace() || b == b'>' || b == b'[' {
                break;
            }
            self.scanner.advance(1);
        }
        let name = String::from_utf8_lossy(
            self.scanner.slice(name_start, self.scanner.position()),
        )
        .into_owned();

        // skip the rest of the declaration, including an internal subset
        let mut depth = 0i32;
        loop {
            match self.scanner.peek() {
                Some(b'[') => depth += 1,
                Some(b']') => depth -= 1,
                Some(b'>') if depth <= 0 => {
                    self.scanner.advance(1);
                    break;
                }
                None => {
                    return self.report("unterminated DOCTYPE declaration", offset);
                }
                _ => {}
            }
            self.scanner.advance(1);
        }

        let parent = self.doc;
        let dtd = self.tree.create_node(Payload::DocType { name });
        self.tree.link_child(parent, dtd);
        Ok(())
    }

    fn handle_pi(&mut self, offset: usize) -> Result<(), ParseError> {
        self.scanner.advance(2);
        let start = self.scanner.position();
        let Some(end) = self.scanner.find_sequence(b"?>") else {
            self.report("unterminated processing instruction", offset)?;
            self.scanner.set_position(usize::MAX);
            return Ok(());
        };
        let body = String::from_utf8_lossy(self.scanner.slice(start, end)).into_owned();
        self.scanner.set_position(end + 2);

        let (target, data) = match body.split_once(char::is_whitespace) {
            Some((t, d)) => (t.to_string(), Some(d.trim_start().to_string())),
            None => (body, None),
        };

        if target.eq_ignore_ascii_case("xml") {
            if self.root_seen {
                self.report("XML declaration must come before the root element", offset)?;
            }
            let (version, encoding) = parse_xml_decl(data.as_deref().unwrap_or(""));
            self.tree.set_doc_version(version);
            self.tree.set_doc_encoding(encoding);
            return Ok(());
        }

        let parent = self.parent();
        let target = self.tree.strings.intern(&target);
        let pi = self.tree.create_node(Payload::Pi { target, data });
        self.tree.link_child(parent, pi);
        Ok(())
    }

    fn handle_end_tag(&mut self, offset: usize) -> Result<(), ParseError> {
        self.scanner.advance(2);
        let name_start = self.scanner.position();
        let Some(gt) = self.scanner.find_byte(b'>') else {
            self.report("unterminated end tag", offset)?;
            self.scanner.set_position(usize::MAX);
            return Ok(());
        };
        let name = String::from_utf8_lossy(self.scanner.slice(name_start, gt))
            .trim()
            .to_string();
        self.scanner.set_position(gt + 1);

        match self.tags.last() {
            Some(open) if *open == name => {
                self.tags.pop();
                self.stack.pop();
            }
            Some(open) => {
                let open = open.clone();
                self.report(format!("tag mismatch: <{open}> closed with </{name}>"), offset)?;
                // recovery: close down to the matching tag if there is one
                if let Some(pos) = self.tags.iter().rposition(|t| *t == name) {
                    self.tags.truncate(pos);
                    self.stack.truncate(pos + 1);
                }
            }
            None => {
                self.report(format!("unexpected end tag: </{name}>"), offset)?;
            }
        }
        Ok(())
    }

    fn handle_start_tag(&mut self, offset: usize) -> Result<(), ParseError> {
        self.scanner.advance(1);
        let Some(gt) = self.scanner.find_tag_end_quoted() else {
            self.report("unterminated start tag", offset)?;
            self.scanner.set_position(usize::MAX);
            return Ok(());
        };
        let raw_tag = self.scanner.slice(self.scanner.position(), gt).to_vec();
        self.scanner.set_position(gt + 1);

        let (self_closing, raw_tag) = match raw_tag.strip_suffix(b"/") {
            Some(stripped) => (true, stripped.to_vec()),
            None => (false, raw_tag),
        };
        let tag = String::from_utf8_lossy(&raw_tag);

        let mut parts = TagScanner::new(&tag);
        let Some(name) = parts.name() else {
            return self.report("missing element name", offset);
        };
        let name = name.to_string();

        if self.stack.len() == 1 {
            if self.root_seen {
                self.report("content not allowed after root element", offset)?;
            }
            self.root_seen = true;
        }

        // collect attributes, splitting out namespace declarations
        let mut ns_decls: Vec<(Option<String>, String)> = Vec::new();
        let mut attrs: Vec<(String, String)> = Vec::new();
        while let Some((attr_name, raw_value)) = parts.attribute() {
            let (value, unknown) = decode_entities(raw_value);
            if let Some(entity) = unknown {
                self.report(format!("undefined entity: &{entity};"), offset)?;
            }
            if attr_name == "xmlns" {
                ns_decls.push((None, value));
            } else if let Some(prefix) = attr_name.strip_prefix("xmlns:") {
                ns_decls.push((Some(prefix.to_string()), value));
            } else {
                if attrs.iter().any(|(n, _)| *n == attr_name) {
                    self.report(format!("duplicate attribute: {attr_name}"), offset)?;
                    continue;
                }
                attrs.push((attr_name.to_string(), value));
            }
        }
        if let Some(err) = parts.error() {
            self.report(err, offset)?;
        }

        let parent = self.parent();
        let interned = self.tree.strings.intern(&name);
        let elem = self.tree.create_node(Payload::Element {
            name: interned,
            ns: None,
            ns_defs: Vec::new(),
            first_attr: None,
        });
        self.tree.link_child(parent, elem);
        for (prefix, uri) in &ns_decls {
            let def = self.tree.create_ns(prefix.as_deref(), uri);
            self.tree.add_ns_def(elem, def);
        }

        // resolve the element's own name against the tree built so far
        self.resolve_name(elem, &name, offset, true);

        for (attr_name, value) in attrs {
            let interned = self.tree.strings.intern(&attr_name);
            let attr = self.tree.create_node(Payload::Attribute {
                name: interned,
                ns: None,
                value,
            });
            self.tree.link_attr(elem, attr);
            self.resolve_name(attr, &attr_name, offset, false);
        }

        if !self_closing {
            self.stack.push(elem);
            self.tags.push(name);
        }
        Ok(())
    }

    /// Bind a freshly parsed name to an in-scope namespace definition.
    ///
    /// Unresolvable prefixes stay embedded in the raw name (dangling).
    fn resolve_name(&mut self, id: NodeId, qname: &str, offset: usize, is_element: bool) {
        match qname.split_once(':') {
            Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => {
                match self.tree.search_ns_by_prefix(id, Some(prefix)) {
                    Some(def) => {
                        self.tree.set_node_ns(id, Some(def));
                        self.tree.set_node_name(id, local);
                    }
                    None => {
                        self.warn(format!("undeclared namespace prefix: {prefix}"), offset);
                    }
                }
            }
            _ => {
                // attributes never take the default namespace
                if is_element {
                    if let Some(def) = self.tree.search_ns_by_prefix(id, None) {
                        self.tree.set_node_ns(id, Some(def));
                    }
                }
            }
        }
    }
}

/// Pull version/encoding out of an XML declaration body.
fn parse_xml_decl(body: &str) -> (Option<String>, Option<String>) {
    let mut version = None;
    let mut encoding = None;
    let mut scanner = TagScanner::new(body);
    while let Some((name, value)) = scanner.attribute() {
        match name {
            "version" => version = Some(value.to_string()),
            "encoding" => encoding = Some(value.to_string()),
            _ => {}
        }
    }
    (version, encoding)
}

/// Splits a start-tag body into the element name and attribute pairs.
struct TagScanner<'a> {
    rest: &'a str,
    error: Option<String>,
    name_taken: bool,
}

impl<'a> TagScanner<'a> {
    fn new(body: &'a str) -> Self {
        TagScanner {
            rest: body,
            error: None,
            name_taken: false,
        }
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }

    fn name(&mut self) -> Option<&'a str> {
        self.name_taken = true;
        self.rest = self.rest.trim_start();
        let end = self
            .rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let name = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(name)
    }

    fn attribute(&mut self) -> Option<(&'a str, &'a str)> {
        if !self.name_taken {
            // declarations reuse the scanner without a leading name
            self.name_taken = true;
        }
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }

        let name_end = self
            .rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(self.rest.len());
        if name_end == 0 {
            self.error = Some(format!("malformed attribute near '{}'", self.rest));
            self.rest = "";
            return None;
        }
        let name = &self.rest[..name_end];
        self.rest = self.rest[name_end..].trim_start();

        let Some(stripped) = self.rest.strip_prefix('=') else {
            self.error
                .get_or_insert_with(|| format!("attribute '{name}' has no value"));
            return Some((name, ""));
        };
        self.rest = stripped.trim_start();

        let quote = self.rest.chars().next();
        match quote {
            Some(q @ ('"' | '\'')) => {
                let body = &self.rest[1..];
                match body.find(q) {
                    Some(close) => {
                        let value = &body[..close];
                        self.rest = &body[close + 1..];
                        Some((name, value))
                    }
                    None => {
                        self.error = Some(format!("unterminated attribute value for '{name}'"));
                        self.rest = "";
                        Some((name, body))
                    }
                }
            }
            _ => {
                // unquoted value; tolerated, reported by the caller's mode
                let end = self
                    .rest
                    .find(char::is_whitespace)
                    .unwrap_or(self.rest.len());
                let value = &self.rest[..end];
                self.rest = &self.rest[end..];
                self.error
                    .get_or_insert_with(|| format!("attribute value not quoted for '{name}'"));
                Some((name, value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(input: &str) -> Result<Tree, ParseError> {
        parse_xml(input, ParseOptions::default())
    }

    fn recovering(input: &str) -> Tree {
        parse_xml(
            input,
            ParseOptions {
                recover_on_errors: true,
            },
        )
        .expect("recovery mode does not fail on malformed markup")
    }

    fn root_of(tree: &Tree) -> NodeId {
        let doc = tree.doc_root().unwrap();
        tree.children_vec(doc)
            .into_iter()
            .find(|&c| tree.is_element(c))
            .unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let tree = strict("<root>hello</root>").unwrap();
        let root = root_of(&tree);
        assert_eq!(tree.name(root), Some("root"));
        assert_eq!(tree.string_value(root), "hello");
    }

    #[test]
    fn test_blank_text_dropped() {
        let tree = strict("<root>\n  <a/>\n  <b/>\n</root>").unwrap();
        let root = root_of(&tree);
        assert_eq!(tree.children_vec(root).len(), 2);
    }

    #[test]
    fn test_cdata_folds_to_text() {
        let tree = strict("<r><![CDATA[a < b]]></r>").unwrap();
        assert_eq!(tree.string_value(root_of(&tree)), "a < b");
    }

    #[test]
    fn test_attributes_decoded() {
        let tree = strict("<r a=\"x &amp; y\" b='2'/>").unwrap();
        let root = root_of(&tree);
        let attrs = tree.attrs_vec(root);
        assert_eq!(attrs.len(), 2);
        assert_eq!(tree.string_value(attrs[0]), "x & y");
        assert_eq!(tree.name(attrs[1]), Some("b"));
    }

    #[test]
    fn test_namespace_resolution() {
        let tree =
            strict("<r xmlns:p=\"http://example.com/p\"><p:child p:k=\"v\"/></r>").unwrap();
        let root = root_of(&tree);
        let child = tree.children_vec(root)[0];
        assert_eq!(tree.name(child), Some("child"));
        assert_eq!(tree.node_ns_uri(child), Some("http://example.com/p"));
        let attr = tree.attrs_vec(child)[0];
        assert_eq!(tree.name(attr), Some("k"));
        assert_eq!(tree.node_ns_uri(attr), Some("http://example.com/p"));
    }

    #[test]
    fn test_default_namespace_binds_elements_not_attrs() {
        let tree = strict("<r xmlns=\"urn:d\"><c k=\"v\"/></r>").unwrap();
        let root = root_of(&tree);
        assert_eq!(tree.node_ns_uri(root), Some("urn:d"));
        let child = tree.children_vec(root)[0];
        assert_eq!(tree.node_ns_uri(child), Some("urn:d"));
        let attr = tree.attrs_vec(child)[0];
        assert_eq!(tree.node_ns_uri(attr), None);
    }

    #[test]
    fn test_undeclared_prefix_left_dangling() {
        let tree = strict("<r><p:c/></r>").unwrap();
        let root = root_of(&tree);
        let child = tree.children_vec(root)[0];
        assert_eq!(tree.name(child), Some("p:c"));
        assert_eq!(tree.node_ns(child), None);
    }

    #[test]
    fn test_strict_rejects_mismatched_tags() {
        assert!(strict("<a><b></a>").is_err());
    }

    #[test]
    fn test_strict_rejects_unclosed_root() {
        assert!(strict("<a><b></b>").is_err());
    }

    #[test]
    fn test_strict_rejects_multiple_roots() {
        assert!(strict("<a/><b/>").is_err());
    }

    #[test]
    fn test_strict_rejects_unquoted_attr() {
        assert!(strict("<doc aa><x/></doc>").is_err());
    }

    #[test]
    fn test_recover_tolerates_mismatch() {
        let tree = recovering("<a><b></a>");
        let root = root_of(&tree);
        assert_eq!(tree.name(root), Some("a"));
        assert_eq!(tree.children_vec(root).len(), 1);
    }

    #[test]
    fn test_recover_keeps_first_duplicate_attr() {
        let tree = recovering("<a k=\"1\" k=\"2\"/>");
        let root = root_of(&tree);
        let attrs = tree.attrs_vec(root);
        assert_eq!(attrs.len(), 1);
        assert_eq!(tree.string_value(attrs[0]), "1");
    }

    #[test]
    fn test_xml_decl_captured() {
        let tree = strict("<?xml version=\"1.0\" encoding=\"UTF-8\"?><r/>").unwrap();
        let doc = tree.doc_root().unwrap();
        match &tree.node(doc).payload {
            Payload::Document { version, encoding } => {
                assert_eq!(version.as_deref(), Some("1.0"));
                assert_eq!(encoding.as_deref(), Some("UTF-8"));
            }
            _ => panic!("doc payload expected"),
        }
    }

    #[test]
    fn test_doctype_recorded() {
        let tree = strict("<!DOCTYPE note [<!ENTITY x \"y\">]><note/>").unwrap();
        let doc = tree.doc_root().unwrap();
        let kids = tree.children_vec(doc);
        assert_eq!(kids.len(), 2);
        assert_eq!(tree.name(kids[0]), Some("note"));
    }

    #[test]
    fn test_comment_and_pi() {
        let tree = strict("<r><!-- note --><?pi data?></r>").unwrap();
        let root = root_of(&tree);
        assert_eq!(tree.children_vec(root).len(), 2);
    }
}

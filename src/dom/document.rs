//! Document: tree ownership, parse entry points, serialization, queries.
//!
//! A `Document` owns exactly one tree; every node wrapper handed out by
//! navigation borrows from it. The per-tree string cache (names and URIs
//! interned per document) lives and dies with the document.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ParseError, QueryError, SourceLocation};
use crate::parser::html::parse_html;
use crate::parser::xml::{parse_xml, ParseOptions};
use crate::tree::{serialize, Tree};

use super::node::{Handle, Node};
use super::{query, Element};

/// An XML or HTML document.
pub struct Document {
    pub(crate) tree: Rc<RefCell<Tree>>,
}

impl Document {
    fn from_tree(tree: Tree) -> Document {
        Document {
            tree: Rc::new(RefCell::new(tree)),
        }
    }

    /// Parse strict XML.
    pub fn from_xml_str(xml: &str) -> Result<Document, ParseError> {
        Self::from_xml_str_with_options(xml, ParseOptions::default())
    }

    /// Parse XML, optionally tolerating malformed input.
    pub fn from_xml_str_with_options(
        xml: &str,
        options: ParseOptions,
    ) -> Result<Document, ParseError> {
        Ok(Document::from_tree(parse_xml(xml, options)?))
    }

    /// Parse XML from raw bytes.
    ///
    /// A UTF-8 byte-order mark is tolerated; any other encoding is
    /// rejected. An optional IANA-style label may assert the encoding, but
    /// only ASCII-compatible labels are usable.
    pub fn from_bytes(
        data: &[u8],
        encoding: Option<&str>,
        options: ParseOptions,
    ) -> Result<Document, ParseError> {
        if let Some(label) = encoding {
            let lower = label.to_ascii_lowercase();
            if !matches!(lower.as_str(), "utf-8" | "utf8" | "us-ascii" | "ascii") {
                return Err(ParseError::new(
                    format!("unsupported encoding '{label}'"),
                    SourceLocation::default(),
                ));
            }
        }
        if data.starts_with(&[0xFF, 0xFE]) || data.starts_with(&[0xFE, 0xFF]) {
            return Err(ParseError::new(
                "UTF-16 input is not supported",
                SourceLocation::default(),
            ));
        }
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(data);
        let text = std::str::from_utf8(data).map_err(|_| {
            ParseError::new("input is not valid UTF-8", SourceLocation::default())
        })?;
        Self::from_xml_str_with_options(text, options)
    }

    /// Parse lenient HTML. Malformed markup never fails; the document
    /// always takes the HTML-implied shape with an `html` root.
    pub fn from_html_str(html: &str) -> Document {
        Document::from_tree(parse_html(html))
    }

    /// Build a document around a copy of `root`.
    pub fn with_root(root: &Element) -> Document {
        let (mut tree, doc) = Tree::new_document();
        if let Some(root_id) = root.node().node_id() {
            if let Some(sub) = root.node().tree.borrow().extract(root_id) {
                let copy = tree.implant(&sub);
                tree.link_child(doc, copy);
            }
        }
        Document::from_tree(tree)
    }

    /// The document's root element, as a borrowing wrapper.
    pub fn root_element(&self) -> Option<Element> {
        let id = {
            let tree = self.tree.borrow();
            let doc = tree.doc_root()?;
            tree.children_vec(doc)
                .into_iter()
                .find(|&c| tree.is_element(c))?
        };
        Some(Element::from_node(Node::borrowing(
            self.tree.clone(),
            Handle::Node(id),
        )))
    }

    /// Full-document serialization with the declared version and encoding.
    pub fn xml_data(&self) -> Vec<u8> {
        serialize::dump_document(&self.tree.borrow())
    }

    /// Set the version written by [`Document::xml_data`].
    pub fn set_version(&self, version: Option<&str>) {
        self.tree
            .borrow_mut()
            .set_doc_version(version.map(str::to_string));
    }

    /// Set the encoding written by [`Document::xml_data`].
    pub fn set_character_encoding(&self, encoding: Option<&str>) {
        self.tree
            .borrow_mut()
            .set_doc_encoding(encoding.map(str::to_string));
    }

    /// Evaluate a path query rooted at the document.
    ///
    /// Namespaces are discovered from the root element's declarations; the
    /// default namespace registers under the `_def_ns` prefix.
    pub fn nodes_for_xpath(&self, xpath: &str) -> Result<Vec<Node>, QueryError> {
        let (target, ns_source) = self.query_handles()?;
        query::run(&self.tree, target, ns_source, xpath, None)
    }

    /// Evaluate a path query with an explicit prefix -> URI map.
    pub fn nodes_for_xpath_with_namespaces(
        &self,
        xpath: &str,
        namespaces: &HashMap<String, String>,
    ) -> Result<Vec<Node>, QueryError> {
        let (target, ns_source) = self.query_handles()?;
        query::run(&self.tree, target, ns_source, xpath, Some(namespaces))
    }

    pub fn first_node_for_xpath(&self, xpath: &str) -> Result<Option<Node>, QueryError> {
        Ok(self.nodes_for_xpath(xpath)?.into_iter().next())
    }

    pub fn first_node_for_xpath_with_namespaces(
        &self,
        xpath: &str,
        namespaces: &HashMap<String, String>,
    ) -> Result<Option<Node>, QueryError> {
        Ok(self
            .nodes_for_xpath_with_namespaces(xpath, namespaces)?
            .into_iter()
            .next())
    }

    fn query_handles(&self) -> Result<(Handle, Handle), QueryError> {
        let tree = self.tree.borrow();
        let doc = tree
            .doc_root()
            .ok_or_else(|| QueryError::context("document has no tree root"))?;
        let ns_source = tree
            .children_vec(doc)
            .into_iter()
            .find(|&c| tree.is_element(c))
            .map(Handle::Node)
            .unwrap_or(Handle::Node(doc));
        Ok((Handle::Node(doc), ns_source))
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root = self.root_element().and_then(|r| r.name());
        f.debug_struct("Document").field("root", &root).finish()
    }
}

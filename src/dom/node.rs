//! The node wrapper: dual ownership, kind inspection, cached values.
//!
//! A `Node` either owns its underlying subtree (standalone construction,
//! deep copies) or borrows a position inside a tree owned by a `Document`
//! or another node. Dropping an owning wrapper frees its subtree exactly
//! once; dropping a borrowing wrapper never touches the tree. Every
//! wrapper shares ownership of the arena itself, so a borrowed wrapper can
//! never observe deallocated storage.
//!
//! A node built apart from any namespace context stores its namespace
//! ambition directly in its raw name, either `prefix:name` or
//! `{http://uri}:name`. Grafting it into a tree runs reconciliation,
//! which rewrites such names into real bindings where possible.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::QueryError;
use crate::tree::serialize;
use crate::tree::{NodeId, NsId, Payload, Tree};

use super::{fake_qname, query, Element};

/// Node kinds surfaced by [`Node::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Invalid,
    Document,
    Element,
    Attribute,
    Namespace,
    ProcessingInstruction,
    Comment,
    Text,
    Dtd,
    EntityDeclaration,
    AttributeDeclaration,
    ElementDeclaration,
    NotationDeclaration,
}

/// The wrapped position: an ordinary node slot or a namespace definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handle {
    Node(NodeId),
    Ns(NsId),
}

#[derive(Default)]
struct NodeCache {
    name: Option<String>,
    children: Option<Vec<NodeId>>,
    attributes: Option<Vec<NodeId>>,
}

/// A wrapper over one underlying tree node.
pub struct Node {
    pub(crate) tree: Rc<RefCell<Tree>>,
    pub(crate) handle: Handle,
    owns: bool,
    cache: RefCell<NodeCache>,
}

impl Node {
    pub(crate) fn consuming(tree: Rc<RefCell<Tree>>, handle: Handle) -> Node {
        Node {
            tree,
            handle,
            owns: true,
            cache: RefCell::new(NodeCache::default()),
        }
    }

    pub(crate) fn borrowing(tree: Rc<RefCell<Tree>>, handle: Handle) -> Node {
        Node {
            tree,
            handle,
            owns: false,
            cache: RefCell::new(NodeCache::default()),
        }
    }

    /// Another borrowing view of the same underlying node.
    pub(crate) fn borrow_view(&self) -> Node {
        Node::borrowing(self.tree.clone(), self.handle)
    }

    pub(crate) fn node_id(&self) -> Option<NodeId> {
        match self.handle {
            Handle::Node(id) => Some(id),
            Handle::Ns(_) => None,
        }
    }

    pub(crate) fn owns_underlying(&self) -> bool {
        self.owns
    }

    pub(crate) fn invalidate_cache(&self) {
        let mut cache = self.cache.borrow_mut();
        cache.name = None;
        cache.children = None;
        cache.attributes = None;
    }

    // --- Standalone construction ---
    //
    // Nodes made from scratch carry no namespace context; a prefix or URI
    // is stashed in the name and fixed up when the node is grafted.

    /// A standalone attribute node.
    pub fn new_attribute(name: &str, value: &str) -> Node {
        let mut tree = Tree::new();
        let interned = tree.strings.intern(name);
        let id = tree.create_node(Payload::Attribute {
            name: interned,
            ns: None,
            value: value.to_string(),
        });
        Node::consuming(Rc::new(RefCell::new(tree)), Handle::Node(id))
    }

    /// A standalone attribute with a namespace URI, encoded into the name
    /// until a graft resolves it.
    pub fn new_attribute_with_uri(name: &str, uri: &str, value: &str) -> Node {
        let fake = fake_qname(uri, Node::local_name_for(name));
        Node::new_attribute(&fake, value)
    }

    /// A standalone text node.
    pub fn new_text(value: &str) -> Node {
        let mut tree = Tree::new();
        let id = tree.create_node(Payload::Text {
            content: value.to_string(),
        });
        Node::consuming(Rc::new(RefCell::new(tree)), Handle::Node(id))
    }

    /// A standalone namespace node; empty `name` declares the default
    /// namespace.
    pub fn new_namespace(name: &str, uri: &str) -> Node {
        let mut tree = Tree::new();
        let prefix = if name.is_empty() { None } else { Some(name) };
        let id = tree.create_ns(prefix, uri);
        Node::consuming(Rc::new(RefCell::new(tree)), Handle::Ns(id))
    }

    // --- Name helpers ---

    /// The local part of a possibly prefixed name.
    pub fn local_name_for(name: &str) -> &str {
        match name.split_once(':') {
            Some((_, local)) if !local.is_empty() => local,
            _ => name,
        }
    }

    /// The prefix of a qualified name, if it has one.
    pub fn prefix_for(name: &str) -> Option<&str> {
        name.split_once(':').map(|(prefix, _)| prefix)
    }

    // --- Inspection ---

    pub fn kind(&self) -> NodeKind {
        match self.handle {
            Handle::Ns(id) => {
                if self.tree.borrow().ns_def(id).is_some() {
                    NodeKind::Namespace
                } else {
                    NodeKind::Invalid
                }
            }
            Handle::Node(id) => match self.tree.borrow().get(id).map(|n| &n.payload) {
                Some(Payload::Document { .. }) => NodeKind::Document,
                Some(Payload::Element { .. }) => NodeKind::Element,
                Some(Payload::Attribute { .. }) => NodeKind::Attribute,
                Some(Payload::Text { .. }) => NodeKind::Text,
                Some(Payload::Comment { .. }) => NodeKind::Comment,
                Some(Payload::Pi { .. }) => NodeKind::ProcessingInstruction,
                Some(Payload::DocType { .. }) => NodeKind::Dtd,
                None => NodeKind::Invalid,
            },
        }
    }

    /// The qualified name, cached until the next mutation through this
    /// wrapper. For a namespace node this is its prefix (empty string for
    /// the default namespace).
    pub fn name(&self) -> Option<String> {
        if let Some(name) = self.cache.borrow().name.clone() {
            return Some(name);
        }
        let computed = {
            let tree = self.tree.borrow();
            match self.handle {
                Handle::Ns(id) => tree
                    .ns_def(id)
                    .map(|def| def.prefix.as_deref().unwrap_or("").to_string()),
                Handle::Node(id) => match tree.get(id).map(|n| &n.payload) {
                    Some(Payload::Element { .. }) | Some(Payload::Attribute { .. }) => {
                        Some(serialize::qualified_name(&tree, id))
                    }
                    Some(Payload::Pi { .. }) | Some(Payload::DocType { .. }) => {
                        tree.name(id).map(str::to_string)
                    }
                    _ => None,
                },
            }
        };
        if let Some(name) = &computed {
            self.cache.borrow_mut().name = Some(name.clone());
        }
        computed
    }

    /// The name without any prefix (a dangling prefix still embedded in
    /// the raw name is stripped too).
    pub fn local_name(&self) -> Option<String> {
        let tree = self.tree.borrow();
        match self.handle {
            Handle::Ns(id) => tree
                .ns_def(id)
                .map(|def| def.prefix.as_deref().unwrap_or("").to_string()),
            Handle::Node(id) => tree
                .name(id)
                .map(|name| Node::local_name_for(name).to_string()),
        }
    }

    /// The namespace prefix applied to this node's name; empty string when
    /// unprefixed (the default namespace has no prefix).
    pub fn prefix(&self) -> Option<String> {
        let tree = self.tree.borrow();
        match self.handle {
            Handle::Ns(id) => tree
                .ns_def(id)
                .map(|def| def.prefix.as_deref().unwrap_or("").to_string()),
            Handle::Node(id) => {
                tree.get(id)?;
                let prefix = tree
                    .node_ns(id)
                    .and_then(|ns| tree.ns_def(ns))
                    .and_then(|def| def.prefix.as_deref().map(str::to_string));
                Some(prefix.unwrap_or_default())
            }
        }
    }

    /// The namespace URI bound to this node's name, if resolved.
    pub fn uri(&self) -> Option<String> {
        let tree = self.tree.borrow();
        match self.handle {
            Handle::Ns(id) => tree.ns_def(id).map(|def| def.uri.to_string()),
            Handle::Node(id) => tree.node_ns_uri(id).map(str::to_string),
        }
    }

    /// Node content: namespace URI for namespace nodes, attribute value,
    /// text content, or concatenated descendant text for elements.
    pub fn string_value(&self) -> Option<String> {
        let tree = self.tree.borrow();
        match self.handle {
            Handle::Ns(id) => tree.ns_def(id).map(|def| def.uri.to_string()),
            Handle::Node(id) => {
                tree.get(id)?;
                Some(tree.string_value(id))
            }
        }
    }

    /// Replace this node's content. For a namespace node the value is the
    /// namespace URI.
    pub fn set_string_value(&self, value: &str) {
        self.invalidate_cache();
        let mut tree = self.tree.borrow_mut();
        match self.handle {
            Handle::Ns(id) => tree.set_ns_uri(id, value),
            Handle::Node(id) => tree.set_string_value(id, value),
        }
    }

    /// Serialized subtree text, formatted, leading/trailing whitespace
    /// trimmed.
    pub fn xml_string(&self) -> Option<String> {
        let tree = self.tree.borrow();
        match self.handle {
            Handle::Ns(_) => None,
            Handle::Node(id) => {
                tree.get(id)?;
                Some(serialize::dump_node(&tree, id).trim().to_string())
            }
        }
    }

    // --- Children ---

    pub fn child_count(&self) -> usize {
        self.child_ids().len()
    }

    /// Child wrappers, borrowing from the same owner as this node.
    pub fn children(&self) -> Vec<Node> {
        self.child_ids()
            .into_iter()
            .map(|id| Node::borrowing(self.tree.clone(), Handle::Node(id)))
            .collect()
    }

    pub fn child_at(&self, index: usize) -> Option<Node> {
        self.child_ids()
            .get(index)
            .map(|&id| Node::borrowing(self.tree.clone(), Handle::Node(id)))
    }

    fn child_ids(&self) -> Vec<NodeId> {
        if let Some(ids) = self.cache.borrow().children.clone() {
            return ids;
        }
        let ids = match self.handle {
            Handle::Ns(_) => Vec::new(),
            Handle::Node(id) => self.tree.borrow().children_vec(id),
        };
        self.cache.borrow_mut().children = Some(ids.clone());
        ids
    }

    pub(crate) fn attribute_ids(&self) -> Vec<NodeId> {
        if let Some(ids) = self.cache.borrow().attributes.clone() {
            return ids;
        }
        let ids = match self.handle {
            Handle::Ns(_) => Vec::new(),
            Handle::Node(id) => self.tree.borrow().attrs_vec(id),
        };
        self.cache.borrow_mut().attributes = Some(ids.clone());
        ids
    }

    /// Element view of this node, if it is one.
    pub fn as_element(&self) -> Option<Element> {
        if self.kind() == NodeKind::Element {
            Some(Element::from_node(self.borrow_view()))
        } else {
            None
        }
    }

    /// Deep copy of this node's subtree; the copy owns its own storage.
    pub fn copy(&self) -> Option<Node> {
        match self.handle {
            Handle::Ns(id) => {
                let src = self.tree.borrow();
                let def = src.ns_def(id)?;
                let (prefix, uri) = (
                    def.prefix.as_deref().map(str::to_string),
                    def.uri.to_string(),
                );
                drop(src);
                Some(Node::new_namespace(&prefix.unwrap_or_default(), &uri))
            }
            Handle::Node(id) => {
                let sub = self.tree.borrow().extract(id)?;
                let mut tree = Tree::new();
                let root = tree.implant(&sub);
                Some(Node::consuming(
                    Rc::new(RefCell::new(tree)),
                    Handle::Node(root),
                ))
            }
        }
    }

    // --- Queries ---

    /// Evaluate a path query anchored at this node.
    ///
    /// When the node belongs to no document, its topmost ancestor is
    /// wrapped in a temporary document for the duration of the query. In-
    /// scope namespace definitions are discovered from the ancestor chain;
    /// the default namespace registers under the `_def_ns` prefix.
    pub fn nodes_for_xpath(&self, xpath: &str) -> Result<Vec<Node>, QueryError> {
        query::run(&self.tree, self.handle, self.handle, xpath, None)
    }

    /// Evaluate a path query with an explicit prefix -> URI map.
    pub fn nodes_for_xpath_with_namespaces(
        &self,
        xpath: &str,
        namespaces: &HashMap<String, String>,
    ) -> Result<Vec<Node>, QueryError> {
        query::run(&self.tree, self.handle, self.handle, xpath, Some(namespaces))
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
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.owns {
            return;
        }
        let mut tree = self.tree.borrow_mut();
        match self.handle {
            // free_subtree tolerates already-vacated slots, so ownership
            // handed over by remove() cannot double-free here
            Handle::Node(id) => tree.free_subtree(id),
            Handle::Ns(id) => tree.free_ns(id),
        }
    }
}

impl PartialEq for Node {
    /// Identity of the wrapped handle, or structural equality: same kind,
    /// same qualified name, same child count.
    fn eq(&self, other: &Node) -> bool {
        if Rc::ptr_eq(&self.tree, &other.tree) && self.handle == other.handle {
            return true;
        }
        self.kind() == other.kind()
            && self.name() == other.name()
            && self.child_count() == other.child_count()
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("owns", &self.owns)
            .finish()
    }
}

//! Element specialization: attributes, namespace definitions, grafting,
//! and name-based child lookup.
//!
//! All graft operations copy: the source node is never moved or mutated,
//! and the copy is reconciled against this element as the graft point
//! before it becomes visible to queries or serialization.

use std::cell::RefCell;
use std::ops::Deref;
use std::rc::Rc;

use crate::error::ParseError;
use crate::parser::xml::{parse_xml, ParseOptions};
use crate::parser::html::parse_html;
use crate::tree::{NodeId, NsId, Payload, Tree};

use super::node::{Handle, Node, NodeKind};
use super::{fake_qname, reconcile};

/// A node whose kind is element.
///
/// Obtained from standalone construction, [`Node::as_element`], or
/// [`super::Document::root_element`]. Dereferences to [`Node`] for the
/// shared read surface.
pub struct Element {
    node: Node,
}

impl Deref for Element {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl Element {
    pub(crate) fn from_node(node: Node) -> Element {
        Element { node }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    fn consuming_element(tree: Tree, id: NodeId) -> Element {
        Element {
            node: Node::consuming(Rc::new(RefCell::new(tree)), Handle::Node(id)),
        }
    }

    // --- Standalone construction ---

    /// A standalone element. A prefix in `name` stays embedded until the
    /// element is grafted somewhere the prefix resolves.
    pub fn with_name(name: &str) -> Element {
        let mut tree = Tree::new();
        let interned = tree.strings.intern(name);
        let id = tree.create_node(Payload::Element {
            name: interned,
            ns: None,
            ns_defs: Vec::new(),
            first_attr: None,
        });
        Element::consuming_element(tree, id)
    }

    /// A standalone element with text content.
    pub fn with_name_and_value(name: &str, value: &str) -> Element {
        let element = Element::with_name(name);
        let Some(id) = element.node.node_id() else {
            return element;
        };
        let mut tree = element.node.tree.borrow_mut();
        let text = tree.create_node(Payload::Text {
            content: value.to_string(),
        });
        tree.link_child(id, text);
        drop(tree);
        element
    }

    /// A standalone element named under a namespace URI. With no prefix
    /// known yet, the whole URI is encoded into the name; grafting
    /// resolves it against the target's declarations.
    pub fn with_name_and_uri(name: &str, uri: &str) -> Element {
        Element::with_name(&fake_qname(uri, Node::local_name_for(name)))
    }

    /// Parse an XML fragment and take its root element, detached from the
    /// throwaway parse document.
    pub fn from_xml_str(xml: &str, recover_on_errors: bool) -> Result<Element, ParseError> {
        let parsed = parse_xml(xml, ParseOptions { recover_on_errors })?;
        let root = parsed
            .doc_root()
            .map(|doc| parsed.children_vec(doc))
            .unwrap_or_default()
            .into_iter()
            .find(|&c| parsed.is_element(c))
            .ok_or_else(|| {
                ParseError::new("document has no root element", Default::default())
            })?;
        let sub = parsed
            .extract(root)
            .ok_or_else(|| ParseError::new("could not copy root element", Default::default()))?;
        let mut tree = Tree::new();
        let id = tree.implant(&sub);
        Ok(Element::consuming_element(tree, id))
    }

    /// Parse lenient HTML and take its (implied) root element.
    pub fn from_html_str(html: &str) -> Result<Element, ParseError> {
        let parsed = parse_html(html);
        let root = parsed
            .doc_root()
            .map(|doc| parsed.children_vec(doc))
            .unwrap_or_default()
            .into_iter()
            .find(|&c| parsed.is_element(c))
            .ok_or_else(|| {
                ParseError::new("document has no root element", Default::default())
            })?;
        let sub = parsed
            .extract(root)
            .ok_or_else(|| ParseError::new("could not copy root element", Default::default()))?;
        let mut tree = Tree::new();
        let id = tree.implant(&sub);
        Ok(Element::consuming_element(tree, id))
    }

    // --- Namespace definitions ---

    /// Namespace nodes declared directly on this element.
    ///
    /// `None` when the element declares nothing; callers treat that the
    /// same as an empty list.
    pub fn namespaces(&self) -> Option<Vec<Node>> {
        let id = self.node.node_id()?;
        let defs = self.node.tree.borrow().ns_defs_of(id);
        if defs.is_empty() {
            return None;
        }
        Some(
            defs.into_iter()
                .map(|d| Node::borrowing(self.node.tree.clone(), Handle::Ns(d)))
                .collect(),
        )
    }

    /// Replace this element's namespace-definition list.
    ///
    /// Names bound to the removed definitions are rewritten to the
    /// dangling `{URI}:local` encoding first, then the whole subtree is
    /// reconciled with this element as the graft point, so a name that was
    /// waiting on one of the new declarations resolves now.
    pub fn set_namespaces(&self, namespaces: &[Node]) {
        let Some(elem_id) = self.node.node_id() else {
            return;
        };
        let incoming = collect_ns_pairs(namespaces);

        self.node.invalidate_cache();
        let mut tree = self.node.tree.borrow_mut();
        let old = tree.ns_defs_of(elem_id);
        if !old.is_empty() {
            unbind_defs_in_subtree(&mut tree, elem_id, &old);
            for def in old {
                tree.remove_ns_def(elem_id, def);
            }
        }
        for (prefix, uri) in incoming {
            let def = tree.create_ns(prefix.as_deref(), &uri);
            tree.add_ns_def(elem_id, def);
        }
        // the element's own name may have been waiting on one of these
        reconcile::fix_up_namespaces(&mut tree, elem_id, elem_id);
    }

    /// Add one namespace definition to this element.
    pub fn add_namespace(&self, namespace: &Node) {
        let Some(elem_id) = self.node.node_id() else {
            return;
        };
        let Some((prefix, uri)) = collect_ns_pairs(std::slice::from_ref(namespace))
            .into_iter()
            .next()
        else {
            return;
        };

        self.node.invalidate_cache();
        let mut tree = self.node.tree.borrow_mut();
        let def = tree.create_ns(prefix.as_deref(), &uri);
        tree.add_ns_def(elem_id, def);
        reconcile::fix_up_namespaces(&mut tree, elem_id, elem_id);
    }

    /// Resolve a namespace URI to the prefix in scope here; empty string
    /// means the default namespace. `None` when nothing declares the URI.
    pub fn resolve_prefix_for_uri(&self, namespace_uri: &str) -> Option<String> {
        let elem_id = self.node.node_id()?;
        let tree = self.node.tree.borrow();
        let def = tree.search_ns_by_uri(elem_id, namespace_uri)?;
        Some(
            tree.ns_def(def)
                .and_then(|d| d.prefix.as_deref().map(str::to_string))
                .unwrap_or_default(),
        )
    }

    // --- Children ---

    /// Graft a copy of `child` as this element's last child.
    ///
    /// Attribute nodes are routed to [`Element::add_attribute`]. The graft
    /// is all-or-nothing: a failed link frees the copy and leaves the tree
    /// unchanged. On success the copy is reconciled against this element.
    pub fn add_child(&self, child: &Node) {
        if child.kind() == NodeKind::Attribute {
            self.add_attribute(child);
            return;
        }
        let Some(elem_id) = self.node.node_id() else {
            return;
        };
        let Some(child_id) = child.node_id() else {
            return;
        };
        self.node.invalidate_cache();

        let sub = child.tree.borrow().extract(child_id);
        let Some(sub) = sub else { return };

        let mut tree = self.node.tree.borrow_mut();
        let copy = tree.implant(&sub);
        if !tree.link_child(elem_id, copy) {
            tree.free_subtree(copy);
            return;
        }
        reconcile::fix_up_namespaces(&mut tree, copy, elem_id);
    }

    /// Unlink `child` from this element; works for attributes too.
    ///
    /// A borrowed child has no owner left to release the unlinked handle,
    /// so removal frees it here; an owning child keeps its subtree until
    /// the wrapper drops.
    pub fn remove(&self, child: &Node) {
        if !Rc::ptr_eq(&self.node.tree, &child.tree) {
            return;
        }
        let Some(child_id) = child.node_id() else {
            return;
        };
        self.node.invalidate_cache();
        child.invalidate_cache();

        let mut tree = self.node.tree.borrow_mut();
        tree.unlink(child_id);
        if !child.owns_underlying() {
            tree.free_subtree(child_id);
        }
    }

    /// Direct element children matching a (possibly prefixed) name.
    ///
    /// The prefix is resolved against this element's scope; when it
    /// resolves, matching falls through to the namespace-qualified lookup.
    /// Returns `None` rather than an empty list when nothing matches.
    pub fn elements_for_name(&self, name: &str) -> Option<Vec<Element>> {
        let elem_id = self.node.node_id()?;

        if let Some(prefix) = Node::prefix_for(name) {
            let resolved = {
                let tree = self.node.tree.borrow();
                tree.search_ns_by_prefix(elem_id, Some(prefix))
                    .and_then(|d| tree.ns_def(d))
                    .map(|d| d.uri.to_string())
            };
            if let Some(uri) = resolved {
                return self.elements_for_local_name_uri(Node::local_name_for(name), &uri);
            }
        }

        // no namespace resolved; exact match on the qualified name
        let mut out = Vec::new();
        for child in self.node.children() {
            if child.kind() == NodeKind::Element && child.name().as_deref() == Some(name) {
                out.push(Element::from_node(child));
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Direct element children matching a local name under a namespace
    /// URI, including children still carrying the `{URI}:local` dangling
    /// encoding because nothing ever declared the namespace for them.
    pub fn elements_for_local_name_uri(
        &self,
        local_name: &str,
        uri: &str,
    ) -> Option<Vec<Element>> {
        let elem_id = self.node.node_id()?;
        let fake = fake_qname(uri, local_name);
        let mut matches = Vec::new();
        {
            let tree = self.node.tree.borrow();
            // resolve once at the parent; children rarely declare their own
            let parent_ns = tree.search_ns_by_uri(elem_id, uri);
            let expected: &str = if parent_ns.is_some() { local_name } else { &fake };

            for child_id in tree.children_vec(elem_id) {
                if !tree.is_element(child_id) {
                    continue;
                }
                let mut child_ns = parent_ns;
                let mut desired = expected;
                if !tree.ns_defs_of(child_id).is_empty() {
                    // this child has its own declarations; redo the
                    // resolution with the child as the search root
                    let fresh = tree.search_ns_by_uri(child_id, uri);
                    if fresh != parent_ns {
                        child_ns = fresh;
                        desired = if fresh.is_none() { &fake } else { local_name };
                    }
                }
                if tree.node_ns(child_id) == child_ns && tree.name(child_id) == Some(desired) {
                    matches.push(child_id);
                }
            }
        }
        if matches.is_empty() {
            return None;
        }
        Some(
            matches
                .into_iter()
                .map(|id| {
                    Element::from_node(Node::borrowing(self.node.tree.clone(), Handle::Node(id)))
                })
                .collect(),
        )
    }

    // --- Attributes ---

    /// Attribute wrappers in declaration order; `None` when the element
    /// has no attributes.
    pub fn attributes(&self) -> Option<Vec<Node>> {
        let ids = self.node.attribute_ids();
        if ids.is_empty() {
            return None;
        }
        Some(
            ids.into_iter()
                .map(|id| Node::borrowing(self.node.tree.clone(), Handle::Node(id)))
                .collect(),
        )
    }

    /// Copy `attribute` onto this element.
    ///
    /// A no-op when an attribute with the same resolved name is already
    /// present (first write wins). The attribute's namespace is resolved
    /// against this element's scope, declared here when missing, and the
    /// new attribute node is reconciled.
    pub fn add_attribute(&self, attribute: &Node) {
        let Some(elem_id) = self.node.node_id() else {
            return;
        };
        let Some(attr_id) = attribute.node_id() else {
            return;
        };

        let (raw_name, ns_pair, value) = {
            let src = attribute.tree.borrow();
            let Some(data) = src.get(attr_id) else { return };
            let Payload::Attribute { name, ns, value } = &data.payload else {
                return;
            };
            let ns_pair = ns.and_then(|n| src.ns_def(n)).map(|d| {
                (
                    d.prefix.as_deref().map(str::to_string),
                    d.uri.to_string(),
                )
            });
            (name.to_string(), ns_pair, value.clone())
        };

        self.node.invalidate_cache();
        let mut tree = self.node.tree.borrow_mut();

        let already_present = match &ns_pair {
            None => tree
                .attrs_vec(elem_id)
                .iter()
                .any(|&a| tree.name(a) == Some(raw_name.as_str())),
            Some((_, uri)) => tree.attrs_vec(elem_id).iter().any(|&a| {
                tree.name(a) == Some(raw_name.as_str())
                    && tree.node_ns_uri(a) == Some(uri.as_str())
            }),
        };
        if already_present {
            return;
        }

        let ns = ns_pair.map(|(prefix, uri)| match tree.search_ns_by_uri(elem_id, &uri) {
            Some(found) => found,
            None => {
                let def = tree.create_ns(prefix.as_deref(), &uri);
                tree.add_ns_def(elem_id, def);
                def
            }
        });

        let name = tree.strings.intern(&raw_name);
        let attr = tree.create_node(Payload::Attribute { name, ns, value });
        tree.link_attr(elem_id, attr);
        reconcile::fix_up_namespaces(&mut tree, attr, elem_id);
    }

    /// Look up an attribute by (possibly prefixed) name.
    pub fn attribute_for_name(&self, name: &str) -> Option<Node> {
        let elem_id = self.node.node_id()?;
        let found = {
            let tree = self.node.tree.borrow();
            let direct = tree
                .attrs_vec(elem_id)
                .into_iter()
                .find(|&a| tree.name(a) == Some(name));
            match direct {
                Some(a) => Some(a),
                None => {
                    let (local, ns_uri) = match Node::prefix_for(name) {
                        Some(prefix) => {
                            let uri = tree
                                .search_ns_by_prefix(elem_id, Some(prefix))
                                .and_then(|d| tree.ns_def(d))
                                .map(|d| d.uri.to_string());
                            (Node::local_name_for(name), uri)
                        }
                        None => (name, None),
                    };
                    tree.attrs_vec(elem_id).into_iter().find(|&a| {
                        tree.name(a) == Some(local) && tree.node_ns_uri(a) == ns_uri.as_deref()
                    })
                }
            }
        };
        found.map(|id| Node::borrowing(self.node.tree.clone(), Handle::Node(id)))
    }

    /// Look up an attribute by local name and namespace URI, falling back
    /// to the `{URI}:local` encoding for attributes grafted into a tree
    /// that never declared the namespace.
    pub fn attribute_for_local_name_uri(&self, local_name: &str, uri: &str) -> Option<Node> {
        let elem_id = self.node.node_id()?;
        let found = {
            let tree = self.node.tree.borrow();
            let direct = tree.attrs_vec(elem_id).into_iter().find(|&a| {
                tree.name(a) == Some(local_name) && tree.node_ns_uri(a) == Some(uri)
            });
            match direct {
                Some(a) => Some(a),
                None => {
                    let fake = fake_qname(uri, local_name);
                    tree.attrs_vec(elem_id)
                        .into_iter()
                        .find(|&a| tree.name(a) == Some(fake.as_str()))
                }
            }
        };
        found.map(|id| Node::borrowing(self.node.tree.clone(), Handle::Node(id)))
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element").field("name", &self.name()).finish()
    }
}

/// Read (prefix, URI) pairs out of namespace nodes, whatever tree they
/// live in.
fn collect_ns_pairs(namespaces: &[Node]) -> Vec<(Option<String>, String)> {
    namespaces
        .iter()
        .filter_map(|ns| {
            let Handle::Ns(ns_id) = ns.handle else {
                return None;
            };
            let src = ns.tree.borrow();
            src.ns_def(ns_id).map(|d| {
                (
                    d.prefix.as_deref().map(str::to_string),
                    d.uri.to_string(),
                )
            })
        })
        .collect()
}

/// Rewrite every name in the subtree bound to one of `defs` back to the
/// dangling `{URI}:local` encoding and clear the binding. Run before the
/// definitions are freed so no binding ever points at a vacated slot.
fn unbind_defs_in_subtree(tree: &mut Tree, root: NodeId, defs: &[NsId]) {
    fn visit(tree: &mut Tree, id: NodeId, defs: &[NsId]) {
        if let Some(ns) = tree.node_ns(id) {
            if defs.contains(&ns) {
                let uri = tree
                    .ns_def(ns)
                    .map(|d| d.uri.to_string())
                    .unwrap_or_default();
                let local = tree.name(id).unwrap_or_default().to_string();
                tree.set_node_name(id, &fake_qname(&uri, &local));
                tree.set_node_ns(id, None);
            }
        }
        for attr in tree.attrs_vec(id) {
            visit(tree, attr, defs);
        }
        for child in tree.children_vec(id) {
            visit(tree, child, defs);
        }
    }
    visit(tree, root, defs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_name_and_value() {
        let e = Element::with_name_and_value("greeting", "hi");
        assert_eq!(e.name().as_deref(), Some("greeting"));
        assert_eq!(e.string_value().as_deref(), Some("hi"));
        assert_eq!(e.child_count(), 1);
    }

    #[test]
    fn test_with_name_and_uri_encodes_fake_qname() {
        let e = Element::with_name_and_uri("item", "urn:x");
        assert_eq!(e.name().as_deref(), Some("{urn:x}:item"));
        assert!(e.uri().is_none());
    }

    #[test]
    fn test_add_child_copies_source() {
        let parent = Element::with_name("parent");
        let child = Element::with_name_and_value("child", "text");
        parent.add_child(child.node());

        // source untouched and still standalone
        assert_eq!(child.string_value().as_deref(), Some("text"));
        assert_eq!(parent.child_count(), 1);
        let children = parent.children();
        let grafted = &children[0];
        assert_eq!(grafted.name().as_deref(), Some("child"));

        // mutating the graft does not touch the source
        grafted.set_string_value("changed");
        assert_eq!(child.string_value().as_deref(), Some("text"));
    }

    #[test]
    fn test_add_child_routes_attributes() {
        let parent = Element::with_name("parent");
        let attr = Node::new_attribute("k", "v");
        parent.add_child(&attr);
        assert_eq!(parent.attributes().unwrap().len(), 1);
        assert_eq!(parent.child_count(), 0);
    }

    #[test]
    fn test_add_attribute_first_write_wins() {
        let e = Element::with_name("e");
        e.add_attribute(&Node::new_attribute("k", "first"));
        e.add_attribute(&Node::new_attribute("k", "second"));

        let attrs = e.attributes().unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].string_value().as_deref(), Some("first"));
    }

    #[test]
    fn test_attribute_lookup_by_name() {
        let e = Element::with_name("e");
        e.add_attribute(&Node::new_attribute("k", "v"));
        let attr = e.attribute_for_name("k").unwrap();
        assert_eq!(attr.string_value().as_deref(), Some("v"));
        assert!(e.attribute_for_name("missing").is_none());
    }

    #[test]
    fn test_remove_borrowed_child() {
        let parent = Element::with_name("parent");
        parent.add_child(Element::with_name("a").node());
        parent.add_child(Element::with_name("b").node());
        assert_eq!(parent.child_count(), 2);

        let first = parent.child_at(0).unwrap();
        parent.remove(&first);
        assert_eq!(parent.child_count(), 1);
        assert_eq!(
            parent.child_at(0).unwrap().name().as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_remove_attribute() {
        let e = Element::with_name("e");
        e.add_attribute(&Node::new_attribute("k", "v"));
        let attr = e.attribute_for_name("k").unwrap();
        e.remove(&attr);
        assert!(e.attributes().is_none());
    }

    #[test]
    fn test_elements_for_name_plain() {
        let parent = Element::with_name("parent");
        parent.add_child(Element::with_name("x").node());
        parent.add_child(Element::with_name("y").node());
        parent.add_child(Element::with_name("x").node());

        let found = parent.elements_for_name("x").unwrap();
        assert_eq!(found.len(), 2);
        assert!(parent.elements_for_name("z").is_none());
    }

    #[test]
    fn test_namespaces_listing() {
        let e = Element::with_name("e");
        assert!(e.namespaces().is_none());
        e.add_namespace(&Node::new_namespace("p", "urn:x"));
        let defs = e.namespaces().unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name().as_deref(), Some("p"));
        assert_eq!(defs[0].string_value().as_deref(), Some("urn:x"));
    }

    #[test]
    fn test_resolve_prefix_for_uri() {
        let e = Element::with_name("e");
        e.add_namespace(&Node::new_namespace("p", "urn:x"));
        assert_eq!(e.resolve_prefix_for_uri("urn:x").as_deref(), Some("p"));
        assert!(e.resolve_prefix_for_uri("urn:other").is_none());

        let d = Element::with_name("d");
        d.add_namespace(&Node::new_namespace("", "urn:default"));
        assert_eq!(d.resolve_prefix_for_uri("urn:default").as_deref(), Some(""));
    }

    #[test]
    fn test_from_xml_str_detaches_root() {
        let e = Element::from_xml_str("<doc><a/></doc>", false).unwrap();
        assert_eq!(e.name().as_deref(), Some("doc"));
        assert_eq!(e.child_count(), 1);
        assert!(Element::from_xml_str("<doc><a></doc>", false).is_err());
        assert!(Element::from_xml_str("<doc><a></doc>", true).is_ok());
    }

    #[test]
    fn test_from_html_str_gets_implied_root() {
        let e = Element::from_html_str("<doc/>").unwrap();
        assert_eq!(e.name().as_deref(), Some("html"));
    }

    #[test]
    fn test_set_namespaces_rebinds_own_name() {
        let e = Element::with_name_and_uri("item", "urn:x");
        assert_eq!(e.name().as_deref(), Some("{urn:x}:item"));
        e.set_namespaces(&[Node::new_namespace("p", "urn:x")]);
        assert_eq!(e.name().as_deref(), Some("p:item"));
        assert_eq!(e.uri().as_deref(), Some("urn:x"));
    }

    #[test]
    fn test_set_namespaces_replaces_old_bindings() {
        let e = Element::with_name_and_uri("item", "urn:x");
        e.set_namespaces(&[Node::new_namespace("a", "urn:x")]);
        assert_eq!(e.name().as_deref(), Some("a:item"));
        // replacing with a different prefix for the same URI re-resolves
        e.set_namespaces(&[Node::new_namespace("b", "urn:x")]);
        assert_eq!(e.name().as_deref(), Some("b:item"));
        assert_eq!(e.uri().as_deref(), Some("urn:x"));
    }
}

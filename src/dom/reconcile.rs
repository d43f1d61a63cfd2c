//! Namespace reconciliation at graft time.
//!
//! Nodes can be built with qualified names before any tree declares the
//! namespace for the prefix, so their namespace ambition rides inside the
//! raw name (`prefix:name` or `{http://uri}:name`) until a graft provides
//! context. Copying also re-declares namespaces on the copied root to keep
//! the subtree self-contained, which leaves redundant declarations behind
//! once the copy lands under a tree that already declares them.
//!
//! Reconciliation fixes both, node by node in pre-order over the grafted
//! subtree (elements and their attributes):
//!
//! 1. name fix-up: an unbound name is split backward at its last colon;
//!    a `{URI}` token searches the graft point's ancestor chain by URI,
//!    anything else by prefix (no prefix means the default namespace).
//!    A hit rebinds the node and strips the encoding; a miss leaves the
//!    name dangling, which is a legal, recoverable state.
//! 2. duplicate collapse: a declaration carried by the node that an
//!    ancestor of the graft point already makes, with the same URI and
//!    prefix, is recorded in the substitution map, removed, and freed.
//!    Any node whose binding was substituted away is rebound to the
//!    surviving declaration.
//!
//! The substitution map threads through the whole recursion so a
//! declaration removed high in the subtree redirects every deeper
//! reference. Both passes run for a node before its children, so each
//! child's ancestor search sees its parent already fixed. Running
//! reconciliation twice is a no-op.

use std::collections::HashMap;

use crate::tree::{NodeId, NsId, Tree};

/// Reconcile `node`'s subtree against `graft_point`'s tree.
pub(crate) fn fix_up_namespaces(tree: &mut Tree, node: NodeId, graft_point: NodeId) {
    let mut substitutions: HashMap<NsId, NsId> = HashMap::new();
    fix_node(tree, node, graft_point, &mut substitutions);
}

fn fix_node(
    tree: &mut Tree,
    node: NodeId,
    graft_point: NodeId,
    substitutions: &mut HashMap<NsId, NsId>,
) {
    let is_element = tree.is_element(node);
    if !is_element && !tree.is_attribute(node) {
        return;
    }

    fix_qualified_name(tree, node, graft_point);
    fix_duplicate_namespaces(tree, node, graft_point, substitutions);

    if is_element {
        for child in tree.children_vec(node) {
            fix_node(tree, child, graft_point, substitutions);
        }
        for attr in tree.attrs_vec(node) {
            fix_node(tree, attr, graft_point, substitutions);
        }
    }
}

/// Pass 1: resolve a dangling encoded name into a real binding.
fn fix_qualified_name(tree: &mut Tree, node: NodeId, graft_point: NodeId) {
    if tree.node_ns(node).is_some() {
        return;
    }
    let Some(raw) = tree.name(node).map(str::to_string) else {
        return;
    };
    let (prefix, local) = split_qname_reverse(&raw);
    let Some(local) = local else {
        return;
    };

    let mut found = None;
    if let Some(token) = prefix.as_deref() {
        if token.len() > 2 && token.starts_with('{') && token.ends_with('}') {
            let uri = &token[1..token.len() - 1];
            found = tree.search_ns_by_uri(graft_point, uri);
        }
    }
    if found.is_none() {
        // by prefix, where none means the default namespace
        found = tree.search_ns_by_prefix(graft_point, prefix.as_deref());
    }

    if let Some(def) = found {
        tracing::trace!(name = %raw, "rebinding dangling name to in-scope namespace");
        tree.set_node_ns(node, Some(def));
        tree.set_node_name(node, &local);
    }
}

/// Pass 2: collapse declarations the graft target already provides.
fn fix_duplicate_namespaces(
    tree: &mut Tree,
    node: NodeId,
    graft_point: NodeId,
    substitutions: &mut HashMap<NsId, NsId>,
) {
    if tree.is_element(node) {
        for def_id in tree.ns_defs_of(node) {
            let Some(def) = tree.ns_def(def_id) else {
                continue;
            };
            let uri = def.uri.to_string();
            let prefix = def.prefix.as_deref().map(str::to_string);

            let Some(found) = tree.search_ns_by_uri(graft_point, &uri) else {
                continue;
            };
            if found == def_id {
                continue;
            }
            let same_prefix = tree
                .ns_def(found)
                .map(|f| f.prefix.as_deref().map(str::to_string) == prefix)
                .unwrap_or(false);
            if !same_prefix {
                continue;
            }

            tracing::trace!(uri = %uri, "collapsing duplicate namespace declaration");
            substitutions.insert(def_id, found);
            // descendants referencing the removed declaration are rebound
            // as the recursion reaches them
            tree.remove_ns_def(node, def_id);
        }
    }

    if let Some(ns) = tree.node_ns(node) {
        if let Some(&replacement) = substitutions.get(&ns) {
            tree.set_node_ns(node, Some(replacement));
        }
    }
}

/// Split a qualified name backward from its last separator.
///
/// The prefix slot may hold a whole URI (`{http://foo}:name`), so the
/// search runs from the end rather than taking the first colon.
fn split_qname_reverse(qname: &str) -> (Option<String>, Option<String>) {
    match qname.rfind(':') {
        None => (None, Some(qname.to_string())),
        Some(idx) => {
            let prefix = if idx > 0 {
                Some(qname[..idx].to_string())
            } else {
                None
            };
            if idx + 1 < qname.len() {
                (prefix, Some(qname[idx + 1..].to_string()))
            } else {
                (None, None)
            }
        }
    }
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
    fn test_split_qname_reverse() {
        assert_eq!(
            split_qname_reverse("p:name"),
            (Some("p".to_string()), Some("name".to_string()))
        );
        assert_eq!(split_qname_reverse("name"), (None, Some("name".to_string())));
        assert_eq!(
            split_qname_reverse("{http://foo}:name"),
            (Some("{http://foo}".to_string()), Some("name".to_string()))
        );
        assert_eq!(split_qname_reverse(":name"), (None, Some("name".to_string())));
        assert_eq!(split_qname_reverse("bad:"), (None, None));
    }

    #[test]
    fn test_prefix_name_resolves_at_graft() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let def = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(parent, def);

        let child = element(&mut tree, "p:item");
        tree.link_child(parent, child);
        fix_up_namespaces(&mut tree, child, parent);

        assert_eq!(tree.name(child), Some("item"));
        assert_eq!(tree.node_ns(child), Some(def));
    }

    #[test]
    fn test_uri_encoded_name_resolves_at_graft() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let def = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(parent, def);

        let child = element(&mut tree, "{urn:x}:item");
        tree.link_child(parent, child);
        fix_up_namespaces(&mut tree, child, parent);

        assert_eq!(tree.name(child), Some("item"));
        assert_eq!(tree.node_ns(child), Some(def));
        assert_eq!(tree.node_ns_uri(child), Some("urn:x"));
    }

    #[test]
    fn test_unresolvable_name_stays_dangling() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let child = element(&mut tree, "q:item");
        tree.link_child(parent, child);
        fix_up_namespaces(&mut tree, child, parent);

        assert_eq!(tree.name(child), Some("q:item"));
        assert_eq!(tree.node_ns(child), None);
    }

    #[test]
    fn test_plain_name_takes_default_namespace() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let def = tree.create_ns(None, "urn:default");
        tree.add_ns_def(parent, def);

        let child = element(&mut tree, "item");
        tree.link_child(parent, child);
        fix_up_namespaces(&mut tree, child, parent);

        assert_eq!(tree.name(child), Some("item"));
        assert_eq!(tree.node_ns(child), Some(def));
    }

    #[test]
    fn test_duplicate_declaration_collapses() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let outer = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(parent, outer);

        // grafted child re-declares p=urn:x and binds to its own copy
        let child = element(&mut tree, "item");
        let inner = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(child, inner);
        tree.set_node_ns(child, Some(inner));
        let grandchild = element(&mut tree, "sub");
        tree.set_node_ns(grandchild, Some(inner));
        tree.link_child(child, grandchild);
        tree.link_child(parent, child);

        fix_up_namespaces(&mut tree, child, parent);

        // the duplicate is gone and every reference moved to the ancestor's
        assert!(tree.ns_defs_of(child).is_empty());
        assert!(tree.ns_def(inner).is_none());
        assert_eq!(tree.node_ns(child), Some(outer));
        assert_eq!(tree.node_ns(grandchild), Some(outer));
    }

    #[test]
    fn test_same_uri_different_prefix_kept() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let outer = tree.create_ns(Some("a"), "urn:x");
        tree.add_ns_def(parent, outer);

        let child = element(&mut tree, "item");
        let inner = tree.create_ns(Some("b"), "urn:x");
        tree.add_ns_def(child, inner);
        tree.set_node_ns(child, Some(inner));
        tree.link_child(parent, child);

        fix_up_namespaces(&mut tree, child, parent);

        assert_eq!(tree.ns_defs_of(child), vec![inner]);
        assert_eq!(tree.node_ns(child), Some(inner));
    }

    #[test]
    fn test_idempotent() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let def = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(parent, def);

        let child = element(&mut tree, "p:item");
        let dup = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(child, dup);
        tree.link_child(parent, child);

        fix_up_namespaces(&mut tree, child, parent);
        let name_once = tree.name(child).map(str::to_string);
        let ns_once = tree.node_ns(child);
        let defs_once = tree.ns_defs_of(child);

        fix_up_namespaces(&mut tree, child, parent);
        assert_eq!(tree.name(child).map(str::to_string), name_once);
        assert_eq!(tree.node_ns(child), ns_once);
        assert_eq!(tree.ns_defs_of(child), defs_once);
    }

    #[test]
    fn test_attributes_reconciled_with_elements() {
        let mut tree = Tree::new();
        let parent = element(&mut tree, "parent");
        let def = tree.create_ns(Some("p"), "urn:x");
        tree.add_ns_def(parent, def);

        let child = element(&mut tree, "item");
        let name = tree.strings.intern("p:attr");
        let attr = tree.create_node(Payload::Attribute {
            name,
            ns: None,
            value: "v".to_string(),
        });
        tree.link_attr(child, attr);
        tree.link_child(parent, child);

        fix_up_namespaces(&mut tree, child, parent);
        assert_eq!(tree.name(attr), Some("attr"));
        assert_eq!(tree.node_ns(attr), Some(def));
    }
}

//! Query evaluation over document-attached and detached nodes.
//!
//! The evaluation backend needs a document-rooted context. A node inside a
//! `Document` anchors directly; a detached node gets its topmost ancestor
//! wrapped in a throwaway document for just the duration of the query. The
//! temporary anchor is released on every exit path, including evaluation
//! failure, by an RAII guard, restoring the subtree to its detached state.
//!
//! Namespace registration: an explicit prefix -> URI map wins; otherwise the
//! ancestor chain of the namespace source node is walked and every
//! in-scope declaration registers under its own prefix. Path queries
//! cannot address an unprefixed default namespace, so the default
//! registers under the reserved `_def_ns` prefix.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::QueryError;
use crate::tree::{NodeId, Payload, Tree};
use crate::xpath;

use super::node::{Handle, Node};

/// Synthetic prefix for the (unaddressable) default namespace.
pub(crate) const DEFAULT_NS_PREFIX: &str = "_def_ns";

/// Run `query` anchored at `target`; `ns_source` is the node whose
/// ancestor chain provides auto-registered namespaces.
pub(crate) fn run(
    tree: &Rc<RefCell<Tree>>,
    target: Handle,
    ns_source: Handle,
    query: &str,
    namespaces: Option<&HashMap<String, String>>,
) -> Result<Vec<Node>, QueryError> {
    let Handle::Node(target_id) = target else {
        return Err(QueryError::context("invalid node"));
    };
    let Handle::Node(ns_source_id) = ns_source else {
        return Err(QueryError::context("invalid node"));
    };
    if tree.borrow().get(target_id).is_none() {
        return Err(QueryError::context("invalid node"));
    }

    // anchor; the guard restores the detached state even on failure
    let _anchor = TempAnchor::install(tree, target_id);
    let root = tree
        .borrow()
        .doc_root()
        .ok_or_else(|| QueryError::context("node has no document to anchor in"))?;

    let bindings = match namespaces {
        Some(map) => map
            .iter()
            .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
            .collect(),
        None => collect_in_scope(&tree.borrow(), ns_source_id),
    };

    let ids = {
        let borrowed = tree.borrow();
        xpath::evaluate(&borrowed, root, target_id, query, &bindings)
    }?;

    Ok(ids
        .into_iter()
        .map(|id| Node::borrowing(tree.clone(), Handle::Node(id)))
        .collect())
}

/// Every namespace declaration in scope at `start`, nearest declaration
/// winning per prefix.
fn collect_in_scope(tree: &Tree, start: NodeId) -> Vec<(String, String)> {
    let mut bindings: Vec<(String, String)> = Vec::new();
    let mut cur = Some(start);
    while let Some(id) = cur {
        for def_id in tree.ns_defs_of(id) {
            let Some(def) = tree.ns_def(def_id) else {
                continue;
            };
            let prefix = def
                .prefix
                .as_deref()
                .unwrap_or(DEFAULT_NS_PREFIX)
                .to_string();
            if !bindings.iter().any(|(p, _)| *p == prefix) {
                bindings.push((prefix, def.uri.to_string()));
            }
        }
        cur = tree.parent(id);
    }
    bindings
}

/// Scoped temporary document for querying detached subtrees.
struct TempAnchor {
    tree: Rc<RefCell<Tree>>,
    doc: NodeId,
    top: NodeId,
}

impl TempAnchor {
    /// Anchor `target`'s topmost ancestor under a fresh document node.
    /// Returns `None` when the tree already backs a document.
    fn install(tree: &Rc<RefCell<Tree>>, target: NodeId) -> Option<TempAnchor> {
        let mut borrowed = tree.borrow_mut();
        if borrowed.doc_root().is_some() {
            return None;
        }
        let top = borrowed.subtree_root(target);
        let doc = borrowed.create_node(Payload::Document {
            version: None,
            encoding: None,
        });
        borrowed.link_child(doc, top);
        borrowed.set_doc_root(Some(doc));
        tracing::debug!("anchored detached subtree under a temporary document");
        Some(TempAnchor {
            tree: tree.clone(),
            doc,
            top,
        })
    }
}

impl Drop for TempAnchor {
    fn drop(&mut self) {
        let mut tree = self.tree.borrow_mut();
        tree.unlink(self.top);
        tree.set_doc_root(None);
        tree.free_subtree(self.doc);
    }
}

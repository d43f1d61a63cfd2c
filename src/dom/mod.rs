//! DOM-style wrappers over the tree engine.
//!
//! [`Node`] wraps one underlying tree position and tracks whether it owns
//! the subtree (frees it on drop) or merely observes a subtree owned by a
//! document or another node. [`Element`] is the element-kind
//! specialization carrying all mutation operations; grafting always
//! copies, then runs namespace reconciliation from the graft point.
//! [`Document`] owns a whole tree and evaluates namespace-registered path
//! queries rooted at it.

pub mod document;
pub mod element;
pub mod node;
pub(crate) mod query;
pub(crate) mod reconcile;

pub use document::Document;
pub use element::Element;
pub use node::{Node, NodeKind};

/// The `{URI}:localName` encoding used to stash a namespace URI inside a
/// raw name before any real binding exists.
pub(crate) fn fake_qname(uri: &str, local_name: &str) -> String {
    format!("{{{uri}}}:{local_name}")
}

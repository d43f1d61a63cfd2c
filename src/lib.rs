//! xmlgraft - namespace-aware DOM layer over an arena XML/HTML engine
//!
//! Layers:
//! - tree: arena tree primitives (create/copy/free/link/unlink, namespace search)
//! - parser: strict/recovering XML and lenient HTML front ends
//! - xpath: location-path queries with LRU-cached compilation
//! - dom: Node/Element/Document wrappers with dual ownership, graft-time
//!   namespace reconciliation, and anchored query evaluation
//!
//! The DOM layer is the public surface. Nodes built apart from any tree
//! carry their namespace ambition encoded in the raw name; grafting them
//! (`add_child`, `add_attribute`, `set_namespaces`) reconciles names
//! against the target tree and collapses duplicated declarations.
//!
//! ```
//! use xmlgraft::{Document, Element, Node};
//!
//! let doc = Document::from_xml_str("<doc><node attr=\"val1\"/></doc>").unwrap();
//! let hits = doc.nodes_for_xpath("//node[@attr=\"val1\"]").unwrap();
//! assert_eq!(hits.len(), 1);
//!
//! let parent = Element::with_name("parent");
//! parent.add_namespace(&Node::new_namespace("p", "urn:x"));
//! let child = Element::with_name_and_uri("item", "urn:x");
//! parent.add_child(&child);
//! assert_eq!(parent.children()[0].name().as_deref(), Some("p:item"));
//! ```

mod core;
pub mod dom;
pub mod error;
pub mod parser;
pub mod tree;
pub mod xpath;

pub use dom::{Document, Element, Node, NodeKind};
pub use error::{Error, ParseError, QueryError};
pub use parser::ParseOptions;

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

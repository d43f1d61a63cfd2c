//! Path query engine.
//!
//! Location paths with child / descendant / self / parent / attribute
//! axes, namespace-aware name tests, and predicate expressions. Compiled
//! queries are memoized in a bounded LRU cache keyed by query text, so
//! repeated evaluation of the same path skips the parser.

pub mod eval;
pub mod lexer;
pub mod parser;

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use crate::error::QueryError;
use crate::tree::{NodeId, Tree};
use parser::Expr;

/// Compiled expressions cached per thread; the node model is
/// single-threaded, so there is no cross-thread sharing to manage.
const COMPILED_CACHE_SIZE: usize = 64;

thread_local! {
    static COMPILED: RefCell<LruCache<String, Rc<Expr>>> = RefCell::new(LruCache::new(
        NonZeroUsize::new(COMPILED_CACHE_SIZE).expect("cache size is non-zero"),
    ));
}

/// Compile a query, consulting the per-thread cache first.
pub fn compile(query: &str) -> Result<Rc<Expr>, QueryError> {
    COMPILED.with(|cache| {
        if let Some(found) = cache.borrow_mut().get(query) {
            return Ok(found.clone());
        }
        let compiled = Rc::new(parser::parse_query(query)?);
        cache
            .borrow_mut()
            .put(query.to_string(), compiled.clone());
        Ok(compiled)
    })
}

/// Evaluate `query` against `context` in a document-anchored tree.
///
/// `root` must be the tree's document node; `bindings` maps query
/// prefixes to namespace URIs. Matches come back in document order.
pub fn evaluate(
    tree: &Tree,
    root: NodeId,
    context: NodeId,
    query: &str,
    bindings: &[(String, String)],
) -> Result<Vec<NodeId>, QueryError> {
    let compiled = compile(query)?;
    eval::evaluate_expr(tree, root, context, &compiled, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::xml::{parse_xml, ParseOptions};

    fn parse(input: &str) -> Tree {
        parse_xml(input, ParseOptions::default()).unwrap()
    }

    fn query(tree: &Tree, q: &str) -> Vec<NodeId> {
        let root = tree.doc_root().unwrap();
        evaluate(tree, root, root, q, &[]).unwrap()
    }

    #[test]
    fn test_descendant_with_attribute_predicate() {
        let tree = parse("<doc><node attr=\"val1\"/><node attr=\"val2\"/></doc>");
        let hits = query(&tree, "//node[@attr=\"val1\"]");
        assert_eq!(hits.len(), 1);
        let attr = tree.attrs_vec(hits[0])[0];
        assert_eq!(tree.string_value(attr), "val1");
    }

    #[test]
    fn test_root_queries_all_match() {
        let tree = parse("<doc/>");
        assert_eq!(query(&tree, "doc").len(), 1);
        assert_eq!(query(&tree, "/doc").len(), 1);
        assert_eq!(query(&tree, "//doc").len(), 1);
    }

    #[test]
    fn test_document_order() {
        let tree = parse("<r><a/><b><a/></b><a/></r>");
        let hits = query(&tree, "//a");
        assert_eq!(hits.len(), 3);
        let names: Vec<_> = hits.iter().map(|&h| tree.name(h).unwrap()).collect();
        assert_eq!(names, vec!["a", "a", "a"]);
        // middle hit is the nested one
        assert!(tree.parent(hits[1]).map(|p| tree.name(p) == Some("b")).unwrap());
    }

    #[test]
    fn test_position_predicate() {
        let tree = parse("<r><a x=\"1\"/><a x=\"2\"/><a x=\"3\"/></r>");
        let hits = query(&tree, "/r/a[2]");
        assert_eq!(hits.len(), 1);
        assert_eq!(tree.string_value(tree.attrs_vec(hits[0])[0]), "2");
    }

    #[test]
    fn test_attribute_step_returns_attribute_nodes() {
        let tree = parse("<r><a x=\"1\"/><a/></r>");
        let hits = query(&tree, "//a/@x");
        assert_eq!(hits.len(), 1);
        assert!(tree.is_attribute(hits[0]));
    }

    #[test]
    fn test_prefixed_name_test_with_bindings() {
        let tree = parse("<r xmlns:p=\"urn:x\"><p:item/><item/></r>");
        let root = tree.doc_root().unwrap();
        let bindings = vec![("q".to_string(), "urn:x".to_string())];
        let hits = evaluate(&tree, root, root, "//q:item", &bindings).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(tree.node_ns_uri(hits[0]), Some("urn:x"));
    }

    #[test]
    fn test_unprefixed_test_skips_namespaced_elements() {
        let tree = parse("<r xmlns:p=\"urn:x\"><p:item/><item/></r>");
        let hits = query(&tree, "//item");
        assert_eq!(hits.len(), 1);
        assert_eq!(tree.node_ns_uri(hits[0]), None);
    }

    #[test]
    fn test_undefined_prefix_is_eval_error() {
        let tree = parse("<r/>");
        let root = tree.doc_root().unwrap();
        let err = evaluate(&tree, root, root, "//nope:item", &[]).unwrap_err();
        assert_eq!(err.code, crate::error::QUERY_ERR_EVAL);
    }

    #[test]
    fn test_syntax_error_reported() {
        let tree = parse("<r/>");
        let root = tree.doc_root().unwrap();
        let err = evaluate(&tree, root, root, "//[", &[]).unwrap_err();
        assert_eq!(err.code, crate::error::QUERY_ERR_SYNTAX);
    }

    #[test]
    fn test_relative_query_from_nested_context() {
        let tree = parse("<r><a><b/></a></r>");
        let root = tree.doc_root().unwrap();
        let a = query(&tree, "//a")[0];
        let hits = evaluate(&tree, root, a, "b", &[]).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_text_test_and_functions() {
        let tree = parse("<r><a>x</a><a>y</a><a/></r>");
        assert_eq!(query(&tree, "//a[text()]").len(), 2);
        assert_eq!(query(&tree, "//a[not(text())]").len(), 1);
        assert_eq!(query(&tree, "//a[position()=last()]").len(), 1);
    }

    #[test]
    fn test_compiled_cache_reuse() {
        let tree = parse("<doc><node attr=\"v\"/></doc>");
        let first = query(&tree, "//node[@attr=\"v\"]");
        let second = query(&tree, "//node[@attr=\"v\"]");
        assert_eq!(first, second);
        let a = compile("//node[@attr=\"v\"]").unwrap();
        let b = compile("//node[@attr=\"v\"]").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_bare_root_selects_document() {
        let tree = parse("<doc/>");
        let hits = query(&tree, "/");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], tree.doc_root().unwrap());
    }
}

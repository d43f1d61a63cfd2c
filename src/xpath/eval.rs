//! Path expression evaluation over a document-anchored tree.
//!
//! Evaluation requires an anchored tree: absolute paths start at the
//! document node, relative paths at the context node. Node-set results
//! come back in document order, attributes ordered directly after their
//! element.

use std::collections::{HashMap, HashSet};

use super::parser::{Axis, BinaryOp, Expr, NodeTest, PathExpr};
use crate::error::QueryError;
use crate::tree::{NodeId, Payload, Tree};

/// Evaluate `expr` against `context`, returning matches in document order.
///
/// `bindings` maps query prefixes to namespace URIs.
pub fn evaluate_expr(
    tree: &Tree,
    root: NodeId,
    context: NodeId,
    expr: &Expr,
    bindings: &[(String, String)],
) -> Result<Vec<NodeId>, QueryError> {
    let mut order = HashMap::new();
    let mut counter = 0usize;
    build_order(tree, root, &mut order, &mut counter);

    let ctx = EvalContext {
        tree,
        root,
        bindings,
        order,
    };
    match eval_expr(&ctx, context, 1, 1, expr)? {
        Value::Nodes(mut nodes) => {
            nodes.sort_by_key(|id| ctx.order.get(id).copied().unwrap_or(usize::MAX));
            Ok(nodes)
        }
        _ => Err(QueryError::eval("expression does not evaluate to a node set")),
    }
}

struct EvalContext<'a> {
    tree: &'a Tree,
    root: NodeId,
    bindings: &'a [(String, String)],
    order: HashMap<NodeId, usize>,
}

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<NodeId>),
    Number(f64),
    Text(String),
    Bool(bool),
}

fn build_order(tree: &Tree, id: NodeId, order: &mut HashMap<NodeId, usize>, counter: &mut usize) {
    order.insert(id, *counter);
    *counter += 1;
    for attr in tree.attrs_vec(id) {
        order.insert(attr, *counter);
        *counter += 1;
    }
    for child in tree.children_vec(id) {
        build_order(tree, child, order, counter);
    }
}

fn eval_expr(
    ctx: &EvalContext<'_>,
    context: NodeId,
    position: usize,
    size: usize,
    expr: &Expr,
) -> Result<Value, QueryError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Literal(s) => Ok(Value::Text(s.clone())),
        Expr::Path(path) => Ok(Value::Nodes(eval_path(ctx, context, path)?)),
        Expr::Function(name, args) => eval_function(ctx, context, position, size, name, args),
        Expr::Binary(left, op, right) => {
            match op {
                BinaryOp::Or => {
                    let l = eval_expr(ctx, context, position, size, left)?;
                    if bool_value(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = eval_expr(ctx, context, position, size, right)?;
                    Ok(Value::Bool(bool_value(&r)))
                }
                BinaryOp::And => {
                    let l = eval_expr(ctx, context, position, size, left)?;
                    if !bool_value(&l) {
                        return Ok(Value::Bool(false));
                    }
                    let r = eval_expr(ctx, context, position, size, right)?;
                    Ok(Value::Bool(bool_value(&r)))
                }
                _ => {
                    let l = eval_expr(ctx, context, position, size, left)?;
                    let r = eval_expr(ctx, context, position, size, right)?;
                    Ok(Value::Bool(compare(ctx, &l, &r, *op)))
                }
            }
        }
    }
}

fn eval_function(
    ctx: &EvalContext<'_>,
    context: NodeId,
    position: usize,
    size: usize,
    name: &str,
    args: &[Expr],
) -> Result<Value, QueryError> {
    match (name, args.len()) {
        ("position", 0) => Ok(Value::Number(position as f64)),
        ("last", 0) => Ok(Value::Number(size as f64)),
        ("not", 1) => {
            let v = eval_expr(ctx, context, position, size, &args[0])?;
            Ok(Value::Bool(!bool_value(&v)))
        }
        ("count", 1) => {
            let v = eval_expr(ctx, context, position, size, &args[0])?;
            match v {
                Value::Nodes(nodes) => Ok(Value::Number(nodes.len() as f64)),
                _ => Err(QueryError::eval("count() requires a node set")),
            }
        }
        ("string", 0) => Ok(Value::Text(ctx.tree.string_value(context))),
        ("string", 1) => {
            let v = eval_expr(ctx, context, position, size, &args[0])?;
            Ok(Value::Text(string_of(ctx, &v)))
        }
        _ => Err(QueryError::eval(format!(
            "unknown function {name}() with {} argument(s)",
            args.len()
        ))),
    }
}

fn eval_path(
    ctx: &EvalContext<'_>,
    context: NodeId,
    path: &PathExpr,
) -> Result<Vec<NodeId>, QueryError> {
    let mut current = if path.absolute {
        vec![ctx.root]
    } else {
        vec![context]
    };

    for step in &path.steps {
        let mut next = Vec::new();
        let mut seen = HashSet::new();

        for &node in &current {
            let mut candidates = Vec::new();
            for cand in axis_candidates(ctx.tree, node, step.axis) {
                if test_matches(ctx, cand, &step.test, step.axis)? {
                    candidates.push(cand);
                }
            }

            for pred in &step.predicates {
                let size = candidates.len();
                let mut kept = Vec::new();
                for (i, &cand) in candidates.iter().enumerate() {
                    let v = eval_expr(ctx, cand, i + 1, size, pred)?;
                    let holds = match v {
                        Value::Number(n) => (i + 1) as f64 == n,
                        other => bool_value(&other),
                    };
                    if holds {
                        kept.push(cand);
                    }
                }
                candidates = kept;
            }

            for cand in candidates {
                if seen.insert(cand) {
                    next.push(cand);
                }
            }
        }
        current = next;
    }
    Ok(current)
}

fn axis_candidates(tree: &Tree, node: NodeId, axis: Axis) -> Vec<NodeId> {
    match axis {
        Axis::Child => tree.children_vec(node),
        Axis::Descendant => {
            let mut out = Vec::new();
            collect_descendants(tree, node, &mut out);
            out
        }
        Axis::DescendantOrSelf => {
            let mut out = vec![node];
            collect_descendants(tree, node, &mut out);
            out
        }
        Axis::SelfAxis => vec![node],
        Axis::Parent => tree.parent(node).into_iter().collect(),
        Axis::Attribute => tree.attrs_vec(node),
    }
}

fn collect_descendants(tree: &Tree, node: NodeId, out: &mut Vec<NodeId>) {
    for child in tree.children_vec(node) {
        out.push(child);
        collect_descendants(tree, child, out);
    }
}

fn test_matches(
    ctx: &EvalContext<'_>,
    id: NodeId,
    test: &NodeTest,
    axis: Axis,
) -> Result<bool, QueryError> {
    let Some(node) = ctx.tree.get(id) else {
        return Ok(false);
    };
    match test {
        NodeTest::Node => Ok(true),
        NodeTest::Text => Ok(matches!(node.payload, Payload::Text { .. })),
        NodeTest::Comment => Ok(matches!(node.payload, Payload::Comment { .. })),
        NodeTest::Any => Ok(if axis == Axis::Attribute {
            matches!(node.payload, Payload::Attribute { .. })
        } else {
            matches!(node.payload, Payload::Element { .. })
        }),
        NodeTest::Name(prefix, local) => {
            let principal = if axis == Axis::Attribute {
                matches!(node.payload, Payload::Attribute { .. })
            } else {
                matches!(node.payload, Payload::Element { .. })
            };
            if !principal {
                return Ok(false);
            }
            if ctx.tree.name(id) != Some(local.as_str()) {
                return Ok(false);
            }
            match prefix {
                Some(p) => {
                    let uri = ctx
                        .bindings
                        .iter()
                        .find(|(bp, _)| bp == p)
                        .map(|(_, uri)| uri.as_str())
                        .ok_or_else(|| {
                            QueryError::eval(format!("undefined namespace prefix '{p}'"))
                        })?;
                    Ok(ctx.tree.node_ns_uri(id) == Some(uri))
                }
                None => Ok(ctx.tree.node_ns(id).is_none()),
            }
        }
    }
}

fn bool_value(v: &Value) -> bool {
    match v {
        Value::Nodes(nodes) => !nodes.is_empty(),
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::Text(s) => !s.is_empty(),
        Value::Bool(b) => *b,
    }
}

fn number_of(ctx: &EvalContext<'_>, v: &Value) -> f64 {
    match v {
        Value::Number(n) => *n,
        Value::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Nodes(nodes) => nodes
            .first()
            .map(|&id| {
                ctx.tree
                    .string_value(id)
                    .trim()
                    .parse()
                    .unwrap_or(f64::NAN)
            })
            .unwrap_or(f64::NAN),
    }
}

fn string_of(ctx: &EvalContext<'_>, v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Nodes(nodes) => nodes
            .first()
            .map(|&id| ctx.tree.string_value(id))
            .unwrap_or_default(),
    }
}

fn compare(ctx: &EvalContext<'_>, left: &Value, right: &Value, op: BinaryOp) -> bool {
    match op {
        BinaryOp::Eq | BinaryOp::NotEq => {
            let eq = equals(ctx, left, right);
            if op == BinaryOp::Eq {
                eq
            } else {
                // node-set inequality holds when some member differs
                match (left, right) {
                    (Value::Nodes(nodes), other) | (other, Value::Nodes(nodes)) => nodes
                        .iter()
                        .any(|&id| ctx.tree.string_value(id) != string_of(ctx, other)),
                    _ => !eq,
                }
            }
        }
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let relation = |a: f64, b: f64| match op {
                BinaryOp::Lt => a < b,
                BinaryOp::LtEq => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::GtEq => a >= b,
                _ => unreachable!("relational operator"),
            };
            match (left, right) {
                (Value::Nodes(nodes), other) => nodes.iter().any(|&id| {
                    let a = ctx.tree.string_value(id).trim().parse().unwrap_or(f64::NAN);
                    relation(a, number_of(ctx, other))
                }),
                (other, Value::Nodes(nodes)) => nodes.iter().any(|&id| {
                    let b = ctx.tree.string_value(id).trim().parse().unwrap_or(f64::NAN);
                    relation(number_of(ctx, other), b)
                }),
                _ => relation(number_of(ctx, left), number_of(ctx, right)),
            }
        }
        BinaryOp::Or | BinaryOp::And => unreachable!("handled before comparison"),
    }
}

fn equals(ctx: &EvalContext<'_>, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nodes(a), Value::Nodes(b)) => {
            let values: HashSet<String> = a.iter().map(|&id| ctx.tree.string_value(id)).collect();
            b.iter().any(|&id| values.contains(&ctx.tree.string_value(id)))
        }
        (Value::Nodes(nodes), Value::Bool(b)) | (Value::Bool(b), Value::Nodes(nodes)) => {
            !nodes.is_empty() == *b
        }
        (Value::Nodes(nodes), Value::Number(n)) | (Value::Number(n), Value::Nodes(nodes)) => {
            nodes.iter().any(|&id| {
                ctx.tree
                    .string_value(id)
                    .trim()
                    .parse::<f64>()
                    .map(|v| v == *n)
                    .unwrap_or(false)
            })
        }
        (Value::Nodes(nodes), Value::Text(s)) | (Value::Text(s), Value::Nodes(nodes)) => {
            nodes.iter().any(|&id| ctx.tree.string_value(id) == *s)
        }
        (Value::Bool(a), b) | (b, Value::Bool(a)) => *a == bool_value(b),
        (Value::Number(a), b) => *a == number_of(ctx, b),
        (a, Value::Number(b)) => number_of(ctx, a) == *b,
        (Value::Text(a), Value::Text(b)) => a == b,
    }
}

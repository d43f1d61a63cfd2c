//! Recursive descent parser for path expressions.

use super::lexer::{Lexer, Token};
use crate::error::QueryError;

/// Parsed expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Path(PathExpr),
    Number(f64),
    Literal(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Function(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A location path: optional root anchor plus a sequence of steps.
#[derive(Debug, Clone)]
pub struct PathExpr {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "child" => Some(Axis::Child),
            "descendant" => Some(Axis::Descendant),
            "descendant-or-self" => Some(Axis::DescendantOrSelf),
            "self" => Some(Axis::SelfAxis),
            "parent" => Some(Axis::Parent),
            "attribute" => Some(Axis::Attribute),
            _ => None,
        }
    }
}

/// Node test within a step.
#[derive(Debug, Clone)]
pub enum NodeTest {
    /// `*`
    Any,
    /// Name test, split into (prefix, local).
    Name(Option<String>, String),
    /// `text()`
    Text,
    /// `comment()`
    Comment,
    /// `node()`
    Node,
}

/// Parse a complete query expression.
pub fn parse_query(input: &str) -> Result<Expr, QueryError> {
    Parser::new(input)?.parse()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peeked: Option<Token>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, QueryError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token().map_err(QueryError::syntax)?;
        Ok(Parser {
            lexer,
            current,
            peeked: None,
        })
    }

    fn parse(&mut self) -> Result<Expr, QueryError> {
        let expr = self.parse_expr()?;
        if self.current != Token::Eof {
            return Err(QueryError::syntax(format!(
                "unexpected trailing token {:?}",
                self.current
            )));
        }
        Ok(expr)
    }

    fn advance(&mut self) -> Result<(), QueryError> {
        self.current = match self.peeked.take() {
            Some(t) => t,
            None => self.lexer.next_token().map_err(QueryError::syntax)?,
        };
        Ok(())
    }

    fn peek(&mut self) -> Result<&Token, QueryError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token().map_err(QueryError::syntax)?);
        }
        Ok(self.peeked.as_ref().expect("just populated"))
    }

    fn expect(&mut self, token: Token) -> Result<(), QueryError> {
        if self.current != token {
            return Err(QueryError::syntax(format!(
                "expected {token:?}, found {:?}",
                self.current
            )));
        }
        self.advance()
    }

    fn current_is_name(&self, name: &str) -> bool {
        matches!(&self.current, Token::Name(n) if n == name)
    }

    fn parse_expr(&mut self) -> Result<Expr, QueryError> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_and_expr()?;
        while self.current_is_name("or") {
            self.advance()?;
            let right = self.parse_and_expr()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Or, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_comparison_expr()?;
        while self.current_is_name("and") {
            self.advance()?;
            let right = self.parse_comparison_expr()?;
            left = Expr::Binary(Box::new(left), BinaryOp::And, Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison_expr(&mut self) -> Result<Expr, QueryError> {
        let left = self.parse_primary()?;
        let op = match self.current {
            Token::Eq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::LtEq => BinaryOp::LtEq,
            Token::Gt => BinaryOp::Gt,
            Token::GtEq => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_primary()?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn parse_primary(&mut self) -> Result<Expr, QueryError> {
        match self.current.clone() {
            Token::Number(n) => {
                self.advance()?;
                Ok(Expr::Number(n))
            }
            Token::Literal(s) => {
                self.advance()?;
                Ok(Expr::Literal(s))
            }
            Token::LeftParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            Token::Name(name) => {
                // node-type tests parse as paths; a name followed by a
                // parenthesis is otherwise a function call
                let called = matches!(self.peek()?, Token::LeftParen);
                if !called || matches!(name.as_str(), "text" | "node" | "comment") {
                    return Ok(Expr::Path(self.parse_path()?));
                }
                self.advance()?;
                self.advance()?;
                let mut args = Vec::new();
                if self.current != Token::RightParen {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.current == Token::Comma {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RightParen)?;
                Ok(Expr::Function(name, args))
            }
            _ => Ok(Expr::Path(self.parse_path()?)),
        }
    }

    fn step_starts_here(&self) -> bool {
        matches!(
            self.current,
            Token::Name(_) | Token::Star | Token::At | Token::Dot | Token::DoubleDot
        )
    }

    fn parse_path(&mut self) -> Result<PathExpr, QueryError> {
        let mut absolute = false;
        let mut steps = Vec::new();

        match self.current {
            Token::Slash => {
                absolute = true;
                self.advance()?;
                if !self.step_starts_here() {
                    // bare "/" selects the document itself
                    return Ok(PathExpr { absolute, steps });
                }
            }
            Token::DoubleSlash => {
                absolute = true;
                self.advance()?;
                steps.push(Step::descendant_or_self());
            }
            _ => {}
        }

        steps.push(self.parse_step()?);
        loop {
            match self.current {
                Token::Slash => {
                    self.advance()?;
                    steps.push(self.parse_step()?);
                }
                Token::DoubleSlash => {
                    self.advance()?;
                    steps.push(Step::descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => break,
            }
        }
        Ok(PathExpr { absolute, steps })
    }

    fn parse_step(&mut self) -> Result<Step, QueryError> {
        match self.current {
            Token::Dot => {
                self.advance()?;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Token::DoubleDot => {
                self.advance()?;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        let mut axis = Axis::Child;
        if self.current == Token::At {
            self.advance()?;
            axis = Axis::Attribute;
        } else if matches!(self.current, Token::Name(_))
            && matches!(self.peek()?, Token::DoubleColon)
        {
            let axis_name = match &self.current {
                Token::Name(n) => n.clone(),
                _ => unreachable!("checked above"),
            };
            axis = Axis::from_name(&axis_name)
                .ok_or_else(|| QueryError::syntax(format!("unsupported axis '{axis_name}'")))?;
            self.advance()?;
            self.advance()?;
        }

        let test = self.parse_node_test()?;
        let mut predicates = Vec::new();
        while self.current == Token::LeftBracket {
            self.advance()?;
            predicates.push(self.parse_expr()?);
            self.expect(Token::RightBracket)?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, QueryError> {
        match self.current.clone() {
            Token::Star => {
                self.advance()?;
                Ok(NodeTest::Any)
            }
            Token::Name(name) => {
                if matches!(self.peek()?, Token::LeftParen) {
                    let test = match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::Node,
                        "comment" => NodeTest::Comment,
                        other => {
                            return Err(QueryError::syntax(format!(
                                "unknown node type '{other}()'"
                            )))
                        }
                    };
                    self.advance()?;
                    self.advance()?;
                    self.expect(Token::RightParen)?;
                    return Ok(test);
                }
                self.advance()?;
                Ok(match name.split_once(':') {
                    Some((prefix, local)) => {
                        NodeTest::Name(Some(prefix.to_string()), local.to_string())
                    }
                    None => NodeTest::Name(None, name),
                })
            }
            other => Err(QueryError::syntax(format!(
                "expected a node test, found {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_of(expr: Expr) -> PathExpr {
        match expr {
            Expr::Path(p) => p,
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn test_relative_name() {
        let p = path_of(parse_query("doc").unwrap());
        assert!(!p.absolute);
        assert_eq!(p.steps.len(), 1);
        assert!(matches!(p.steps[0].test, NodeTest::Name(None, ref l) if l == "doc"));
    }

    #[test]
    fn test_absolute_path() {
        let p = path_of(parse_query("/doc").unwrap());
        assert!(p.absolute);
        assert_eq!(p.steps.len(), 1);
    }

    #[test]
    fn test_double_slash_adds_descendant_step() {
        let p = path_of(parse_query("//doc").unwrap());
        assert!(p.absolute);
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].axis, Axis::DescendantOrSelf);
        assert_eq!(p.steps[1].axis, Axis::Child);
    }

    #[test]
    fn test_predicate_with_attribute_comparison() {
        let p = path_of(parse_query("//node[@attr=\"val1\"]").unwrap());
        let step = &p.steps[1];
        assert_eq!(step.predicates.len(), 1);
        match &step.predicates[0] {
            Expr::Binary(left, BinaryOp::Eq, right) => {
                match (&**left, &**right) {
                    (Expr::Path(lp), Expr::Literal(v)) => {
                        assert_eq!(lp.steps[0].axis, Axis::Attribute);
                        assert_eq!(v, "val1");
                    }
                    other => panic!("unexpected operands: {other:?}"),
                }
            }
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_prefixed_name_test() {
        let p = path_of(parse_query("_def_ns:title").unwrap());
        assert!(
            matches!(p.steps[0].test, NodeTest::Name(Some(ref pre), ref l)
                if pre == "_def_ns" && l == "title")
        );
    }

    #[test]
    fn test_explicit_axis() {
        let p = path_of(parse_query("child::a/descendant-or-self::node()").unwrap());
        assert_eq!(p.steps[0].axis, Axis::Child);
        assert_eq!(p.steps[1].axis, Axis::DescendantOrSelf);
        assert!(matches!(p.steps[1].test, NodeTest::Node));
    }

    #[test]
    fn test_function_call() {
        let expr = parse_query("count(//a)").unwrap();
        assert!(matches!(expr, Expr::Function(ref n, ref args) if n == "count" && args.len() == 1));
    }

    #[test]
    fn test_position_predicate() {
        let p = path_of(parse_query("a[2]").unwrap());
        assert!(matches!(p.steps[0].predicates[0], Expr::Number(n) if n == 2.0));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse_query("a]").is_err());
        assert!(parse_query("//").is_err());
    }

    #[test]
    fn test_unsupported_axis_rejected() {
        assert!(parse_query("following::a").is_err());
    }
}

/*
 * nodes.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! This module defines the abstract syntax tree produced by the parser and
//! walked by the renderer. Every node carries the [`Position`] of its first
//! token, and every expression renders back to a source-like text form for
//! error messages.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::TemplateResult;
use crate::renderer::ExecutableStatement;

/// Line and column of a token, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

/// Whitespace trimming requested by `-` markers on neighbouring tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trim {
    /// Strip leading whitespace (the previous tag ended with `-`).
    pub left: bool,
    /// Strip trailing whitespace (the next tag starts with `-`).
    pub right: bool,
}

/// A node in the template AST.
#[derive(Debug, Clone)]
pub enum Node {
    /// `{# ... #}`
    Comment(Comment),
    /// Literal text between tags.
    Data(Data),
    /// `{{ expr }}`, optionally `{{ expr if cond else alt }}`.
    Output(Output),
    /// `{% tag ... %}`
    StatementBlock(StatementBlock),
    /// A sequence of nodes, e.g. the body of a block or loop.
    Wrapper(Wrapper),
}

impl Node {
    pub fn position(&self) -> Position {
        match self {
            Node::Comment(n) => n.pos,
            Node::Data(n) => n.pos,
            Node::Output(n) => n.pos,
            Node::StatementBlock(n) => n.pos,
            Node::Wrapper(n) => n.pos,
        }
    }

    /// Structural children, visited when a visitor descends into this node.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Wrapper(w) => &w.nodes,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub text: String,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub text: String,
    pub trim: Trim,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub expression: Expression,
    pub condition: Option<Expression>,
    pub alternative: Option<Expression>,
    pub pos: Position,
}

/// A statement tag and the parsed statement it carries.
#[derive(Debug, Clone)]
pub struct StatementBlock {
    /// Tag name as written (`if`, `import`, ...).
    pub name: String,
    pub stmt: Arc<dyn Statement>,
    pub pos: Position,
}

/// An ordered sequence of nodes.
#[derive(Debug, Clone, Default)]
pub struct Wrapper {
    pub nodes: Vec<Node>,
    /// Name of the tag that closed this wrapper (`endif`, `else`, ...).
    pub end_tag: Option<String>,
    pub pos: Position,
}

/// A parsed template: its nodes plus the tables the parser collected.
#[derive(Debug, Clone, Default)]
pub struct TemplateNode {
    pub identifier: String,
    pub nodes: Vec<Node>,
    /// The template named by `{% extends %}`.
    pub parent: Option<Arc<TemplateNode>>,
    pub blocks: HashMap<String, Arc<Wrapper>>,
    pub macros: HashMap<String, Arc<MacroNode>>,
}

impl TemplateNode {
    /// Every definition of block `name`, from this template up its parents.
    ///
    /// The first entry is the most derived override; the rest are what
    /// `super()` renders in turn.
    pub fn blocks_for(&self, name: &str) -> Vec<Arc<Wrapper>> {
        let mut found = Vec::new();
        let mut current = Some(self);
        while let Some(template) = current {
            if let Some(block) = template.blocks.get(name) {
                found.push(Arc::clone(block));
            }
            current = template.parent.as_deref();
        }
        found
    }

    /// The root-most ancestor, whose structure drives rendering.
    pub fn root_ancestor(template: &Arc<TemplateNode>) -> Arc<TemplateNode> {
        let mut root = Arc::clone(template);
        while let Some(parent) = root.parent.clone() {
            root = parent;
        }
        root
    }
}

/// A macro definition.
#[derive(Debug, Clone)]
pub struct MacroNode {
    pub name: String,
    /// Parameters in declaration order, with optional default expressions.
    pub params: Vec<(String, Option<Expression>)>,
    pub body: Wrapper,
    pub pos: Position,
}

/// Statements embedded in [`StatementBlock`] nodes.
///
/// Parse-only statements (like `extends`) have no render-time behaviour and
/// return `None` from [`Statement::as_executable`].
pub trait Statement: fmt::Debug + fmt::Display + Send + Sync {
    fn position(&self) -> Position;

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        None
    }
}

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("none"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Integer(n) => write!(f, "{n}"),
            Literal::Float(n) => write!(f, "{n}"),
            Literal::String(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
        }
    }
}

/// Arguments of a call, filter or test: `(a, b, key=c)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    pub args: Vec<Expression>,
    pub kwargs: Vec<(String, Expression)>,
}

impl CallArgs {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .args
            .iter()
            .map(ToString::to_string)
            .chain(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal {
        value: Literal,
        pos: Position,
    },
    Name {
        name: String,
        pos: Position,
    },
    List {
        items: Vec<Expression>,
        pos: Position,
    },
    Dict {
        entries: Vec<(Expression, Expression)>,
        pos: Position,
    },
    GetAttribute {
        target: Box<Expression>,
        attr: String,
        pos: Position,
    },
    GetItem {
        target: Box<Expression>,
        index: Box<Expression>,
        pos: Position,
    },
    Call {
        func: Box<Expression>,
        args: CallArgs,
        pos: Position,
    },
    Filter {
        target: Box<Expression>,
        name: String,
        args: CallArgs,
        pos: Position,
    },
    Test {
        target: Box<Expression>,
        name: String,
        args: CallArgs,
        negated: bool,
        pos: Position,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        pos: Position,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        pos: Position,
    },
}

impl Expression {
    pub fn position(&self) -> Position {
        match self {
            Expression::Literal { pos, .. }
            | Expression::Name { pos, .. }
            | Expression::List { pos, .. }
            | Expression::Dict { pos, .. }
            | Expression::GetAttribute { pos, .. }
            | Expression::GetItem { pos, .. }
            | Expression::Call { pos, .. }
            | Expression::Filter { pos, .. }
            | Expression::Test { pos, .. }
            | Expression::Unary { pos, .. }
            | Expression::Binary { pos, .. } => *pos,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal { value, .. } => write!(f, "{value}"),
            Expression::Name { name, .. } => f.write_str(name),
            Expression::List { items, .. } => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Expression::Dict { entries, .. } => {
                let entries: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Expression::GetAttribute { target, attr, .. } => write!(f, "{target}.{attr}"),
            Expression::GetItem { target, index, .. } => write!(f, "{target}[{index}]"),
            Expression::Call { func, args, .. } => write!(f, "{func}{args}"),
            Expression::Filter {
                target, name, args, ..
            } => {
                if args.is_empty() {
                    write!(f, "{target}|{name}")
                } else {
                    write!(f, "{target}|{name}{args}")
                }
            }
            Expression::Test {
                target,
                name,
                args,
                negated,
                ..
            } => {
                let not = if *negated { "not " } else { "" };
                if args.is_empty() {
                    write!(f, "{target} is {not}{name}")
                } else {
                    write!(f, "{target} is {not}{name}{args}")
                }
            }
            Expression::Unary { op, operand, .. } => match op {
                UnaryOp::Not => write!(f, "not {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
            },
            Expression::Binary {
                op, left, right, ..
            } => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}

/// What a [`Visitor`] wants to happen after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// Visit the node's children with the same visitor.
    Children,
    /// The node has been handled completely.
    Skip,
}

/// Depth-first AST visitor.
pub trait Visitor {
    fn visit(&mut self, node: &Node) -> TemplateResult<Walk>;
}

/// Walk `node` depth-first, stopping at the first error.
pub fn walk<V: Visitor + ?Sized>(visitor: &mut V, node: &Node) -> TemplateResult<()> {
    if visitor.visit(node)? == Walk::Children {
        for child in node.children() {
            walk(visitor, child)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::new(1, 1)
    }

    fn name(n: &str) -> Expression {
        Expression::Name {
            name: n.to_string(),
            pos: pos(),
        }
    }

    #[test]
    fn test_expression_display() {
        let expr = Expression::Filter {
            target: Box::new(Expression::GetAttribute {
                target: Box::new(name("user")),
                attr: "name".to_string(),
                pos: pos(),
            }),
            name: "default".to_string(),
            args: CallArgs {
                args: vec![Expression::Literal {
                    value: Literal::String("anon".to_string()),
                    pos: pos(),
                }],
                kwargs: vec![],
            },
            pos: pos(),
        };
        assert_eq!(expr.to_string(), r#"user.name|default("anon")"#);
    }

    #[test]
    fn test_test_display() {
        let expr = Expression::Test {
            target: Box::new(name("x")),
            name: "defined".to_string(),
            args: CallArgs {
                args: vec![],
                kwargs: vec![],
            },
            negated: true,
            pos: pos(),
        };
        assert_eq!(expr.to_string(), "x is not defined");
    }

    #[test]
    fn test_blocks_for_walks_parents() {
        let block = |text: &str| {
            Arc::new(Wrapper {
                nodes: vec![Node::Data(Data {
                    text: text.to_string(),
                    trim: Trim::default(),
                    pos: pos(),
                })],
                end_tag: Some("endblock".to_string()),
                pos: pos(),
            })
        };

        let mut base = TemplateNode::default();
        base.blocks.insert("content".to_string(), block("base"));
        base.blocks.insert("title".to_string(), block("base title"));
        let base = Arc::new(base);

        let mut child = TemplateNode::default();
        child.blocks.insert("content".to_string(), block("child"));
        child.parent = Some(Arc::clone(&base));
        let child = Arc::new(child);

        assert_eq!(child.blocks_for("content").len(), 2);
        assert_eq!(child.blocks_for("title").len(), 1);
        assert!(child.blocks_for("missing").is_empty());
        assert!(Arc::ptr_eq(&TemplateNode::root_ancestor(&child), &base));
    }

    struct Counter {
        data: usize,
        wrappers: usize,
    }

    impl Visitor for Counter {
        fn visit(&mut self, node: &Node) -> TemplateResult<Walk> {
            match node {
                Node::Data(_) => self.data += 1,
                Node::Wrapper(_) => self.wrappers += 1,
                _ => {}
            }
            Ok(Walk::Children)
        }
    }

    #[test]
    fn test_walk_descends_into_wrappers() {
        let data = || {
            Node::Data(Data {
                text: "x".to_string(),
                trim: Trim::default(),
                pos: pos(),
            })
        };
        let tree = Node::Wrapper(Wrapper {
            nodes: vec![
                data(),
                Node::Wrapper(Wrapper {
                    nodes: vec![data(), data()],
                    end_tag: None,
                    pos: pos(),
                }),
            ],
            end_tag: None,
            pos: pos(),
        });

        let mut counter = Counter {
            data: 0,
            wrappers: 0,
        };
        walk(&mut counter, &tree).unwrap();
        assert_eq!(counter.data, 3);
        assert_eq!(counter.wrappers, 2);
    }
}

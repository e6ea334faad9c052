/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parser.
//!
//! [`Parser`] turns the token stream into a [`TemplateNode`]. Statement tags
//! are dispatched by name to the [`StatementParser`] registered for them,
//! which receives the template parser (to consume a body) and an [`Args`]
//! cursor over the tag's own tokens. [`Args`] is also the expression parser.
//!
//! Expression precedence, loosest first:
//!
//! 1. `or`
//! 2. `and`
//! 3. `not`
//! 4. comparisons, `in`, `not in`, `is [not] test`
//! 5. `~`
//! 6. `+ -`
//! 7. `* / // %`
//! 8. unary `-`
//! 9. postfix `.attr`, `[item]`, `(call)`, `|filter`

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::environment::{StatementParser, StatementSet};
use crate::error::{TemplateError, TemplateResult};
use crate::lexer::{Token, TokenKind, parse_error, tokenize};
use crate::loader::Loader;
use crate::nodes::{
    BinaryOp, CallArgs, Comment, Data, Expression, Literal, MacroNode, Node, Output, Position,
    StatementBlock, TemplateNode, UnaryOp, Wrapper,
};

/// Maximum `extends` chain length.
pub const MAX_INHERITANCE_DEPTH: usize = 32;

/// Parses one template source.
pub struct Parser<'p> {
    identifier: String,
    tokens: Vec<Token>,
    pos: usize,
    config: &'p Config,
    loader: &'p Arc<dyn Loader>,
    statements: &'p StatementSet,
    depth: usize,
    parent: Option<Arc<TemplateNode>>,
    blocks: HashMap<String, Arc<Wrapper>>,
    macros: HashMap<String, Arc<MacroNode>>,
}

impl<'p> Parser<'p> {
    pub fn new(
        identifier: impl Into<String>,
        source: &str,
        config: &'p Config,
        loader: &'p Arc<dyn Loader>,
        statements: &'p StatementSet,
    ) -> TemplateResult<Self> {
        Ok(Self {
            identifier: identifier.into(),
            tokens: tokenize(source, config)?,
            pos: 0,
            config,
            loader,
            statements,
            depth: 0,
            parent: None,
            blocks: HashMap::new(),
            macros: HashMap::new(),
        })
    }

    /// Read `identifier` through `loader` and parse it.
    pub fn parse_template(
        identifier: &str,
        config: &Config,
        loader: &Arc<dyn Loader>,
        statements: &StatementSet,
    ) -> TemplateResult<Arc<TemplateNode>> {
        let source = loader.read(identifier)?;
        let parser = Parser::new(identifier, &source, config, loader, statements)?;
        Ok(Arc::new(parser.parse()?))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        self.loader
    }

    /// Parse the whole token stream.
    pub fn parse(mut self) -> TemplateResult<TemplateNode> {
        let mut nodes = Vec::new();
        while !self.at_eof() {
            nodes.push(self.parse_node()?);
        }
        Ok(TemplateNode {
            identifier: self.identifier,
            nodes,
            parent: self.parent,
            blocks: self.blocks,
            macros: self.macros,
        })
    }

    /// Parse nodes up to the first `{% name %}` tag with `name` in `names`.
    ///
    /// Returns the body (with `end_tag` set to the tag that stopped it) and
    /// the arguments of that tag.
    pub fn wrap_until(&mut self, names: &[&str]) -> TemplateResult<(Wrapper, Args)> {
        let pos = self.current_position();
        let mut nodes = Vec::new();
        loop {
            if self.at_eof() {
                return Err(parse_error(
                    pos,
                    format!(
                        "Unexpected end of template, expected one of: {}",
                        names.join(", ")
                    ),
                ));
            }
            if let (Some(begin), Some(name)) = (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                if begin.kind == TokenKind::BlockBegin
                    && name.kind == TokenKind::Name
                    && names.contains(&name.val.as_str())
                {
                    let end_tag = name.val.clone();
                    let tag_pos = name.pos;
                    self.pos += 2;
                    let args = self.collect_args(TokenKind::BlockEnd, tag_pos)?;
                    let wrapper = Wrapper {
                        nodes,
                        end_tag: Some(end_tag),
                        pos,
                    };
                    return Ok((wrapper, args));
                }
            }
            nodes.push(self.parse_node()?);
        }
    }

    /// Record the template this one extends.
    pub fn set_parent(&mut self, parent: Arc<TemplateNode>, pos: Position) -> TemplateResult<()> {
        if self.parent.is_some() {
            return Err(parse_error(pos, "Template may only extend one parent"));
        }
        self.parent = Some(parent);
        Ok(())
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn add_block(&mut self, name: &str, body: Arc<Wrapper>, pos: Position) -> TemplateResult<()> {
        if self.blocks.contains_key(name) {
            return Err(parse_error(pos, format!("Block '{name}' defined twice")));
        }
        self.blocks.insert(name.to_string(), body);
        Ok(())
    }

    /// Register a macro definition; a later definition replaces an earlier one.
    pub fn add_macro(&mut self, node: Arc<MacroNode>) {
        self.macros.insert(node.name.clone(), node);
    }

    /// Load and parse the template named by an `extends` tag.
    pub fn load_parent(&self, filename: &str) -> TemplateResult<Arc<TemplateNode>> {
        if self.depth >= MAX_INHERITANCE_DEPTH {
            return Err(TemplateError::RecursiveTemplate {
                name: filename.to_string(),
                max_depth: MAX_INHERITANCE_DEPTH,
            });
        }
        let loader = self
            .loader
            .inherit(filename)
            .map_err(|err| TemplateError::LoaderInherit {
                filename: filename.to_string(),
                loader: self.loader.to_string(),
                source: Box::new(err),
            })?;
        let load = || -> TemplateResult<TemplateNode> {
            let identifier = self.loader.resolve(filename)?;
            let source = loader.read(&identifier)?;
            let mut parser = Parser::new(identifier, &source, self.config, &loader, self.statements)?;
            parser.depth = self.depth + 1;
            parser.parse()
        };
        let node = load().map_err(|err| match err {
            TemplateError::RecursiveTemplate { .. } => err,
            err => TemplateError::Load {
                filename: filename.to_string(),
                source: Box::new(err),
            },
        })?;
        tracing::debug!(template = %self.identifier, parent = %node.identifier, "Loaded parent template");
        Ok(Arc::new(node))
    }

    fn at_eof(&self) -> bool {
        self.tokens
            .get(self.pos)
            .is_none_or(|t| t.kind == TokenKind::Eof)
    }

    fn current_position(&self) -> Position {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or_default()
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_node(&mut self) -> TemplateResult<Node> {
        let pos = self.current_position();
        let token = self
            .next_token()
            .ok_or_else(|| parse_error(pos, "Unexpected end of template"))?;
        match token.kind {
            TokenKind::Data => Ok(Node::Data(Data {
                text: token.val,
                trim: token.trim,
                pos: token.pos,
            })),
            TokenKind::Comment => Ok(Node::Comment(Comment {
                text: token.val,
                pos: token.pos,
            })),
            TokenKind::VariableBegin => {
                let mut args = self.collect_args(TokenKind::VariableEnd, token.pos)?;
                if args.end() {
                    return Err(parse_error(token.pos, "Empty expression"));
                }
                Ok(Node::Output(args.parse_output(token.pos)?))
            }
            TokenKind::BlockBegin => self.parse_statement(token.pos),
            _ => Err(parse_error(
                token.pos,
                format!("Unexpected token '{}'", token.val),
            )),
        }
    }

    fn parse_statement(&mut self, pos: Position) -> TemplateResult<Node> {
        let name = match self.next_token() {
            Some(token) if token.kind == TokenKind::Name => token,
            Some(token) => {
                return Err(parse_error(
                    token.pos,
                    format!("Expected a statement name, found '{}'", token.val),
                ));
            }
            None => return Err(parse_error(pos, "Unexpected end of template")),
        };
        let parse: StatementParser = *self
            .statements
            .get(&name.val)
            .ok_or_else(|| parse_error(name.pos, format!("Unknown statement '{}'", name.val)))?;
        let mut args = self.collect_args(TokenKind::BlockEnd, name.pos)?;
        let stmt = parse(self, &mut args)?;
        Ok(Node::StatementBlock(StatementBlock {
            name: name.val,
            stmt,
            pos: name.pos,
        }))
    }

    fn collect_args(&mut self, end: TokenKind, start: Position) -> TemplateResult<Args> {
        let mut tokens = Vec::new();
        loop {
            let token = self
                .next_token()
                .ok_or_else(|| parse_error(start, "Unexpected end of template inside tag"))?;
            if token.kind == end {
                return Ok(Args::new(tokens, start, token.pos));
            }
            if token.kind == TokenKind::Eof {
                return Err(parse_error(start, "Unexpected end of template inside tag"));
            }
            tokens.push(token);
        }
    }
}

/// Cursor over the tokens of a single tag, and the expression parser.
#[derive(Debug, Clone)]
pub struct Args {
    tokens: Vec<Token>,
    pos: usize,
    start: Position,
    end: Position,
}

impl Args {
    /// `start` is the position of the tag name (or `{{`), `end` of the closing delimiter.
    pub fn new(tokens: Vec<Token>, start: Position, end: Position) -> Self {
        Self {
            tokens,
            pos: 0,
            start,
            end,
        }
    }

    /// Tokenize a bare expression.
    pub fn from_source(source: &str) -> TemplateResult<Self> {
        let mut tokens = tokenize(&format!("{{{{ {source} }}}}"), &Config::new())?;
        // Drop the surrounding `{{`, `}}` and Eof.
        tokens.truncate(tokens.len().saturating_sub(2));
        let end = tokens.last().map(|t| t.pos).unwrap_or_default();
        let start = tokens.remove(0).pos;
        Ok(Self::new(tokens, start, end))
    }

    /// Position of the tag this cursor belongs to.
    pub fn tag_position(&self) -> Position {
        self.start
    }

    /// All tokens consumed.
    pub fn end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    /// Position of the current token, or of the tag end.
    pub fn position(&self) -> Position {
        self.current().map(|t| t.pos).unwrap_or(self.end)
    }

    pub fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn match_kind(&mut self, kind: TokenKind) -> Option<Token> {
        if self.current().is_some_and(|t| t.kind == kind) {
            self.next()
        } else {
            None
        }
    }

    /// Consume the current token if it is one of the given names.
    pub fn match_name(&mut self, names: &[&str]) -> Option<Token> {
        if self
            .current()
            .is_some_and(|t| t.kind == TokenKind::Name && names.contains(&t.val.as_str()))
        {
            self.next()
        } else {
            None
        }
    }

    /// Consume the current token if it is one of the given operators.
    pub fn match_operator(&mut self, ops: &[&str]) -> Option<Token> {
        if self
            .current()
            .is_some_and(|t| t.kind == TokenKind::Operator && ops.contains(&t.val.as_str()))
        {
            self.next()
        } else {
            None
        }
    }

    pub fn expect_name(&mut self, what: &str) -> TemplateResult<Token> {
        self.match_kind(TokenKind::Name)
            .ok_or_else(|| self.error(format!("Expected {what}")))
    }

    pub fn expect_operator(&mut self, op: &str) -> TemplateResult<Token> {
        self.match_operator(&[op])
            .ok_or_else(|| self.error(format!("Expected '{op}'")))
    }

    pub fn expect_end(&self) -> TemplateResult<()> {
        match self.current() {
            None => Ok(()),
            Some(token) => Err(parse_error(
                token.pos,
                format!("Unexpected '{}' at end of tag", token.val),
            )),
        }
    }

    /// A parse error at the current position.
    pub fn error(&self, message: impl Into<String>) -> TemplateError {
        let message = message.into();
        let message = match self.current() {
            Some(token) => format!("{message}, found '{}'", token.val),
            None => format!("{message}, found end of tag"),
        };
        parse_error(self.position(), message)
    }

    /// `expr [if cond [else alt]]` filling the rest of a `{{ }}` tag.
    pub fn parse_output(&mut self, pos: Position) -> TemplateResult<Output> {
        let expression = self.parse_expression()?;
        let (condition, alternative) = if self.match_name(&["if"]).is_some() {
            let condition = self.parse_expression()?;
            let alternative = match self.match_name(&["else"]) {
                Some(_) => Some(self.parse_expression()?),
                None => None,
            };
            (Some(condition), alternative)
        } else {
            (None, None)
        };
        self.expect_end()?;
        Ok(Output {
            expression,
            condition,
            alternative,
            pos,
        })
    }

    pub fn parse_expression(&mut self) -> TemplateResult<Expression> {
        self.parse_or()
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression, pos: Position) -> Expression {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            pos,
        }
    }

    fn parse_or(&mut self) -> TemplateResult<Expression> {
        let mut left = self.parse_and()?;
        while let Some(token) = self.match_name(&["or"]) {
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, left, right, token.pos);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> TemplateResult<Expression> {
        let mut left = self.parse_not()?;
        while let Some(token) = self.match_name(&["and"]) {
            let right = self.parse_not()?;
            left = Self::binary(BinaryOp::And, left, right, token.pos);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> TemplateResult<Expression> {
        if let Some(token) = self.match_name(&["not"]) {
            let operand = self.parse_not()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                pos: token.pos,
            });
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> TemplateResult<Expression> {
        let mut left = self.parse_concat()?;
        loop {
            if let Some(token) = self.match_operator(&["==", "!=", "<", "<=", ">", ">="]) {
                let op = match token.val.as_str() {
                    "==" => BinaryOp::Eq,
                    "!=" => BinaryOp::Ne,
                    "<" => BinaryOp::Lt,
                    "<=" => BinaryOp::Le,
                    ">" => BinaryOp::Gt,
                    _ => BinaryOp::Ge,
                };
                let right = self.parse_concat()?;
                left = Self::binary(op, left, right, token.pos);
            } else if let Some(token) = self.match_name(&["in"]) {
                let right = self.parse_concat()?;
                left = Self::binary(BinaryOp::In, left, right, token.pos);
            } else if self.current().is_some_and(|t| t.is_name("not"))
                && self.peek(1).is_some_and(|t| t.is_name("in"))
            {
                let pos = self.position();
                self.pos += 2;
                let right = self.parse_concat()?;
                left = Self::binary(BinaryOp::NotIn, left, right, pos);
            } else if let Some(token) = self.match_name(&["is"]) {
                let negated = self.match_name(&["not"]).is_some();
                let name = self.expect_name("a test name")?;
                let args = if self.match_operator(&["("]).is_some() {
                    self.parse_call_args()?
                } else {
                    CallArgs::default()
                };
                left = Expression::Test {
                    target: Box::new(left),
                    name: name.val,
                    args,
                    negated,
                    pos: token.pos,
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_concat(&mut self) -> TemplateResult<Expression> {
        let mut left = self.parse_additive()?;
        while let Some(token) = self.match_operator(&["~"]) {
            let right = self.parse_additive()?;
            left = Self::binary(BinaryOp::Concat, left, right, token.pos);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> TemplateResult<Expression> {
        let mut left = self.parse_multiplicative()?;
        while let Some(token) = self.match_operator(&["+", "-"]) {
            let op = if token.val == "+" {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right, token.pos);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> TemplateResult<Expression> {
        let mut left = self.parse_unary()?;
        while let Some(token) = self.match_operator(&["*", "/", "//", "%"]) {
            let op = match token.val.as_str() {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "//" => BinaryOp::FloorDiv,
                _ => BinaryOp::Mod,
            };
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right, token.pos);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> TemplateResult<Expression> {
        if let Some(token) = self.match_operator(&["-"]) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                pos: token.pos,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> TemplateResult<Expression> {
        let mut expr = self.parse_primary()?;
        loop {
            if let Some(token) = self.match_operator(&["."]) {
                let attr = match self.next() {
                    Some(t) if t.kind == TokenKind::Name || t.kind == TokenKind::Integer => t.val,
                    _ => return Err(self.error("Expected an attribute name after '.'")),
                };
                expr = Expression::GetAttribute {
                    target: Box::new(expr),
                    attr,
                    pos: token.pos,
                };
            } else if let Some(token) = self.match_operator(&["["]) {
                let index = self.parse_expression()?;
                self.expect_operator("]")?;
                expr = Expression::GetItem {
                    target: Box::new(expr),
                    index: Box::new(index),
                    pos: token.pos,
                };
            } else if let Some(token) = self.match_operator(&["("]) {
                let args = self.parse_call_args()?;
                expr = Expression::Call {
                    func: Box::new(expr),
                    args,
                    pos: token.pos,
                };
            } else if let Some(token) = self.match_operator(&["|"]) {
                let name = self.expect_name("a filter name")?;
                let args = if self.match_operator(&["("]).is_some() {
                    self.parse_call_args()?
                } else {
                    CallArgs::default()
                };
                expr = Expression::Filter {
                    target: Box::new(expr),
                    name: name.val,
                    args,
                    pos: token.pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn parse_call_args(&mut self) -> TemplateResult<CallArgs> {
        let mut args = CallArgs::default();
        if self.match_operator(&[")"]).is_some() {
            return Ok(args);
        }
        loop {
            let is_kwarg = self.current().is_some_and(|t| t.kind == TokenKind::Name)
                && self.peek(1).is_some_and(|t| t.is_operator("="));
            if is_kwarg {
                let name = self.expect_name("an argument name")?;
                self.expect_operator("=")?;
                args.kwargs.push((name.val, self.parse_expression()?));
            } else {
                if !args.kwargs.is_empty() {
                    return Err(self.error("Positional argument follows keyword argument"));
                }
                args.args.push(self.parse_expression()?);
            }
            if self.match_operator(&[")"]).is_some() {
                return Ok(args);
            }
            self.expect_operator(",")?;
        }
    }

    fn parse_primary(&mut self) -> TemplateResult<Expression> {
        let Some(token) = self.next() else {
            return Err(self.error("Expected an expression"));
        };
        let pos = token.pos;
        let literal = |value| Ok(Expression::Literal { value, pos });
        match token.kind {
            TokenKind::Name => match token.val.as_str() {
                "true" | "True" => literal(Literal::Bool(true)),
                "false" | "False" => literal(Literal::Bool(false)),
                "none" | "None" => literal(Literal::None),
                _ => Ok(Expression::Name {
                    name: token.val,
                    pos,
                }),
            },
            TokenKind::String => literal(Literal::String(token.val)),
            TokenKind::Integer => token
                .val
                .parse()
                .map(|n| Expression::Literal {
                    value: Literal::Integer(n),
                    pos,
                })
                .map_err(|_| parse_error(pos, format!("Invalid integer '{}'", token.val))),
            TokenKind::Float => token
                .val
                .parse()
                .map(|n| Expression::Literal {
                    value: Literal::Float(n),
                    pos,
                })
                .map_err(|_| parse_error(pos, format!("Invalid number '{}'", token.val))),
            TokenKind::Operator if token.val == "(" => {
                let expr = self.parse_expression()?;
                self.expect_operator(")")?;
                Ok(expr)
            }
            TokenKind::Operator if token.val == "[" => {
                let mut items = Vec::new();
                while self.match_operator(&["]"]).is_none() {
                    if !items.is_empty() {
                        self.expect_operator(",")?;
                    }
                    items.push(self.parse_expression()?);
                }
                Ok(Expression::List { items, pos })
            }
            TokenKind::Operator if token.val == "{" => {
                let mut entries = Vec::new();
                while self.match_operator(&["}"]).is_none() {
                    if !entries.is_empty() {
                        self.expect_operator(",")?;
                    }
                    let key = self.parse_expression()?;
                    self.expect_operator(":")?;
                    entries.push((key, self.parse_expression()?));
                }
                Ok(Expression::Dict { entries, pos })
            }
            _ => Err(parse_error(pos, format!("Unexpected '{}' in expression", token.val))),
        }
    }
}

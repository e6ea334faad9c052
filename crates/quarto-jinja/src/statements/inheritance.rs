/*
 * statements/inheritance.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template inheritance: `extends` and `block`.
//!
//! `extends` is resolved while parsing: the parent template is loaded and
//! linked into the child's [`TemplateNode`](crate::nodes::TemplateNode).
//! At render time the root-most ancestor drives output and each `block`
//! renders the most derived override, with `super()` rendering the next one
//! up the chain.

use std::fmt;
use std::sync::Arc;

use crate::callable::Function;
use crate::error::TemplateResult;
use crate::lexer::{TokenKind, parse_error};
use crate::nodes::{Expression, Literal, Position, Statement, StatementBlock, Wrapper};
use crate::parser::{Args, Parser};
use crate::renderer::{ExecutableStatement, Renderer};
use crate::value::Value;

/// `{% block name %}...{% endblock %}`
#[derive(Debug)]
pub struct BlockStmt {
    pub name: String,
    pub pos: Position,
}

pub fn block_parser(p: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    let name = args.expect_name("a block name")?.val;
    args.expect_end()?;

    let (body, mut end) = p.wrap_until(&["endblock"])?;
    if let Some(closing) = end.match_kind(TokenKind::Name) {
        if closing.val != name {
            return Err(parse_error(
                closing.pos,
                format!("Block '{name}' closed by 'endblock {}'", closing.val),
            ));
        }
    }
    end.expect_end()?;

    p.add_block(&name, Arc::new(body), pos)?;
    Ok(Arc::new(BlockStmt { name, pos }))
}

impl fmt::Display for BlockStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.name)
    }
}

impl Statement for BlockStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for BlockStmt {
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let chain = r.root.blocks_for(&self.name);
        render_block(r, &chain)
    }
}

/// Render the first body of `chain` in a child scope, with `super()` bound
/// to render the rest.
fn render_block(r: &mut Renderer<'_>, chain: &[Arc<Wrapper>]) -> TemplateResult<()> {
    let Some((body, parents)) = chain.split_first() else {
        return Ok(());
    };
    let mut child = r.inherit();
    if !parents.is_empty() {
        let parents = parents.to_vec();
        let environment = child.environment.clone();
        let config = child.config.clone();
        let loader = Arc::clone(&child.loader);
        let root = Arc::clone(&child.root);
        let depth = child.depth();
        let super_block = Function::new("super", move |_| {
            let mut output = String::new();
            let result = render_block(
                &mut Renderer::new(
                    environment.clone(),
                    &mut output,
                    &config,
                    Arc::clone(&loader),
                    Arc::clone(&root),
                )
                .with_depth(depth),
                &parents,
            );
            match result {
                Ok(()) if config.autoescape => Value::SafeString(output),
                Ok(()) => Value::String(output),
                Err(err) => Value::error(err.to_string()),
            }
        });
        child
            .environment
            .context
            .set("super", Value::Function(super_block));
    }
    child.walk_nodes(&body.nodes)
}

/// `{% extends "base.html" %}`
///
/// Parse-only: it has no render-time behaviour of its own.
#[derive(Debug)]
pub struct ExtendsStmt {
    pub filename: String,
    pub pos: Position,
}

pub fn extends_parser(p: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    let filename = match args.parse_expression()? {
        Expression::Literal {
            value: Literal::String(filename),
            ..
        } => filename,
        other => {
            return Err(parse_error(
                other.position(),
                format!("extends expects a string literal, found {other}"),
            ));
        }
    };
    args.expect_end()?;

    if p.has_parent() {
        return Err(parse_error(pos, "Template may only extend one parent"));
    }
    let parent = p.load_parent(&filename)?;
    p.set_parent(parent, pos)?;
    Ok(Arc::new(ExtendsStmt { filename, pos }))
}

impl fmt::Display for ExtendsStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extends {:?}", self.filename)
    }
}

impl Statement for ExtendsStmt {
    fn position(&self) -> Position {
        self.pos
    }
}

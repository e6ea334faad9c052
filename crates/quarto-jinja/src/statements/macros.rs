/*
 * statements/macros.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! `{% macro name(a, b=default) %}...{% endmacro %}`

use std::fmt;
use std::sync::Arc;

use crate::callable::Macro;
use crate::error::TemplateResult;
use crate::lexer::{TokenKind, parse_error};
use crate::nodes::{MacroNode, Position, Statement, StatementBlock};
use crate::parser::{Args, Parser};
use crate::renderer::{ExecutableStatement, Renderer};
use crate::value::Value;

#[derive(Debug)]
pub struct MacroStmt {
    pub node: Arc<MacroNode>,
}

pub fn macro_parser(p: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    let name = args.expect_name("a macro name")?.val;
    args.expect_operator("(")?;

    let mut params: Vec<(String, Option<_>)> = Vec::new();
    while args.match_operator(&[")"]).is_none() {
        if !params.is_empty() {
            args.expect_operator(",")?;
        }
        let param = args.expect_name("a parameter name")?;
        if params.iter().any(|(existing, _)| *existing == param.val) {
            return Err(parse_error(
                param.pos,
                format!("Duplicate parameter '{}' in macro '{name}'", param.val),
            ));
        }
        let default = match args.match_operator(&["="]) {
            Some(_) => Some(args.parse_expression()?),
            None => None,
        };
        params.push((param.val, default));
    }
    args.expect_end()?;

    let (body, mut end) = p.wrap_until(&["endmacro"])?;
    if let Some(closing) = end.match_kind(TokenKind::Name) {
        if closing.val != name {
            return Err(parse_error(
                closing.pos,
                format!("Macro '{name}' closed by 'endmacro {}'", closing.val),
            ));
        }
    }
    end.expect_end()?;

    let node = Arc::new(MacroNode {
        name,
        params,
        body,
        pos,
    });
    p.add_macro(Arc::clone(&node));
    Ok(Arc::new(MacroStmt { node }))
}

impl fmt::Display for MacroStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .node
            .params
            .iter()
            .map(|(name, default)| match default {
                Some(default) => format!("{name}={default}"),
                None => name.clone(),
            })
            .collect();
        write!(f, "macro {}({})", self.node.name, params.join(", "))
    }
}

impl Statement for MacroStmt {
    fn position(&self) -> Position {
        self.node.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for MacroStmt {
    // The macro closes over the scope it is defined in, which also makes it
    // visible to itself for recursion.
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let value = Value::Macro(Macro::new(Arc::clone(&self.node), r));
        r.environment.context.set(self.node.name.clone(), value);
        Ok(())
    }
}

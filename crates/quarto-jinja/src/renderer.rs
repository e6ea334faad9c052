/*
 * renderer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The render-time visitor.
//!
//! A [`Renderer`] walks a template's AST and writes to a borrowed output
//! sink. Nested constructs (loop bodies, blocks, macro bodies) render through
//! [`Renderer::inherit`], which shares the sink, registries, loader and root
//! template but opens a child scope and copies the [`Config`].

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::environment::Environment;
use crate::error::{TemplateError, TemplateResult};
use crate::evaluator::Evaluator;
use crate::loader::Loader;
use crate::nodes::{
    Expression, Node, Output, Statement, StatementBlock, TemplateNode, Visitor, Walk, Wrapper,
    walk,
};
use crate::value::Value;

/// How deeply includes and macro calls may nest within one render.
pub const MAX_RENDER_DEPTH: usize = 32;

/// A statement with render-time behaviour.
pub trait ExecutableStatement: Statement {
    fn execute(&self, renderer: &mut Renderer<'_>, tag: &StatementBlock) -> TemplateResult<()>;
}

/// Renders template nodes into an output sink.
pub struct Renderer<'a> {
    pub config: Config,
    pub environment: Environment,
    pub loader: Arc<dyn Loader>,
    /// The template being rendered, before resolving `extends`.
    pub root: Arc<TemplateNode>,
    output: &'a mut dyn fmt::Write,
    /// Includes and macro calls entered to reach this renderer.
    depth: usize,
}

impl<'a> Renderer<'a> {
    pub fn new(
        environment: Environment,
        output: &'a mut dyn fmt::Write,
        config: &Config,
        loader: Arc<dyn Loader>,
        root: Arc<TemplateNode>,
    ) -> Self {
        Self {
            config: config.inherit(),
            environment,
            loader,
            root,
            output,
            depth: 0,
        }
    }

    /// Set the nesting depth, for renderers created on behalf of another.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A sub-renderer writing to the same sink, in a child scope.
    pub fn inherit(&mut self) -> Renderer<'_> {
        Renderer {
            config: self.config.inherit(),
            environment: self.environment.inherit(),
            loader: Arc::clone(&self.loader),
            root: Arc::clone(&self.root),
            output: &mut *self.output,
            depth: self.depth,
        }
    }

    /// A renderer for another template, writing to the same sink, one level
    /// deeper.
    ///
    /// Fails with [`TemplateError::RecursiveTemplate`] past
    /// [`MAX_RENDER_DEPTH`].
    pub fn fork(
        &mut self,
        environment: Environment,
        loader: Arc<dyn Loader>,
        root: Arc<TemplateNode>,
    ) -> TemplateResult<Renderer<'_>> {
        check_depth(self.depth, &root.identifier)?;
        Ok(Renderer {
            config: self.config.inherit(),
            environment,
            loader,
            root,
            output: &mut *self.output,
            depth: self.depth + 1,
        })
    }

    /// Render the template.
    ///
    /// With `extends`, the root-most ancestor supplies the page structure and
    /// blocks resolve to their most derived override. Top-level statements
    /// of the derived templates (macros, imports, `set`) run first, in the
    /// current scope; their other output is dropped. Their errors are wrapped
    /// like those of any other statement.
    pub fn execute(&mut self) -> TemplateResult<()> {
        let mut current = Arc::clone(&self.root);
        while let Some(parent) = current.parent.clone() {
            let mut sink = Discard;
            let mut derived = Renderer {
                config: self.config.inherit(),
                environment: self.environment.clone(),
                loader: Arc::clone(&self.loader),
                root: Arc::clone(&self.root),
                output: &mut sink,
                depth: self.depth,
            };
            for node in &current.nodes {
                if matches!(node, Node::StatementBlock(block) if block.name != "block") {
                    walk(&mut derived, node)?;
                }
            }
            current = parent;
        }
        tracing::trace!(
            template = %self.root.identifier,
            layout = %current.identifier,
            "Executing template"
        );
        self.walk_nodes(&current.nodes)
    }

    /// Render `wrapper` in a child scope.
    pub fn execute_wrapper(&mut self, wrapper: &Wrapper) -> TemplateResult<()> {
        self.inherit().walk_nodes(&wrapper.nodes)
    }

    /// Render `nodes` in the current scope.
    pub fn walk_nodes(&mut self, nodes: &[Node]) -> TemplateResult<()> {
        for node in nodes {
            walk(self, node)?;
        }
        Ok(())
    }

    pub fn write(&mut self, text: &str) -> TemplateResult<()> {
        self.output.write_str(text)?;
        Ok(())
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.environment, &self.config).with_depth(self.depth)
    }

    pub fn eval(&self, expr: &Expression) -> Value {
        self.evaluator().eval(expr)
    }

    /// Evaluate `expr`, turning an error value into a wrapped [`TemplateError`].
    pub fn eval_checked(&self, expr: &Expression, what: &str) -> TemplateResult<Value> {
        match self.eval(expr) {
            Value::Error(err) => Err(TemplateError::from(err).wrap(format!(
                "Unable to evaluate {what} at line {}: {expr}",
                expr.position().line
            ))),
            value => Ok(value),
        }
    }

    fn render_output(&mut self, output: &Output) -> TemplateResult<()> {
        let expr = match &output.condition {
            Some(condition) => match self.eval(condition) {
                Value::Error(err) => {
                    return Err(TemplateError::from(err).wrap(format!(
                        "Unable to render condition at line {}: {condition}",
                        condition.position().line
                    )));
                }
                value if value.is_true() => &output.expression,
                _ => match &output.alternative {
                    Some(alternative) => alternative,
                    None => return Ok(()),
                },
            },
            None => &output.expression,
        };

        let value = self.eval(expr);
        if let Value::Error(err) = value {
            return Err(TemplateError::from(err).wrap(format!(
                "Unable to render expression at line {}: {expr}",
                expr.position().line
            )));
        }
        if self.config.autoescape && value.is_string() && !value.is_safe() {
            self.write(&value.escaped())
        } else {
            self.write(&value.to_string())
        }
    }
}

impl Visitor for Renderer<'_> {
    fn visit(&mut self, node: &Node) -> TemplateResult<Walk> {
        match node {
            Node::Comment(_) => Ok(Walk::Skip),
            Node::Data(data) => {
                let mut text = data.text.as_str();
                if data.trim.left {
                    text = text.trim_start_matches(is_trimmable);
                }
                if data.trim.right {
                    text = text.trim_end_matches(is_trimmable);
                }
                self.write(text)?;
                Ok(Walk::Skip)
            }
            Node::Output(output) => {
                self.render_output(output)?;
                Ok(Walk::Skip)
            }
            Node::StatementBlock(block) => {
                if let Some(stmt) = block.stmt.as_executable() {
                    tracing::trace!(statement = %block.name, line = block.pos.line, "Executing statement");
                    stmt.execute(self, block).map_err(|err| {
                        err.wrap(format!(
                            "Unable to execute statement at line {}: {}",
                            block.stmt.position().line,
                            block.stmt
                        ))
                    })?;
                }
                Ok(Walk::Skip)
            }
            Node::Wrapper(_) => Ok(Walk::Children),
        }
    }
}

/// Fail once `depth` nested includes or macro calls have been entered.
pub(crate) fn check_depth(depth: usize, name: &str) -> TemplateResult<()> {
    if depth >= MAX_RENDER_DEPTH {
        return Err(TemplateError::RecursiveTemplate {
            name: name.to_string(),
            max_depth: MAX_RENDER_DEPTH,
        });
    }
    Ok(())
}

struct Discard;

impl fmt::Write for Discard {
    fn write_str(&mut self, _: &str) -> fmt::Result {
        Ok(())
    }
}

fn is_trimmable(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

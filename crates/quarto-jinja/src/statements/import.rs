/*
 * statements/import.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Cross-template statements: `import`, `from ... import`, `include`.
//!
//! All three first resolve their target: evaluate the filename expression,
//! derive a loader scoped to that file, and load a [`Template`] with the
//! current configuration and environment. Imports then bind macro closures
//! into the current scope; `include` renders the template into the current
//! output.
//!
//! Imported macros close over a module scope. With `with context` (the
//! default) it is a child of the importing scope, so macros see the
//! importer's variables; `without context` detaches it. Every macro of the
//! imported template is bound in that module scope, so they can call each
//! other.

use std::fmt;
use std::sync::Arc;

use crate::callable::Macro;
use crate::context::Context;
use crate::error::{TemplateError, TemplateResult};
use crate::nodes::{Expression, Position, Statement, StatementBlock};
use crate::parser::{Args, Parser};
use crate::renderer::{ExecutableStatement, Renderer};
use crate::template::Template;
use crate::value::{Value, ValueMap};

/// Evaluate `filename` and load the template it names.
fn load_template(r: &Renderer<'_>, filename: &Expression) -> TemplateResult<Template> {
    let filename = r.eval_checked(filename, "filename")?.to_string();
    let loader = r
        .loader
        .inherit(&filename)
        .map_err(|err| TemplateError::LoaderInherit {
            filename: filename.clone(),
            loader: r.loader.to_string(),
            source: Box::new(err),
        })?;
    r.loader
        .resolve(&filename)
        .and_then(|identifier| Template::new(&identifier, &r.config, loader, &r.environment))
        .map_err(|err| TemplateError::Load {
            filename,
            source: Box::new(err),
        })
}

/// Bind every macro of `template` in a fresh module scope, returning them
/// by name.
fn bind_module(r: &Renderer<'_>, template: &Template, with_context: Option<bool>) -> ValueMap {
    let scope = if with_context.unwrap_or(true) {
        r.environment.context.inherit()
    } else {
        r.environment.context.detached()
    };
    let environment = template.environment(scope.clone());
    let mut names: Vec<&String> = template.macros().keys().collect();
    names.sort();

    let mut macros = ValueMap::new();
    for name in names {
        let node = Arc::clone(&template.macros()[name]);
        let value = Value::Macro(Macro::bind(
            node,
            r.config.inherit(),
            environment.clone(),
            Arc::clone(template.loader()),
            Arc::clone(template.root()),
        ));
        scope.set(name.clone(), value.clone());
        macros.insert(name.clone(), value);
    }
    macros
}

/// Parse an optional trailing `with context` / `without context`.
fn parse_context_modifier(args: &mut Args) -> Option<bool> {
    let modifier = args
        .current()
        .filter(|t| t.is_name("with") || t.is_name("without"))?
        .val
        .clone();
    if !args.peek(1).is_some_and(|t| t.is_name("context")) {
        return None;
    }
    args.next();
    args.next();
    Some(modifier == "with")
}

fn write_context_modifier(f: &mut fmt::Formatter<'_>, with_context: Option<bool>) -> fmt::Result {
    match with_context {
        Some(true) => write!(f, " with context"),
        Some(false) => write!(f, " without context"),
        None => Ok(()),
    }
}

/// `{% import "forms.html" as forms %}`
#[derive(Debug)]
pub struct ImportStmt {
    pub filename: Expression,
    pub alias: String,
    pub with_context: Option<bool>,
    pub pos: Position,
}

pub fn import_parser(_: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    if args.end() {
        return Err(args.error("You must at least specify one macro to import"));
    }
    let filename = args.parse_expression()?;
    if args.match_name(&["as"]).is_none() {
        return Err(args.error("Expected 'as' keyword"));
    }
    let alias = args.expect_name("a module alias")?.val;
    let with_context = parse_context_modifier(args);
    args.expect_end()?;

    Ok(Arc::new(ImportStmt {
        filename,
        alias,
        with_context,
        pos,
    }))
}

impl fmt::Display for ImportStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "import {} as {}", self.filename, self.alias)?;
        write_context_modifier(f, self.with_context)
    }
}

impl Statement for ImportStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for ImportStmt {
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let template = load_template(r, &self.filename)?;
        tracing::debug!(
            template = %template.identifier(),
            alias = %self.alias,
            macros = template.macros().len(),
            "Importing template"
        );
        let macros = bind_module(r, &template, self.with_context);
        r.environment
            .context
            .set(self.alias.clone(), Value::Map(macros));
        Ok(())
    }
}

/// `{% from "forms.html" import input, label as lbl %}`
#[derive(Debug)]
pub struct FromImportStmt {
    pub filename: Expression,
    /// `(alias, macro name)` in source order.
    pub names: Vec<(String, String)>,
    pub with_context: Option<bool>,
    pub pos: Position,
}

pub fn from_parser(_: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    if args.end() {
        return Err(args.error("You must at least specify one macro to import"));
    }
    let filename = args.parse_expression()?;
    if args.match_name(&["import"]).is_none() {
        return Err(args.error("Expected 'import' keyword"));
    }

    let mut names = Vec::new();
    let mut with_context = None;
    while !args.end() {
        let name = args.expect_name("a macro name")?.val;
        let alias = match args.match_name(&["as"]) {
            Some(_) => args.expect_name("a macro alias")?.val,
            None => name.clone(),
        };
        names.push((alias, name));

        with_context = parse_context_modifier(args);
        if with_context.is_some() || args.end() {
            break;
        }
        args.expect_operator(",")?;
    }
    args.expect_end()?;
    if names.is_empty() {
        return Err(args.error("You must at least specify one macro to import"));
    }

    Ok(Arc::new(FromImportStmt {
        filename,
        names,
        with_context,
        pos,
    }))
}

impl fmt::Display for FromImportStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .names
            .iter()
            .map(|(alias, name)| {
                if alias == name {
                    name.clone()
                } else {
                    format!("{name} as {alias}")
                }
            })
            .collect();
        write!(f, "from {} import {}", self.filename, names.join(", "))?;
        write_context_modifier(f, self.with_context)
    }
}

impl Statement for FromImportStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for FromImportStmt {
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let template = load_template(r, &self.filename)?;
        if let Some((_, missing)) = self
            .names
            .iter()
            .find(|(_, name)| !template.macros().contains_key(name))
        {
            return Err(TemplateError::MacroNotFound {
                name: missing.clone(),
                template: template.identifier().to_string(),
            });
        }
        tracing::debug!(
            template = %template.identifier(),
            names = self.names.len(),
            "Importing macros"
        );

        let macros = bind_module(r, &template, self.with_context);
        for (alias, name) in &self.names {
            if let Some(value) = macros.get(name) {
                r.environment.context.set(alias.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// `{% include "header.html" [ignore missing] [with|without context] %}`
#[derive(Debug)]
pub struct IncludeStmt {
    pub filename: Expression,
    pub ignore_missing: bool,
    pub with_context: bool,
    pub pos: Position,
}

pub fn include_parser(_: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    if args.end() {
        return Err(args.error("Expected a template to include"));
    }
    let filename = args.parse_expression()?;
    let ignore_missing = if args.match_name(&["ignore"]).is_some() {
        if args.match_name(&["missing"]).is_none() {
            return Err(args.error("Expected 'missing' after 'ignore'"));
        }
        true
    } else {
        false
    };
    let with_context = parse_context_modifier(args).unwrap_or(true);
    args.expect_end()?;

    Ok(Arc::new(IncludeStmt {
        filename,
        ignore_missing,
        with_context,
        pos,
    }))
}

impl fmt::Display for IncludeStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "include {}", self.filename)?;
        if self.ignore_missing {
            write!(f, " ignore missing")?;
        }
        if !self.with_context {
            write!(f, " without context")?;
        }
        Ok(())
    }
}

impl Statement for IncludeStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for IncludeStmt {
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let template = match load_template(r, &self.filename) {
            Ok(template) => template,
            Err(err) if self.ignore_missing && err.is_not_found() => {
                tracing::debug!(error = %err, "Skipping missing include");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        tracing::debug!(
            template = %template.identifier(),
            with_context = self.with_context,
            "Including template"
        );

        if self.with_context {
            let environment = template.environment(r.environment.context.inherit());
            return r
                .fork(
                    environment,
                    Arc::clone(template.loader()),
                    Arc::clone(template.root()),
                )?
                .execute();
        }

        let scope = Context::new();
        let result = r
            .fork(
                template.environment(scope.clone()),
                Arc::clone(template.loader()),
                Arc::clone(template.root()),
            )
            .and_then(|mut renderer| renderer.execute());
        scope.release();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Environment, MemoryLoader};
    use pretty_assertions::assert_eq;

    fn loader() -> MemoryLoader {
        MemoryLoader::with_templates([
            (
                "forms",
                "{% macro input(name, type='text') %}<input type=\"{{ type }}\" name=\"{{ name }}\">{% endmacro %}\
                 {% macro field(name) %}<p>{{ input(name) }}</p>{% endmacro %}",
            ),
            ("greeting", "Hello {{ who }}!"),
        ])
    }

    fn render(source: &str, data: &Context) -> TemplateResult<String> {
        Template::from_source(
            "page",
            source,
            &Config::new(),
            Arc::new(loader()),
            &Environment::default(),
        )?
        .execute(data)
    }

    #[test]
    fn test_import_binds_module() {
        let out = render(
            "{% import 'forms' as forms %}{{ forms.input('q') }}",
            &Context::new(),
        )
        .unwrap();
        assert_eq!(out, "<input type=\"text\" name=\"q\">");
    }

    #[test]
    fn test_import_does_not_bind_macro_names_directly() {
        let out = render(
            "{% import 'forms' as forms %}[{{ input }}]",
            &Context::new(),
        )
        .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_sibling_macros_resolve() {
        let out = render(
            "{% from 'forms' import field %}{{ field('email') }}",
            &Context::new(),
        )
        .unwrap();
        assert_eq!(out, "<p><input type=\"text\" name=\"email\"></p>");
    }

    #[test]
    fn test_from_import_alias() {
        let out = render(
            "{% from 'forms' import input as i %}{{ i('x', type='hidden') }}[{{ input }}]",
            &Context::new(),
        )
        .unwrap();
        assert_eq!(out, "<input type=\"hidden\" name=\"x\">[]");
    }

    #[test]
    fn test_from_import_missing_macro() {
        let err = render(
            "{% from 'forms' import input, nope %}{{ input('a') }}",
            &Context::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err.root_cause(), TemplateError::MacroNotFound { name, .. } if name == "nope"),
            "{err}"
        );
    }

    #[test]
    fn test_import_missing_template() {
        let err = render("{% import 'nope' as n %}", &Context::new()).unwrap_err();
        assert!(
            matches!(err.root_cause(), TemplateError::LoaderInherit { filename, .. } if filename == "nope"),
            "{err}"
        );
    }

    #[test]
    fn test_import_filename_error() {
        let template = Template::from_source(
            "page",
            "{% import missing as n %}",
            &Config::new().with_strict_undefined(true),
            Arc::new(loader()),
            &Environment::default(),
        )
        .unwrap();
        let err = template.execute(&Context::new()).unwrap_err();
        assert!(err.to_string().contains("Unable to evaluate filename"), "{err}");
    }

    #[test]
    fn test_import_context_modifier() {
        let loader = MemoryLoader::with_templates([(
            "lib",
            "{% macro who() %}[{{ user }}]{% endmacro %}",
        )]);
        let render = |source: &str| {
            let data = Context::new();
            data.set("user", "ada");
            Template::from_source(
                "page",
                source,
                &Config::new(),
                Arc::new(loader.clone()),
                &Environment::default(),
            )?
            .execute(&data)
        };
        assert_eq!(render("{% import 'lib' as l %}{{ l.who() }}").unwrap(), "[ada]");
        assert_eq!(
            render("{% import 'lib' as l with context %}{{ l.who() }}").unwrap(),
            "[ada]"
        );
        assert_eq!(
            render("{% from 'lib' import who without context %}{{ who() }}").unwrap(),
            "[]"
        );
    }

    #[test]
    fn test_display() {
        let stmt = FromImportStmt {
            filename: Args::from_source("'forms'").unwrap().parse_expression().unwrap(),
            names: vec![("i".to_string(), "input".to_string())],
            with_context: Some(false),
            pos: Position::default(),
        };
        assert_eq!(
            stmt.to_string(),
            "from \"forms\" import input as i without context"
        );
    }

    #[test]
    fn test_include_with_and_without_context() {
        let data = Context::new();
        data.set("who", "World");
        assert_eq!(
            render("{% include 'greeting' %}", &data).unwrap(),
            "Hello World!"
        );
        assert_eq!(
            render("{% include 'greeting' without context %}", &data).unwrap(),
            "Hello !"
        );
    }

    #[test]
    fn test_include_ignore_missing() {
        assert_eq!(
            render("a{% include 'nope' ignore missing %}b", &Context::new()).unwrap(),
            "ab"
        );
        assert!(render("{% include 'nope' %}", &Context::new()).is_err());
    }

    #[test]
    fn test_self_include_fails() {
        let template = Template::new(
            "a",
            &Config::new(),
            Arc::new(MemoryLoader::with_templates([("a", "x{% include 'a' %}")])),
            &Environment::default(),
        )
        .unwrap();
        let err = template.execute(&Context::new()).unwrap_err();
        assert!(
            matches!(
                err.root_cause(),
                TemplateError::RecursiveTemplate { max_depth: 32, .. }
            ),
            "{err}"
        );
    }
}

/*
 * template.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled templates.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::environment::{Environment, FilterSet, StatementSet, TestSet};
use crate::error::TemplateResult;
use crate::loader::{Loader, MemoryLoader};
use crate::nodes::{MacroNode, TemplateNode};
use crate::parser::Parser;
use crate::renderer::Renderer;

/// A parsed template, ready to render any number of times.
///
/// A `Template` holds no render state, so it can be shared across threads;
/// each render builds a fresh scope chain.
#[derive(Debug, Clone)]
pub struct Template {
    identifier: String,
    root: Arc<TemplateNode>,
    config: Config,
    loader: Arc<dyn Loader>,
    filters: Arc<FilterSet>,
    statements: Arc<StatementSet>,
    tests: Arc<TestSet>,
}

impl Template {
    /// Load `identifier` through `loader` and parse it with the environment's
    /// statements.
    pub fn new(
        identifier: &str,
        config: &Config,
        loader: Arc<dyn Loader>,
        environment: &Environment,
    ) -> TemplateResult<Self> {
        tracing::debug!(template = %identifier, loader = %loader, "Loading template");
        let root = Parser::parse_template(identifier, config, &loader, &environment.statements)?;
        Ok(Self::from_parts(identifier, root, config, loader, environment))
    }

    /// Parse `source` directly. `loader` serves any templates it references.
    pub fn from_source(
        identifier: &str,
        source: &str,
        config: &Config,
        loader: Arc<dyn Loader>,
        environment: &Environment,
    ) -> TemplateResult<Self> {
        let parser = Parser::new(identifier, source, config, &loader, &environment.statements)?;
        let root = Arc::new(parser.parse()?);
        Ok(Self::from_parts(identifier, root, config, loader, environment))
    }

    /// Parse a standalone template with the default configuration and
    /// built-in registries.
    pub fn from_string(source: &str) -> TemplateResult<Self> {
        Self::from_source(
            "<string>",
            source,
            &Config::new(),
            Arc::new(MemoryLoader::new()),
            &Environment::default(),
        )
    }

    fn from_parts(
        identifier: &str,
        root: Arc<TemplateNode>,
        config: &Config,
        loader: Arc<dyn Loader>,
        environment: &Environment,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            root,
            config: config.inherit(),
            loader,
            filters: Arc::clone(&environment.filters),
            statements: Arc::clone(&environment.statements),
            tests: Arc::clone(&environment.tests),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn root(&self) -> &Arc<TemplateNode> {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    /// Macros defined at the top level of this template.
    pub fn macros(&self) -> &HashMap<String, Arc<MacroNode>> {
        &self.root.macros
    }

    /// This template's registries over `context`.
    pub fn environment(&self, context: Context) -> Environment {
        Environment {
            filters: Arc::clone(&self.filters),
            statements: Arc::clone(&self.statements),
            tests: Arc::clone(&self.tests),
            context,
        }
    }

    /// Render with `data` as the top-level variables.
    pub fn execute(&self, data: &Context) -> TemplateResult<String> {
        let mut output = String::new();
        self.execute_to(data, &mut output)?;
        Ok(output)
    }

    /// Render into `output`.
    ///
    /// Output already written is kept when rendering fails part way.
    pub fn execute_to(&self, data: &Context, output: &mut dyn fmt::Write) -> TemplateResult<()> {
        tracing::debug!(template = %self.identifier, "Rendering template");
        let scope = Context::new();
        scope.update(data);
        let result = Renderer::new(
            self.environment(scope.clone()),
            output,
            &self.config,
            Arc::clone(&self.loader),
            Arc::clone(&self.root),
        )
        .execute();
        // Macros stored in the scope hold the scope; clearing it breaks the cycle.
        scope.release();
        match &result {
            Ok(()) => tracing::debug!(template = %self.identifier, "Rendered template"),
            Err(err) => tracing::debug!(template = %self.identifier, error = %err, "Render failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_template_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Template>();
    }

    #[test]
    fn test_execute_does_not_touch_data() {
        let template = Template::from_string("{% set x = 'inner' %}{{ x }}").unwrap();
        let data = Context::new();
        data.set("x", "outer");
        assert_eq!(template.execute(&data).unwrap(), "inner");
        assert_eq!(data.get("x"), Some(Value::from("outer")));
    }

    #[test]
    fn test_execute_twice() {
        let template = Template::from_string("{% macro m() %}m{% endmacro %}{{ m() }}").unwrap();
        assert_eq!(template.execute(&Context::new()).unwrap(), "m");
        assert_eq!(template.execute(&Context::new()).unwrap(), "m");
    }

    #[test]
    fn test_macros_listing() {
        let template =
            Template::from_string("{% macro a() %}{% endmacro %}{% macro b(x) %}{% endmacro %}")
                .unwrap();
        let mut names: Vec<&String> = template.macros().keys().collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_new_through_loader() {
        let loader = MemoryLoader::with_templates([("page", "Hi {{ who }}")]);
        let template = Template::new(
            "page",
            &Config::new(),
            Arc::new(loader),
            &Environment::default(),
        )
        .unwrap();
        let data = Context::new();
        data.set("who", "there");
        assert_eq!(template.execute(&data).unwrap(), "Hi there");
        assert_eq!(template.identifier(), "page");
    }
}

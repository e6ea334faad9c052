/*
 * environment.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Capability registries and the rendering environment.
//!
//! Filters, tests and statement tags are looked up by name in a [`Registry`].
//! The collision policy is explicit: [`Registry::register`] refuses to
//! overwrite, [`Registry::replace`] refuses to create, and
//! [`Registry::update`] merges with last-write-wins.
//!
//! An [`Environment`] holds the registries behind `Arc`, which seals them:
//! populate the sets first, then build the environment. Every sub-renderer of
//! a render shares the same registries and only forks the [`Context`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtins;
use crate::callable::VarArgs;
use crate::context::Context;
use crate::error::{TemplateError, TemplateResult};
use crate::evaluator::Evaluator;
use crate::nodes::Statement;
use crate::parser::{Args, Parser};
use crate::statements;
use crate::value::Value;

/// A filter: `value | name(args)`.
pub type FilterFunction = Arc<dyn Fn(&Evaluator<'_>, &Value, &VarArgs) -> Value + Send + Sync>;

/// A test: `value is name(args)`.
pub type TestFunction =
    Arc<dyn Fn(&Context, &Value, &VarArgs) -> TemplateResult<bool> + Send + Sync>;

/// Parse-time handler for a statement tag.
///
/// Receives the template parser (to consume a body with
/// [`Parser::wrap_until`]) and a parser over the tag's own arguments.
pub type StatementParser = fn(&mut Parser<'_>, &mut Args) -> TemplateResult<Arc<dyn Statement>>;

pub type FilterSet = Registry<FilterFunction>;
pub type TestSet = Registry<TestFunction>;
pub type StatementSet = Registry<StatementParser>;

/// A name → capability map with an explicit collision policy.
#[derive(Clone)]
pub struct Registry<T> {
    kind: &'static str,
    entries: HashMap<String, T>,
}

impl<T: Clone> Registry<T> {
    /// Create an empty registry. `kind` names the capability in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Create a registry from `entries`; later duplicates win.
    pub fn with_entries(
        kind: &'static str,
        entries: impl IntoIterator<Item = (impl Into<String>, T)>,
    ) -> Self {
        Self {
            kind,
            entries: entries
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    /// Add a new entry. Fails if `name` is already registered.
    pub fn register(&mut self, name: impl Into<String>, value: T) -> TemplateResult<()> {
        let name = name.into();
        if self.exists(&name) {
            return Err(TemplateError::AlreadyRegistered {
                kind: self.kind,
                name,
            });
        }
        self.entries.insert(name, value);
        Ok(())
    }

    /// Swap the implementation of an existing entry. Fails if `name` is unknown.
    pub fn replace(&mut self, name: impl Into<String>, value: T) -> TemplateResult<()> {
        let name = name.into();
        if !self.exists(&name) {
            return Err(TemplateError::NotRegistered {
                kind: self.kind,
                name,
            });
        }
        self.entries.insert(name, value);
        Ok(())
    }

    /// Merge every entry of `other` into this registry; `other` wins on collision.
    pub fn update(&mut self, other: &Registry<T>) -> &mut Self {
        for (name, value) in &other.entries {
            self.entries.insert(name.clone(), value.clone());
        }
        self
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &names)
            .finish()
    }
}

/// Registries plus the active scope.
#[derive(Debug, Clone)]
pub struct Environment {
    pub filters: Arc<FilterSet>,
    pub statements: Arc<StatementSet>,
    pub tests: Arc<TestSet>,
    pub context: Context,
}

impl Environment {
    pub fn new(filters: FilterSet, statements: StatementSet, tests: TestSet, context: Context) -> Self {
        Self {
            filters: Arc::new(filters),
            statements: Arc::new(statements),
            tests: Arc::new(tests),
            context,
        }
    }

    /// Share the registries with a new scope whose parent is the current one.
    pub fn inherit(&self) -> Self {
        self.with_context(self.context.inherit())
    }

    /// Share the registries with an unrelated scope.
    pub fn with_context(&self, context: Context) -> Self {
        Self {
            filters: Arc::clone(&self.filters),
            statements: Arc::clone(&self.statements),
            tests: Arc::clone(&self.tests),
            context,
        }
    }
}

impl Default for Environment {
    /// The built-in filters, tests and statements over an empty scope.
    fn default() -> Self {
        Self::new(
            builtins::filters(),
            statements::builtin(),
            builtins::tests(),
            Context::new(),
        )
    }
}

/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Jinja-style template rendering runtime for Quarto.
//!
//! This crate parses and renders templates written in a Jinja dialect:
//!
//! - Output: `{{ user.name|upper }}`, `{{ a if cond else b }}`
//! - Comments: `{# ... #}`
//! - Whitespace control: `{%- ... -%}`, `{{- ... -}}`
//! - Control flow: `if`/`elif`/`else`, `for ... in ... [if ...]`/`else`, `set`
//! - Inheritance: `extends`, `block`, `super()`
//! - Macros: `macro`, `import ... as ...`, `from ... import ...`, `include`
//!
//! # Architecture
//!
//! A [`Template`] is parsed once and is immutable, so it can be shared across
//! threads. Each render creates a fresh [`Context`] scope chain and walks the
//! AST with a [`Renderer`]. Filters, tests and statement tags are looked up
//! in the registries of an [`Environment`]; templates are read through a
//! [`Loader`].
//!
//! # Example
//!
//! ```
//! use quarto_jinja::{Context, Template};
//!
//! let template = Template::from_string("Hello, {{ name|default('World') }}!").unwrap();
//! let data = Context::new();
//! assert_eq!(template.execute(&data).unwrap(), "Hello, World!");
//!
//! data.set("name", "Quarto");
//! assert_eq!(quarto_jinja::render(&template, &data).unwrap(), "Hello, Quarto!");
//! ```

pub mod builtins;
pub mod callable;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod loader;
pub mod nodes;
pub mod parser;
pub mod renderer;
pub mod statements;
pub mod template;
pub mod value;

// Re-export main types at crate root
pub use callable::{Function, Macro, VarArgs};
pub use config::Config;
pub use context::Context;
pub use environment::{
    Environment, FilterFunction, FilterSet, Registry, StatementParser, StatementSet, TestFunction,
    TestSet,
};
pub use error::{EvalError, TemplateError, TemplateResult};
pub use evaluator::Evaluator;
pub use loader::{FileSystemLoader, Loader, MemoryLoader};
pub use renderer::{ExecutableStatement, Renderer};
pub use template::Template;
pub use value::{Value, ValueMap};

/// Render `template` with `data` as its top-level variables.
pub fn render(template: &Template, data: &Context) -> TemplateResult<String> {
    template.execute(data)
}

/*
 * statements/mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in statement tags.
//!
//! Each tag has a [`StatementParser`] that builds its [`Statement`] node at
//! parse time; most nodes also implement
//! [`ExecutableStatement`](crate::renderer::ExecutableStatement).
//!
//! [`Statement`]: crate::nodes::Statement

pub mod control;
pub mod import;
pub mod inheritance;
pub mod macros;

use crate::environment::{StatementParser, StatementSet};

/// The default statement set.
pub fn builtin() -> StatementSet {
    let parsers: [(&str, StatementParser); 9] = [
        ("if", control::if_parser),
        ("for", control::for_parser),
        ("set", control::set_parser),
        ("block", inheritance::block_parser),
        ("extends", inheritance::extends_parser),
        ("macro", macros::macro_parser),
        ("import", import::import_parser),
        ("from", import::from_parser),
        ("include", import::include_parser),
    ];
    StatementSet::with_entries("statement", parsers)
}

/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template parsing, loading and rendering.

use thiserror::Error;

/// An error produced while evaluating an expression.
///
/// This is the payload of [`Value::Error`](crate::Value::Error). It is kept
/// separate from [`TemplateError`] because values are cloned freely.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct EvalError(pub String);

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Error parsing the template syntax.
    #[error("Parse error at line {line}, column {col}: {message}")]
    Parse {
        message: String,
        line: usize,
        col: usize,
    },

    /// An expression evaluated to an error value.
    #[error("{0}")]
    Evaluation(#[from] EvalError),

    /// An error annotated with the construct that raised it.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        source: Box<TemplateError>,
    },

    /// The loader does not know the requested template.
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    /// A scoped loader could not be derived for a template.
    #[error("Failed to inherit loader from '{filename}' ({loader}): {source}")]
    LoaderInherit {
        filename: String,
        loader: String,
        source: Box<TemplateError>,
    },

    /// A template could not be loaded or parsed.
    #[error("Unable to load template '{filename}': {source}")]
    Load {
        filename: String,
        source: Box<TemplateError>,
    },

    /// Registering a name that is already taken.
    #[error("{kind} with name '{name}' is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    /// Replacing a name that was never registered.
    #[error("{kind} with name '{name}' does not exist (therefore cannot be overridden)")]
    NotRegistered { kind: &'static str, name: String },

    /// Inheritance, includes or macro calls nested deeper than allowed
    /// (likely a cycle).
    #[error("Recursion too deep at '{name}' (max depth {max_depth})")]
    RecursiveTemplate { name: String, max_depth: usize },

    /// `from ... import name` where the template defines no such macro.
    #[error("Macro '{name}' not found in template '{template}'")]
    MacroNotFound { name: String, template: String },

    /// The output sink rejected a write.
    #[error("Unable to write output: {0}")]
    Output(#[from] std::fmt::Error),

    /// I/O error (e.g., reading a template file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Render data that cannot be turned into a context.
    #[error("Invalid template data: {message}")]
    InvalidData { message: String },
}

impl TemplateError {
    /// Attach positional or textual context to this error.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        TemplateError::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error, or one it wraps, is [`TemplateError::TemplateNotFound`].
    pub fn is_not_found(&self) -> bool {
        match self {
            TemplateError::TemplateNotFound { .. } => true,
            TemplateError::Wrapped { source, .. }
            | TemplateError::LoaderInherit { source, .. }
            | TemplateError::Load { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns the innermost error of a chain of [`TemplateError::Wrapped`].
    pub fn root_cause(&self) -> &TemplateError {
        match self {
            TemplateError::Wrapped { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_keeps_source_in_message() {
        let err = TemplateError::from(EvalError::new("'x' is undefined"))
            .wrap("Unable to render expression at line 3: x");
        assert_eq!(
            err.to_string(),
            "Unable to render expression at line 3: x: 'x' is undefined"
        );
    }

    #[test]
    fn test_root_cause() {
        let err = TemplateError::TemplateNotFound {
            name: "lib.j2".to_string(),
        }
        .wrap("inner")
        .wrap("outer");
        assert!(matches!(
            err.root_cause(),
            TemplateError::TemplateNotFound { name } if name == "lib.j2"
        ));
    }
}

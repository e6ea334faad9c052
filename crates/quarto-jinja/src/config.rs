/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Render configuration.

use serde::{Deserialize, Serialize};

/// Settings that control lexing and rendering.
///
/// Every renderer owns its own copy, so a nested scope may change a setting
/// (for example turn autoescaping off) without affecting its caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Escape interpolated strings unless they are marked safe.
    pub autoescape: bool,

    /// Drop the first newline after a block tag.
    pub trim_blocks: bool,

    /// Strip spaces and tabs between the start of a line and a block tag.
    pub lstrip_blocks: bool,

    /// Undefined names evaluate to an error instead of `none`.
    pub strict_undefined: bool,

    /// Keep a single trailing newline at the end of the template source.
    pub keep_trailing_newline: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy for a nested scope.
    pub fn inherit(&self) -> Self {
        self.clone()
    }

    pub fn with_autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    pub fn with_strict_undefined(mut self, strict: bool) -> Self {
        self.strict_undefined = strict;
        self
    }

    pub fn with_trim_blocks(mut self, trim: bool) -> Self {
        self.trim_blocks = trim;
        self
    }

    pub fn with_lstrip_blocks(mut self, lstrip: bool) -> Self {
        self.lstrip_blocks = lstrip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert!(!config.autoescape);
        assert!(!config.trim_blocks);
        assert!(!config.keep_trailing_newline);
    }

    #[test]
    fn test_inherit_is_independent() {
        let parent = Config::new().with_autoescape(true);
        let mut child = parent.inherit();
        child.autoescape = false;
        assert!(parent.autoescape);
    }

    #[test]
    fn test_deserialize_kebab_case() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "autoescape": true,
            "strict-undefined": true,
        }))
        .unwrap();
        assert!(config.autoescape);
        assert!(config.strict_undefined);
        assert!(!config.lstrip_blocks);
    }
}

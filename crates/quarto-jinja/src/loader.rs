/*
 * loader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template source loading.
//!
//! A [`Loader`] turns a template identifier into source text. Templates that
//! reference other templates (`extends`, `import`, `include`) derive a scoped
//! loader with [`Loader::inherit`], so relative names resolve against the
//! referencing template's location.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{TemplateError, TemplateResult};

/// Trait for loading template sources.
pub trait Loader: fmt::Debug + fmt::Display + Send + Sync {
    /// Resolve an identifier to the canonical name this loader reads.
    fn resolve(&self, identifier: &str) -> TemplateResult<String>;

    /// Read the source of a template.
    fn read(&self, identifier: &str) -> TemplateResult<String>;

    /// Derive a loader scoped relative to `identifier`.
    fn inherit(&self, identifier: &str) -> TemplateResult<Arc<dyn Loader>>;
}

/// Loader that reads templates below a root directory.
///
/// Relative identifiers are joined to the root; absolute ones are used as-is.
/// A derived loader is rooted at the directory of the template it was derived
/// for.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        let path = Path::new(identifier);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl fmt::Display for FileSystemLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSystemLoader(root={})", self.root.display())
    }
}

impl Loader for FileSystemLoader {
    fn resolve(&self, identifier: &str) -> TemplateResult<String> {
        Ok(self.path_for(identifier).to_string_lossy().into_owned())
    }

    fn read(&self, identifier: &str) -> TemplateResult<String> {
        let path = self.path_for(identifier);
        if !path.is_file() {
            return Err(TemplateError::TemplateNotFound {
                name: path.to_string_lossy().into_owned(),
            });
        }
        Ok(std::fs::read_to_string(path)?)
    }

    fn inherit(&self, identifier: &str) -> TemplateResult<Arc<dyn Loader>> {
        let path = self.path_for(identifier);
        if !path.is_file() {
            return Err(TemplateError::TemplateNotFound {
                name: path.to_string_lossy().into_owned(),
            });
        }
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        Ok(Arc::new(FileSystemLoader { root }))
    }
}

/// Loader that serves templates from an in-memory map.
///
/// Names form a flat namespace, so a derived loader is the same map.
/// Useful for tests and for templates bundled into the application.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: Arc<HashMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader with the given templates.
    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self {
            templates: Arc::new(
                templates
                    .into_iter()
                    .map(|(name, source)| (name.into(), source.into()))
                    .collect(),
            ),
        }
    }

    /// Add a template. Loaders derived earlier keep their own copy.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        Arc::make_mut(&mut self.templates).insert(name.into(), source.into());
        self
    }
}

impl fmt::Display for MemoryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryLoader({} templates)", self.templates.len())
    }
}

impl Loader for MemoryLoader {
    fn resolve(&self, identifier: &str) -> TemplateResult<String> {
        if self.templates.contains_key(identifier) {
            Ok(identifier.to_string())
        } else {
            Err(TemplateError::TemplateNotFound {
                name: identifier.to_string(),
            })
        }
    }

    fn read(&self, identifier: &str) -> TemplateResult<String> {
        self.templates
            .get(identifier)
            .cloned()
            .ok_or_else(|| TemplateError::TemplateNotFound {
                name: identifier.to_string(),
            })
    }

    fn inherit(&self, identifier: &str) -> TemplateResult<Arc<dyn Loader>> {
        self.resolve(identifier)?;
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_loader() {
        let mut loader = MemoryLoader::new();
        loader.add("header", "<h1>Title</h1>");
        loader.add("footer", "<footer>End</footer>");

        assert_eq!(loader.read("header").unwrap(), "<h1>Title</h1>");
        assert_eq!(loader.resolve("footer").unwrap(), "footer");
        assert!(matches!(
            loader.read("missing"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_memory_loader_inherit() {
        let loader = MemoryLoader::with_templates([("a", "content a"), ("b", "content b")]);
        let derived = loader.inherit("a").unwrap();
        assert_eq!(derived.read("b").unwrap(), "content b");
        assert!(loader.inherit("missing").is_err());
    }

    #[test]
    fn test_memory_loader_display() {
        let loader = MemoryLoader::with_templates([("a", "x")]);
        assert_eq!(loader.to_string(), "MemoryLoader(1 templates)");
    }

    #[test]
    fn test_filesystem_resolve() {
        let loader = FileSystemLoader::new("/templates");
        assert_eq!(
            PathBuf::from(loader.resolve("inc/header.j2").unwrap()),
            PathBuf::from("/templates/inc/header.j2")
        );
        assert_eq!(
            PathBuf::from(loader.resolve("/abs/page.j2").unwrap()),
            PathBuf::from("/abs/page.j2")
        );
    }

    #[test]
    fn test_filesystem_inherit_rebases_root() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("test-fixtures");
        let loader = FileSystemLoader::new(&fixtures);
        let derived = loader.inherit("macros/forms.j2").unwrap();
        assert_eq!(
            derived.to_string(),
            format!("FileSystemLoader(root={})", fixtures.join("macros").display())
        );
        assert!(derived.read("helpers.j2").is_ok());
    }

    #[test]
    fn test_filesystem_missing() {
        let loader = FileSystemLoader::new("/definitely/not/here");
        assert!(matches!(
            loader.inherit("nope.j2"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
        assert!(loader.read("nope.j2").is_err());
    }
}

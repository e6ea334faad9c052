/*
 * callable.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Callable template values: macros and native functions.
//!
//! A [`Macro`] is a closure: the macro's AST paired with the renderer state
//! of the scope that created it. Free variables in the macro body resolve
//! against that captured scope, never against the call site.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::environment::Environment;
use crate::error::{EvalError, TemplateError, TemplateResult};
use crate::loader::Loader;
use crate::nodes::{MacroNode, TemplateNode};
use crate::renderer::{Renderer, check_depth};
use crate::value::Value;

/// Evaluated call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarArgs {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl VarArgs {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Vec::new(),
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.args.first()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// The argument at `index`, or else the keyword argument `name`.
    pub fn get_or_kwarg(&self, index: usize, name: &str) -> Option<&Value> {
        self.get(index).or_else(|| self.kwarg(name))
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// A native function exposed to templates.
#[derive(Clone)]
pub struct Function {
    name: String,
    func: Rc<dyn Fn(&VarArgs) -> Value>,
}

impl Function {
    pub fn new(name: impl Into<String>, func: impl Fn(&VarArgs) -> Value + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, params: &VarArgs) -> Value {
        (self.func)(params)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish()
    }
}

/// A macro bound to the scope it was created in.
#[derive(Clone)]
pub struct Macro {
    node: Arc<MacroNode>,
    config: Config,
    environment: Environment,
    loader: Arc<dyn Loader>,
    root: Arc<TemplateNode>,
}

impl Macro {
    /// Close `node` over the renderer's current scope.
    pub fn new(node: Arc<MacroNode>, renderer: &Renderer<'_>) -> Self {
        Self::bind(
            node,
            renderer.config.inherit(),
            renderer.environment.clone(),
            Arc::clone(&renderer.loader),
            Arc::clone(&renderer.root),
        )
    }

    /// Close `node` over `environment`'s scope. `loader` and `root` serve
    /// templates referenced from the macro body.
    pub fn bind(
        node: Arc<MacroNode>,
        config: Config,
        environment: Environment,
        loader: Arc<dyn Loader>,
        root: Arc<TemplateNode>,
    ) -> Self {
        Self {
            node,
            config,
            environment,
            loader,
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn node(&self) -> &Arc<MacroNode> {
        &self.node
    }

    /// The scope free variables resolve against.
    pub fn scope(&self) -> &Context {
        &self.environment.context
    }

    /// Render the macro body with `params` bound in a fresh child scope.
    ///
    /// `depth` is the nesting depth of the caller; the body renders one level
    /// deeper. The result is marked safe when autoescaping is on, since the
    /// body has already been escaped while rendering.
    pub fn call(&self, params: &VarArgs, depth: usize) -> TemplateResult<Value> {
        check_depth(depth, self.name())?;
        let mut output = String::new();
        {
            let mut renderer = Renderer::new(
                self.environment.inherit(),
                &mut output,
                &self.config,
                Arc::clone(&self.loader),
                Arc::clone(&self.root),
            )
            .with_depth(depth + 1);
            self.bind_params(&renderer, params)?;
            renderer.walk_nodes(&self.node.body.nodes)?;
        }
        Ok(if self.config.autoescape {
            Value::SafeString(output)
        } else {
            Value::String(output)
        })
    }

    fn bind_params(&self, renderer: &Renderer<'_>, params: &VarArgs) -> TemplateResult<()> {
        let declared = &self.node.params;
        if params.args.len() > declared.len() {
            return Err(EvalError::new(format!(
                "Macro '{}' takes {} argument(s), {} given",
                self.name(),
                declared.len(),
                params.args.len()
            ))
            .into());
        }
        for (key, _) in &params.kwargs {
            if !declared.iter().any(|(name, _)| name == key) {
                return Err(EvalError::new(format!(
                    "Macro '{}' has no parameter named '{key}'",
                    self.name()
                ))
                .into());
            }
        }

        let scope = &renderer.environment.context;
        for (index, (name, default)) in declared.iter().enumerate() {
            let value = match (params.get(index), params.kwarg(name)) {
                (Some(_), Some(_)) => {
                    return Err(EvalError::new(format!(
                        "Macro '{}' got multiple values for parameter '{name}'",
                        self.name()
                    ))
                    .into());
                }
                (Some(value), None) | (None, Some(value)) => value.clone(),
                (None, None) => match default {
                    Some(expr) => match renderer.eval(expr) {
                        Value::Error(err) => {
                            return Err(TemplateError::from(err).wrap(format!(
                                "Unable to evaluate default of parameter '{name}' at line {}",
                                expr.position().line
                            )));
                        }
                        value => value,
                    },
                    None => Value::Nil,
                },
            };
            scope.set(name.clone(), value);
        }
        Ok(())
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.node.params.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Macro")
            .field("name", &self.node.name)
            .field("params", &params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varargs_lookup() {
        let params = VarArgs {
            args: vec![Value::from(1)],
            kwargs: vec![("sep".to_string(), Value::from(", "))],
        };
        assert_eq!(params.first(), Some(&Value::from(1)));
        assert_eq!(params.kwarg("sep"), Some(&Value::from(", ")));
        assert_eq!(params.get_or_kwarg(1, "sep"), Some(&Value::from(", ")));
        assert_eq!(params.get_or_kwarg(2, "missing"), None);
    }

    #[test]
    fn test_function_call() {
        let double = Function::new("double", |params| match params.first() {
            Some(Value::Number(n)) => Value::Number(n * 2.0),
            _ => Value::error("double expects a number"),
        });
        assert_eq!(double.call(&VarArgs::new(vec![Value::from(21)])), Value::from(42));
        assert!(double.call(&VarArgs::default()).is_error());
        assert_eq!(double.name(), "double");
    }
}

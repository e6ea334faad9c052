/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in filters and tests.

use std::sync::Arc;

use crate::callable::VarArgs;
use crate::context::Context;
use crate::environment::{FilterFunction, FilterSet, TestFunction, TestSet};
use crate::error::{EvalError, TemplateResult};
use crate::evaluator::Evaluator;
use crate::value::Value;

/// The default filter set.
pub fn filters() -> FilterSet {
    FilterSet::with_entries(
        "filter",
        [
            ("upper", filter_fn(upper)),
            ("lower", filter_fn(lower)),
            ("capitalize", filter_fn(capitalize)),
            ("title", filter_fn(title)),
            ("trim", filter_fn(trim)),
            ("replace", filter_fn(replace)),
            ("length", filter_fn(length)),
            ("count", filter_fn(length)),
            ("first", filter_fn(first)),
            ("last", filter_fn(last)),
            ("join", filter_fn(join)),
            ("default", filter_fn(default)),
            ("d", filter_fn(default)),
            ("safe", filter_fn(safe)),
            ("escape", filter_fn(escape)),
            ("e", filter_fn(escape)),
        ],
    )
}

/// The default test set.
pub fn tests() -> TestSet {
    TestSet::with_entries(
        "test",
        [
            ("defined", test_fn(|_, v, _| Ok(is_defined(v)))),
            ("undefined", test_fn(|_, v, _| Ok(!is_defined(v)))),
            ("none", test_fn(|_, v, _| Ok(v.is_nil()))),
            ("string", test_fn(|_, v, _| Ok(v.is_string()))),
            ("number", test_fn(|_, v, _| Ok(v.is_number()))),
            ("mapping", test_fn(|_, v, _| Ok(matches!(v, Value::Map(_))))),
            ("sequence", test_fn(|_, v, _| Ok(matches!(v, Value::List(_))))),
            ("callable", test_fn(|_, v, _| Ok(v.is_callable()))),
            ("odd", test_fn(|_, v, _| Ok(integer(v, "odd")? % 2 != 0))),
            ("even", test_fn(|_, v, _| Ok(integer(v, "even")? % 2 == 0))),
            ("divisibleby", test_fn(divisible_by)),
        ],
    )
}

/// Box a closure as a [`FilterFunction`].
pub fn filter_fn(
    f: impl Fn(&Evaluator<'_>, &Value, &VarArgs) -> Value + Send + Sync + 'static,
) -> FilterFunction {
    Arc::new(f)
}

/// Box a closure as a [`TestFunction`].
pub fn test_fn(
    f: impl Fn(&Context, &Value, &VarArgs) -> TemplateResult<bool> + Send + Sync + 'static,
) -> TestFunction {
    Arc::new(f)
}

fn string_filter(value: &Value, name: &str, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::SafeString(s) => Value::SafeString(f(s)),
        Value::Nil => Value::String(String::new()),
        Value::Error(_) => value.clone(),
        Value::Number(_) | Value::Bool(_) => Value::String(f(&value.to_string())),
        _ => Value::error(format!("Filter '{name}' expects a string")),
    }
}

fn upper(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    string_filter(value, "upper", str::to_uppercase)
}

fn lower(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    string_filter(value, "lower", str::to_lowercase)
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn capitalize(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    string_filter(value, "capitalize", capitalize_word)
}

fn title(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    string_filter(value, "title", |s| {
        s.split(' ').map(capitalize_word).collect::<Vec<_>>().join(" ")
    })
}

fn trim(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    string_filter(value, "trim", |s| s.trim().to_string())
}

fn replace(_: &Evaluator<'_>, value: &Value, params: &VarArgs) -> Value {
    let (Some(old), Some(new)) = (params.get_or_kwarg(0, "old"), params.get_or_kwarg(1, "new"))
    else {
        return Value::error("Filter 'replace' expects two arguments");
    };
    let (old, new) = (old.to_string(), new.to_string());
    string_filter(value, "replace", |s| s.replace(&old, &new))
}

fn length(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    match value.len() {
        Some(n) => Value::from(n),
        None if value.is_nil() => Value::from(0),
        None => Value::error(format!("Object of type {value:?} has no length")),
    }
}

fn first(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    value.get_item(&Value::from(0)).unwrap_or_default()
}

fn last(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    value.get_item(&Value::from(-1)).unwrap_or_default()
}

fn join(evaluator: &Evaluator<'_>, value: &Value, params: &VarArgs) -> Value {
    let separator = params
        .get_or_kwarg(0, "d")
        .map(Value::to_string)
        .unwrap_or_default();
    let Value::List(items) = value else {
        return Value::error("Filter 'join' expects a list");
    };
    let autoescape = evaluator.config.autoescape;
    let any_unsafe = items.iter().any(|item| item.is_string() && !item.is_safe());
    let parts: Vec<String> = items
        .iter()
        .map(|item| {
            if autoescape && item.is_string() && !item.is_safe() {
                item.escaped()
            } else {
                item.to_string()
            }
        })
        .collect();
    let joined = parts.join(&separator);
    if autoescape && any_unsafe {
        Value::SafeString(joined)
    } else {
        Value::String(joined)
    }
}

fn default(_: &Evaluator<'_>, value: &Value, params: &VarArgs) -> Value {
    let fallback = params
        .get_or_kwarg(0, "default_value")
        .cloned()
        .unwrap_or_else(|| Value::from(""));
    let boolean = params
        .get_or_kwarg(1, "boolean")
        .is_some_and(Value::is_true);
    if value.is_nil() || (boolean && !value.is_true()) {
        fallback
    } else {
        value.clone()
    }
}

fn safe(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    match value {
        Value::Error(_) | Value::SafeString(_) => value.clone(),
        other => Value::SafeString(other.to_string()),
    }
}

fn escape(_: &Evaluator<'_>, value: &Value, _: &VarArgs) -> Value {
    match value {
        Value::Error(_) | Value::SafeString(_) => value.clone(),
        other => Value::SafeString(other.escaped()),
    }
}

fn is_defined(value: &Value) -> bool {
    !(value.is_nil() || value.is_error())
}

fn integer(value: &Value, test: &str) -> TemplateResult<i64> {
    match value {
        Value::Number(n) if n.fract() == 0.0 => Ok(*n as i64),
        other => Err(EvalError::new(format!("Test '{test}' expects an integer, got {other:?}")).into()),
    }
}

fn divisible_by(_: &Context, value: &Value, params: &VarArgs) -> TemplateResult<bool> {
    let n = integer(value, "divisibleby")?;
    let divisor = match params.get_or_kwarg(0, "num") {
        Some(d) => integer(d, "divisibleby")?,
        None => return Err(EvalError::new("Test 'divisibleby' expects a divisor").into()),
    };
    if divisor == 0 {
        return Err(EvalError::new("Division by zero").into());
    }
    Ok(n % divisor == 0)
}

/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Expression evaluation.
//!
//! An [`Evaluator`] is a short-lived view of a renderer's environment and
//! configuration. It never writes output: evaluating an expression only
//! reads the scope chain, calls filters, tests and macros, and returns a
//! [`Value`]. Failures come back as [`Value::Error`].

use std::cmp::Ordering;

use crate::callable::VarArgs;
use crate::config::Config;
use crate::environment::Environment;
use crate::error::EvalError;
use crate::nodes::{BinaryOp, CallArgs, Expression, Literal, UnaryOp};
use crate::value::{Value, ValueMap, format_number};

type EvalResult = Result<Value, EvalError>;

/// Upper bound, in bytes, on the result of `string * count`.
const MAX_REPEAT_LEN: usize = 1 << 24;

/// Evaluates expressions against an environment.
pub struct Evaluator<'r> {
    pub environment: &'r Environment,
    pub config: &'r Config,
    /// Nesting depth of the renderer this evaluator belongs to; macro calls
    /// render one level deeper.
    pub depth: usize,
}

impl<'r> Evaluator<'r> {
    pub fn new(environment: &'r Environment, config: &'r Config) -> Self {
        Self {
            environment,
            config,
            depth: 0,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Evaluate `expr`; errors are returned as [`Value::Error`].
    pub fn eval(&self, expr: &Expression) -> Value {
        self.try_eval(expr).unwrap_or_else(Value::Error)
    }

    fn try_eval(&self, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Literal { value, .. } => Ok(match value {
                Literal::None => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Integer(n) => Value::Number(*n as f64),
                Literal::Float(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),

            Expression::Name { name, .. } => match self.environment.context.get(name) {
                Some(value) => check(value),
                None => self.undefined(format!("'{name}' is undefined")),
            },

            Expression::List { items, .. } => items
                .iter()
                .map(|item| self.try_eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),

            Expression::Dict { entries, .. } => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let key = self.try_eval(key)?.to_string();
                    map.insert(key, self.try_eval(value)?);
                }
                Ok(Value::Map(map))
            }

            Expression::GetAttribute { target, attr, .. } => {
                let value = self.try_eval(target)?;
                match value.get_attribute(attr) {
                    Some(found) => check(found),
                    None => self.undefined(format!("'{target}' has no attribute '{attr}'")),
                }
            }

            Expression::GetItem { target, index, .. } => {
                let value = self.try_eval(target)?;
                let key = self.try_eval(index)?;
                match value.get_item(&key) {
                    Some(found) => check(found),
                    None => self.undefined(format!("'{target}' has no item {index}")),
                }
            }

            Expression::Call { func, args, .. } => {
                let callee = self.try_eval(func)?;
                let params = self.eval_args(args)?;
                self.call(&callee, &params, func)
            }

            Expression::Filter {
                target, name, args, ..
            } => {
                let value = if matches!(name.as_str(), "default" | "d") {
                    self.eval_lenient(target)?
                } else {
                    self.try_eval(target)?
                };
                let params = self.eval_args(args)?;
                let filter = self
                    .environment
                    .filters
                    .get(name)
                    .ok_or_else(|| EvalError::new(format!("Unknown filter '{name}'")))?;
                check(filter(self, &value, &params))
            }

            Expression::Test {
                target,
                name,
                args,
                negated,
                ..
            } => {
                let value = self.eval_lenient(target)?;
                let params = self.eval_args(args)?;
                let test = self
                    .environment
                    .tests
                    .get(name)
                    .ok_or_else(|| EvalError::new(format!("Unknown test '{name}'")))?;
                let passed = test(&self.environment.context, &value, &params)
                    .map_err(|err| EvalError::new(err.to_string()))?;
                Ok(Value::Bool(passed != *negated))
            }

            Expression::Unary { op, operand, .. } => {
                let value = self.try_eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_true())),
                    UnaryOp::Neg => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(EvalError::new(format!("Cannot negate {other:?}"))),
                    },
                }
            }

            Expression::Binary {
                op, left, right, ..
            } => self.eval_binary(*op, left, right),
        }
    }

    /// Evaluate with undefined names yielding `none` even in strict mode.
    ///
    /// Used for test operands and the `default` filter, which exist to
    /// inspect undefined values.
    fn eval_lenient(&self, expr: &Expression) -> EvalResult {
        if !self.config.strict_undefined {
            return self.try_eval(expr);
        }
        let config = self.config.clone().with_strict_undefined(false);
        Evaluator {
            environment: self.environment,
            config: &config,
            depth: self.depth,
        }
        .try_eval(expr)
    }

    fn undefined(&self, message: String) -> EvalResult {
        if self.config.strict_undefined {
            Err(EvalError::new(message))
        } else {
            Ok(Value::Nil)
        }
    }

    fn eval_args(&self, args: &CallArgs) -> Result<VarArgs, EvalError> {
        let positional = args
            .args
            .iter()
            .map(|arg| self.try_eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut kwargs = Vec::with_capacity(args.kwargs.len());
        for (name, arg) in &args.kwargs {
            kwargs.push((name.clone(), self.try_eval(arg)?));
        }
        Ok(VarArgs {
            args: positional,
            kwargs,
        })
    }

    fn call(&self, callee: &Value, params: &VarArgs, expr: &Expression) -> EvalResult {
        match callee {
            Value::Macro(m) => m
                .call(params, self.depth)
                .map_err(|err| EvalError::new(format!("Error calling macro '{}': {err}", m.name()))),
            Value::Function(f) => check(f.call(params)),
            Value::Nil => Err(EvalError::new(format!(
                "'{expr}' is undefined and cannot be called"
            ))),
            other => Err(EvalError::new(format!(
                "'{expr}' is not callable ({other:?})"
            ))),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expression, right: &Expression) -> EvalResult {
        let lhs = self.try_eval(left)?;
        match op {
            BinaryOp::And => {
                return Ok(Value::Bool(lhs.is_true() && self.try_eval(right)?.is_true()));
            }
            BinaryOp::Or => {
                return Ok(Value::Bool(lhs.is_true() || self.try_eval(right)?.is_true()));
            }
            _ => {}
        }
        let rhs = self.try_eval(right)?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
            BinaryOp::Lt => compare(&lhs, &rhs).map(|o| Value::Bool(o == Ordering::Less)),
            BinaryOp::Le => compare(&lhs, &rhs).map(|o| Value::Bool(o != Ordering::Greater)),
            BinaryOp::Gt => compare(&lhs, &rhs).map(|o| Value::Bool(o == Ordering::Greater)),
            BinaryOp::Ge => compare(&lhs, &rhs).map(|o| Value::Bool(o != Ordering::Less)),
            BinaryOp::In => contains(&rhs, &lhs).map(Value::Bool),
            BinaryOp::NotIn => contains(&rhs, &lhs).map(|found| Value::Bool(!found)),
            BinaryOp::Concat => Ok(Value::String(format!("{lhs}{rhs}"))),
            BinaryOp::Add => match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::List(a), Value::List(b)) => {
                    Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
                }
                (a, b) if a.is_string() && b.is_string() => {
                    Ok(Value::String(format!("{a}{b}")))
                }
                _ => Err(operand_error(op, &lhs, &rhs)),
            },
            BinaryOp::Mul => match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
                (s, Value::Number(n)) if s.is_string() => {
                    repeat(s.as_str().unwrap_or_default(), *n)
                }
                _ => Err(operand_error(op, &lhs, &rhs)),
            },
            // `-`, `/`, `//` and `%`.
            _ => {
                let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
                    return Err(operand_error(op, &lhs, &rhs));
                };
                if b == 0.0 && op != BinaryOp::Sub {
                    return Err(EvalError::new("Division by zero"));
                }
                Ok(Value::Number(match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Div => a / b,
                    BinaryOp::FloorDiv => (a / b).floor(),
                    _ => a - b * (a / b).floor(),
                }))
            }
        }
    }
}

fn check(value: Value) -> EvalResult {
    match value {
        Value::Error(err) => Err(err),
        value => Ok(value),
    }
}

fn repeat(text: &str, count: f64) -> EvalResult {
    if count < 0.0 || count.fract() != 0.0 {
        return Err(EvalError::new(format!(
            "Cannot repeat a string {} times",
            format_number(count)
        )));
    }
    let too_large = || EvalError::new("String repeat too large");
    if count > MAX_REPEAT_LEN as f64 {
        return Err(too_large());
    }
    let count = count as usize;
    text.len()
        .checked_mul(count)
        .filter(|len| *len <= MAX_REPEAT_LEN)
        .ok_or_else(too_large)?;
    Ok(Value::String(text.repeat(count)))
}

fn operand_error(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::new(format!(
        "Unsupported operands for '{}': {lhs:?} and {rhs:?}",
        op.symbol()
    ))
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| EvalError::new("Cannot compare NaN")),
        (a, b) if a.is_string() && b.is_string() => Ok(a.as_str().cmp(&b.as_str())),
        _ => Err(EvalError::new(format!("Cannot compare {lhs:?} and {rhs:?}"))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvalError> {
    match haystack {
        Value::String(s) | Value::SafeString(s) => Ok(s.contains(&needle.to_string())),
        Value::List(items) => Ok(items.contains(needle)),
        Value::Map(map) => Ok(needle.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(EvalError::new(format!("{other:?} is not a container"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::parser::Args;

    fn eval_with(source: &str, ctx: Context, config: &Config) -> Value {
        let env = Environment::default().with_context(ctx);
        let mut args = Args::from_source(source).expect("expression should lex");
        let expr = args.parse_expression().expect("expression should parse");
        Evaluator::new(&env, config).eval(&expr)
    }

    fn eval(source: &str) -> Value {
        let ctx = Context::from_json(serde_json::json!({
            "n": 7,
            "name": "Ada",
            "items": ["a", "b", "c"],
            "user": {"name": "Grace", "roles": ["admin"]},
        }))
        .unwrap();
        eval_with(source, ctx, &Config::new())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Value::from(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::from(9));
        assert_eq!(eval("n // 2"), Value::from(3));
        assert_eq!(eval("n % 4"), Value::from(3));
        assert_eq!(eval("-7 % 3"), Value::from(2));
        assert_eq!(eval("n / 2"), Value::from(3.5));
        assert_eq!(eval("-n"), Value::from(-7));
        assert!(eval("1 / 0").is_error());
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval("'Hello, ' ~ name"), Value::from("Hello, Ada"));
        assert_eq!(eval("name + '!'"), Value::from("Ada!"));
        assert_eq!(eval("'ab' * 2"), Value::from("abab"));
        assert_eq!(eval("name|upper"), Value::from("ADA"));
    }

    #[test]
    fn test_string_repeat_is_bounded() {
        let ctx = Context::new();
        ctx.set("huge", 1e19);
        ctx.set("half", 1.5);
        let config = Config::new();
        assert_eq!(eval("'ab' * 0"), Value::from(""));

        let err = eval_with("'ab' * huge", ctx.clone(), &config);
        assert_eq!(
            err.as_error().map(ToString::to_string).as_deref(),
            Some("String repeat too large")
        );
        assert!(eval_with("'ab' * 10000000", ctx.clone(), &config).is_error());
        assert!(eval_with("'ab' * half", ctx.clone(), &config).is_error());
        assert!(eval_with("'ab' * -1", ctx, &config).is_error());
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("n > 5 and n < 10"), Value::Bool(true));
        assert_eq!(eval("n == 7 or missing"), Value::Bool(true));
        assert_eq!(eval("not items"), Value::Bool(false));
        assert_eq!(eval("'b' in items"), Value::Bool(true));
        assert_eq!(eval("'z' not in items"), Value::Bool(true));
        assert_eq!(eval("'da' in name"), Value::Bool(true));
        assert_eq!(eval("'name' in user"), Value::Bool(true));
        assert!(eval("n < 'x'").is_error());
    }

    #[test]
    fn test_lookups() {
        assert_eq!(eval("user.name"), Value::from("Grace"));
        assert_eq!(eval("user['name']"), Value::from("Grace"));
        assert_eq!(eval("user.roles[0]"), Value::from("admin"));
        assert_eq!(eval("items[-1]"), Value::from("c"));
        assert_eq!(eval("user.missing"), Value::Nil);
        assert_eq!(eval("missing"), Value::Nil);
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("[1, 'a', none]").to_string(), "[1, 'a', None]");
        assert_eq!(eval("{'k': 1}|length"), Value::from(1));
        assert_eq!(eval("true"), Value::Bool(true));
        assert_eq!(eval("2.5"), Value::from(2.5));
    }

    #[test]
    fn test_tests() {
        assert_eq!(eval("n is odd"), Value::Bool(true));
        assert_eq!(eval("n is not even"), Value::Bool(true));
        assert_eq!(eval("missing is defined"), Value::Bool(false));
        assert_eq!(eval("name is string"), Value::Bool(true));
        assert!(eval("n is frobnicated").is_error());
    }

    #[test]
    fn test_strict_undefined() {
        let config = Config::new().with_strict_undefined(true);
        let value = eval_with("missing", Context::new(), &config);
        assert_eq!(value, Value::error("'missing' is undefined"));

        assert_eq!(
            eval_with("missing is defined", Context::new(), &config),
            Value::Bool(false)
        );
        assert_eq!(
            eval_with("missing|default('fallback')", Context::new(), &config),
            Value::from("fallback")
        );
    }

    #[test]
    fn test_calling_non_callable() {
        let value = eval("name()");
        assert!(value.is_error());
        assert!(value.to_string().contains("not callable"));
        assert!(eval("missing()").to_string().contains("undefined"));
    }

    #[test]
    fn test_unknown_filter() {
        assert_eq!(eval("n|frobnicate"), Value::error("Unknown filter 'frobnicate'"));
    }

    #[test]
    fn test_function_value() {
        let ctx = Context::new();
        ctx.set(
            "greet",
            Value::Function(crate::callable::Function::new("greet", |params| {
                Value::String(format!(
                    "hi {}",
                    params.get_or_kwarg(0, "who").cloned().unwrap_or_default()
                ))
            })),
        );
        assert_eq!(
            eval_with("greet(who='Bob')", ctx, &Config::new()),
            Value::from("hi Bob")
        );
    }
}

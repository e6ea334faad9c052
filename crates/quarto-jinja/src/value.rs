/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template values.
//!
//! A [`Value`] is the tagged result of evaluating an expression. Strings carry
//! a "safe" marker so autoescaping can leave pre-escaped markup alone, and
//! evaluation failures travel as [`Value::Error`] until a renderer wraps them
//! with the position of the construct that produced them.

use std::fmt;

use hashlink::LinkedHashMap;

use crate::callable::{Function, Macro};
use crate::error::EvalError;

/// Insertion-ordered map used for template dictionaries.
pub type ValueMap = LinkedHashMap<String, Value>;

/// A value that can be used in template evaluation.
#[derive(Clone, Default)]
pub enum Value {
    /// `none`, and undefined names outside strict mode.
    #[default]
    Nil,

    Bool(bool),

    Number(f64),

    /// A string that is escaped on output when autoescaping is on.
    String(String),

    /// A string that is written verbatim even when autoescaping is on.
    SafeString(String),

    List(Vec<Value>),

    Map(ValueMap),

    Macro(Macro),

    Function(Function),

    /// The result of a failed evaluation.
    Error(EvalError),
}

impl Value {
    /// Build an error value from a message.
    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(EvalError::new(message))
    }

    /// Build a string value that autoescaping will not touch.
    pub fn safe(text: impl Into<String>) -> Self {
        Value::SafeString(text.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_) | Value::SafeString(_))
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Value::SafeString(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Macro(_) | Value::Function(_))
    }

    /// Truthiness for conditionals.
    ///
    /// Empty strings, empty collections, zero, `none` and errors are falsy.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Nil | Value::Error(_) => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) | Value::SafeString(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Macro(_) | Value::Function(_) => true,
        }
    }

    /// The raw text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::SafeString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// The evaluation error carried by this value, if any.
    pub fn as_error(&self) -> Option<&EvalError> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Number of items for strings, lists and maps.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::SafeString(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Look up `.name` on a value.
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.get(name).cloned(),
            _ => None,
        }
    }

    /// Look up `[key]` on a value. Negative list indexes count from the end.
    pub fn get_item(&self, key: &Value) -> Option<Value> {
        match (self, key) {
            (Value::Map(map), key) => key.as_str().and_then(|k| map.get(k).cloned()),
            (Value::List(items), Value::Number(n)) => {
                let index = list_index(*n, items.len())?;
                items.get(index).cloned()
            }
            (Value::String(s) | Value::SafeString(s), Value::Number(n)) => {
                let index = list_index(*n, s.chars().count())?;
                s.chars().nth(index).map(|c| Value::String(c.to_string()))
            }
            _ => None,
        }
    }

    /// The HTML-escaped string form of this value.
    pub fn escaped(&self) -> String {
        escape_html(&self.to_string())
    }

    /// Display form used inside list and map literals.
    fn repr(&self) -> String {
        match self {
            Value::String(s) | Value::SafeString(s) => format!("'{}'", s.replace('\'', "\\'")),
            Value::Nil => "None".to_string(),
            other => other.to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "none",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) | Value::SafeString(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Macro(_) => "macro",
            Value::Function(_) => "function",
            Value::Error(_) => "error",
        }
    }
}

fn list_index(n: f64, len: usize) -> Option<usize> {
    if n.fract() != 0.0 {
        return None;
    }
    let n = n as i64;
    let index = if n < 0 { len as i64 + n } else { n };
    usize::try_from(index).ok().filter(|i| *i < len)
}

/// Format a number the way templates print it: integral values without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Escape `& < > " '` for HTML output.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) | Value::SafeString(s) => f.write_str(s),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(map) => {
                let entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Macro(m) => write!(f, "<macro {}>", m.name()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Error(err) => write!(f, "{err}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "String({s:?})"),
            Value::SafeString(s) => write!(f, "SafeString({s:?})"),
            Value::Error(err) => write!(f, "Error({:?})", err.0),
            other => write!(f, "{}({})", other.type_name(), other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (a, b) if a.is_string() && b.is_string() => a.as_str() == b.as_str(),
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl From<Macro> for Value {
    fn from(m: Macro) -> Self {
        Value::Macro(m)
    }
}

impl From<EvalError> for Value {
    fn from(err: EvalError) -> Self {
        Value::Error(err)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_true());
        assert!(!Value::Bool(false).is_true());
        assert!(!Value::Nil.is_true());
        assert!(!Value::Number(0.0).is_true());
        assert!(Value::Number(2.5).is_true());
        assert!(Value::from("false").is_true());
        assert!(!Value::from("").is_true());
        assert!(!Value::List(vec![]).is_true());
        assert!(!Value::error("boom").is_true());
    }

    #[test]
    fn test_escaping() {
        assert_eq!(Value::from("<b>").escaped(), "&lt;b&gt;");
        assert_eq!(
            escape_html(r#"a & 'b' "c""#),
            "a &amp; &#39;b&#39; &quot;c&quot;"
        );
        assert!(!Value::from("<b>").is_safe());
        assert!(Value::safe("<b>").is_safe());
        assert!(Value::safe("<b>").is_string());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(
            Value::from(vec![Value::from("a"), Value::Number(1.0)]).to_string(),
            "['a', 1]"
        );
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(serde_json::json!({
            "name": "Ada",
            "tags": ["x", "y"],
            "age": 36,
        }));
        assert_eq!(value.get_attribute("name"), Some(Value::from("Ada")));
        assert_eq!(
            value
                .get_attribute("tags")
                .and_then(|tags| tags.get_item(&Value::Number(-1.0))),
            Some(Value::from("y"))
        );
        assert_eq!(value.get_attribute("age"), Some(Value::Number(36.0)));
        assert_eq!(value.get_attribute("missing"), None);
    }

    #[test]
    fn test_safe_and_plain_strings_compare_equal() {
        assert_eq!(Value::safe("x"), Value::from("x"));
        assert_ne!(Value::from("1"), Value::Number(1.0));
    }
}

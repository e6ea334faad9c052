/*
 * statements/control.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Control flow and assignment: `if`, `for`, `set`.

use std::fmt;
use std::sync::Arc;

use crate::error::{EvalError, TemplateResult};
use crate::nodes::{Expression, Position, Statement, StatementBlock, Wrapper};
use crate::parser::{Args, Parser};
use crate::renderer::{ExecutableStatement, Renderer};
use crate::value::{Value, ValueMap};

/// `{% if a %}...{% elif b %}...{% else %}...{% endif %}`
#[derive(Debug)]
pub struct IfStmt {
    pub branches: Vec<(Expression, Wrapper)>,
    pub otherwise: Option<Wrapper>,
    pub pos: Position,
}

pub fn if_parser(p: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    let mut condition = args.parse_expression()?;
    args.expect_end()?;

    let mut branches = Vec::new();
    let mut otherwise = None;
    loop {
        let (body, mut end) = p.wrap_until(&["elif", "else", "endif"])?;
        let tag = body.end_tag.clone().unwrap_or_default();
        branches.push((condition, body));
        match tag.as_str() {
            "elif" => {
                condition = end.parse_expression()?;
                end.expect_end()?;
            }
            "else" => {
                end.expect_end()?;
                let (body, end) = p.wrap_until(&["endif"])?;
                end.expect_end()?;
                otherwise = Some(body);
                break;
            }
            _ => {
                end.expect_end()?;
                break;
            }
        }
    }

    Ok(Arc::new(IfStmt {
        branches,
        otherwise,
        pos,
    }))
}

impl fmt::Display for IfStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branches.first() {
            Some((condition, _)) => write!(f, "if {condition}"),
            None => write!(f, "if"),
        }
    }
}

impl Statement for IfStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for IfStmt {
    // Branch bodies render in the enclosing scope, so `set` inside `if` is
    // visible afterwards.
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        for (condition, body) in &self.branches {
            if r.eval_checked(condition, "condition")?.is_true() {
                return r.walk_nodes(&body.nodes);
            }
        }
        match &self.otherwise {
            Some(body) => r.walk_nodes(&body.nodes),
            None => Ok(()),
        }
    }
}

/// `{% for x in items [if cond] %}...{% else %}...{% endfor %}`
#[derive(Debug)]
pub struct ForStmt {
    /// One name, or several to unpack each item into.
    pub targets: Vec<String>,
    pub iterable: Expression,
    pub filter: Option<Expression>,
    pub body: Wrapper,
    pub empty: Option<Wrapper>,
    pub pos: Position,
}

pub fn for_parser(p: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    let mut targets = vec![args.expect_name("a loop variable")?.val];
    while args.match_operator(&[","]).is_some() {
        targets.push(args.expect_name("a loop variable")?.val);
    }
    if args.match_name(&["in"]).is_none() {
        return Err(args.error("Expected 'in'"));
    }
    let iterable = args.parse_expression()?;
    let filter = match args.match_name(&["if"]) {
        Some(_) => Some(args.parse_expression()?),
        None => None,
    };
    args.expect_end()?;

    let (body, end) = p.wrap_until(&["else", "endfor"])?;
    end.expect_end()?;
    let empty = if body.end_tag.as_deref() == Some("else") {
        let (empty, end) = p.wrap_until(&["endfor"])?;
        end.expect_end()?;
        Some(empty)
    } else {
        None
    };

    Ok(Arc::new(ForStmt {
        targets,
        iterable,
        filter,
        body,
        empty,
        pos,
    }))
}

impl ForStmt {
    fn items(&self, value: Value) -> TemplateResult<Vec<Value>> {
        Ok(match value {
            Value::List(items) => items,
            Value::Map(map) if self.targets.len() > 1 => map
                .into_iter()
                .map(|(key, value)| Value::List(vec![Value::String(key), value]))
                .collect(),
            Value::Map(map) => map.into_iter().map(|(key, _)| Value::String(key)).collect(),
            Value::String(s) | Value::SafeString(s) => {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            }
            Value::Nil => Vec::new(),
            other => {
                return Err(EvalError::new(format!(
                    "'{}' is not iterable ({other:?})",
                    self.iterable
                ))
                .into());
            }
        })
    }

    fn bind(&self, r: &Renderer<'_>, item: &Value) -> TemplateResult<()> {
        let scope = &r.environment.context;
        if let [target] = self.targets.as_slice() {
            scope.set(target.clone(), item.clone());
            return Ok(());
        }
        match item {
            Value::List(values) if values.len() == self.targets.len() => {
                for (target, value) in self.targets.iter().zip(values) {
                    scope.set(target.clone(), value.clone());
                }
                Ok(())
            }
            other => Err(EvalError::new(format!(
                "Cannot unpack {other:?} into {} variables",
                self.targets.len()
            ))
            .into()),
        }
    }
}

fn loop_info(index: usize, length: usize) -> Value {
    let mut info = ValueMap::new();
    info.insert("index".to_string(), Value::from(index + 1));
    info.insert("index0".to_string(), Value::from(index));
    info.insert("revindex".to_string(), Value::from(length - index));
    info.insert("revindex0".to_string(), Value::from(length - index - 1));
    info.insert("first".to_string(), Value::Bool(index == 0));
    info.insert("last".to_string(), Value::Bool(index + 1 == length));
    info.insert("length".to_string(), Value::from(length));
    Value::Map(info)
}

impl fmt::Display for ForStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "for {} in {}", self.targets.join(", "), self.iterable)?;
        if let Some(filter) = &self.filter {
            write!(f, " if {filter}")?;
        }
        Ok(())
    }
}

impl Statement for ForStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for ForStmt {
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let value = r.eval_checked(&self.iterable, "loop iterable")?;
        let mut items = self.items(value)?;

        if let Some(filter) = &self.filter {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                let candidate = r.inherit();
                self.bind(&candidate, &item)?;
                if candidate.eval_checked(filter, "loop filter")?.is_true() {
                    kept.push(item);
                }
            }
            items = kept;
        }

        if items.is_empty() {
            if let Some(empty) = &self.empty {
                r.execute_wrapper(empty)?;
            }
            return Ok(());
        }

        let length = items.len();
        for (index, item) in items.iter().enumerate() {
            let mut iteration = r.inherit();
            self.bind(&iteration, item)?;
            iteration
                .environment
                .context
                .set("loop", loop_info(index, length));
            iteration.walk_nodes(&self.body.nodes)?;
        }
        Ok(())
    }
}

/// `{% set x = expr %}` or `{% set x %}...{% endset %}`
#[derive(Debug)]
pub struct SetStmt {
    pub target: String,
    pub value: SetValue,
    pub pos: Position,
}

#[derive(Debug)]
pub enum SetValue {
    Expression(Expression),
    /// Rendered body of a block assignment.
    Body(Wrapper),
}

pub fn set_parser(p: &mut Parser<'_>, args: &mut Args) -> TemplateResult<Arc<dyn Statement>> {
    let pos = args.tag_position();
    let target = args.expect_name("a variable name")?.val;
    let value = if args.match_operator(&["="]).is_some() {
        let expr = args.parse_expression()?;
        args.expect_end()?;
        SetValue::Expression(expr)
    } else {
        args.expect_end()?;
        let (body, end) = p.wrap_until(&["endset"])?;
        end.expect_end()?;
        SetValue::Body(body)
    };
    Ok(Arc::new(SetStmt { target, value, pos }))
}

impl fmt::Display for SetStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            SetValue::Expression(expr) => write!(f, "set {} = {expr}", self.target),
            SetValue::Body(_) => write!(f, "set {}", self.target),
        }
    }
}

impl Statement for SetStmt {
    fn position(&self) -> Position {
        self.pos
    }

    fn as_executable(&self) -> Option<&dyn ExecutableStatement> {
        Some(self)
    }
}

impl ExecutableStatement for SetStmt {
    fn execute(&self, r: &mut Renderer<'_>, _: &StatementBlock) -> TemplateResult<()> {
        let value = match &self.value {
            SetValue::Expression(expr) => r.eval_checked(expr, "assignment")?,
            SetValue::Body(body) => {
                let mut captured = String::new();
                Renderer::new(
                    r.environment.inherit(),
                    &mut captured,
                    &r.config,
                    Arc::clone(&r.loader),
                    Arc::clone(&r.root),
                )
                .with_depth(r.depth())
                .walk_nodes(&body.nodes)?;
                if r.config.autoescape {
                    Value::SafeString(captured)
                } else {
                    Value::String(captured)
                }
            }
        };
        r.environment.context.set(self.target.clone(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, Template};
    use pretty_assertions::assert_eq;

    fn render(source: &str, data: serde_json::Value) -> String {
        let template = Template::from_string(source).unwrap();
        template.execute(&Context::from_json(data).unwrap()).unwrap()
    }

    #[test]
    fn test_if_elif_else() {
        let source = "{% if n > 10 %}big{% elif n > 5 %}medium{% else %}small{% endif %}";
        assert_eq!(render(source, serde_json::json!({"n": 20})), "big");
        assert_eq!(render(source, serde_json::json!({"n": 7})), "medium");
        assert_eq!(render(source, serde_json::json!({"n": 1})), "small");
    }

    #[test]
    fn test_set_inside_if_is_visible() {
        assert_eq!(
            render("{% if true %}{% set x = 'y' %}{% endif %}{{ x }}", serde_json::json!({})),
            "y"
        );
    }

    #[test]
    fn test_for_loop() {
        let source = "{% for i in items %}{{ loop.index }}:{{ i }}{% if not loop.last %}, {% endif %}{% endfor %}";
        assert_eq!(
            render(source, serde_json::json!({"items": ["a", "b", "c"]})),
            "1:a, 2:b, 3:c"
        );
    }

    #[test]
    fn test_for_else_and_filter() {
        let source = "{% for i in items if i is odd %}{{ i }}{% else %}none{% endfor %}";
        assert_eq!(render(source, serde_json::json!({"items": [1, 2, 3]})), "13");
        assert_eq!(render(source, serde_json::json!({"items": [2, 4]})), "none");
        assert_eq!(render(source, serde_json::json!({"items": []})), "none");
    }

    #[test]
    fn test_for_unpacking_map() {
        let source = "{% for k, v in m %}{{ k }}={{ v }};{% endfor %}";
        assert_eq!(
            render(source, serde_json::json!({"m": {"a": 1, "b": 2}})),
            "a=1;b=2;"
        );
    }

    #[test]
    fn test_loop_scope_does_not_leak() {
        let source = "{% set i = 'outer' %}{% for i in [1, 2] %}{% set x = i %}{% endfor %}{{ i }}{{ x }}";
        assert_eq!(render(source, serde_json::json!({})), "outer");
    }

    #[test]
    fn test_block_set() {
        let source = "{% set greeting %}Hello {{ name }}{% endset %}[{{ greeting|upper }}]";
        assert_eq!(
            render(source, serde_json::json!({"name": "you"})),
            "[HELLO YOU]"
        );
    }

    #[test]
    fn test_not_iterable() {
        let template = Template::from_string("{% for x in 5 %}{% endfor %}").unwrap();
        let err = template.execute(&Context::new()).unwrap_err();
        assert!(err.to_string().contains("is not iterable"), "{err}");
    }
}

/*
 * integration_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Integration tests for quarto-jinja using test fixtures.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use quarto_jinja::builtins::filter_fn;
use quarto_jinja::{
    Config, Context, Environment, FileSystemLoader, MemoryLoader, Template, TemplateError, Value,
    ValueMap,
};
use serde_json::json;

/// Helper to get the path to test fixtures
fn fixture_path(name: &str) -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir).join("test-fixtures").join(name)
}

/// Helper to load a template from a fixtures subdirectory
fn load_template(dir: &str, name: &str) -> Template {
    let loader = Arc::new(FileSystemLoader::new(fixture_path(dir)));
    Template::new(name, &Config::new(), loader, &Environment::default())
        .unwrap_or_else(|err| panic!("Failed to load template {name}: {err}"))
}

fn render_string(source: &str, data: serde_json::Value) -> Result<String, TemplateError> {
    Template::from_string(source)?.execute(&Context::from_json(data)?)
}

#[test]
fn test_render_order() {
    let source = "A{% macro b() %}{% set inner = 'x' %}{% for i in [1] %}{% endfor %}B{% endmacro %}{{ b() }}C";
    assert_eq!(render_string(source, json!({})).unwrap(), "ABC");
}

#[test]
fn test_trim_directive() {
    assert_eq!(
        render_string("[{{- '' -}}  hello  {{- '' -}}]", json!({})).unwrap(),
        "[hello]"
    );
    assert_eq!(
        render_string("[{{ '' }}  hello  {{ '' }}]", json!({})).unwrap(),
        "[  hello  ]"
    );
}

#[test]
fn test_conditional_output() {
    assert_eq!(
        render_string("[{{ 'yes' if flag }}]", json!({"flag": false})).unwrap(),
        "[]"
    );
    assert_eq!(
        render_string("[{{ 'yes' if flag else 'no' }}]", json!({"flag": false})).unwrap(),
        "[no]"
    );
}

#[test]
fn test_conditional_error_names_line() {
    let template = Template::from_source(
        "page",
        "line one\n{{ 'x' if missing.attr }}",
        &Config::new().with_strict_undefined(true),
        Arc::new(MemoryLoader::new()),
        &Environment::default(),
    )
    .unwrap();
    let err = template.execute(&Context::new()).unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn test_autoescape() {
    let template = Template::from_source(
        "page",
        "{{ raw }}|{{ raw|safe }}",
        &Config::new().with_autoescape(true),
        Arc::new(MemoryLoader::new()),
        &Environment::default(),
    )
    .unwrap();
    let data = Context::new();
    data.set("raw", "<b>");
    assert_eq!(template.execute(&data).unwrap(), "&lt;b&gt;|<b>");

    let data = Context::new();
    data.set("raw", Value::safe("<b>"));
    assert_eq!(template.execute(&data).unwrap(), "<b>|<b>");
}

#[test]
fn test_json_data() {
    let data = json!({
        "title": "Report",
        "authors": [{"name": "Ada"}, {"name": "Grace"}],
    });
    let source = "{{ title }}: {% for a in authors %}{{ a.name }}{% if not loop.last %}, {% endif %}{% endfor %}";
    assert_eq!(render_string(source, data).unwrap(), "Report: Ada, Grace");
}

#[test]
fn test_invalid_data() {
    assert!(matches!(
        Context::from_json(json!([1, 2])),
        Err(TemplateError::InvalidData { .. })
    ));
}

#[test]
fn test_for_else_and_filter() {
    let source = "{% for n in nums if n is even %}{{ n }}{% else %}none{% endfor %}";
    assert_eq!(render_string(source, json!({"nums": [1, 2, 3, 4]})).unwrap(), "24");
    assert_eq!(render_string(source, json!({"nums": [1, 3]})).unwrap(), "none");
}

#[test]
fn test_loop_fixture() {
    let template = load_template("partials", "list.j2");
    let data = Context::from_json(json!({"items": ["a", "b"]})).unwrap();
    assert_eq!(
        template.execute(&data).unwrap(),
        "<ul>\n<li>1. a</li>\n<li>2. b</li>\n</ul>"
    );
}

#[test]
fn test_import_isolation() {
    let template = Template::from_source(
        "page",
        "{% import 'macros/helpers.j2' as h %}{{ h.bold('x') }}[{{ bold }}]",
        &Config::new(),
        Arc::new(FileSystemLoader::new(fixture_path(""))),
        &Environment::default(),
    )
    .unwrap();
    assert_eq!(template.execute(&Context::new()).unwrap(), "<b>x</b>[]");
}

#[test]
fn test_import_binds_exactly_the_alias() {
    let loader = MemoryLoader::with_templates([(
        "lib",
        "{% macro a() %}A{% endmacro %}{% macro b() %}B{% endmacro %}",
    )]);
    let template = Template::from_source(
        "page",
        "{% import 'lib' as L %}{{ L.a() }}{{ L.b() }}",
        &Config::new(),
        Arc::new(loader),
        &Environment::default(),
    )
    .unwrap();

    // Render into an environment whose scope we can inspect afterwards.
    let scope = Context::new();
    let mut output = String::new();
    let environment = template.environment(scope.clone());
    quarto_jinja::Renderer::new(
        environment,
        &mut output,
        template.config(),
        Arc::clone(template.loader()),
        Arc::clone(template.root()),
    )
    .execute()
    .unwrap();

    assert_eq!(output, "AB");
    assert_eq!(scope.keys(), vec!["L".to_string()]);
    let Some(Value::Map(module)) = scope.get("L") else {
        panic!("L is not a module");
    };
    let mut names: Vec<&String> = module.keys().collect();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
    scope.release();
}

#[test]
fn test_from_import_aliasing() {
    let template = Template::from_source(
        "page",
        "{% from 'macros/helpers.j2' import shout as yell %}{{ yell('hi') }}[{{ shout }}]",
        &Config::new(),
        Arc::new(FileSystemLoader::new(fixture_path(""))),
        &Environment::default(),
    )
    .unwrap();
    assert_eq!(template.execute(&Context::new()).unwrap(), "HI![]");
}

#[test]
fn test_imported_macros_call_siblings() {
    let template = Template::from_source(
        "page",
        "{% import 'macros/forms.j2' as forms %}{{ forms.field('email', 'Email') }}",
        &Config::new(),
        Arc::new(FileSystemLoader::new(fixture_path(""))),
        &Environment::default(),
    )
    .unwrap();
    assert_eq!(
        template.execute(&Context::new()).unwrap(),
        "<label for=\"email\">Email</label><input type=\"text\" name=\"email\" value=\"\">"
    );
}

#[test]
fn test_inheritance_fixture() {
    let template = load_template("layout", "page.j2");
    let data = Context::from_json(json!({"title": "Docs", "name": "Ada"})).unwrap();
    assert_eq!(
        template.execute(&data).unwrap(),
        "<title>Docs | Site</title>\n<main><b>Docs</b>Hello, Ada!</main>"
    );
}

#[test]
fn test_template_is_reusable() {
    let template = load_template("partials", "greeting.j2");
    assert_eq!(template.execute(&Context::new()).unwrap(), "Hello, stranger!");
    let data = Context::new();
    data.set("name", "Grace");
    assert_eq!(template.execute(&data).unwrap(), "Hello, Grace!");
    // The caller's data is not modified by rendering.
    assert_eq!(data.keys(), vec!["name".to_string()]);
}

#[test]
fn test_template_shared_across_threads() {
    let template = Arc::new(load_template("partials", "greeting.j2"));
    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let template = Arc::clone(&template);
            std::thread::spawn(move || {
                let data = Context::new();
                data.set("name", name);
                template.execute(&data).unwrap()
            })
        })
        .collect();
    let results: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec!["Hello, a!", "Hello, b!", "Hello, c!"]);
}

#[test]
fn test_custom_filter_registration() {
    let mut filters = quarto_jinja::builtins::filters();
    filters
        .register(
            "reverse",
            filter_fn(|_, value, _| {
                Value::from(value.to_string().chars().rev().collect::<String>())
            }),
        )
        .unwrap();
    assert!(matches!(
        filters.register("upper", filter_fn(|_, value, _| value.clone())),
        Err(TemplateError::AlreadyRegistered { .. })
    ));

    let environment = Environment::new(
        filters,
        quarto_jinja::statements::builtin(),
        quarto_jinja::builtins::tests(),
        Context::new(),
    );
    let template = Template::from_source(
        "page",
        "{{ word|reverse|upper }}",
        &Config::new(),
        Arc::new(MemoryLoader::new()),
        &environment,
    )
    .unwrap();
    let data = Context::new();
    data.set("word", "abc");
    assert_eq!(template.execute(&data).unwrap(), "CBA");
}

#[test]
fn test_error_is_wrapped_with_statement() {
    let template = Template::from_source(
        "page",
        "ok\n{% for x in items %}{{ x.missing }}{% endfor %}",
        &Config::new().with_strict_undefined(true),
        Arc::new(MemoryLoader::new()),
        &Environment::default(),
    )
    .unwrap();
    let err = template.execute(&Context::new()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("line 2"), "{message}");
    assert!(message.contains("'items' is undefined"), "{message}");
}

#[test]
fn test_map_value_from_rust() {
    let mut user = ValueMap::new();
    user.insert("name".to_string(), Value::from("Ada"));
    let data = Context::new();
    data.set("user", Value::Map(user));
    let template = Template::from_string("{{ user.name }} / {{ user['name'] }}").unwrap();
    assert_eq!(quarto_jinja::render(&template, &data).unwrap(), "Ada / Ada");
}

#[test]
fn test_huge_string_repeat_is_an_error() {
    let err = render_string("{{ 'ab' * n }}", json!({"n": 1e19})).unwrap_err();
    assert!(err.to_string().contains("String repeat too large"), "{err}");
    assert_eq!(
        render_string("{{ '-' * n }}", json!({"n": 3})).unwrap(),
        "---"
    );
}

#[test]
fn test_recursive_include_is_an_error() {
    let loader = MemoryLoader::with_templates([
        ("a", "{% include 'b' %}"),
        ("b", "{% include 'a' %}"),
    ]);
    let template =
        Template::new("a", &Config::new(), Arc::new(loader), &Environment::default()).unwrap();
    let err = template.execute(&Context::new()).unwrap_err();
    assert!(
        matches!(err.root_cause(), TemplateError::RecursiveTemplate { .. }),
        "{err}"
    );
}

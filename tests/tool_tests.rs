//! Tests for the tool system.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use conductor::tools::builtin::{edit_tool, glob_tool, grep_tool, read_tool, write_tool};
use conductor::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use conductor::tools::*;
use conductor::types::PermissionLevel;

fn input(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn file_engine() -> ToolEngine {
    let registry = ToolRegistry::builder()
        .tools([read_tool(), write_tool(), edit_tool(), glob_tool(), grep_tool()])
        .build()
        .unwrap();
    ToolEngine::new(registry)
}

// ── Parameters and arguments ──────────────────────────────────────────

#[test]
fn parameter_builder_constructs_schema() {
    let params = AgentToolParameters::object()
        .string("query", "Search query", true)
        .number("limit", "Max results", false)
        .boolean("verbose", "Enable verbose output", false)
        .build();

    let schema = &params.schema;
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["query"]["type"], "string");
    assert_eq!(schema["properties"]["limit"]["type"], "number");
    assert_eq!(schema["required"], json!(["query"]));
}

#[test]
fn parameter_builder_string_enum() {
    let params = AgentToolParameters::object()
        .string_enum("format", "Output format", &["md", "html", "txt"], true)
        .build();

    let enums = params.schema["properties"]["format"]["enum"].as_array().unwrap();
    assert_eq!(enums.len(), 3);
}

#[test]
fn tool_arguments_accessors() {
    let args = ToolArguments::new(json!({"name": "Alice", "count": 42, "active": true}));
    assert_eq!(args.get_str("name").unwrap(), "Alice");
    assert!(args.get_str("missing").is_err());
    assert_eq!(args.get_i64("count").unwrap(), 42);
    assert_eq!(args.get_u64_opt("count"), Some(42));
    assert!(args.get_bool("active").unwrap());
    assert!(!args.get_bool_or("missing", false));
    assert_eq!(args.get_str_opt("missing"), None);
}

#[test]
fn tool_arguments_deserialize() {
    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Params {
        query: String,
        limit: Option<u32>,
    }

    let args = ToolArguments::new(json!({"query": "rust", "limit": 10}));
    let params: Params = args.deserialize().unwrap();
    assert_eq!(params, Params { query: "rust".into(), limit: Some(10) });
}

#[test]
fn validation_reports_missing_and_mistyped_fields() {
    let schema = AgentToolParameters::object()
        .string("path", "Path", true)
        .integer("limit", "Limit", false)
        .build()
        .schema;
    assert!(validate_arguments(&json!({"path": "a"}), &schema).is_ok());
    assert!(validate_arguments(&json!({}), &schema).unwrap_err().contains("path"));
    assert!(validate_arguments(&json!({"path": "a", "limit": "ten"}), &schema).is_err());
}

// ── Tools and registry ────────────────────────────────────────────────

#[tokio::test]
async fn agent_tool_executes() {
    let tool = AgentTool::new(
        "greet",
        "Greet a person",
        AgentToolParameters::object().string("name", "Name", true).build(),
        |args, _ctx| async move {
            let name = args.get_str("name")?;
            Ok(json!({"greeting": format!("Hello, {}!", name)}))
        },
    );

    assert_eq!(tool.name(), "greet");
    assert_eq!(tool.permission_level(), PermissionLevel::Ask);
    assert!(!tool.ends_turn());

    let args = ToolArguments::new(json!({"name": "World"}));
    let result = tool
        .execute(&args, &ToolExecutionContext::new("s", std::env::temp_dir()))
        .await
        .unwrap();
    assert_eq!(result["greeting"], "Hello, World!");
}

#[test]
fn registry_rejects_duplicate_names() {
    let err = ToolRegistry::builder()
        .tool(read_tool())
        .tool(read_tool())
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("duplicate tool name: Read"));
}

#[test]
fn registry_overrides_and_subsets() {
    let registry = ToolRegistry::builder()
        .tools([read_tool(), write_tool()])
        .overrides([("Write".to_string(), PermissionLevel::Auto)].into_iter().collect())
        .build()
        .unwrap();

    assert_eq!(registry.permission_level("Read"), Some(PermissionLevel::Auto));
    assert_eq!(registry.permission_level("Write"), Some(PermissionLevel::Auto));
    assert_eq!(registry.definition("Write").unwrap().permission_level, PermissionLevel::Auto);
    assert_eq!(registry.permission_level("Nope"), None);

    let read_only = registry.subset(|name| READ_ONLY_TOOLS.contains(&name));
    assert_eq!(read_only.names(), vec!["Read"]);
    assert_eq!(registry.len(), 2);
}

// ── Engine with the file tools ────────────────────────────────────────

#[tokio::test]
async fn write_edit_read_round_trip_inside_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let engine = file_engine();
    let ctx = ToolExecutionContext::new("s", dir.path());

    let written = engine
        .execute("Write", &input(json!({"path": "src/app.txt", "content": "hello world\n"})), &ctx)
        .await;
    assert!(!written.is_error, "{}", written.content);

    let edited = engine
        .execute(
            "Edit",
            &input(json!({"path": "src/app.txt", "old_string": "world", "new_string": "there"})),
            &ctx,
        )
        .await;
    assert!(!edited.is_error, "{}", edited.content);

    let read = engine.execute("Read", &input(json!({"path": "src/app.txt"})), &ctx).await;
    assert!(!read.is_error);
    assert!(read.content.contains("hello there"));
    assert!(read.metadata.unwrap()["duration_ms"].is_u64());

    let globbed = engine.execute("Glob", &input(json!({"pattern": "**/*.txt"})), &ctx).await;
    assert!(globbed.content.contains("app.txt"));

    let grepped = engine.execute("Grep", &input(json!({"pattern": "hel+o"})), &ctx).await;
    assert!(grepped.content.contains(":1:hello there"));
}

#[tokio::test]
async fn paths_outside_the_working_dir_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = file_engine();
    let ctx = ToolExecutionContext::new("s", dir.path());

    let out = engine
        .execute("Write", &input(json!({"path": "../escape.txt", "content": "x"})), &ctx)
        .await;
    assert!(out.is_error);
    assert!(out.content.contains("outside the working directory"));
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn default_working_dir_still_confines_absolute_paths() {
    let engine = file_engine();
    let ctx = ToolExecutionContext::new("s", ".");
    let out = engine.execute("Read", &input(json!({"path": "/etc/passwd"})), &ctx).await;
    assert!(out.is_error);
    assert!(out.content.contains("outside the working directory"));
}

#[cfg(unix)]
#[tokio::test]
async fn writes_through_a_linked_directory_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
    let engine = file_engine();
    let ctx = ToolExecutionContext::new("s", dir.path());

    let out = engine
        .execute("Write", &input(json!({"path": "link/new.txt", "content": "x"})), &ctx)
        .await;
    assert!(out.is_error);
    assert!(out.content.contains("resolves outside the working directory"));
    assert!(!outside.path().join("new.txt").exists());
}

#[tokio::test]
async fn ambiguous_edit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dup.txt"), "a a a").unwrap();
    let engine = file_engine();
    let ctx = ToolExecutionContext::new("s", dir.path());

    let out = engine
        .execute("Edit", &input(json!({"path": "dup.txt", "old_string": "a", "new_string": "b"})), &ctx)
        .await;
    assert!(out.is_error);
    assert!(out.content.contains("occurs 3 times"));

    let out = engine
        .execute(
            "Edit",
            &input(json!({"path": "dup.txt", "old_string": "a", "new_string": "b", "replace_all": true})),
            &ctx,
        )
        .await;
    assert!(!out.is_error);
    assert_eq!(std::fs::read_to_string(dir.path().join("dup.txt")).unwrap(), "b b b");
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_tool() {
    let engine = file_engine();
    let ctx = ToolExecutionContext::new("s", std::env::temp_dir());
    let out = engine.execute("Read", &input(json!({"offset": 3})), &ctx).await;
    assert!(out.is_error);
    assert!(out.content.starts_with("Invalid arguments for Read"));
}

#[tokio::test]
async fn panicking_tool_becomes_an_error_result() {
    let tool: Arc<dyn Tool> = Arc::new(
        AgentTool::new("Boom", "panics", AgentToolParameters::empty(), |_args, _ctx| async {
            if true {
                panic!("kaboom");
            }
            Ok(json!(null))
        })
        .with_permission_level(PermissionLevel::Auto),
    );
    let engine = ToolEngine::new(ToolRegistry::builder().tool(tool).build().unwrap());
    let out = engine
        .execute("Boom", &Map::new(), &ToolExecutionContext::new("s", std::env::temp_dir()))
        .await;
    assert!(out.is_error);
    assert!(out.content.contains("kaboom"));
}

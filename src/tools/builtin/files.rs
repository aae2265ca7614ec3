//! File tools: `Read`, `Write`, `Edit`, `Glob`, `Grep`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use regex::RegexBuilder;
use serde_json::{json, Value};

use super::{display_path, io_error, resolve_path, truncate_utf8};
use crate::error::ConductorError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

const DEFAULT_READ_LINES: usize = 2000;
const GLOB_MAX_RESULTS: usize = 500;
const GREP_MAX_MATCHES: usize = 1000;

/// `Read`: file content with `cat -n` style line numbers.
pub fn read_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Read",
            "Read a text file from the working directory. Lines are numbered from 1. Use offset and limit to page through large files.",
            AgentToolParameters::object()
                .string("path", "File path, relative to the working directory", true)
                .integer("offset", "First line to return (1-based)", false)
                .integer("limit", "Maximum number of lines to return", false)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let raw = args.get_str("path")?;
                let path = resolve_path("Read", &ctx.working_dir, raw)?;
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| io_error("Read", raw, e))?;

                let total_bytes = bytes.len();
                let text = String::from_utf8_lossy(&bytes);
                let capped = truncate_utf8(&text, ctx.settings.read_max_bytes);
                if capped.is_empty() {
                    return Ok(Value::String("(empty file)".into()));
                }

                let offset = args.get_u64_opt("offset").unwrap_or(1).max(1) as usize;
                let limit = args
                    .get_u64_opt("limit")
                    .map(|l| l as usize)
                    .unwrap_or(DEFAULT_READ_LINES);
                let mut out = String::new();
                let mut shown = 0usize;
                for (idx, line) in capped.lines().enumerate().skip(offset - 1).take(limit) {
                    out.push_str(&format!("{:>6}\t{}\n", idx + 1, line));
                    shown += 1;
                }
                if shown == 0 {
                    return Err(ConductorError::tool(
                        "Read",
                        format!("offset {offset} is past the end of {raw}"),
                    ));
                }
                if total_bytes > ctx.settings.read_max_bytes {
                    out.push_str(&format!(
                        "... (truncated at {} of {} bytes)\n",
                        ctx.settings.read_max_bytes, total_bytes
                    ));
                }
                Ok(Value::String(out))
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

/// `Write`: create or overwrite a file, creating parent directories.
pub fn write_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Write",
            "Write content to a file in the working directory, creating parent directories if needed. Overwrites existing files.",
            AgentToolParameters::object()
                .string("path", "File path, relative to the working directory", true)
                .string("content", "Full file content", true)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let raw = args.get_str("path")?;
                let content = args.get_str("content")?;
                let path = resolve_path("Write", &ctx.working_dir, raw)?;

                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io_error("Write", raw, e))?;
                }
                tokio::fs::write(&path, content)
                    .await
                    .map_err(|e| io_error("Write", raw, e))?;

                Ok(json!({
                    "path": display_path(&ctx.working_dir, &path),
                    "bytes_written": content.len(),
                }))
            },
        )
        .with_permission_level(PermissionLevel::Ask),
    )
}

/// `Edit`: exact string replacement.
pub fn edit_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Edit",
            "Replace an exact string in a file. old_string must occur exactly once unless replace_all is true.",
            AgentToolParameters::object()
                .string("path", "File path, relative to the working directory", true)
                .string("old_string", "Exact text to replace", true)
                .string("new_string", "Replacement text", true)
                .boolean("replace_all", "Replace every occurrence", false)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let raw = args.get_str("path")?;
                let old = args.get_str("old_string")?;
                let new = args.get_str("new_string")?;
                let replace_all = args.get_bool_or("replace_all", false);
                if old.is_empty() {
                    return Err(ConductorError::tool("Edit", "old_string must not be empty"));
                }
                if old == new {
                    return Err(ConductorError::tool("Edit", "old_string and new_string are identical"));
                }

                let path = resolve_path("Edit", &ctx.working_dir, raw)?;
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| io_error("Edit", raw, e))?;

                let count = content.matches(old).count();
                let updated = match (count, replace_all) {
                    (0, _) => {
                        return Err(ConductorError::tool("Edit", format!("old_string not found in {raw}")));
                    }
                    (1, _) | (_, true) => content.replace(old, new),
                    (n, false) => {
                        return Err(ConductorError::tool(
                            "Edit",
                            format!("old_string occurs {n} times in {raw}; add context or set replace_all"),
                        ));
                    }
                };
                tokio::fs::write(&path, updated)
                    .await
                    .map_err(|e| io_error("Edit", raw, e))?;

                Ok(json!({
                    "path": display_path(&ctx.working_dir, &path),
                    "replacements": count,
                }))
            },
        )
        .with_permission_level(PermissionLevel::Ask),
    )
}

/// `Glob`: gitignore-aware file match.
pub fn glob_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Glob",
            "Find files by glob pattern (e.g. \"**/*.rs\"). Respects .gitignore. Returns paths relative to the working directory.",
            AgentToolParameters::object()
                .string("pattern", "Glob pattern", true)
                .string("path", "Directory to search from (defaults to the working directory)", false)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let pattern = args.get_str("pattern")?.to_string();
                let base = resolve_path("Glob", &ctx.working_dir, args.get_str_opt("path").unwrap_or("."))?;
                let root = ctx.working_dir.clone();

                let (paths, truncated) = tokio::task::spawn_blocking(move || {
                    walk_files(&base, Some(pattern.as_str())).map(|files| {
                        let truncated = files.len() > GLOB_MAX_RESULTS;
                        let paths: Vec<String> = files
                            .iter()
                            .take(GLOB_MAX_RESULTS)
                            .map(|p| display_path(&root, p))
                            .collect();
                        (paths, truncated)
                    })
                })
                .await
                .map_err(|e| ConductorError::tool("Glob", e.to_string()))??;

                if paths.is_empty() {
                    return Ok(Value::String("No files found".into()));
                }
                let mut out = paths.join("\n");
                if truncated {
                    out.push_str(&format!("\n... (showing first {GLOB_MAX_RESULTS})"));
                }
                Ok(Value::String(out))
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

/// `Grep`: regex search over file contents.
pub fn grep_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Grep",
            "Search file contents with a regular expression. Respects .gitignore. Output lines are path:line:text.",
            AgentToolParameters::object()
                .string("pattern", "Regular expression", true)
                .string("path", "File or directory to search (defaults to the working directory)", false)
                .string("glob", "Only search files matching this glob", false)
                .boolean("case_insensitive", "Ignore case", false)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let regex = RegexBuilder::new(args.get_str("pattern")?)
                    .case_insensitive(args.get_bool_or("case_insensitive", false))
                    .build()
                    .map_err(|e| ConductorError::InvalidArgument(format!("invalid pattern: {e}")))?;
                let base = resolve_path("Grep", &ctx.working_dir, args.get_str_opt("path").unwrap_or("."))?;
                let glob = args.get_str_opt("glob").map(str::to_string);
                let root = ctx.working_dir.clone();
                let max_bytes = ctx.settings.output_max_bytes;

                let matches = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ConductorError> {
                    let files = if base.is_file() {
                        vec![base]
                    } else {
                        walk_files(&base, glob.as_deref())?
                    };
                    let mut matches = Vec::new();
                    for file in files {
                        let Ok(bytes) = std::fs::read(&file) else {
                            continue;
                        };
                        if bytes.iter().take(8192).any(|b| *b == 0) {
                            continue;
                        }
                        let text = String::from_utf8_lossy(&bytes);
                        for (idx, line) in text.lines().enumerate() {
                            if regex.is_match(line) {
                                matches.push(format!("{}:{}:{}", display_path(&root, &file), idx + 1, line));
                                if matches.len() >= GREP_MAX_MATCHES {
                                    return Ok(matches);
                                }
                            }
                        }
                    }
                    Ok(matches)
                })
                .await
                .map_err(|e| ConductorError::tool("Grep", e.to_string()))??;

                if matches.is_empty() {
                    return Ok(Value::String("No matches found".into()));
                }
                let joined = matches.join("\n");
                if joined.len() > max_bytes {
                    let mut out = truncate_utf8(&joined, max_bytes);
                    out.push_str("\n... (truncated)");
                    return Ok(Value::String(out));
                }
                Ok(Value::String(joined))
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

/// Files under `base`, sorted, optionally filtered by a glob.
fn walk_files(base: &Path, glob: Option<&str>) -> Result<Vec<PathBuf>, ConductorError> {
    let mut builder = WalkBuilder::new(base);
    builder.require_git(false);
    if let Some(glob) = glob {
        let overrides = OverrideBuilder::new(base)
            .add(glob)
            .and_then(|b| b.build())
            .map_err(|e| ConductorError::InvalidArgument(format!("invalid glob '{glob}': {e}")))?;
        builder.overrides(overrides);
    }

    let mut files: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::arguments::ToolArguments;

    fn ctx(dir: &Path) -> ToolExecutionContext {
        ToolExecutionContext::new("s", dir)
    }

    fn args(value: Value) -> ToolArguments {
        ToolArguments::new(value)
    }

    // ── Read ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_numbers_lines_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\ngamma\n").unwrap();

        let all = read_tool()
            .execute(&args(json!({"path": "notes.txt"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(all, json!("     1\talpha\n     2\tbeta\n     3\tgamma\n"));

        let page = read_tool()
            .execute(&args(json!({"path": "notes.txt", "offset": 2, "limit": 1})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(page, json!("     2\tbeta\n"));
    }

    #[tokio::test]
    async fn read_caps_large_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        let mut context = ctx(dir.path());
        context.settings.read_max_bytes = 10;

        let out = read_tool()
            .execute(&args(json!({"path": "big.txt"})), &context)
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(text.starts_with("     1\txxxxxxxxxx\n"));
        assert!(text.contains("truncated at 10 of 100 bytes"));
    }

    #[tokio::test]
    async fn read_rejects_paths_outside_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_tool()
            .execute(&args(json!({"path": "../../etc/passwd"})), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the working directory"));
    }

    #[tokio::test]
    async fn read_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_tool()
            .execute(&args(json!({"path": "nope.txt"})), &ctx(dir.path()))
            .await
            .is_err());
    }

    // ── Write / Edit ──────────────────────────────────────────────────

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let out = write_tool()
            .execute(&args(json!({"path": "a/b/c.txt", "content": "hi"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn edit_requires_unique_match_unless_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "one two one").unwrap();

        let err = edit_tool()
            .execute(
                &args(json!({"path": "f.txt", "old_string": "one", "new_string": "1"})),
                &ctx(dir.path()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("occurs 2 times"));

        let out = edit_tool()
            .execute(
                &args(json!({"path": "f.txt", "old_string": "one", "new_string": "1", "replace_all": true})),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out["replacements"], 2);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "1 two 1");
    }

    #[tokio::test]
    async fn edit_reports_missing_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "abc").unwrap();
        let err = edit_tool()
            .execute(
                &args(json!({"path": "f.txt", "old_string": "zzz", "new_string": "y"})),
                &ctx(dir.path()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    // ── Glob / Grep ───────────────────────────────────────────────────

    fn seed_tree(dir: &Path) {
        std::fs::create_dir_all(dir.join("src/nested")).unwrap();
        std::fs::write(dir.join("src/lib.rs"), "pub fn hello() {}\n").unwrap();
        std::fs::write(dir.join("src/nested/mod.rs"), "fn Hello_world() {}\n").unwrap();
        std::fs::write(dir.join("README.md"), "hello docs\n").unwrap();
    }

    #[tokio::test]
    async fn glob_matches_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let out = glob_tool()
            .execute(&args(json!({"pattern": "*.rs"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out, json!("src/lib.rs\nsrc/nested/mod.rs"));
    }

    #[tokio::test]
    async fn glob_with_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let out = glob_tool()
            .execute(&args(json!({"pattern": "*.py"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out, json!("No files found"));
    }

    #[tokio::test]
    async fn grep_reports_path_line_and_text() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let out = grep_tool()
            .execute(
                &args(json!({"pattern": "hello", "glob": "*.rs", "case_insensitive": true})),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(
            out,
            json!("src/lib.rs:1:pub fn hello() {}\nsrc/nested/mod.rs:1:fn Hello_world() {}")
        );
    }

    #[tokio::test]
    async fn grep_rejects_bad_regex() {
        let dir = tempfile::tempdir().unwrap();
        let err = grep_tool()
            .execute(&args(json!({"pattern": "("})), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidArgument(_)));
    }
}

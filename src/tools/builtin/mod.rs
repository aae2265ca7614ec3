//! Built-in tools.
//!
//! File tools, `Bash`, `WebSearch`, `GenerateDocument`, `Skill` and
//! `ProposePlan`. Every path argument is resolved inside the session working
//! directory; anything that would land outside it is rejected.
//!
//! `AskUser` lives with the permission gate and the sub-agent tools live with
//! the orchestrator, since both need a handle to shared runtime state.

pub mod bash;
pub mod document;
pub mod files;
pub mod plan;
pub mod search;
pub mod skills;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::ConductorError;
use crate::tools::tool::Tool;

pub use bash::bash_tool;
pub use document::generate_document_tool;
pub use files::{edit_tool, glob_tool, grep_tool, read_tool, write_tool};
pub use plan::propose_plan_tool;
pub use search::{web_search_tool, BraveSearch, SearchBackend, SearchHit};
pub use skills::{skill_tool, DirectorySkillStore, Skill, SkillStore};

/// Every built-in that needs no runtime handle, in advertisement order.
pub fn builtin_tools(
    search: Arc<dyn SearchBackend>,
    search_max_results: usize,
    skills: Arc<dyn SkillStore>,
) -> Vec<Arc<dyn Tool>> {
    vec![
        read_tool(),
        write_tool(),
        edit_tool(),
        glob_tool(),
        grep_tool(),
        bash_tool(),
        web_search_tool(search, search_max_results),
        generate_document_tool(),
        skill_tool(skills),
        propose_plan_tool(),
    ]
}

pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

/// Resolve a tool path argument against the working directory.
///
/// The check is lexical first, then on disk: the deepest entry of the
/// candidate that already exists (symlinks included) must canonicalize to a
/// location under the canonical root. This covers files that do not exist
/// yet but would be created through a linked directory.
pub(crate) fn resolve_path(tool: &str, root: &Path, raw: &str) -> Result<PathBuf, ConductorError> {
    let root = absolute_root(tool, root)?;
    let candidate = normalize(&root.join(raw));
    if !candidate.starts_with(&root) {
        return Err(ConductorError::tool(
            tool,
            format!("path '{raw}' is outside the working directory"),
        ));
    }

    // a root that does not exist yet has nothing below it to follow
    let Ok(real_root) = root.canonicalize() else {
        return Ok(candidate);
    };
    let existing = candidate
        .ancestors()
        .find(|p| p.symlink_metadata().is_ok())
        .unwrap_or(root.as_path());
    let escapes = match existing.canonicalize() {
        Ok(real) => !real.starts_with(&real_root),
        // dangling link
        Err(_) => true,
    };
    if escapes {
        return Err(ConductorError::tool(
            tool,
            format!("path '{raw}' resolves outside the working directory"),
        ));
    }
    Ok(candidate)
}

/// Path shown back to the model: relative to the root when possible.
pub(crate) fn display_path(root: &Path, path: &Path) -> String {
    let root = absolute_root("", root).unwrap_or_else(|_| normalize(root));
    path.strip_prefix(&root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// The working directory as an absolute, lexically normalized path.
fn absolute_root(tool: &str, root: &Path) -> Result<PathBuf, ConductorError> {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| ConductorError::tool(tool, format!("cannot resolve working directory: {e}")))?
            .join(root)
    };
    let normalized = normalize(&absolute);
    if normalized.as_os_str().is_empty() || !normalized.is_absolute() {
        return Err(ConductorError::tool(
            tool,
            format!("invalid working directory '{}'", root.display()),
        ));
    }
    Ok(normalized)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn io_error(tool: &str, path: &str, err: std::io::Error) -> ConductorError {
    ConductorError::tool(tool, format!("{path}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_utf8_never_splits_codepoints() {
        let s = "ab\u{1F600}cd";
        assert_eq!(truncate_utf8(s, 0), "");
        assert_eq!(truncate_utf8(s, 2), "ab");
        assert_eq!(truncate_utf8(s, 3), "ab");
        assert_eq!(truncate_utf8(s, 5), "ab");
        assert_eq!(truncate_utf8(s, 6), "ab\u{1F600}");
    }

    #[test]
    fn relative_paths_resolve_inside_root() {
        let root = Path::new("/work/session");
        let path = resolve_path("Read", root, "src/../notes.md").unwrap();
        assert_eq!(path, PathBuf::from("/work/session/notes.md"));
        assert_eq!(display_path(root, &path), "notes.md");
    }

    #[test]
    fn escapes_are_rejected() {
        let root = Path::new("/work/session");
        assert!(resolve_path("Read", root, "../other/secret").is_err());
        assert!(resolve_path("Read", root, "/etc/passwd").is_err());
        assert!(resolve_path("Read", root, "/work/session/ok.txt").is_ok());
    }

    #[test]
    fn relative_root_is_anchored_at_the_current_dir() {
        assert!(resolve_path("Read", Path::new("."), "/etc/passwd").is_err());
        assert!(resolve_path("Read", Path::new(""), "/etc/passwd").is_err());
        assert!(resolve_path("Read", Path::new("."), "../outside.txt").is_err());

        let cwd = std::env::current_dir().unwrap();
        let path = resolve_path("Read", Path::new("."), "src/lib.rs").unwrap();
        assert_eq!(path, cwd.join("src/lib.rs"));
        assert_eq!(display_path(Path::new("."), &path), "src/lib.rs");
    }

    #[cfg(unix)]
    #[test]
    fn links_out_of_the_root_are_rejected_even_for_new_files() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), root.path().join("dangling")).unwrap();

        assert!(resolve_path("Write", root.path(), "link/new.txt").is_err());
        assert!(resolve_path("Write", root.path(), "link/deeper/new.txt").is_err());
        assert!(resolve_path("Write", root.path(), "dangling").is_err());
        assert!(resolve_path("Write", root.path(), "fresh/dir/new.txt").is_ok());
    }

    #[test]
    fn builtin_names_are_unique() {
        let tools = builtin_tools(
            Arc::new(BraveSearch::new("http://localhost", None)),
            5,
            Arc::new(DirectorySkillStore::new("/nonexistent")),
        );
        let mut names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }
}

//! `GenerateDocument`: write a formatted document under `outputs/`.

use std::sync::Arc;

use serde_json::json;
use strum::{Display, EnumString};

use super::{display_path, io_error, resolve_path};
use crate::error::ConductorError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

pub const OUTPUT_DIR: &str = "outputs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DocumentFormat {
    Markdown,
    Html,
    Text,
}

impl DocumentFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
            Self::Text => "txt",
        }
    }

    fn render(self, title: &str, body: &str) -> String {
        match self {
            Self::Markdown => format!("# {title}\n\n{body}\n"),
            Self::Text => format!("{title}\n{}\n\n{body}\n", "=".repeat(title.chars().count())),
            // body is already HTML
            Self::Html => format!(
                "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{t}</title>\n</head>\n<body>\n<h1>{t}</h1>\n{body}\n</body>\n</html>\n",
                t = escape_html(title)
            ),
        }
    }
}

pub fn generate_document_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "GenerateDocument",
            "Create a document file (markdown, html or text) in the outputs/ directory of the working directory.",
            AgentToolParameters::object()
                .string("title", "Document title", true)
                .string("content", "Document body; HTML markup when format is html", true)
                .string_enum("format", "Output format (default markdown)", &["markdown", "html", "text"], false)
                .string("filename", "File name without extension (defaults to the title)", false)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let title = args.get_str("title")?;
                let content = args.get_str("content")?;
                let format: DocumentFormat = args
                    .get_str_opt("format")
                    .unwrap_or("markdown")
                    .parse()
                    .map_err(|_| ConductorError::InvalidArgument("format must be markdown, html or text".into()))?;
                let stem = slugify(args.get_str_opt("filename").unwrap_or(title));

                let path = resolve_path(
                    "GenerateDocument",
                    &ctx.working_dir,
                    &format!("{OUTPUT_DIR}/{stem}.{}", format.extension()),
                )?;
                if let Some(dir) = path.parent() {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .map_err(|e| io_error("GenerateDocument", OUTPUT_DIR, e))?;
                }
                let rendered = format.render(title, content);
                tokio::fs::write(&path, &rendered)
                    .await
                    .map_err(|e| io_error("GenerateDocument", &stem, e))?;

                Ok(json!({
                    "path": display_path(&ctx.working_dir, &path),
                    "format": format.to_string(),
                    "bytes": rendered.len(),
                }))
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

/// Lowercase ascii alphanumerics joined by single dashes.
fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::arguments::ToolArguments;

    #[test]
    fn slugs_strip_path_characters() {
        assert_eq!(slugify("Q3 Report: Final!"), "q3-report-final");
        assert_eq!(slugify("../../etc/passwd"), "etc-passwd");
        assert_eq!(slugify("???"), "document");
    }

    #[tokio::test]
    async fn writes_markdown_into_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let out = generate_document_tool()
            .execute(
                &ToolArguments::new(json!({"title": "Weekly Notes", "content": "- done"})),
                &ToolExecutionContext::new("s", dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out["path"], "outputs/weekly-notes.md");
        let written = std::fs::read_to_string(dir.path().join("outputs/weekly-notes.md")).unwrap();
        assert_eq!(written, "# Weekly Notes\n\n- done\n");
    }

    #[tokio::test]
    async fn html_escapes_the_title() {
        let dir = tempfile::tempdir().unwrap();
        generate_document_tool()
            .execute(
                &ToolArguments::new(json!({
                    "title": "A <b> test",
                    "content": "<p>hi</p>",
                    "format": "html",
                    "filename": "page"
                })),
                &ToolExecutionContext::new("s", dir.path()),
            )
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("outputs/page.html")).unwrap();
        assert!(written.contains("<title>A &lt;b&gt; test</title>"));
        assert!(written.contains("<p>hi</p>"));
    }
}

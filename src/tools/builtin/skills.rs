//! `Skill`: on-demand instructions loaded from a skill store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConductorError, Result};
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

const SKILL_FILE_NAME: &str = "SKILL.md";

/// A loaded skill.
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Markdown body after the front-matter.
    pub instructions: String,
}

#[async_trait]
pub trait SkillStore: Send + Sync {
    /// Name and description of every available skill.
    async fn list(&self) -> Result<Vec<(String, String)>>;

    async fn load(&self, name: &str) -> Result<Skill>;
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: Option<String>,
    #[serde(default)]
    description: String,
}

/// Reads `<root>/<name>/SKILL.md` files with YAML front-matter.
#[derive(Debug, Clone)]
pub struct DirectorySkillStore {
    root: PathBuf,
}

impl DirectorySkillStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn skill_file(&self, name: &str) -> Result<PathBuf> {
        if !valid_skill_name(name) {
            return Err(ConductorError::InvalidArgument(format!(
                "invalid skill name '{name}'"
            )));
        }
        Ok(self.root.join(name).join(SKILL_FILE_NAME))
    }
}

#[async_trait]
impl SkillStore for DirectorySkillStore {
    async fn list(&self) -> Result<Vec<(String, String)>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut skills = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let file = entry.path().join(SKILL_FILE_NAME);
            let Ok(raw) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            match parse_skill(&file, &name, &raw) {
                Ok(skill) => skills.push((skill.name, skill.description)),
                Err(e) => tracing::warn!(path = %file.display(), error = %e, "skipping skill"),
            }
        }
        skills.sort();
        Ok(skills)
    }

    async fn load(&self, name: &str) -> Result<Skill> {
        let file = self.skill_file(name)?;
        let raw = tokio::fs::read_to_string(&file).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConductorError::InvalidArgument(format!("unknown skill '{name}'"))
            } else {
                e.into()
            }
        })?;
        parse_skill(&file, name, &raw)
    }
}

fn valid_skill_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !name.starts_with('-')
}

/// Split `---` delimited front-matter from the body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            return Some((&rest[..offset], body));
        }
        offset += line.len();
    }
    None
}

fn parse_skill(path: &Path, dir_name: &str, raw: &str) -> Result<Skill> {
    let Some((front, body)) = split_frontmatter(raw) else {
        return Ok(Skill {
            name: dir_name.to_string(),
            description: String::new(),
            instructions: raw.trim().to_string(),
        });
    };
    let meta: SkillFrontmatter = serde_yaml::from_str(front).map_err(|e| {
        ConductorError::Configuration(format!("{}: invalid front-matter: {e}", path.display()))
    })?;
    Ok(Skill {
        name: meta.name.unwrap_or_else(|| dir_name.to_string()),
        description: meta.description,
        instructions: body.trim().to_string(),
    })
}

/// Create the `Skill` tool over `store`.
pub fn skill_tool(store: Arc<dyn SkillStore>) -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Skill",
            "Load the instructions of a named skill. Call without a name to list available skills.",
            AgentToolParameters::object()
                .string("name", "Skill name", false)
                .build(),
            move |args, _ctx: ToolExecutionContext| {
                let store = store.clone();
                async move {
                    let Some(name) = args.get_str_opt("name") else {
                        let skills = store.list().await?;
                        if skills.is_empty() {
                            return Ok(Value::String("No skills available".into()));
                        }
                        let listing = skills
                            .iter()
                            .map(|(name, desc)| format!("- {name}: {desc}"))
                            .collect::<Vec<_>>()
                            .join("\n");
                        return Ok(Value::String(listing));
                    };
                    let skill = store.load(name).await?;
                    Ok(Value::String(format!("# Skill: {}\n\n{}", skill.name, skill.instructions)))
                }
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

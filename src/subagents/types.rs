//! Sub-agent task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::tools::READ_ONLY_TOOLS;

/// Tools a sub-agent never receives: no further spawning and no questions
/// the parent's user cannot see.
pub const RECURSIVE_TOOLS: &[&str] = &["Task", "AwaitTasks", "CancelTask", "AskUser"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SubAgentType {
    /// Shell only.
    Bash,
    GeneralPurpose,
    /// Read-only investigation.
    Explore,
    /// Read-only plus `ProposePlan`.
    Plan,
}

impl SubAgentType {
    pub const ALL: [SubAgentType; 4] = [Self::Bash, Self::GeneralPurpose, Self::Explore, Self::Plan];

    /// Whether a tool belongs to this type's subset.
    pub fn allows(self, tool: &str) -> bool {
        if RECURSIVE_TOOLS.contains(&tool) {
            return false;
        }
        match self {
            Self::Bash => tool == "Bash",
            Self::Explore => READ_ONLY_TOOLS.contains(&tool),
            Self::Plan => READ_ONLY_TOOLS.contains(&tool) || tool == "ProposePlan",
            Self::GeneralPurpose => true,
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Bash => {
                "You are a command execution agent. Run the shell commands the task needs, \
                 check their output and report the results concisely."
            }
            Self::GeneralPurpose => {
                "You are a general-purpose agent working on a delegated task. Use the available \
                 tools to complete it and finish with a concise report of what you did and found."
            }
            Self::Explore => {
                "You are an exploration agent. Find the relevant files and code with Glob, Grep \
                 and Read. Do not modify anything. Finish with a concise summary of your findings."
            }
            Self::Plan => {
                "You are a planning agent. Investigate with the read-only tools, then submit a \
                 numbered implementation plan with ProposePlan."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubAgentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Snapshot of one sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubAgentTask {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: SubAgentType,
    pub status: SubAgentStatus,
    /// Model calls made so far.
    pub turns: usize,
    pub max_turns: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub prompt: String,
    /// Scope of the parent session.
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_are_kebab_case() {
        assert_eq!(SubAgentType::GeneralPurpose.to_string(), "general-purpose");
        assert_eq!("explore".parse::<SubAgentType>().ok(), Some(SubAgentType::Explore));
        assert_eq!(
            serde_json::to_value(SubAgentType::GeneralPurpose).unwrap(),
            "general-purpose"
        );
    }

    #[test]
    fn subsets_follow_type() {
        assert!(SubAgentType::Bash.allows("Bash"));
        assert!(!SubAgentType::Bash.allows("Read"));
        assert!(SubAgentType::Explore.allows("Grep"));
        assert!(!SubAgentType::Explore.allows("Write"));
        assert!(!SubAgentType::Explore.allows("ProposePlan"));
        assert!(SubAgentType::Plan.allows("ProposePlan"));
        assert!(SubAgentType::GeneralPurpose.allows("Edit"));
    }

    #[test]
    fn recursion_guard_applies_to_every_type() {
        for task_type in SubAgentType::ALL {
            for tool in RECURSIVE_TOOLS {
                assert!(!task_type.allows(tool), "{task_type} must not get {tool}");
            }
        }
    }
}

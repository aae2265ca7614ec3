//! Transcript compaction that never splits a tool_use/tool_result pair.

use crate::config::CompactionSettings;
use crate::types::{CanonicalMessage, ContentBlock, Role};

const PREVIEW_CHARS: usize = 120;
pub const SUMMARY_HEADER: &str = "[Earlier conversation compacted]";

/// Result of a compaction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    pub transcript: Vec<CanonicalMessage>,
    /// Messages folded into the summary.
    pub removed: usize,
}

/// Compact once the transcript is longer than `max_messages`.
pub fn maybe_compact(messages: &[CanonicalMessage], settings: CompactionSettings) -> Option<Compaction> {
    if messages.len() <= settings.max_messages {
        return None;
    }
    compact(messages, settings.keep_recent)
}

/// Summarize everything but the last `keep_recent` units. With too few units
/// the oldest one is still summarized. System messages are always kept.
pub fn compact(messages: &[CanonicalMessage], keep_recent: usize) -> Option<Compaction> {
    let (system, rest): (Vec<&CanonicalMessage>, Vec<&CanonicalMessage>) =
        messages.iter().partition(|m| m.role == Role::System);
    let units = split_units(&rest);
    if units.len() < 2 {
        return None;
    }
    let keep = keep_recent.max(1).min(units.len() - 1);
    let (old, recent) = units.split_at(units.len() - keep);

    let mut lines = vec![SUMMARY_HEADER.to_string()];
    for message in old.iter().flat_map(|unit| unit.iter()) {
        lines.push(summarize(message));
    }
    let removed = lines.len() - 1;
    let summary = lines.join("\n");

    let mut transcript: Vec<CanonicalMessage> =
        system.into_iter().map(CanonicalMessage::clone).collect();
    let mut kept: Vec<CanonicalMessage> = recent
        .iter()
        .flat_map(|unit| unit.iter().map(|m| CanonicalMessage::clone(m)))
        .collect();
    match kept.first_mut() {
        // fold into the human turn so roles keep alternating
        Some(first) if first.role == Role::User && !first.has_tool_result() => {
            first.content.insert(0, ContentBlock::text(summary));
        }
        _ => transcript.push(CanonicalMessage::user(summary)),
    }
    transcript.extend(kept);

    Some(Compaction { transcript, removed })
}

/// An assistant tool_use message plus the tool_result message answering it,
/// or a single message.
fn split_units<'a, 'b>(messages: &'b [&'a CanonicalMessage]) -> Vec<&'b [&'a CanonicalMessage]> {
    let mut units = Vec::new();
    let mut i = 0usize;
    while i < messages.len() {
        let paired = messages[i].role == Role::Assistant
            && messages[i].has_tool_use()
            && messages
                .get(i + 1)
                .is_some_and(|next| next.role == Role::User && next.has_tool_result());
        let len = if paired { 2 } else { 1 };
        units.push(&messages[i..i + len]);
        i += len;
    }
    units
}

fn summarize(message: &CanonicalMessage) -> String {
    let tools: Vec<String> = message.tool_calls().into_iter().map(|c| c.name).collect();
    let (results, errors) = message.content.iter().fold((0, 0), |(r, e), block| match block {
        ContentBlock::ToolResult { is_error, .. } => (r + 1, e + usize::from(*is_error)),
        _ => (r, e),
    });

    let mut line = format!("- {}", message.role);
    if !tools.is_empty() {
        line.push_str(&format!(" [tools: {}]", tools.join(", ")));
    }
    if results > 0 {
        line.push_str(&format!(" [{results} tool results, {errors} errors]"));
    }
    let text = message.text().split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        line.push_str(": ");
        line.extend(text.chars().take(PREVIEW_CHARS));
        if text.chars().count() > PREVIEW_CHARS {
            line.push_str("...");
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::sanitize::unpaired_tool_uses;
    use serde_json::Map;

    fn tool_turn(id: &str, tool: &str) -> [CanonicalMessage; 2] {
        [
            CanonicalMessage::new(
                Role::Assistant,
                vec![ContentBlock::tool_use(id, tool, Map::new())],
            ),
            CanonicalMessage::tool_results(vec![ContentBlock::tool_result(id, "ok", false)]),
        ]
    }

    fn long_transcript() -> Vec<CanonicalMessage> {
        let mut messages = vec![
            CanonicalMessage::system("be brief"),
            CanonicalMessage::user("refactor the parser"),
        ];
        for i in 0..5 {
            messages.extend(tool_turn(&format!("t{i}"), "Read"));
        }
        messages.push(CanonicalMessage::assistant("done"));
        messages
    }

    #[test]
    fn under_threshold_is_untouched() {
        let settings = CompactionSettings {
            max_messages: 100,
            keep_recent: 2,
        };
        assert!(maybe_compact(&long_transcript(), settings).is_none());
    }

    #[test]
    fn pairs_are_never_split() {
        let messages = long_transcript();
        for keep in 1..8 {
            let compacted = compact(&messages, keep).unwrap();
            assert!(
                unpaired_tool_uses(&compacted.transcript).is_empty(),
                "keep={keep} produced an unpaired transcript"
            );
            assert!(compacted
                .transcript
                .iter()
                .all(|m| !m.is_tool_result_only() || m.tool_result_ids().len() == 1));
        }
    }

    #[test]
    fn summary_lists_roles_and_tools() {
        let messages = long_transcript();
        let compacted = compact(&messages, 2).unwrap();

        assert_eq!(compacted.transcript[0].role, Role::System);
        let summary = compacted.transcript[1].text();
        assert!(summary.starts_with(SUMMARY_HEADER));
        assert!(summary.contains("- user: refactor the parser"));
        assert!(summary.contains("- assistant [tools: Read]"));
        assert!(summary.contains("- user [1 tool results, 0 errors]"));

        // last two units: the final tool pair and the closing assistant text
        assert_eq!(compacted.transcript.len(), 2 + 3);
        assert_eq!(compacted.transcript.last().unwrap().text(), "done");
        assert_eq!(compacted.removed, 1 + 4 * 2);
    }

    #[test]
    fn summary_folds_into_a_leading_human_turn() {
        let mut messages = vec![CanonicalMessage::assistant("earlier")];
        messages.push(CanonicalMessage::user("latest question"));
        let compacted = compact(&messages, 1).unwrap();
        assert_eq!(compacted.transcript.len(), 1);
        let first = &compacted.transcript[0];
        assert_eq!(first.role, Role::User);
        assert_eq!(first.content.len(), 2);
        assert!(first.text().contains("latest question"));
    }

    #[test]
    fn single_unit_cannot_compact() {
        assert!(compact(&[CanonicalMessage::user("hi")], 1).is_none());
    }
}

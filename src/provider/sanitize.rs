//! Transcript repair for the tool_use/tool_result pairing.

use crate::types::{CanonicalMessage, ContentBlock, Role};

pub const MISSING_RESULT: &str = "missing tool result in transcript; inserted synthetic error result";

/// Make every assistant tool_use answered by exactly one tool_result in the
/// following user message, in call order.
///
/// Missing results become synthetic error results. Duplicate and orphan
/// results are dropped. Other user content is kept after the results.
pub fn sanitize_tool_result_pairing(messages: &[CanonicalMessage]) -> Vec<CanonicalMessage> {
    let mut out: Vec<CanonicalMessage> = Vec::with_capacity(messages.len());

    let mut i = 0usize;
    while i < messages.len() {
        let msg = &messages[i];
        let calls = if msg.role == Role::Assistant {
            msg.tool_calls()
        } else {
            Vec::new()
        };

        if calls.is_empty() {
            if let Some(cleaned) = drop_tool_results(msg) {
                out.push(cleaned);
            }
            i += 1;
            continue;
        }

        out.push(msg.clone());

        let follower = messages.get(i + 1).filter(|m| m.role == Role::User);
        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let existing = follower.and_then(|m| {
                m.content.iter().find(|block| {
                    matches!(block, ContentBlock::ToolResult { tool_use_id, .. } if *tool_use_id == call.id)
                })
            });
            results.push(match existing {
                Some(block) => block.clone(),
                None => ContentBlock::tool_result(call.id.clone(), MISSING_RESULT, true),
            });
        }

        let mut content = results;
        let mut reply = CanonicalMessage::tool_results(Vec::new());
        if let Some(next) = follower {
            content.extend(
                next.content
                    .iter()
                    .filter(|b| !matches!(b, ContentBlock::ToolResult { .. }))
                    .cloned(),
            );
            reply.id = next.id.clone();
            reply.timestamp = next.timestamp;
            i += 2;
        } else {
            i += 1;
        }
        reply.content = content;
        out.push(reply);
    }

    out
}

/// Ids of tool_use blocks without exactly one matching tool_result in the
/// next message. Empty when the transcript is well paired.
pub fn unpaired_tool_uses(messages: &[CanonicalMessage]) -> Vec<String> {
    let mut unpaired = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        if msg.role != Role::Assistant {
            continue;
        }
        let next_ids: Vec<&str> = messages
            .get(idx + 1)
            .map(|m| m.tool_result_ids())
            .unwrap_or_default();
        for call in msg.tool_calls() {
            if next_ids.iter().filter(|id| **id == call.id).count() != 1 {
                unpaired.push(call.id);
            }
        }
    }
    unpaired
}

fn drop_tool_results(msg: &CanonicalMessage) -> Option<CanonicalMessage> {
    if !msg.has_tool_result() {
        return Some(msg.clone());
    }
    let mut next = msg.clone();
    // orphans: no preceding tool_use
    next.content
        .retain(|b| !matches!(b, ContentBlock::ToolResult { .. }));
    if next.content.is_empty() {
        None
    } else {
        Some(next)
    }
}

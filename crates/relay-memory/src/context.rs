use std::collections::VecDeque;

use serde::Serialize;

use crate::session::{Role, Turn};

/// The shape handed to an external generation call: role plus content, no
/// timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Rough token estimate used across the whole pipeline: four characters per
/// token, rounding down.
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count() / 4
}

/// Selects the largest recency-anchored suffix of `turns` that fits the
/// budget. Walks newest to oldest and stops once a turn would overflow
/// `max_tokens` and something is already accepted; the first candidate is
/// always taken even when it alone exceeds the budget, so any non-empty
/// history yields non-empty context. Pure transform over a history snapshot.
pub fn assemble_context(turns: &[Turn], max_tokens: usize) -> Vec<ChatMessage> {
    let mut accepted = VecDeque::new();
    let mut used_tokens = 0_usize;

    for turn in turns.iter().rev() {
        let cost = estimate_tokens(&turn.content);
        if used_tokens + cost > max_tokens && !accepted.is_empty() {
            break;
        }
        accepted.push_front(ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        });
        used_tokens += cost;
    }

    accepted.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, content: &str, at: i64) -> Turn {
        Turn {
            role,
            content: content.to_string(),
            created_at_ms: at,
        }
    }

    #[test]
    fn empty_history_yields_empty_context() {
        assert!(assemble_context(&[], 4096).is_empty());
    }

    #[test]
    fn budget_keeps_only_the_newest_turns_oldest_first() {
        // Four turns of 200 chars = 50 estimated tokens apiece.
        let turns: Vec<Turn> = (0..4)
            .map(|i| turn(Role::User, &format!("{i}").repeat(200), i))
            .collect();
        let context = assemble_context(&turns, 120);
        assert_eq!(context.len(), 2);
        assert!(context[0].content.starts_with('2'));
        assert!(context[1].content.starts_with('3'));
    }

    #[test]
    fn oversized_single_turn_is_still_included() {
        let turns = vec![turn(Role::User, &"x".repeat(1_000), 0)];
        let context = assemble_context(&turns, 10);
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content.len(), 1_000);
    }

    #[test]
    fn oversized_newest_turn_blocks_older_ones() {
        let turns = vec![
            turn(Role::User, &"a".repeat(40), 0),
            turn(Role::Assistant, &"b".repeat(400), 1),
        ];
        let context = assemble_context(&turns, 10);
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::Assistant);
    }

    #[test]
    fn whole_history_fits_when_budget_allows() {
        let turns = vec![
            turn(Role::System, "be brief", 0),
            turn(Role::User, "hi", 1),
            turn(Role::Assistant, "hello", 2),
        ];
        let context = assemble_context(&turns, 4096);
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].role, Role::System);
        assert_eq!(context[2].role, Role::Assistant);
    }

    #[test]
    fn estimate_rounds_down() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefg"), 1);
    }
}

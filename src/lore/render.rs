//! Serialization of lore entries for the external relevance selector.
//!
//! The selector receives two text blocks: a "context" block of constant
//! entries (included in full, since they will be in the prompt anyway)
//! and a "candidate" block of everything else, with content truncated to
//! a head/tail window and tagged with the entry's dormancy status.

use super::activation::DORMANCY_TURNS;
use super::entry::{LoreEntry, LoreRuntimeState, ManualOverrides};

/// Characters of candidate content kept from the start.
pub const CANDIDATE_HEAD_CHARS: usize = 300;

/// Characters of candidate content kept from the end.
pub const CANDIDATE_TAIL_CHARS: usize = 100;

/// The two serialized blocks sent to the relevance selector.
#[derive(Debug, Clone, Default)]
pub struct SelectorBlocks {
    /// Constant entries, uncapped.
    pub context: String,
    /// Non-constant candidates with truncated content and status tags.
    pub candidates: String,
}

impl SelectorBlocks {
    /// Whether there are no candidates to select from.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Render the selector blocks for a set of entries.
///
/// Disabled entries are omitted entirely; the selector should never be
/// offered something the scan would refuse to activate.
pub fn render_selector_blocks(
    entries: &[LoreEntry],
    overrides: &ManualOverrides,
    runtime: &LoreRuntimeState,
    turn: u32,
) -> SelectorBlocks {
    let mut blocks = SelectorBlocks::default();

    for entry in entries {
        if !overrides.effective_enabled(entry) {
            continue;
        }
        if entry.constant {
            blocks.context.push_str(&format!(
                "[{}] {}\n{}\n\n",
                entry.uid,
                display_name(entry),
                entry.content
            ));
        } else {
            blocks.candidates.push_str(&format!(
                "[{}] {}{}\n{}\n\n",
                entry.uid,
                display_name(entry),
                status_tag(entry, runtime, turn),
                truncate_head_tail(&entry.content, CANDIDATE_HEAD_CHARS, CANDIDATE_TAIL_CHARS)
            ));
        }
    }

    blocks
}

fn display_name(entry: &LoreEntry) -> &str {
    if entry.name.is_empty() {
        "(unnamed)"
    } else {
        &entry.name
    }
}

fn status_tag(entry: &LoreEntry, runtime: &LoreRuntimeState, turn: u32) -> &'static str {
    if !entry.is_dynamic() {
        return "";
    }
    match runtime.get(&entry.uid) {
        Some(r) if turn.saturating_sub(r.last_active_turn) > DORMANCY_TURNS => " (dormant)",
        Some(_) => " (recently active)",
        None => " (never activated)",
    }
}

/// Keep the first `head` and last `tail` characters of `text`, marking
/// the elision. Operates on char boundaries.
fn truncate_head_tail(text: &str, head: usize, tail: usize) -> String {
    let total_chars = text.chars().count();
    if total_chars <= head + tail {
        return text.to_string();
    }

    let head_end = text
        .char_indices()
        .nth(head)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail_start = text
        .char_indices()
        .nth(total_chars - tail)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    format!("{} […] {}", &text[..head_end], &text[tail_start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_uncapped_in_context_block() {
        let long = "x".repeat(2000);
        let entries = vec![LoreEntry::new("c1", long.clone()).with_name("World").constant()];
        let blocks = render_selector_blocks(
            &entries,
            &ManualOverrides::new(),
            &LoreRuntimeState::new(),
            1,
        );

        assert!(blocks.context.contains(&long));
        assert!(blocks.candidates.is_empty());
    }

    #[test]
    fn test_candidates_truncated() {
        let content = format!("{}{}{}", "H".repeat(300), "M".repeat(500), "T".repeat(100));
        let entries = vec![LoreEntry::new("k1", content).with_name("Long")];
        let blocks = render_selector_blocks(
            &entries,
            &ManualOverrides::new(),
            &LoreRuntimeState::new(),
            1,
        );

        assert!(blocks.candidates.contains("[…]"));
        assert!(!blocks.candidates.contains('M'));
        assert!(blocks.candidates.contains(&"H".repeat(300)));
        assert!(blocks.candidates.contains(&"T".repeat(100)));
    }

    #[test]
    fn test_short_candidate_not_truncated() {
        let entries = vec![LoreEntry::new("k1", "short content")];
        let blocks = render_selector_blocks(
            &entries,
            &ManualOverrides::new(),
            &LoreRuntimeState::new(),
            1,
        );
        assert!(blocks.candidates.contains("short content"));
        assert!(!blocks.candidates.contains("[…]"));
    }

    #[test]
    fn test_disabled_entries_omitted() {
        let entries = vec![
            LoreEntry::new("c1", "on").constant(),
            LoreEntry::new("c2", "off").constant().disabled(),
            LoreEntry::new("k1", "off too").disabled(),
        ];
        let blocks = render_selector_blocks(
            &entries,
            &ManualOverrides::new(),
            &LoreRuntimeState::new(),
            1,
        );

        assert!(blocks.context.contains("c1"));
        assert!(!blocks.context.contains("c2"));
        assert!(blocks.candidates.is_empty());
    }

    #[test]
    fn test_dormancy_tag() {
        let entries = vec![LoreEntry::new("dyn_r1", "a rumor")];
        let mut runtime = LoreRuntimeState::new();
        runtime.note_activation(&entries[0], 2);

        let blocks = render_selector_blocks(&entries, &ManualOverrides::new(), &runtime, 20);
        assert!(blocks.candidates.contains("(dormant)"));

        let blocks = render_selector_blocks(&entries, &ManualOverrides::new(), &runtime, 5);
        assert!(blocks.candidates.contains("(recently active)"));
    }

    #[test]
    fn test_truncate_char_boundaries() {
        let text = "é".repeat(500);
        let out = truncate_head_tail(&text, 300, 100);
        assert!(out.starts_with('é'));
        assert!(out.contains("[…]"));
    }
}

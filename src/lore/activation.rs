//! The lore activation engine.
//!
//! [`scan`] is a pure function from (text, entries, overrides, runtime
//! state, turn) to (active entries, next runtime state). It never fails:
//! malformed keys and duplicate uids are logged and skipped.
//!
//! Selection proceeds in a fixed order, unioned into one active set:
//! constants, pinned entries, sticky carry-over, externally selected
//! entries, then a bounded recursive keyword cascade. Entries activated
//! by a fresh match (external selection or keyword) are "touched", which
//! refreshes their activation age and (re)arms their declared sticky and
//! cooldown counters.

use super::entry::{LoreEntry, LoreRuntimeState, ManualOverrides};
use super::matcher::any_key_matches;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Turns of inactivity after which a dynamically generated entry goes
/// dormant (excluded from sticky carry-over until re-triggered).
pub const DORMANCY_TURNS: u32 = 10;

/// Cascade passes allowed beyond the initial keyword pass.
pub const MAX_CASCADE_DEPTH: usize = 2;

/// Inputs to one scan.
#[derive(Debug)]
pub struct ScanRequest<'a> {
    /// The text to scan (typically recent chat messages).
    pub text: &'a str,

    /// All entries under consideration. Uids must be unique; on a
    /// duplicate the first entry wins and the rest are logged and skipped.
    pub entries: &'a [LoreEntry],

    /// Manual enable/pin overrides.
    pub overrides: &'a ManualOverrides,

    /// Runtime state carried from the previous committed turn.
    pub runtime: &'a LoreRuntimeState,

    /// The turn this scan is for (strictly greater than the last
    /// committed turn).
    pub turn: u32,

    /// Uids chosen by an external relevance selector.
    pub externally_selected: &'a [String],

    /// Skip the keyword cascade entirely (steps 1-4 still run).
    pub bypass_keyword_scan: bool,
}

/// Result of one scan.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Active entries, sorted by `insertion_order` ascending.
    pub active: Vec<LoreEntry>,

    /// Runtime state to commit alongside this turn.
    pub next_runtime: LoreRuntimeState,
}

impl ScanOutcome {
    /// Uids of the active entries, in output order.
    pub fn active_uids(&self) -> Vec<String> {
        self.active.iter().map(|e| e.uid.clone()).collect()
    }
}

/// Run one activation scan.
pub fn scan(req: &ScanRequest<'_>) -> ScanOutcome {
    let entries = dedup_by_uid(req.entries);

    // Active set and the subset activated by a fresh match this scan.
    let mut active: Vec<&LoreEntry> = Vec::new();
    let mut active_uids: HashSet<&str> = HashSet::new();
    let mut touched: HashSet<&str> = HashSet::new();

    // Step 1: constants.
    for entry in entries.values() {
        if entry.constant && req.overrides.effective_enabled(entry) {
            push_active(entry, &mut active, &mut active_uids);
        }
    }

    // Step 2: pinned overrides. Pinning beats the card-declared default,
    // but an explicit disable still wins.
    for entry in entries.values() {
        if req.overrides.is_pinned(&entry.uid)
            && !req.overrides.is_explicitly_disabled(&entry.uid)
        {
            push_active(entry, &mut active, &mut active_uids);
        }
    }

    // Step 3: sticky carry-over. Dormant dynamic entries do not ride
    // along on stickiness.
    for entry in entries.values() {
        if req.runtime.sticky_duration(&entry.uid) > 0
            && req.overrides.effective_enabled(entry)
            && !is_dormant(entry, req.runtime, req.turn)
        {
            push_active(entry, &mut active, &mut active_uids);
        }
    }

    // Step 4: external selection. A selection counts as a fresh match,
    // which also revives a dormant entry.
    for uid in req.externally_selected {
        let Some(entry) = entries.get(uid.as_str()) else {
            debug!(uid = uid.as_str(), "selector returned unknown uid");
            continue;
        };
        if req.overrides.is_explicitly_disabled(uid) {
            continue;
        }
        push_active(entry, &mut active, &mut active_uids);
        // A selection is a fresh match even if the entry was already
        // active through an earlier step.
        touched.insert(&entry.uid);
    }

    // Step 5: recursive keyword cascade. A direct keyword match is a
    // fresh match and revives a dormant entry; cooldown blocks it.
    if !req.bypass_keyword_scan {
        let mut buffer = req.text.to_string();
        for pass in 0..=MAX_CASCADE_DEPTH {
            let mut newly: Vec<&LoreEntry> = Vec::new();

            for entry in entries.values() {
                if active_uids.contains(entry.uid.as_str()) {
                    continue;
                }
                if !req.overrides.effective_enabled(entry) {
                    continue;
                }
                if req.runtime.cooldown_duration(&entry.uid) > 0 {
                    continue;
                }
                if entry.keys.is_empty() {
                    continue;
                }
                if !any_key_matches(&entry.keys, &buffer, entry.use_regex) {
                    continue;
                }
                // Secondary keys gate the primary match on selective
                // entries.
                if entry.selective
                    && !entry.secondary_keys.is_empty()
                    && !any_key_matches(&entry.secondary_keys, &buffer, entry.use_regex)
                {
                    continue;
                }
                newly.push(entry);
            }

            if newly.is_empty() {
                break;
            }

            for entry in newly {
                push_active(entry, &mut active, &mut active_uids);
                touched.insert(&entry.uid);
                buffer.push('\n');
                buffer.push_str(&entry.content);
            }
            debug!(pass, active = active.len(), "keyword cascade pass");
        }
    }

    // Runtime update: age every existing counter, then record fresh
    // activations for the final active set.
    let mut next_runtime = req.runtime.clone();
    next_runtime.tick();
    for entry in &active {
        if touched.contains(entry.uid.as_str()) {
            next_runtime.note_activation(entry, req.turn);
        }
    }

    let mut active: Vec<LoreEntry> = active.into_iter().cloned().collect();
    active.sort_by_key(|e| e.insertion_order);

    ScanOutcome {
        active,
        next_runtime,
    }
}

/// Whether a dynamic entry has aged out.
///
/// Only entries with a runtime record can be dormant; a dynamic entry
/// that has never activated is still eligible.
fn is_dormant(entry: &LoreEntry, runtime: &LoreRuntimeState, turn: u32) -> bool {
    if !entry.is_dynamic() {
        return false;
    }
    match runtime.get(&entry.uid) {
        Some(r) => turn.saturating_sub(r.last_active_turn) > DORMANCY_TURNS,
        None => false,
    }
}

fn push_active<'e>(
    entry: &'e LoreEntry,
    active: &mut Vec<&'e LoreEntry>,
    active_uids: &mut HashSet<&'e str>,
) -> bool {
    if active_uids.insert(&entry.uid) {
        active.push(entry);
        true
    } else {
        false
    }
}

/// Index entries by uid, keeping the first of any duplicates.
fn dedup_by_uid(entries: &[LoreEntry]) -> IndexedEntries<'_> {
    let mut ordered: Vec<&LoreEntry> = Vec::with_capacity(entries.len());
    let mut by_uid: HashMap<&str, &LoreEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        if by_uid.contains_key(entry.uid.as_str()) {
            warn!(uid = entry.uid.as_str(), "duplicate lore uid, keeping first");
            continue;
        }
        by_uid.insert(&entry.uid, entry);
        ordered.push(entry);
    }
    IndexedEntries { ordered, by_uid }
}

/// Entries in declaration order with uid lookup.
struct IndexedEntries<'e> {
    ordered: Vec<&'e LoreEntry>,
    by_uid: HashMap<&'e str, &'e LoreEntry>,
}

impl<'e> IndexedEntries<'e> {
    fn values(&self) -> impl Iterator<Item = &'e LoreEntry> + '_ {
        self.ordered.iter().copied()
    }

    fn get(&self, uid: &str) -> Option<&'e LoreEntry> {
        self.by_uid.get(uid).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::entry::DYNAMIC_UID_PREFIX;

    fn request<'a>(
        text: &'a str,
        entries: &'a [LoreEntry],
        overrides: &'a ManualOverrides,
        runtime: &'a LoreRuntimeState,
        turn: u32,
    ) -> ScanRequest<'a> {
        ScanRequest {
            text,
            entries,
            overrides,
            runtime,
            turn,
            externally_selected: &[],
            bypass_keyword_scan: false,
        }
    }

    #[test]
    fn test_constant_always_active() {
        let entries = vec![LoreEntry::new("c1", "World history").constant()];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        for text in ["", "unrelated text", "dragon"] {
            let outcome = scan(&request(text, &entries, &overrides, &runtime, 1));
            assert_eq!(outcome.active_uids(), vec!["c1"]);
        }
    }

    #[test]
    fn test_constant_respects_disable_override() {
        let entries = vec![LoreEntry::new("c1", "x").constant()];
        let mut overrides = ManualOverrides::new();
        overrides.set_enabled("c1", false);
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("anything", &entries, &overrides, &runtime, 1));
        assert!(outcome.active.is_empty());
    }

    #[test]
    fn test_pinned_beats_card_disabled() {
        let entries = vec![LoreEntry::new("p1", "x").disabled()];
        let mut overrides = ManualOverrides::new();
        overrides.set_pinned("p1", true);
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("", &entries, &overrides, &runtime, 1));
        assert_eq!(outcome.active_uids(), vec!["p1"]);
    }

    #[test]
    fn test_pinned_loses_to_explicit_disable() {
        let entries = vec![LoreEntry::new("p1", "x")];
        let mut overrides = ManualOverrides::new();
        overrides.set_pinned("p1", true);
        overrides.set_enabled("p1", false);
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("", &entries, &overrides, &runtime, 1));
        assert!(outcome.active.is_empty());
    }

    #[test]
    fn test_keyword_activation_and_arming() {
        let entries = vec![LoreEntry::new("k1", "Dragons hoard gold.")
            .with_keys(["dragon"])
            .with_sticky(2)];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request(
            "a dragon lands",
            &entries,
            &overrides,
            &runtime,
            3,
        ));
        assert_eq!(outcome.active_uids(), vec!["k1"]);
        assert_eq!(outcome.next_runtime.sticky_duration("k1"), 2);
        assert_eq!(outcome.next_runtime.get("k1").unwrap().last_active_turn, 3);
    }

    #[test]
    fn test_sticky_carry_over_then_expiry() {
        let entries = vec![LoreEntry::new("k1", "Dragons hoard gold.")
            .with_keys(["dragon"])
            .with_sticky(2)];
        let overrides = ManualOverrides::new();

        // Turn 1: fresh match arms sticky to 2.
        let out1 = scan(&request("a dragon", &entries, &overrides, &LoreRuntimeState::new(), 1));
        assert_eq!(out1.active_uids(), vec!["k1"]);

        // Turn 2: no match, carried by sticky; counter ages to 1.
        let out2 = scan(&request("quiet town", &entries, &overrides, &out1.next_runtime, 2));
        assert_eq!(out2.active_uids(), vec!["k1"]);
        assert_eq!(out2.next_runtime.sticky_duration("k1"), 1);

        // Turn 3: still carried; counter ages to 0.
        let out3 = scan(&request("quiet town", &entries, &overrides, &out2.next_runtime, 3));
        assert_eq!(out3.active_uids(), vec!["k1"]);
        assert_eq!(out3.next_runtime.sticky_duration("k1"), 0);

        // Turn 4: sticky exhausted, no match, inactive.
        let out4 = scan(&request("quiet town", &entries, &overrides, &out3.next_runtime, 4));
        assert!(out4.active.is_empty());
    }

    #[test]
    fn test_cooldown_blocks_reactivation() {
        let entries =
            vec![LoreEntry::new("k1", "A trap!").with_keys(["trap"]).with_cooldown(2)];
        let overrides = ManualOverrides::new();

        let out1 = scan(&request("a trap springs", &entries, &overrides, &LoreRuntimeState::new(), 1));
        assert_eq!(out1.active_uids(), vec!["k1"]);

        // Cooldown 2 blocks the next two scans despite matching text.
        let out2 = scan(&request("another trap", &entries, &overrides, &out1.next_runtime, 2));
        assert!(out2.active.is_empty());
        let out3 = scan(&request("another trap", &entries, &overrides, &out2.next_runtime, 3));
        assert!(out3.active.is_empty());

        // Expired: matches again.
        let out4 = scan(&request("another trap", &entries, &overrides, &out3.next_runtime, 4));
        assert_eq!(out4.active_uids(), vec!["k1"]);
    }

    #[test]
    fn test_secondary_keys_and_gate() {
        let entries = vec![LoreEntry::new("s1", "x")
            .with_keys(["dragon"])
            .with_secondary_keys(["fire", "flame"])];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let hit = scan(&request("the dragon breathes flame", &entries, &overrides, &runtime, 1));
        assert_eq!(hit.active_uids(), vec!["s1"]);

        let miss = scan(&request("the dragon sleeps", &entries, &overrides, &runtime, 1));
        assert!(miss.active.is_empty());
    }

    #[test]
    fn test_cascade_bounded_at_depth_two() {
        // Chain: entry i's content contains entry i+1's keyword.
        let entries: Vec<LoreEntry> = (1..=5)
            .map(|i| {
                LoreEntry::new(format!("e{i}"), format!("mentions topic{}", i + 1))
                    .with_keys([format!("topic{i}")])
            })
            .collect();
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("topic1 comes up", &entries, &overrides, &runtime, 1));
        let mut uids = outcome.active_uids();
        uids.sort();

        // Initial match plus two cascade levels: e1, e2, e3 only.
        assert_eq!(uids, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_cascade_stops_early_when_nothing_new() {
        let entries = vec![
            LoreEntry::new("e1", "no chain here").with_keys(["alpha"]),
            LoreEntry::new("e2", "unrelated").with_keys(["omega"]),
        ];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("alpha", &entries, &overrides, &runtime, 1));
        assert_eq!(outcome.active_uids(), vec!["e1"]);
    }

    #[test]
    fn test_bypass_keyword_scan() {
        let entries = vec![
            LoreEntry::new("c1", "always").constant().with_insertion_order(-1),
            LoreEntry::new("k1", "keyed").with_keys(["dragon"]),
        ];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let mut req = request("a dragon", &entries, &overrides, &runtime, 1);
        req.bypass_keyword_scan = true;
        let outcome = scan(&req);
        assert_eq!(outcome.active_uids(), vec!["c1"]);
    }

    #[test]
    fn test_external_selection_touches_entry() {
        let entries = vec![LoreEntry::new("x1", "picked").with_sticky(1)];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();
        let selected = vec!["x1".to_string(), "ghost-uid".to_string()];

        let mut req = request("no keywords", &entries, &overrides, &runtime, 7);
        req.externally_selected = &selected;
        let outcome = scan(&req);

        assert_eq!(outcome.active_uids(), vec!["x1"]);
        assert_eq!(outcome.next_runtime.get("x1").unwrap().last_active_turn, 7);
        assert_eq!(outcome.next_runtime.sticky_duration("x1"), 1);
    }

    #[test]
    fn test_external_selection_respects_explicit_disable() {
        let entries = vec![LoreEntry::new("x1", "picked")];
        let mut overrides = ManualOverrides::new();
        overrides.set_enabled("x1", false);
        let runtime = LoreRuntimeState::new();
        let selected = vec!["x1".to_string()];

        let mut req = request("", &entries, &overrides, &runtime, 1);
        req.externally_selected = &selected;
        assert!(scan(&req).active.is_empty());
    }

    #[test]
    fn test_dormancy_excludes_aged_dynamic_entry() {
        let uid = format!("{DYNAMIC_UID_PREFIX}ghost");
        let entries = vec![LoreEntry::new(&uid, "a fading rumor").with_sticky(30)];
        let overrides = ManualOverrides::new();

        // Activate at turn T = 5 via external selection; long sticky would
        // otherwise keep it around indefinitely.
        let selected = vec![uid.clone()];
        let initial_runtime = LoreRuntimeState::new();
        let mut req = request("", &entries, &overrides, &initial_runtime, 5);
        req.externally_selected = &selected;
        let out = scan(&req);
        let runtime = out.next_runtime;

        // At T + 10 the entry still carries over.
        let out = scan(&request("quiet", &entries, &overrides, &runtime, 15));
        assert_eq!(out.active_uids(), vec![uid.clone()]);

        // At T + 11 it is dormant despite remaining sticky turns.
        let out = scan(&request("quiet", &entries, &overrides, &runtime, 16));
        assert!(out.active.is_empty());
    }

    #[test]
    fn test_dormant_entry_revived_by_fresh_match() {
        let uid = format!("{DYNAMIC_UID_PREFIX}ghost");
        let entries = vec![LoreEntry::new(&uid, "a fading rumor").with_keys(["rumor"])];
        let overrides = ManualOverrides::new();

        let selected = vec![uid.clone()];
        let initial_runtime = LoreRuntimeState::new();
        let mut req = request("", &entries, &overrides, &initial_runtime, 1);
        req.externally_selected = &selected;
        let runtime = scan(&req).next_runtime;

        // Well past the dormancy threshold, a direct keyword match
        // re-triggers the entry and resets its age.
        let out = scan(&request("I ask about the rumor", &entries, &overrides, &runtime, 20));
        assert_eq!(out.active_uids(), vec![uid.clone()]);
        assert_eq!(out.next_runtime.get(&uid).unwrap().last_active_turn, 20);
    }

    #[test]
    fn test_non_dynamic_entries_never_dormant() {
        let entries = vec![LoreEntry::new("old1", "authored lore").with_sticky(100)];
        let overrides = ManualOverrides::new();

        let selected = vec!["old1".to_string()];
        let initial_runtime = LoreRuntimeState::new();
        let mut req = request("", &entries, &overrides, &initial_runtime, 1);
        req.externally_selected = &selected;
        let runtime = scan(&req).next_runtime;

        let out = scan(&request("quiet", &entries, &overrides, &runtime, 90));
        assert_eq!(out.active_uids(), vec!["old1"]);
    }

    #[test]
    fn test_output_sorted_by_insertion_order() {
        let entries = vec![
            LoreEntry::new("b", "x").constant().with_insertion_order(10),
            LoreEntry::new("a", "x").constant().with_insertion_order(-5),
            LoreEntry::new("m", "x").constant().with_insertion_order(0),
        ];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("", &entries, &overrides, &runtime, 1));
        assert_eq!(outcome.active_uids(), vec!["a", "m", "b"]);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let entries = vec![
            LoreEntry::new("c1", "constant").constant(),
            LoreEntry::new("k1", "keyed").with_keys(["dragon"]).with_sticky(2),
        ];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let a = scan(&request("the dragon", &entries, &overrides, &runtime, 4));
        let b = scan(&request("the dragon", &entries, &overrides, &runtime, 4));
        assert_eq!(a.active_uids(), b.active_uids());
        assert_eq!(a.next_runtime, b.next_runtime);
    }

    #[test]
    fn test_duplicate_uid_keeps_first() {
        let entries = vec![
            LoreEntry::new("dup", "first").constant(),
            LoreEntry::new("dup", "second").constant(),
        ];
        let overrides = ManualOverrides::new();
        let runtime = LoreRuntimeState::new();

        let outcome = scan(&request("", &entries, &overrides, &runtime, 1));
        assert_eq!(outcome.active.len(), 1);
        assert_eq!(outcome.active[0].content, "first");
    }
}

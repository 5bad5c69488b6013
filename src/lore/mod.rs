//! Lore activation: entries, key matching, the scan engine, and selector
//! serialization.
//!
//! The heart of this module is [`activation::scan`], a pure function that
//! decides which entries are "in view" for a turn and produces the next
//! runtime state (sticky/cooldown counters, activation ages).

pub mod activation;
pub mod entry;
pub mod matcher;
pub mod render;

pub use activation::{scan, ScanOutcome, ScanRequest, DORMANCY_TURNS, MAX_CASCADE_DEPTH};
pub use entry::{
    EntryRuntime, LoreBook, LoreEntry, LoreRuntimeState, ManualOverride, ManualOverrides,
    Placement, DYNAMIC_UID_PREFIX,
};
pub use matcher::{KeyError, KeywordTerm, LoreKey};
pub use render::{
    render_selector_blocks, SelectorBlocks, CANDIDATE_HEAD_CHARS, CANDIDATE_TAIL_CHARS,
};

//! Lore entries, manual overrides, and per-session runtime bookkeeping.
//!
//! A lore entry is a knowledge snippet with activation rules. The entry
//! itself is immutable during a scan; everything that changes turn to turn
//! (sticky and cooldown counters, last activation) lives in
//! [`LoreRuntimeState`], keyed by the entry's uid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Uid prefix marking a dynamically generated entry.
///
/// Dynamic entries are created mid-campaign (e.g. by the AI inventing a
/// faction) and are subject to dormancy pruning after prolonged inactivity.
/// Authored entries are never pruned by age.
pub const DYNAMIC_UID_PREFIX: &str = "dyn_";

/// A knowledge snippet considered for inclusion in generation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreEntry {
    /// Stable identifier. Must be unique among entries considered in one scan.
    pub uid: String,

    /// Short human-readable label (shown in candidate listings).
    #[serde(default)]
    pub name: String,

    /// Primary activation keys, OR'd together. Each key is either a
    /// delimited regex literal (`/pattern/flags`) or a keyword boolean
    /// expression (`dragon & fire & !ice`).
    #[serde(default)]
    pub keys: Vec<String>,

    /// Secondary keys. When present (and the entry is selective), at least
    /// one must also match for a primary match to count.
    #[serde(default)]
    pub secondary_keys: Vec<String>,

    /// The text contributed to the prompt when active.
    pub content: String,

    /// Always active (no keyword match required) while enabled.
    #[serde(default)]
    pub constant: bool,

    /// Whether secondary keys gate primary matches.
    #[serde(default)]
    pub selective: bool,

    /// Sort position among active entries (ascending).
    #[serde(default)]
    pub insertion_order: i32,

    /// Card-declared default; a manual override takes precedence.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Turns the entry stays active after its triggering match expires.
    #[serde(default)]
    pub sticky: u32,

    /// Turns the entry is blocked from keyword reactivation after firing.
    #[serde(default)]
    pub cooldown: u32,

    /// Force keys to be interpreted as regex patterns even without
    /// `/…/` delimiters.
    #[serde(default)]
    pub use_regex: bool,
}

fn default_enabled() -> bool {
    true
}

impl LoreEntry {
    /// Create a new entry with the given uid and content.
    pub fn new(uid: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: String::new(),
            keys: Vec::new(),
            secondary_keys: Vec::new(),
            content: content.into(),
            constant: false,
            selective: false,
            insertion_order: 0,
            enabled: true,
            sticky: 0,
            cooldown: 0,
            use_regex: false,
        }
    }

    /// Create a dynamically generated entry with a minted `dyn_` uid.
    pub fn new_dynamic(content: impl Into<String>) -> Self {
        Self::new(format!("{DYNAMIC_UID_PREFIX}{}", Uuid::new_v4()), content)
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the primary keys.
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the secondary keys (and mark the entry selective).
    pub fn with_secondary_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.secondary_keys = keys.into_iter().map(Into::into).collect();
        self.selective = !self.secondary_keys.is_empty();
        self
    }

    /// Mark the entry as constant (always active while enabled).
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    /// Set the insertion order.
    pub fn with_insertion_order(mut self, order: i32) -> Self {
        self.insertion_order = order;
        self
    }

    /// Set the sticky duration in turns.
    pub fn with_sticky(mut self, turns: u32) -> Self {
        self.sticky = turns;
        self
    }

    /// Set the cooldown duration in turns.
    pub fn with_cooldown(mut self, turns: u32) -> Self {
        self.cooldown = turns;
        self
    }

    /// Interpret all keys as regex patterns even without `/…/` delimiters.
    pub fn with_regex_keys(mut self) -> Self {
        self.use_regex = true;
        self
    }

    /// Disable the entry by card default.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this entry was dynamically generated (dormancy applies).
    pub fn is_dynamic(&self) -> bool {
        self.uid.starts_with(DYNAMIC_UID_PREFIX)
    }
}

/// Where an entry's content should be placed in the assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Before the main character/persona context.
    BeforeContext,
    /// After the main character/persona context.
    AfterContext,
}

/// A human/editor-set override for a single entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualOverride {
    /// Overrides the entry's card-declared `enabled` when set.
    pub enabled: Option<bool>,

    /// Force the entry active regardless of keyword matching.
    pub pinned: bool,

    /// Placement hint for the prompt assembler.
    pub placement: Option<Placement>,
}

/// Per-uid manual overrides set by an external editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualOverrides {
    overrides: HashMap<String, ManualOverride>,
}

impl ManualOverrides {
    /// Create an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the override for a uid, if any.
    pub fn get(&self, uid: &str) -> Option<&ManualOverride> {
        self.overrides.get(uid)
    }

    /// Set the enabled override for a uid.
    pub fn set_enabled(&mut self, uid: impl Into<String>, enabled: bool) {
        self.overrides.entry(uid.into()).or_default().enabled = Some(enabled);
    }

    /// Clear the enabled override for a uid (card default applies again).
    pub fn clear_enabled(&mut self, uid: &str) {
        if let Some(o) = self.overrides.get_mut(uid) {
            o.enabled = None;
        }
    }

    /// Set or clear the pinned flag for a uid.
    pub fn set_pinned(&mut self, uid: impl Into<String>, pinned: bool) {
        self.overrides.entry(uid.into()).or_default().pinned = pinned;
    }

    /// Set the placement hint for a uid.
    pub fn set_placement(&mut self, uid: impl Into<String>, placement: Placement) {
        self.overrides.entry(uid.into()).or_default().placement = Some(placement);
    }

    /// The placement hint for a uid, if one is set.
    pub fn placement(&self, uid: &str) -> Option<Placement> {
        self.get(uid).and_then(|o| o.placement)
    }

    /// Whether the uid is pinned.
    pub fn is_pinned(&self, uid: &str) -> bool {
        self.get(uid).map(|o| o.pinned).unwrap_or(false)
    }

    /// Whether the uid is explicitly disabled by override.
    pub fn is_explicitly_disabled(&self, uid: &str) -> bool {
        self.get(uid).and_then(|o| o.enabled) == Some(false)
    }

    /// Resolve the effective enabled state: override beats card default.
    pub fn effective_enabled(&self, entry: &LoreEntry) -> bool {
        self.get(&entry.uid)
            .and_then(|o| o.enabled)
            .unwrap_or(entry.enabled)
    }
}

/// Per-entry runtime counters, created lazily on first activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRuntime {
    /// Remaining turns of sticky carry-over.
    pub sticky_duration: u32,

    /// Remaining turns of reactivation block.
    pub cooldown_duration: u32,

    /// The turn this entry last activated via a fresh match.
    pub last_active_turn: u32,
}

/// Per-uid runtime state for a lorebook within one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreRuntimeState {
    entries: HashMap<String, EntryRuntime>,
}

impl LoreRuntimeState {
    /// Create an empty runtime state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the runtime record for a uid, if it has ever activated.
    pub fn get(&self, uid: &str) -> Option<&EntryRuntime> {
        self.entries.get(uid)
    }

    /// Remaining sticky turns for a uid (0 if never activated).
    pub fn sticky_duration(&self, uid: &str) -> u32 {
        self.get(uid).map(|r| r.sticky_duration).unwrap_or(0)
    }

    /// Remaining cooldown turns for a uid (0 if never activated).
    pub fn cooldown_duration(&self, uid: &str) -> u32 {
        self.get(uid).map(|r| r.cooldown_duration).unwrap_or(0)
    }

    /// Decrement every existing counter by one, flooring at zero.
    pub fn tick(&mut self) {
        for runtime in self.entries.values_mut() {
            runtime.sticky_duration = runtime.sticky_duration.saturating_sub(1);
            runtime.cooldown_duration = runtime.cooldown_duration.saturating_sub(1);
        }
    }

    /// Record a fresh activation: set `last_active_turn` and (re)arm the
    /// declared sticky/cooldown counters.
    pub fn note_activation(&mut self, entry: &LoreEntry, turn: u32) {
        let runtime = self.entries.entry(entry.uid.clone()).or_default();
        runtime.last_active_turn = turn;
        if entry.sticky > 0 {
            runtime.sticky_duration = entry.sticky;
        }
        if entry.cooldown > 0 {
            runtime.cooldown_duration = entry.cooldown;
        }
    }

    /// Number of uids with runtime records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no uid has ever activated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (uid, runtime) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryRuntime)> {
        self.entries.iter()
    }
}

/// A uid-indexed collection of lore entries.
///
/// Inserting an entry with an existing uid replaces the old entry, so a
/// book never holds duplicate uids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoreBook {
    entries: Vec<LoreEntry>,
}

impl LoreBook {
    /// Create an empty lorebook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any existing entry with the same uid.
    pub fn insert(&mut self, entry: LoreEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.uid == entry.uid) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Look up an entry by uid.
    pub fn get(&self, uid: &str) -> Option<&LoreEntry> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    /// Remove an entry by uid. Returns the removed entry.
    pub fn remove(&mut self, uid: &str) -> Option<LoreEntry> {
        let idx = self.entries.iter().position(|e| e.uid == uid)?;
        Some(self.entries.remove(idx))
    }

    /// All entries in insertion order of the book.
    pub fn entries(&self) -> &[LoreEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the book is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<LoreEntry> for LoreBook {
    fn from_iter<I: IntoIterator<Item = LoreEntry>>(iter: I) -> Self {
        let mut book = Self::new();
        for entry in iter {
            book.insert(entry);
        }
        book
    }
}

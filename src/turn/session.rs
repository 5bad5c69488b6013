//! The chat session record and per-turn snapshots.
//!
//! A [`ChatSession`] holds everything a turn reads or writes: messages,
//! the state tree, the lorebook with its runtime and manual-override
//! state, derived secondary state, and the committed snapshot history.
//! The orchestrator owns the session exclusively while a turn is in
//! flight; storage of the record is an external concern.

use crate::lore::{LoreBook, LoreRuntimeState, ManualOverrides};
use crate::state::StateTree;
use crate::turn::error::SessionError;
use crate::turn::services::SecondaryState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Lowercase role name for transcripts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// An atomically captured copy of all per-turn mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSnapshot {
    pub state_tree: StateTree,
    pub lore_runtime: LoreRuntimeState,
    pub secondary_state: SecondaryState,
    pub turn_counter: u32,
}

/// The session record the orchestrator reads and writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSession {
    /// Conversation history, oldest first.
    pub messages: Vec<ChatMessage>,

    /// The committed state tree.
    pub state_tree: StateTree,

    /// The lorebook considered each scan.
    pub lore_book: LoreBook,

    /// Editor-set enable/pin overrides.
    pub manual_overrides: ManualOverrides,

    /// Lore runtime counters from the last committed turn.
    pub lore_runtime: LoreRuntimeState,

    /// Derived state from the last committed secondary pass.
    pub secondary_state: SecondaryState,

    /// Strictly increasing; advances only on commit.
    pub turn_counter: u32,

    /// Committed snapshots, oldest first.
    snapshots: Vec<TurnSnapshot>,
}

impl ChatSession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture and store a snapshot of the current committed state.
    pub fn commit_snapshot(&mut self) {
        self.snapshots.push(TurnSnapshot {
            state_tree: self.state_tree.clone(),
            lore_runtime: self.lore_runtime.clone(),
            secondary_state: self.secondary_state.clone(),
            turn_counter: self.turn_counter,
        });
    }

    /// Committed snapshots, oldest first.
    pub fn snapshots(&self) -> &[TurnSnapshot] {
        &self.snapshots
    }

    /// The most recent committed snapshot.
    pub fn last_snapshot(&self) -> Option<&TurnSnapshot> {
        self.snapshots.last()
    }

    /// Restore session state from the snapshot committed at
    /// `turn_counter`, discarding later snapshots.
    ///
    /// Used for history edits and regeneration; only ever restores a
    /// fully committed turn. Message truncation is the history editor's
    /// concern.
    pub fn restore_snapshot(&mut self, turn_counter: u32) -> Result<(), SessionError> {
        let idx = self
            .snapshots
            .iter()
            .position(|s| s.turn_counter == turn_counter)
            .ok_or(SessionError::UnknownSnapshot(turn_counter))?;

        let snapshot = self.snapshots[idx].clone();
        self.state_tree = snapshot.state_tree;
        self.lore_runtime = snapshot.lore_runtime;
        self.secondary_state = snapshot.secondary_state;
        self.turn_counter = snapshot.turn_counter;
        self.snapshots.truncate(idx + 1);
        Ok(())
    }

    /// The most recent messages, for history excerpts.
    pub fn recent_messages(&self, count: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }
}

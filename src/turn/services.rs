//! External collaborator interfaces for the turn pipeline.
//!
//! The orchestrator never talks to an AI provider directly; it calls
//! these traits. Implementations live outside this crate (HTTP clients,
//! local models) or in [`crate::testing`] (scripted mocks).

use crate::lore::{LoreEntry, ManualOverrides, Placement, SelectorBlocks};
use crate::state::StateTree;
use crate::turn::error::{GenerationError, ScanServiceError, SecondaryPassError};
use crate::turn::session::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cooperative cancellation handle for an in-flight generation.
///
/// Cancelling does not discard output: the generation service is
/// expected to stop streaming and return whatever partial text it has.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register with the Notify before re-checking the flag;
        // `notify_waiters` only wakes waiters already registered, so a
        // cancel landing between the check and the first poll would
        // otherwise be missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Inputs to prompt assembly.
#[derive(Debug)]
pub struct PromptRequest<'a> {
    /// The user's message for this turn.
    pub user_input: &'a str,

    /// Active lore entries, in insertion order.
    pub active_lore: &'a [LoreEntry],

    /// Committed conversation history.
    pub history: &'a [ChatMessage],

    /// The current committed state tree.
    pub state_tree: &'a StateTree,

    /// Editor overrides; assemblers honor per-entry placement hints.
    pub overrides: &'a ManualOverrides,
}

/// The literal prompt structure sent to generation.
#[derive(Debug, Clone, Default)]
pub struct AssembledPrompt {
    /// System-level context (persona, lore, state summary).
    pub system: String,

    /// The conversation transcript ending with the user's input.
    pub transcript: String,
}

/// Builds the prompt from active lore, history, and state.
///
/// Treated as a pure function call by the orchestrator.
pub trait PromptAssembler: Send + Sync {
    fn assemble(&self, request: PromptRequest<'_>) -> AssembledPrompt;
}

/// Output of a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The full generated text.
    Complete(String),

    /// Generation was cancelled; the partial output becomes the final
    /// message content.
    Cancelled { partial: String },
}

impl GenerationOutcome {
    /// The text produced, complete or partial.
    pub fn text(&self) -> &str {
        match self {
            Self::Complete(text) => text,
            Self::Cancelled { partial } => partial,
        }
    }
}

/// The generation provider.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate text for the assembled prompt. Implementations should
    /// watch `cancel` and return `Cancelled` with partial output rather
    /// than discarding it.
    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome, GenerationError>;
}

/// Result of a relevance-selection call.
#[derive(Debug, Clone, Default)]
pub struct SelectionResult {
    /// Uids the selector judged relevant.
    pub selected_uids: Vec<String>,

    /// Raw request text, kept for diagnostics.
    pub raw_request: Option<String>,

    /// Raw response text, kept for diagnostics.
    pub raw_response: Option<String>,
}

/// An AI-assisted relevance selector over serialized lore blocks.
#[async_trait]
pub trait RelevanceSelector: Send + Sync {
    async fn select(
        &self,
        blocks: &SelectorBlocks,
        history: &[ChatMessage],
        state_summary: &str,
    ) -> Result<SelectionResult, ScanServiceError>;
}

/// Derived game state recomputed from narrative output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryState(pub Value);

/// Result of a secondary-state recomputation.
#[derive(Debug, Clone)]
pub struct SecondaryUpdate {
    /// The updated derived state.
    pub state: SecondaryState,

    /// Human-readable change log.
    pub change_log: Vec<String>,
}

/// Recomputes derived state from a history excerpt.
#[async_trait]
pub trait SecondaryStateService: Send + Sync {
    async fn recompute(
        &self,
        history_excerpt: &str,
        current: &SecondaryState,
    ) -> Result<SecondaryUpdate, SecondaryPassError>;
}

/// A minimal prompt assembler: lore and state summary as system context,
/// history plus the user's input as the transcript.
#[derive(Debug, Clone, Default)]
pub struct BasicPromptAssembler;

impl PromptAssembler for BasicPromptAssembler {
    fn assemble(&self, request: PromptRequest<'_>) -> AssembledPrompt {
        // Entries default to sitting before the game-state block; an
        // `AfterContext` placement hint moves them after it.
        let (before, after): (Vec<&LoreEntry>, Vec<&LoreEntry>) =
            request.active_lore.iter().partition(|entry| {
                request.overrides.placement(&entry.uid) != Some(Placement::AfterContext)
            });

        let mut system = String::new();

        if !before.is_empty() {
            system.push_str("## World Knowledge\n\n");
            for entry in &before {
                system.push_str(&entry.content);
                system.push_str("\n\n");
            }
        }

        system.push_str("## Game State\n");
        system.push_str(
            &serde_json::to_string_pretty(request.state_tree.as_value())
                .unwrap_or_else(|_| "{}".to_string()),
        );
        system.push('\n');

        if !after.is_empty() {
            system.push_str("\n## Additional Knowledge\n\n");
            for entry in &after {
                system.push_str(&entry.content);
                system.push_str("\n\n");
            }
        }

        let mut transcript = String::new();
        for message in request.history {
            transcript.push_str(&format!("{}: {}\n", message.role.name(), message.content));
        }
        transcript.push_str(&format!("user: {}\n", request.user_input));

        AssembledPrompt { system, transcript }
    }
}

//! Error taxonomy for the turn pipeline.
//!
//! The internal engines (lore scan, mutation interpreter) never raise to
//! the orchestrator; they fail soft and report through logs. Only the
//! three external service call sites produce pipeline errors, and every
//! recoverable one pauses the turn for an explicit retry-or-ignore
//! decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Relevance selection during scanning.
    Scan,
    /// Prompt assembly.
    PromptBuilding,
    /// The generation call.
    Generation,
    /// The derived-state recomputation after generation.
    SecondaryPass,
}

impl PipelineStage {
    /// Human-readable stage name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::PromptBuilding => "prompt-building",
            Self::Generation => "generation",
            Self::SecondaryPass => "secondary-pass",
        }
    }
}

/// A failure raised by an external-service call site.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{} stage failed: {message}", stage.name())]
pub struct PipelineError {
    /// The stage that failed.
    pub stage: PipelineStage,

    /// Human-readable failure description.
    pub message: String,

    /// Whether the turn can be resumed via retry/ignore.
    pub recoverable: bool,
}

impl PipelineError {
    /// A recoverable error for the given stage.
    pub fn recoverable(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            recoverable: true,
        }
    }
}

/// External relevance-selector failure (recoverable: retry or degrade to
/// keyword-only scanning).
#[derive(Debug, Clone, Error)]
#[error("scan service error: {0}")]
pub struct ScanServiceError(pub String);

/// Generation provider/transport failure (unrecoverable: the turn aborts
/// and the user's input is preserved).
#[derive(Debug, Clone, Error)]
#[error("generation error: {0}")]
pub struct GenerationError(pub String);

/// Secondary-state service failure (recoverable: retry, or ignore to keep
/// the prior committed derived state).
#[derive(Debug, Clone, Error)]
#[error("secondary pass error: {0}")]
pub struct SecondaryPassError(pub String);

/// Errors surfaced to the orchestrator's caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a turn is already in flight")]
    TurnInFlight,

    #[error("no turn is awaiting a decision")]
    NoPendingDecision,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("no snapshot committed at turn {0}")]
    UnknownSnapshot(u32),
}

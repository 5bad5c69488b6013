//! The turn pipeline: session record, external service traits, and the
//! orchestrator that sequences a turn from scan to commit.
//!
//! - [`session`]: messages, snapshots, and the per-session record.
//! - [`services`]: traits for the generation provider, relevance
//!   selector, and secondary-state service.
//! - [`orchestrator`]: the recoverable turn state machine.
//! - [`error`]: pipeline and session error taxonomy.

pub mod error;
pub mod orchestrator;
pub mod services;
pub mod session;

pub use error::{
    GenerationError, PipelineError, PipelineStage, ScanServiceError, SecondaryPassError,
    SessionError,
};
pub use orchestrator::{Decision, TurnOrchestrator, TurnOutcome, TurnReport};
pub use services::{
    AssembledPrompt, BasicPromptAssembler, CancelToken, GenerationOutcome, GenerationService,
    PromptAssembler, PromptRequest, RelevanceSelector, SecondaryState, SecondaryUpdate,
    SelectionResult, SecondaryStateService,
};
pub use session::{ChatMessage, ChatSession, MessageRole, TurnSnapshot};

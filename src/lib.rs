//! AI interactive-fiction turn engine.
//!
//! This crate provides:
//! - Lore activation: keyword/regex matching with constant, sticky,
//!   cooldown, and dormancy lifecycles over a book of entries
//! - A state mutation interpreter that atomically applies AI-emitted
//!   scripts to a nested game-state tree
//! - A turn orchestrator that sequences scanning, prompt assembly,
//!   generation, and post-processing with explicit retry/ignore
//!   recovery, cancellation, and per-turn snapshots
//! - A bounded worker pool for state-independent batch jobs
//!
//! # Quick Start
//!
//! ```ignore
//! use loreweaver::lore::LoreEntry;
//! use loreweaver::turn::{BasicPromptAssembler, ChatSession, TurnOrchestrator, TurnOutcome};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = ChatSession::new();
//!     session.lore_book.insert(
//!         LoreEntry::new("dragons", "Dragons hoard gold in the northern peaks.")
//!             .with_keys(["dragon"]),
//!     );
//!
//!     let mut orchestrator = TurnOrchestrator::new(
//!         session,
//!         Arc::new(BasicPromptAssembler),
//!         Arc::new(MyGenerationClient::new()),
//!     );
//!
//!     match orchestrator.begin_turn("I ask about the dragon").await? {
//!         TurnOutcome::Committed(report) => println!("{}", report.narrative),
//!         TurnOutcome::AwaitingDecision(pending) => eprintln!("stalled: {pending}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod lore;
pub mod state;
pub mod testing;
pub mod turn;

// Primary public API
pub use batch::BatchPool;
pub use lore::{LoreBook, LoreEntry, ManualOverrides};
pub use state::StateTree;
pub use turn::{
    ChatSession, Decision, PipelineStage, TurnOrchestrator, TurnOutcome, TurnReport,
};

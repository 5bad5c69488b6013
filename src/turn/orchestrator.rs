//! The turn orchestrator.
//!
//! Sequences one turn through `Scanning → PromptBuilding → Generating →
//! PostProcessing → Committed`, with recoverable detours: a relevance
//! selector failure or a secondary-pass failure suspends the turn in a
//! pending-decision state until [`TurnOrchestrator::resolve_decision`]
//! is called with `Retry` or `Ignore`. A submitted message is never
//! lost: unrecoverable generation failures abort the turn but preserve
//! the input, and nothing commits until every required stage resolves.
//!
//! Exactly one turn may be in flight per session; the orchestrator owns
//! the session's mutable state exclusively for the duration.

use crate::lore::{render_selector_blocks, scan, LoreEntry, LoreRuntimeState, ScanRequest};
use crate::state::{self, StateTree};
use crate::turn::error::{PipelineError, PipelineStage, SessionError};
use crate::turn::services::{
    AssembledPrompt, CancelToken, GenerationOutcome, GenerationService, PromptAssembler,
    PromptRequest, RelevanceSelector, SecondaryState, SecondaryStateService,
};
use crate::turn::session::{ChatMessage, ChatSession};
use std::sync::Arc;
use tracing::{debug, warn};

/// Recent messages included in the scan buffer alongside the input.
const SCAN_HISTORY_MESSAGES: usize = 4;

/// Recent messages handed to the relevance selector.
const SELECTOR_HISTORY_MESSAGES: usize = 10;

/// Recent messages included in the secondary-pass history excerpt.
const SECONDARY_EXCERPT_MESSAGES: usize = 6;

/// The caller's answer to a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-attempt the failed external call, same mode.
    Retry,
    /// Proceed without it: keyword-only scanning, or the prior committed
    /// secondary state.
    Ignore,
}

/// How a driven turn ended up.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The turn committed; a new snapshot exists.
    Committed(TurnReport),

    /// The turn is suspended awaiting [`TurnOrchestrator::resolve_decision`].
    AwaitingDecision(PipelineError),
}

/// Summary of a committed turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// The assistant message content (cleaned, or partial if cancelled).
    pub narrative: String,

    /// Whether generation was cancelled mid-stream.
    pub cancelled: bool,

    /// Operation log from the mutation interpreter.
    pub mutation_log: Vec<String>,

    /// Change log from the secondary pass, if it ran.
    pub secondary_change_log: Vec<String>,

    /// Uids of the lore entries active this turn, in insertion order.
    pub active_lore_uids: Vec<String>,

    /// The committed turn counter.
    pub turn_counter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Scanning,
    PromptBuilding,
    Generating,
    PostProcessing,
    SecondaryPass,
    Commit,
}

/// Working state of the turn being driven.
struct InflightTurn {
    input: String,
    phase: TurnPhase,
    cancel: CancelToken,
    /// Set while suspended awaiting a decision.
    pending: Option<PipelineError>,
    /// Degraded mode for this turn only: selector disabled after an
    /// accepted `ignore`.
    selector_disabled: bool,
    selected_uids: Vec<String>,
    active_lore: Vec<LoreEntry>,
    next_runtime: Option<LoreRuntimeState>,
    prompt: Option<AssembledPrompt>,
    generated: String,
    cancelled: bool,
    new_tree: Option<StateTree>,
    cleaned: Option<String>,
    mutation_log: Vec<String>,
    new_secondary: Option<SecondaryState>,
    secondary_log: Vec<String>,
}

impl InflightTurn {
    fn new(input: &str, cancel: CancelToken) -> Self {
        Self {
            input: input.to_string(),
            phase: TurnPhase::Scanning,
            cancel,
            pending: None,
            selector_disabled: false,
            selected_uids: Vec::new(),
            active_lore: Vec::new(),
            next_runtime: None,
            prompt: None,
            generated: String::new(),
            cancelled: false,
            new_tree: None,
            cleaned: None,
            mutation_log: Vec::new(),
            new_secondary: None,
            secondary_log: Vec::new(),
        }
    }
}

/// Drives turns through the pipeline against an exclusively owned
/// [`ChatSession`].
pub struct TurnOrchestrator {
    session: ChatSession,
    assembler: Arc<dyn PromptAssembler>,
    generator: Arc<dyn GenerationService>,
    selector: Option<Arc<dyn RelevanceSelector>>,
    secondary: Option<Arc<dyn SecondaryStateService>>,
    inflight: Option<InflightTurn>,
    /// Input of a turn aborted by an unrecoverable generation failure.
    pending_input: Option<String>,
}

impl TurnOrchestrator {
    /// Create an orchestrator over a session with the required
    /// collaborators.
    pub fn new(
        session: ChatSession,
        assembler: Arc<dyn PromptAssembler>,
        generator: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            session,
            assembler,
            generator,
            selector: None,
            secondary: None,
            inflight: None,
            pending_input: None,
        }
    }

    /// Attach an AI-assisted relevance selector.
    pub fn with_selector(mut self, selector: Arc<dyn RelevanceSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Attach a secondary-state service.
    pub fn with_secondary(mut self, secondary: Arc<dyn SecondaryStateService>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// The session, read-only.
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Mutable session access, refused while a turn is in flight.
    pub fn session_mut(&mut self) -> Option<&mut ChatSession> {
        if self.inflight.is_some() {
            None
        } else {
            Some(&mut self.session)
        }
    }

    /// Tear down the orchestrator, discarding any in-flight turn and
    /// returning the session at its last committed state.
    pub fn into_session(self) -> ChatSession {
        self.session
    }

    /// Whether a turn is currently in flight (running or suspended).
    pub fn is_turn_in_flight(&self) -> bool {
        self.inflight.is_some()
    }

    /// The descriptor of the suspended stage, if any.
    pub fn pending_decision(&self) -> Option<&PipelineError> {
        self.inflight.as_ref().and_then(|t| t.pending.as_ref())
    }

    /// Input preserved from a turn aborted by a generation failure.
    pub fn take_pending_input(&mut self) -> Option<String> {
        self.pending_input.take()
    }

    /// Run one turn for the user's input.
    pub async fn begin_turn(&mut self, input: &str) -> Result<TurnOutcome, SessionError> {
        self.begin_turn_with_cancel(input, CancelToken::new()).await
    }

    /// Run one turn with an externally held cancellation handle.
    ///
    /// Cancelling during generation truncates the output rather than
    /// discarding it: the partial text commits as the message content
    /// and post-processing is skipped.
    pub async fn begin_turn_with_cancel(
        &mut self,
        input: &str,
        cancel: CancelToken,
    ) -> Result<TurnOutcome, SessionError> {
        if self.inflight.is_some() {
            return Err(SessionError::TurnInFlight);
        }
        self.pending_input = None;
        let turn = InflightTurn::new(input, cancel);
        self.drive(turn).await
    }

    /// Resolve a suspended stage.
    ///
    /// A mismatched stage is a no-op: the turn stays suspended and the
    /// same descriptor comes back. A matched stage resumes exactly the
    /// suspended stage.
    pub async fn resolve_decision(
        &mut self,
        stage: PipelineStage,
        decision: Decision,
    ) -> Result<TurnOutcome, SessionError> {
        let mut turn = match self.inflight.take() {
            Some(turn) if turn.pending.is_some() => turn,
            Some(turn) => {
                self.inflight = Some(turn);
                return Err(SessionError::NoPendingDecision);
            }
            None => return Err(SessionError::NoPendingDecision),
        };
        let pending = turn.pending.take().unwrap_or_else(|| {
            PipelineError::recoverable(stage, "missing pending descriptor")
        });
        if pending.stage != stage {
            debug!(
                requested = stage.name(),
                suspended = pending.stage.name(),
                "decision for wrong stage ignored"
            );
            turn.pending = Some(pending.clone());
            self.inflight = Some(turn);
            return Ok(TurnOutcome::AwaitingDecision(pending));
        }
        match (stage, decision) {
            (PipelineStage::Scan, Decision::Retry) => {
                // Re-enter scanning, same mode.
            }
            (PipelineStage::Scan, Decision::Ignore) => {
                // Keyword-only activation for this turn only.
                turn.selector_disabled = true;
            }
            (PipelineStage::SecondaryPass, Decision::Retry) => {}
            (PipelineStage::SecondaryPass, Decision::Ignore) => {
                // Keep the prior committed derived state.
                turn.new_secondary = None;
                turn.phase = TurnPhase::Commit;
            }
            _ => {}
        }
        self.drive(turn).await
    }

    async fn drive(&mut self, mut turn: InflightTurn) -> Result<TurnOutcome, SessionError> {
        loop {
            match turn.phase {
                TurnPhase::Scanning => {
                    if let Err(descriptor) = self.scan_stage(&mut turn).await {
                        turn.pending = Some(descriptor.clone());
                        self.inflight = Some(turn);
                        return Ok(TurnOutcome::AwaitingDecision(descriptor));
                    }
                }
                TurnPhase::PromptBuilding => {
                    let prompt = self.assembler.assemble(PromptRequest {
                        user_input: &turn.input,
                        active_lore: &turn.active_lore,
                        history: &self.session.messages,
                        state_tree: &self.session.state_tree,
                        overrides: &self.session.manual_overrides,
                    });
                    turn.prompt = Some(prompt);
                    turn.phase = TurnPhase::Generating;
                }
                TurnPhase::Generating => {
                    let prompt = turn.prompt.clone().unwrap_or_default();
                    match self.generator.generate(&prompt, &turn.cancel).await {
                        Ok(outcome) => {
                            turn.cancelled =
                                matches!(outcome, GenerationOutcome::Cancelled { .. });
                            turn.generated = outcome.text().to_string();
                            turn.phase = if turn.cancelled {
                                debug!("generation cancelled, committing partial output");
                                TurnPhase::Commit
                            } else {
                                TurnPhase::PostProcessing
                            };
                        }
                        Err(err) => {
                            warn!(%err, "generation failed, aborting turn");
                            self.pending_input = Some(turn.input);
                            return Err(SessionError::Generation(err));
                        }
                    }
                }
                TurnPhase::PostProcessing => {
                    let outcome = state::apply(&turn.generated, &self.session.state_tree);
                    turn.new_tree = Some(outcome.tree);
                    turn.cleaned = Some(outcome.cleaned_text);
                    turn.mutation_log = outcome.log;
                    turn.phase = if self.secondary.is_some() {
                        TurnPhase::SecondaryPass
                    } else {
                        TurnPhase::Commit
                    };
                }
                TurnPhase::SecondaryPass => {
                    if let Err(descriptor) = self.secondary_stage(&mut turn).await {
                        turn.pending = Some(descriptor.clone());
                        self.inflight = Some(turn);
                        return Ok(TurnOutcome::AwaitingDecision(descriptor));
                    }
                }
                TurnPhase::Commit => {
                    let report = self.commit(turn);
                    return Ok(TurnOutcome::Committed(report));
                }
            }
        }
    }

    /// Run the scanning stage. An `Err` suspends the turn.
    async fn scan_stage(&mut self, turn: &mut InflightTurn) -> Result<(), PipelineError> {
        let scan_turn = self.session.turn_counter + 1;

        turn.selected_uids.clear();
        if let Some(selector) = self.selector.clone().filter(|_| !turn.selector_disabled) {
            let blocks = render_selector_blocks(
                self.session.lore_book.entries(),
                &self.session.manual_overrides,
                &self.session.lore_runtime,
                scan_turn,
            );
            if blocks.is_empty() {
                debug!("no candidate entries, skipping relevance selector");
            } else {
                let summary = serde_json::to_string(self.session.state_tree.as_value())
                    .unwrap_or_else(|_| "{}".to_string());
                match selector
                    .select(
                        &blocks,
                        self.session.recent_messages(SELECTOR_HISTORY_MESSAGES),
                        &summary,
                    )
                    .await
                {
                    Ok(result) => turn.selected_uids = result.selected_uids,
                    Err(err) => {
                        warn!(%err, "relevance selector failed, suspending turn");
                        return Err(PipelineError::recoverable(
                            PipelineStage::Scan,
                            err.to_string(),
                        ));
                    }
                }
            }
        }

        let scan_text = self.build_scan_text(&turn.input);
        let outcome = scan(&ScanRequest {
            text: &scan_text,
            entries: self.session.lore_book.entries(),
            overrides: &self.session.manual_overrides,
            runtime: &self.session.lore_runtime,
            turn: scan_turn,
            externally_selected: &turn.selected_uids,
            bypass_keyword_scan: false,
        });
        turn.active_lore = outcome.active;
        turn.next_runtime = Some(outcome.next_runtime);
        turn.phase = TurnPhase::PromptBuilding;
        Ok(())
    }

    /// Run the secondary pass. An `Err` suspends the turn.
    async fn secondary_stage(&mut self, turn: &mut InflightTurn) -> Result<(), PipelineError> {
        let service = match self.secondary.clone() {
            Some(service) => service,
            None => {
                turn.phase = TurnPhase::Commit;
                return Ok(());
            }
        };

        let mut excerpt = String::new();
        for message in self.session.recent_messages(SECONDARY_EXCERPT_MESSAGES) {
            excerpt.push_str(&format!("{}: {}\n", message.role.name(), message.content));
        }
        excerpt.push_str(&format!("user: {}\n", turn.input));
        if let Some(cleaned) = &turn.cleaned {
            excerpt.push_str(&format!("assistant: {cleaned}\n"));
        }

        match service
            .recompute(&excerpt, &self.session.secondary_state)
            .await
        {
            Ok(update) => {
                turn.new_secondary = Some(update.state);
                turn.secondary_log = update.change_log;
                turn.phase = TurnPhase::Commit;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "secondary pass failed, suspending turn");
                Err(PipelineError::recoverable(
                    PipelineStage::SecondaryPass,
                    err.to_string(),
                ))
            }
        }
    }

    /// Commit the turn: messages, state, runtime, secondary, counter,
    /// snapshot. Happens exactly once per turn.
    fn commit(&mut self, turn: InflightTurn) -> TurnReport {
        let narrative = if turn.cancelled {
            turn.generated.clone()
        } else {
            turn.cleaned.clone().unwrap_or_else(|| turn.generated.clone())
        };

        self.session.messages.push(ChatMessage::user(&turn.input));
        self.session.messages.push(ChatMessage::assistant(&narrative));

        if let Some(tree) = turn.new_tree {
            self.session.state_tree = tree;
        }
        if let Some(runtime) = turn.next_runtime {
            self.session.lore_runtime = runtime;
        }
        if let Some(secondary) = turn.new_secondary {
            self.session.secondary_state = secondary;
        }
        self.session.turn_counter += 1;
        self.session.commit_snapshot();
        self.inflight = None;

        TurnReport {
            narrative,
            cancelled: turn.cancelled,
            mutation_log: turn.mutation_log,
            secondary_change_log: turn.secondary_log,
            active_lore_uids: turn.active_lore.iter().map(|e| e.uid.clone()).collect(),
            turn_counter: self.session.turn_counter,
        }
    }

    /// The scan buffer: recent history plus the new input.
    fn build_scan_text(&self, input: &str) -> String {
        let mut text = String::new();
        for message in self.session.recent_messages(SCAN_HISTORY_MESSAGES) {
            text.push_str(&message.content);
            text.push('\n');
        }
        text.push_str(input);
        text
    }
}

//! Testing utilities for the turn engine.
//!
//! This module provides tools for integration testing:
//! - scripted mocks for the three external services, so full turns run
//!   deterministically without API calls
//! - `TestHarness` for driving scripted turn scenarios
//! - Assertion helpers for verifying outcomes and state
//!
//! Panicking on misuse is fine here; these types only run under test.

use crate::lore::SelectorBlocks;
use crate::state::StateTree;
use crate::turn::{
    AssembledPrompt, BasicPromptAssembler, CancelToken, ChatMessage, ChatSession, Decision,
    GenerationError, GenerationOutcome, GenerationService, PipelineStage, RelevanceSelector,
    ScanServiceError, SecondaryPassError, SecondaryState, SecondaryStateService, SecondaryUpdate,
    SelectionResult, SessionError, TurnOrchestrator, TurnOutcome, TurnReport,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One scripted generation result.
#[derive(Debug, Clone)]
pub enum MockGeneration {
    /// Return this text as a completed generation.
    Text(String),
    /// Fail unrecoverably with this message.
    Failure(String),
    /// Block until cancelled, then return this partial text.
    AwaitCancel(String),
}

/// A generation service that replays scripted results in order.
///
/// Exhausting the script yields a fixed fallback narrative, so a test
/// that runs more turns than it scripted still terminates.
#[derive(Debug, Default)]
pub struct MockGenerator {
    script: Mutex<VecDeque<MockGeneration>>,
    prompts: Mutex<Vec<AssembledPrompt>>,
}

impl MockGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a scripted result.
    pub fn queue(&self, result: MockGeneration) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(result);
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<AssembledPrompt> {
        self.prompts
            .lock()
            .expect("mock prompt lock poisoned")
            .clone()
    }
}

#[async_trait]
impl GenerationService for MockGenerator {
    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.prompts
            .lock()
            .expect("mock prompt lock poisoned")
            .push(prompt.clone());

        let next = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match next {
            Some(MockGeneration::Text(text)) => Ok(GenerationOutcome::Complete(text)),
            Some(MockGeneration::Failure(message)) => Err(GenerationError(message)),
            Some(MockGeneration::AwaitCancel(partial)) => {
                cancel.cancelled().await;
                Ok(GenerationOutcome::Cancelled { partial })
            }
            None => Ok(GenerationOutcome::Complete(
                "There are no more scripted responses.".to_string(),
            )),
        }
    }
}

/// A relevance selector that replays scripted uid lists.
///
/// Exhausting the script selects nothing, which leaves activation to
/// the keyword cascade.
#[derive(Debug, Default)]
pub struct MockSelector {
    script: Mutex<VecDeque<Result<Vec<String>, String>>>,
    calls: Mutex<Vec<SelectorBlocks>>,
}

impl MockSelector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful selection.
    pub fn queue_selection<S: Into<String>>(&self, uids: Vec<S>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(Ok(uids.into_iter().map(Into::into).collect()));
    }

    /// Queue a failure.
    pub fn queue_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(Err(message.into()));
    }

    /// Serialized blocks received so far.
    pub fn calls(&self) -> Vec<SelectorBlocks> {
        self.calls.lock().expect("mock call lock poisoned").clone()
    }
}

#[async_trait]
impl RelevanceSelector for MockSelector {
    async fn select(
        &self,
        blocks: &SelectorBlocks,
        _history: &[ChatMessage],
        _state_summary: &str,
    ) -> Result<SelectionResult, ScanServiceError> {
        self.calls
            .lock()
            .expect("mock call lock poisoned")
            .push(blocks.clone());

        let next = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match next {
            Some(Ok(selected_uids)) => Ok(SelectionResult {
                selected_uids,
                ..SelectionResult::default()
            }),
            Some(Err(message)) => Err(ScanServiceError(message)),
            None => Ok(SelectionResult::default()),
        }
    }
}

/// A secondary-state service that replays scripted updates.
///
/// Exhausting the script echoes the current state back unchanged.
#[derive(Debug, Default)]
pub struct MockSecondary {
    script: Mutex<VecDeque<Result<SecondaryUpdate, String>>>,
}

impl MockSecondary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful recomputation.
    pub fn queue_update(&self, state: Value, change_log: Vec<String>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(Ok(SecondaryUpdate {
                state: SecondaryState(state),
                change_log,
            }));
    }

    /// Queue a failure.
    pub fn queue_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(Err(message.into()));
    }
}

#[async_trait]
impl SecondaryStateService for MockSecondary {
    async fn recompute(
        &self,
        _history_excerpt: &str,
        current: &SecondaryState,
    ) -> Result<SecondaryUpdate, SecondaryPassError> {
        let next = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match next {
            Some(Ok(update)) => Ok(update),
            Some(Err(message)) => Err(SecondaryPassError(message)),
            None => Ok(SecondaryUpdate {
                state: current.clone(),
                change_log: Vec::new(),
            }),
        }
    }
}

/// Test harness for running turn scenarios against scripted services.
pub struct TestHarness {
    /// The orchestrator under test.
    pub orchestrator: TurnOrchestrator,
    /// Handle for queueing generations.
    pub generator: Arc<MockGenerator>,
    /// Handle for queueing selections; attached only via [`Self::with_selector`].
    pub selector: Arc<MockSelector>,
    /// Handle for queueing secondary updates; attached only via
    /// [`Self::with_secondary`].
    pub secondary: Arc<MockSecondary>,
}

impl TestHarness {
    /// A harness over a fresh session: mock generator, basic assembler,
    /// no selector, no secondary pass.
    pub fn new() -> Self {
        Self::with_session(ChatSession::new())
    }

    /// A harness over a prepared session.
    pub fn with_session(session: ChatSession) -> Self {
        let generator = MockGenerator::new();
        let orchestrator = TurnOrchestrator::new(
            session,
            Arc::new(BasicPromptAssembler),
            Arc::clone(&generator) as Arc<dyn GenerationService>,
        );
        Self {
            orchestrator,
            generator,
            selector: MockSelector::new(),
            secondary: MockSecondary::new(),
        }
    }

    /// Attach the mock relevance selector.
    pub fn with_selector(mut self) -> Self {
        self.orchestrator = self
            .orchestrator
            .with_selector(Arc::clone(&self.selector) as Arc<dyn RelevanceSelector>);
        self
    }

    /// Attach the mock secondary-state service.
    pub fn with_secondary(mut self) -> Self {
        self.orchestrator = self
            .orchestrator
            .with_secondary(Arc::clone(&self.secondary) as Arc<dyn SecondaryStateService>);
        self
    }

    /// Queue a completed generation.
    pub fn expect_narrative(&mut self, text: impl Into<String>) -> &mut Self {
        self.generator.queue(MockGeneration::Text(text.into()));
        self
    }

    /// Queue a generation failure.
    pub fn expect_generation_failure(&mut self, message: impl Into<String>) -> &mut Self {
        self.generator.queue(MockGeneration::Failure(message.into()));
        self
    }

    /// Run one turn for the input.
    pub async fn send(&mut self, input: &str) -> Result<TurnOutcome, SessionError> {
        self.orchestrator.begin_turn(input).await
    }

    /// Resolve a suspended stage.
    pub async fn decide(
        &mut self,
        stage: PipelineStage,
        decision: Decision,
    ) -> Result<TurnOutcome, SessionError> {
        self.orchestrator.resolve_decision(stage, decision).await
    }

    /// The session, read-only.
    pub fn session(&self) -> &ChatSession {
        self.orchestrator.session()
    }

    /// Mutable session access; panics if a turn is in flight.
    pub fn session_mut(&mut self) -> &mut ChatSession {
        self.orchestrator
            .session_mut()
            .expect("session editing requires no turn in flight")
    }

    /// Resolved value at a state-tree path.
    pub fn state_value(&self, path: &str) -> Option<Value> {
        self.session().state_tree.get(path)
    }

    /// Content of the most recent message.
    pub fn last_message(&self) -> Option<&str> {
        self.session()
            .messages
            .last()
            .map(|m| m.content.as_str())
    }

    /// The committed turn counter.
    pub fn turn_counter(&self) -> u32 {
        self.session().turn_counter
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the outcome committed, returning the report.
#[track_caller]
pub fn assert_committed(outcome: &TurnOutcome) -> &TurnReport {
    match outcome {
        TurnOutcome::Committed(report) => report,
        TurnOutcome::AwaitingDecision(err) => {
            panic!("Expected a committed turn, got pending decision: {err}")
        }
    }
}

/// Assert the outcome suspended at the given stage.
#[track_caller]
pub fn assert_awaiting(outcome: &TurnOutcome, stage: PipelineStage) {
    match outcome {
        TurnOutcome::AwaitingDecision(err) if err.stage == stage => {}
        TurnOutcome::AwaitingDecision(err) => panic!(
            "Expected a pending {} decision, got one for {}",
            stage.name(),
            err.stage.name()
        ),
        TurnOutcome::Committed(report) => panic!(
            "Expected a pending {} decision, but turn {} committed",
            stage.name(),
            report.turn_counter
        ),
    }
}

/// Assert a state-tree path resolves to the expected value.
#[track_caller]
pub fn assert_state(harness: &TestHarness, path: &str, expected: Value) {
    let actual = harness.state_value(path);
    assert_eq!(
        actual,
        Some(expected.clone()),
        "Expected state at '{path}' to be {expected}, got {actual:?}"
    );
}

/// Assert the committed turn counter.
#[track_caller]
pub fn assert_turn_counter(harness: &TestHarness, expected: u32) {
    let actual = harness.turn_counter();
    assert_eq!(
        actual, expected,
        "Expected turn counter {expected}, got {actual}"
    );
}

/// Convenience: a state tree built from a JSON literal.
pub fn tree(value: Value) -> StateTree {
    StateTree::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::LoreEntry;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_generator_replays_in_order() {
        let mut harness = TestHarness::new();
        harness.expect_narrative("Response 1").expect_narrative("Response 2");

        let first = harness.send("first").await.unwrap();
        assert_eq!(assert_committed(&first).narrative, "Response 1");

        let second = harness.send("second").await.unwrap();
        assert_eq!(assert_committed(&second).narrative, "Response 2");

        // Exhausted script falls back rather than hanging the test.
        let third = harness.send("third").await.unwrap();
        assert!(assert_committed(&third)
            .narrative
            .contains("no more scripted"));
    }

    #[tokio::test]
    async fn test_harness_state_helpers() {
        let mut harness = TestHarness::new();
        harness.session_mut().state_tree = tree(json!({ "hp": [10, "Health"] }));
        harness.expect_narrative("You rest.\n<mutate>\nadd(hp, 5)\n</mutate>");

        let outcome = harness.send("I rest").await.unwrap();
        assert_committed(&outcome);
        assert_state(&harness, "hp", json!(15));
        assert_turn_counter(&harness, 1);
        assert_eq!(harness.last_message(), Some("You rest."));
    }

    #[tokio::test]
    async fn test_mock_selector_failure_suspends() {
        let mut harness = TestHarness::new().with_selector();
        harness
            .session_mut()
            .lore_book
            .insert(LoreEntry::new("wolves", "Wolves roam the pass.").with_keys(["wolf"]));
        harness.selector.queue_failure("selector down");
        harness.expect_narrative("unused until resumed");

        let outcome = harness.send("hello").await.unwrap();
        assert_awaiting(&outcome, PipelineStage::Scan);
    }
}

use std::sync::Arc;
use std::time::Instant;

use crate::agent_engine::grounder::ElementGrounder;
use crate::agent_engine::history::{SessionHistory, StepStatus};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::proposer::ActionProposer;
use crate::agent_engine::state::{
    ActionProposal, GroundingResult, IterationOutcome, LoopConfig, LoopEvent, LoopState, TerminationReason,
};
use crate::agent_engine::trigger::TriggerListener;
use crate::config::{AppConfig, ProposalErrorPolicy};
use crate::errors::BubbleResult;
use crate::executor::coordinator::ResolvedAction;
use crate::executor::dispatcher::ActionSink;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::perception::omniparser::OmniParserClient;
use crate::perception::screenshot::ScreenCapture;
use crate::perception::traits::ElementDetector;
use crate::perception::types::ScreenImage;

/// The three collaborators one iteration calls, in order.
#[derive(Clone)]
pub struct Components {
    pub proposer: ActionProposer,
    pub detector: Arc<dyn ElementDetector>,
    pub grounder: ElementGrounder,
}

impl Components {
    /// Build the configured reasoning roles and perception client.
    pub fn from_config(config: &AppConfig) -> BubbleResult<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        let (proposer_provider, proposer_cfg) = registry.call_config_for_role(Role::Proposer)?;
        let (grounder_provider, grounder_cfg) = registry.call_config_for_role(Role::Grounder)?;
        let detector = OmniParserClient::new(
            config.perception.clone(),
            config.perception_token(),
            config.retry.clone(),
        )?;
        Ok(Self {
            proposer: ActionProposer::new(proposer_provider, proposer_cfg),
            detector: Arc::new(detector),
            grounder: ElementGrounder::new(
                grounder_provider,
                grounder_cfg,
                config.agent.grounding_attempts,
            ),
        })
    }
}

/// Drives one goal from trigger to trigger until it is done or a session
/// limit ends it. Owns the history; collaborators only ever see a snapshot.
pub struct ResolutionLoop {
    goal: String,
    state: LoopState,
    history: SessionHistory,
    loop_ctrl: LoopController,
    components: Components,
    on_proposal_error: ProposalErrorPolicy,
}

impl ResolutionLoop {
    pub fn new(
        goal: impl Into<String>,
        components: Components,
        loop_config: LoopConfig,
        on_proposal_error: ProposalErrorPolicy,
    ) -> Self {
        let history = SessionHistory::new();
        let goal = goal.into();
        tracing::info!(
            session = %history.session_id,
            goal = %goal,
            on_proposal_error = ?on_proposal_error,
            limits = ?loop_config,
            "session started"
        );
        Self {
            goal,
            state: LoopState::Idle,
            history,
            loop_ctrl: LoopController::new(loop_config),
            components,
            on_proposal_error,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn session_id(&self) -> &str {
        &self.history.session_id
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    /// Session limit reached, if any.
    pub fn should_stop(&self) -> Option<TerminationReason> {
        self.loop_ctrl.should_stop()
    }

    fn set_state(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    /// Capture, propose and, unless done, perceive and ground.
    ///
    /// Only a capture failure is returned as `Err`; everything after that is
    /// folded into the outcome so the caller can report it and keep going.
    pub async fn run_iteration(&mut self, capture: &dyn ScreenCapture) -> BubbleResult<IterationOutcome> {
        let started = Instant::now();

        self.set_state(LoopState::Capturing);
        let image = capture.capture().await?;

        self.set_state(LoopState::Proposing);
        let proposal = match self
            .components
            .proposer
            .propose(&self.goal, &image, self.history.entries())
            .await
        {
            Ok(proposal) => proposal,
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, "proposal failed");
                return Ok(IterationOutcome::ProposalFailed { error: e.report() });
            }
        };

        let (step, action) = match proposal {
            ActionProposal::Done => {
                tracing::info!(steps = self.history.len(), "goal reported complete");
                self.set_state(LoopState::Terminated {
                    reason: TerminationReason::GoalComplete,
                });
                return Ok(IterationOutcome::Done);
            }
            ActionProposal::NextAction { step, action } => (step, action),
        };

        if self.history.already_failed(step, &action) {
            self.loop_ctrl.record_repeat();
            tracing::warn!(step, action = %action, "proposal repeats an action that already failed");
        } else {
            self.loop_ctrl.clear_repeats();
        }

        self.set_state(LoopState::Grounding {
            step,
            action: action.clone(),
        });
        match self.perceive_and_ground(&action, &image).await {
            Ok(grounding) => {
                self.history.push(step, action.clone(), StepStatus::Success);
                self.loop_ctrl.record_success();
                self.set_state(LoopState::Resolved { step });
                tracing::info!(
                    step,
                    icon = grounding.icon_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "iteration resolved"
                );
                Ok(IterationOutcome::Resolved {
                    step,
                    proposed_action: action,
                    grounding,
                })
            }
            Err(e) => {
                self.history.push(step, action.clone(), StepStatus::Failure);
                self.loop_ctrl.record_failure();
                tracing::warn!(
                    step,
                    kind = e.kind(),
                    error = %e,
                    failures = self.loop_ctrl.failure_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "iteration failed, step marked failure"
                );
                Ok(IterationOutcome::Failed {
                    step,
                    proposed_action: action,
                    error: e.report(),
                })
            }
        }
    }

    async fn perceive_and_ground(
        &self,
        action: &str,
        image: &ScreenImage,
    ) -> BubbleResult<GroundingResult> {
        let snapshot = self.components.detector.detect(image).await?;
        tracing::debug!(elements = snapshot.elements.len(), "perception snapshot");
        self.components.grounder.ground(action, &snapshot).await
    }

    /// Whether a failed proposal ends the session under the configured policy.
    pub fn proposal_error_is_fatal(&self, kind: &str) -> bool {
        kind == "proposal_parse" && self.on_proposal_error == ProposalErrorPolicy::Terminate
    }

    async fn terminate(&mut self, reason: TerminationReason, sink: &dyn ActionSink) -> BubbleResult<TerminationReason> {
        self.set_state(LoopState::Terminated { reason });
        tracing::info!(reason = ?reason, steps = self.history.len(), "session terminated");
        sink.emit(&LoopEvent::Terminated {
            session_id: self.session_id().to_string(),
            reason,
        })
        .await?;
        Ok(reason)
    }

    /// Wait for triggers and resolve one action per trigger until terminated.
    pub async fn run(
        &mut self,
        listener: &mut TriggerListener,
        capture: &dyn ScreenCapture,
        sink: &dyn ActionSink,
    ) -> BubbleResult<TerminationReason> {
        loop {
            if let Some(reason) = self.should_stop() {
                return self.terminate(reason, sink).await;
            }

            self.set_state(LoopState::AwaitingTrigger);
            if !listener.wait().await {
                return self.terminate(TerminationReason::TriggerClosed, sink).await;
            }

            let session_id = self.session_id().to_string();
            match self.run_iteration(capture).await {
                Ok(IterationOutcome::Done) => {
                    return self.terminate(TerminationReason::GoalComplete, sink).await;
                }
                Ok(IterationOutcome::Resolved { step, grounding, .. }) => {
                    sink.emit(&LoopEvent::Action {
                        session_id,
                        step,
                        action: ResolvedAction::from(&grounding),
                    })
                    .await?;
                }
                Ok(IterationOutcome::Failed { step, error, .. }) => {
                    sink.emit(&LoopEvent::Error {
                        session_id,
                        step: Some(step),
                        error,
                    })
                    .await?;
                }
                Ok(IterationOutcome::ProposalFailed { error }) => {
                    let fatal = self.proposal_error_is_fatal(&error.kind);
                    sink.emit(&LoopEvent::Error {
                        session_id,
                        step: None,
                        error,
                    })
                    .await?;
                    if fatal {
                        tracing::error!(policy = ?self.on_proposal_error, "malformed proposal ends the session");
                        return self.terminate(TerminationReason::ProposalError, sink).await;
                    }
                    tracing::warn!(policy = ?self.on_proposal_error, "proposal error, awaiting next trigger");
                }
                Err(e) => {
                    tracing::error!(kind = e.kind(), error = %e, "iteration aborted before proposing");
                    sink.emit(&LoopEvent::Error {
                        session_id,
                        step: None,
                        error: e.report(),
                    })
                    .await?;
                }
            }

            listener.discard_pending();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::history::HistoryEntry;
    use crate::agent_engine::trigger::trigger_channel;
    use crate::errors::BubbleError;
    use crate::executor::dispatcher::ChannelSink;
    use crate::testing::{save_button_snapshot, FakeDetector, ScriptedProvider, StaticCapture};

    const STEP_ONE: &str = r#"{"step": 1, "action": "Click the Save button"}"#;
    const GROUNDED: &str = r#"{"icon": 3, "bbox": [100, 200, 140, 220], "reason": "matches Save button", "action": "Click the Save button"}"#;

    struct Harness {
        proposer: Arc<ScriptedProvider>,
        grounder: Arc<ScriptedProvider>,
        detector: Arc<FakeDetector>,
    }

    impl Harness {
        fn new(proposals: Vec<BubbleResult<String>>, groundings: Vec<BubbleResult<String>>, detector: FakeDetector) -> Self {
            Self {
                proposer: Arc::new(ScriptedProvider::new(proposals)),
                grounder: Arc::new(ScriptedProvider::new(groundings)),
                detector: Arc::new(detector),
            }
        }

        fn build(&self, config: LoopConfig, policy: ProposalErrorPolicy) -> ResolutionLoop {
            let components = Components {
                proposer: ActionProposer::new(self.proposer.clone(), ScriptedProvider::call_config()),
                detector: self.detector.clone(),
                grounder: ElementGrounder::new(self.grounder.clone(), ScriptedProvider::call_config(), 2),
            };
            ResolutionLoop::new("save the file", components, config, policy)
        }
    }

    fn unavailable() -> BubbleError {
        BubbleError::PerceptionUnavailable {
            attempts: 3,
            last_error: "operation timed out".into(),
        }
    }

    #[tokio::test]
    async fn test_resolves_save_button() {
        let h = Harness::new(
            vec![Ok(STEP_ONE.into())],
            vec![Ok(GROUNDED.into())],
            FakeDetector::always(save_button_snapshot()),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let outcome = engine.run_iteration(&StaticCapture::png()).await.unwrap();

        let IterationOutcome::Resolved { step, grounding, .. } = outcome else {
            panic!("expected resolved, got {outcome:?}");
        };
        assert_eq!(step, 1);
        let action = ResolvedAction::from(&grounding);
        assert_eq!((action.x, action.y, action.width, action.height, action.icon), (100.0, 200.0, 40.0, 20.0, 3));
        assert_eq!(
            engine.history().entries(),
            &[HistoryEntry {
                step: 1,
                action: "Click the Save button".into(),
                status: Some(StepStatus::Success),
            }]
        );
        assert_eq!(engine.state(), &LoopState::Resolved { step: 1 });
    }

    #[tokio::test]
    async fn test_done_skips_perception_and_keeps_history() {
        let h = Harness::new(
            vec![Ok(r#"{"done": true}"#.into())],
            vec![],
            FakeDetector::always(save_button_snapshot()),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let outcome = engine.run_iteration(&StaticCapture::png()).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Done);
        assert_eq!(h.detector.calls(), 0);
        assert!(h.grounder.requests().is_empty());
        assert!(engine.history().is_empty());
        assert!(matches!(engine.state(), LoopState::Terminated { reason: TerminationReason::GoalComplete }));
    }

    #[tokio::test]
    async fn test_perception_unavailable_marks_failure_without_action() {
        let h = Harness::new(
            vec![Ok(STEP_ONE.into())],
            vec![Ok(GROUNDED.into())],
            FakeDetector::failing(unavailable),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let outcome = engine.run_iteration(&StaticCapture::png()).await.unwrap();

        let IterationOutcome::Failed { step, error, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(step, 1);
        assert_eq!(error.kind, "perception_unavailable");
        assert!(engine.history().last().unwrap().failed());
        assert!(h.grounder.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_is_retried_with_same_number() {
        let h = Harness::new(
            vec![
                Ok(STEP_ONE.into()),
                Ok(r#"{"step": 2, "action": "Press Ctrl+S"}"#.into()),
            ],
            vec![Ok("not json".into()), Ok("still not json".into())],
            FakeDetector::always(save_button_snapshot()),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let capture = StaticCapture::png();

        let first = engine.run_iteration(&capture).await.unwrap();
        assert!(matches!(first, IterationOutcome::Failed { step: 1, .. }));

        let second = engine.run_iteration(&capture).await.unwrap();
        assert!(matches!(second, IterationOutcome::Failed { step: 1, .. }));
        let steps: Vec<u32> = engine.history().entries().iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![1, 1]);

        let prompt = &h.proposer.requests()[1].prompt;
        assert!(prompt.contains("\"status\": \"failure\""));
    }

    #[tokio::test]
    async fn test_proposal_error_leaves_history_untouched() {
        let h = Harness::new(
            vec![Ok("I think you should click save".into())],
            vec![],
            FakeDetector::always(save_button_snapshot()),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let outcome = engine.run_iteration(&StaticCapture::png()).await.unwrap();
        assert!(matches!(
            outcome,
            IterationOutcome::ProposalFailed { ref error } if error.kind == "proposal_parse"
        ));
        assert!(engine.history().is_empty());
        assert_eq!(h.detector.calls(), 0);
    }

    #[tokio::test]
    async fn test_run_emits_action_then_terminates() {
        let h = Harness::new(
            vec![Ok(STEP_ONE.into()), Ok(r#"{"done": true}"#.into())],
            vec![Ok(GROUNDED.into())],
            FakeDetector::always(save_button_snapshot()),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let (handle, mut listener) = trigger_channel();
        let (sink, mut events) = ChannelSink::new();
        let capture = StaticCapture::png();

        let driver = tokio::spawn(async move {
            handle.fire();
            // the loop drains triggers fired mid-iteration; wait for it to pick up the first
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.fire();
            handle
        });
        let reason = engine.run(&mut listener, &capture, &sink).await.unwrap();
        assert_eq!(reason, TerminationReason::GoalComplete);
        drop(driver.await.unwrap());

        let first = events.recv().await.unwrap();
        assert!(matches!(first, LoopEvent::Action { step: 1, ref action, .. } if action.icon == 3));
        let last = events.recv().await.unwrap();
        assert!(matches!(last, LoopEvent::Terminated { reason: TerminationReason::GoalComplete, .. }));
    }

    #[tokio::test]
    async fn test_run_stops_when_trigger_source_closes() {
        let h = Harness::new(vec![], vec![], FakeDetector::always(save_button_snapshot()));
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::AwaitTrigger);
        let (handle, mut listener) = trigger_channel();
        drop(handle);
        let (sink, mut events) = ChannelSink::new();
        let reason = engine.run(&mut listener, &StaticCapture::png(), &sink).await.unwrap();
        assert_eq!(reason, TerminationReason::TriggerClosed);
        assert!(matches!(events.recv().await, Some(LoopEvent::Terminated { .. })));
        assert!(h.proposer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_policy_ends_on_malformed_proposal() {
        let h = Harness::new(
            vec![Ok("garbage".into())],
            vec![],
            FakeDetector::always(save_button_snapshot()),
        );
        let mut engine = h.build(LoopConfig::default(), ProposalErrorPolicy::Terminate);
        let (handle, mut listener) = trigger_channel();
        handle.fire();
        let (sink, mut events) = ChannelSink::new();
        let reason = engine.run(&mut listener, &StaticCapture::png(), &sink).await.unwrap();
        assert_eq!(reason, TerminationReason::ProposalError);
        assert!(matches!(events.recv().await, Some(LoopEvent::Error { step: None, .. })));
        assert!(matches!(
            events.recv().await,
            Some(LoopEvent::Terminated { reason: TerminationReason::ProposalError, .. })
        ));
    }

    #[tokio::test]
    async fn test_repeated_failed_action_ends_as_stuck() {
        let repeat = || Ok::<_, BubbleError>(STEP_ONE.to_string());
        let h = Harness::new(
            vec![repeat(), repeat(), repeat(), repeat()],
            vec![],
            FakeDetector::failing(unavailable),
        );
        let mut engine = h.build(
            LoopConfig {
                max_repeated_failures: 2,
                ..LoopConfig::default()
            },
            ProposalErrorPolicy::AwaitTrigger,
        );
        let (handle, mut listener) = trigger_channel();
        let (sink, mut events) = ChannelSink::new();
        let capture = StaticCapture::png();

        let driver = tokio::spawn(async move {
            for _ in 0..3 {
                handle.fire();
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            handle
        });
        let reason = engine.run(&mut listener, &capture, &sink).await.unwrap();
        drop(driver.await.unwrap());

        assert_eq!(reason, TerminationReason::Stuck);
        assert_eq!(engine.history().len(), 3);
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                LoopEvent::Action { .. } => "action",
                LoopEvent::Error { .. } => "error",
                LoopEvent::Terminated { .. } => "terminated",
            });
        }
        assert_eq!(kinds, vec!["error", "error", "error", "terminated"]);
    }
}

use serde::{Deserialize, Serialize};

use crate::errors::ErrorReport;
use crate::executor::coordinator::ResolvedAction;
use crate::perception::types::BBox;

/// Lifecycle states of the resolution loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingTrigger,
    Capturing,
    Proposing,
    Grounding { step: u32, action: String },
    Resolved { step: u32 },
    Terminated { reason: TerminationReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The proposer reported the goal as satisfied.
    GoalComplete,
    /// A proposal could not be parsed and policy says terminate.
    ProposalError,
    /// The same failed action kept coming back.
    Stuck,
    /// Duration or failure limit reached.
    LoopLimit,
    /// The trigger source went away.
    TriggerClosed,
}

/// Output of the action proposer: exactly one of the two.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionProposal {
    Done,
    NextAction { step: u32, action: String },
}

/// Final output of a successful iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingResult {
    pub icon_id: u32,
    pub bbox: BBox,
    pub reason: String,
    pub action: String,
}

/// What a single trigger produced.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Done,
    Resolved {
        step: u32,
        proposed_action: String,
        grounding: GroundingResult,
    },
    /// Perception or grounding failed; the step is recorded as `failure`.
    Failed {
        step: u32,
        proposed_action: String,
        error: ErrorReport,
    },
    /// The proposer produced nothing usable; history is unchanged.
    ProposalFailed { error: ErrorReport },
}

/// Event handed to the actuator side after every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    Action {
        session_id: String,
        step: u32,
        #[serde(flatten)]
        action: ResolvedAction,
    },
    Error {
        session_id: String,
        step: Option<u32>,
        #[serde(flatten)]
        error: ErrorReport,
    },
    Terminated {
        session_id: String,
        reason: TerminationReason,
    },
}

/// Session limits; `None` disables a limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_duration_minutes: Option<u32>,
    pub max_failures: Option<u32>,
    pub max_repeated_failures: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_duration_minutes: None,
            max_failures: None,
            max_repeated_failures: 3,
        }
    }
}

impl LoopConfig {
    pub fn from_agent(agent: &crate::config::AgentConfig) -> Self {
        Self {
            max_duration_minutes: Some(agent.max_duration_minutes).filter(|m| *m > 0),
            max_failures: Some(agent.max_consecutive_failures).filter(|m| *m > 0),
            max_repeated_failures: agent.max_repeated_failures,
        }
    }
}

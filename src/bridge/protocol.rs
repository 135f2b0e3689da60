use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::GroundingResult;
use crate::errors::ErrorReport;
use crate::executor::coordinator::ResolvedAction;
use crate::perception::types::BBox;

pub const PROCESS_SCREENSHOT: &str = "process_screenshot";

/// One request line from the host process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeRequest {
    pub action: Option<String>,
    pub screenshot_path: Option<PathBuf>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub step: u32,
    pub action: String,
}

/// One response line to the host process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeResponse {
    Success {
        highlighting_boxes: Vec<ResolvedAction>,
        task: TaskRef,
        icon: u32,
        bbox: BBox,
        reason: String,
    },
    Completed {
        message: String,
        highlighting_boxes: Vec<ResolvedAction>,
    },
    Error {
        kind: String,
        message: String,
        highlighting_boxes: Vec<ResolvedAction>,
    },
    Shutdown {
        message: String,
    },
}

impl BridgeResponse {
    /// The highlighted box carries the proposed action text, as the host UI shows it.
    pub fn success(step: u32, proposed_action: String, grounding: &GroundingResult) -> Self {
        let mut highlight = ResolvedAction::from(grounding);
        highlight.action = proposed_action.clone();
        Self::Success {
            highlighting_boxes: vec![highlight],
            task: TaskRef {
                step,
                action: proposed_action,
            },
            icon: grounding.icon_id,
            bbox: grounding.bbox,
            reason: grounding.reason.clone(),
        }
    }

    pub fn completed() -> Self {
        Self::Completed {
            message: "Task completed".into(),
            highlighting_boxes: Vec::new(),
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
            highlighting_boxes: Vec::new(),
        }
    }

    pub fn shutdown() -> Self {
        Self::Shutdown {
            message: "Backend shutting down".into(),
        }
    }
}

impl From<ErrorReport> for BridgeResponse {
    fn from(report: ErrorReport) -> Self {
        Self::error(report.kind, report.message)
    }
}

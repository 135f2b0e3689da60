use std::sync::Arc;

use crate::agent_engine::history::HistoryEntry;
use crate::agent_engine::state::ActionProposal;
use crate::errors::{BubbleError, BubbleResult};
use crate::llm::provider::ReasoningProvider;
use crate::llm::response::{excerpt, parse_json_object};
use crate::llm::types::{CallConfig, InlineImage, ReasoningRequest};
use crate::perception::types::ScreenImage;

const SYSTEM_PROMPT: &str = "\
You are a desktop UI assistant. You receive the user's overall goal, a screenshot of their \
screen, and the ordered list of atomic UI actions attempted so far, each marked 'success' or \
'failure'.

Decide the single next atomic UI action (one click, or one keystroke sequence).

Rules:
- If the most recent attempt is 'success', move on to the next step number.
- If the most recent attempt is 'failure', keep the same step number and propose a different \
concrete action than the one that failed.
- Only when the goal is fully satisfied on screen, answer {\"done\": true}.
- Otherwise answer {\"step\": <int>, \"action\": <string>}.
- Only interact with elements inside open application windows, never the taskbar, system tray \
or other operating-system chrome.
- Answer with the JSON object only.";

/// Turns (goal, screen, history) into exactly one `ActionProposal`.
///
/// Malformed output is reported as `BubbleError::ProposalParse` and never
/// retried here.
#[derive(Clone)]
pub struct ActionProposer {
    provider: Arc<dyn ReasoningProvider>,
    cfg: CallConfig,
}

impl ActionProposer {
    pub fn new(provider: Arc<dyn ReasoningProvider>, cfg: CallConfig) -> Self {
        Self { provider, cfg }
    }

    pub async fn propose(
        &self,
        goal: &str,
        image: &ScreenImage,
        history: &[HistoryEntry],
    ) -> BubbleResult<ActionProposal> {
        let request = ReasoningRequest {
            system_instruction: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(goal, history)?,
            image: Some(InlineImage::from(image)),
        };
        let raw = self.provider.generate(&request, &self.cfg).await?;
        let proposal = parse_proposal(&raw)?;
        let aligned = align_with_history(proposal, history);
        tracing::info!(proposal = ?aligned, history = history.len(), "proposal parsed");
        Ok(aligned)
    }
}

pub fn build_prompt(goal: &str, history: &[HistoryEntry]) -> BubbleResult<String> {
    let history_section = if history.is_empty() {
        "No atomic actions have been attempted yet.".to_string()
    } else {
        format!(
            "Atomic actions attempted so far (in order):\n{}",
            serde_json::to_string_pretty(history)?
        )
    };
    Ok(format!(
        "User goal: {goal}\n\n{history_section}\n\n\
         Answer {{\"done\": true}} if the goal is complete, otherwise the next atomic UI action \
         as {{\"step\": <int>, \"action\": <string>}}."
    ))
}

/// Upper bound on a proposed step number.
pub const MAX_STEP: u32 = 10_000;

/// Validate a raw reply against the proposal contract.
pub fn parse_proposal(raw: &str) -> BubbleResult<ActionProposal> {
    let fail = |why: String| BubbleError::ProposalParse(format!("{why}; raw: {}", excerpt(raw)));

    let map = parse_json_object(raw).map_err(|e| fail(e.to_string()))?;
    let has_action_fields = map.contains_key("step") || map.contains_key("action");

    match map.get("done") {
        Some(serde_json::Value::Bool(true)) => {
            if has_action_fields {
                return Err(fail("'done' and a next action are mutually exclusive".into()));
            }
            return Ok(ActionProposal::Done);
        }
        Some(serde_json::Value::Bool(false)) | None => {}
        Some(other) => return Err(fail(format!("'done' must be a boolean, got {other}"))),
    }

    let step = map
        .get("step")
        .and_then(serde_json::Value::as_u64)
        .filter(|s| (1..=u64::from(MAX_STEP)).contains(s))
        .and_then(|s| u32::try_from(s).ok())
        .ok_or_else(|| fail(format!("'step' must be an integer between 1 and {MAX_STEP}")))?;
    let action = map
        .get("action")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| fail("'action' must be a non-empty string".into()))?;

    Ok(ActionProposal::NextAction {
        step,
        action: action.to_string(),
    })
}

/// Enforce the step contract: advance after success, repeat the step after failure.
pub fn align_with_history(proposal: ActionProposal, history: &[HistoryEntry]) -> ActionProposal {
    let ActionProposal::NextAction { step, action } = proposal else {
        return proposal;
    };
    let Some(last) = history.last() else {
        return ActionProposal::NextAction { step, action };
    };

    let aligned = if last.succeeded() && step <= last.step {
        last.step.saturating_add(1)
    } else if last.failed() && step != last.step {
        last.step
    } else {
        step
    };
    if aligned != step {
        tracing::warn!(
            proposed = step,
            aligned,
            last_step = last.step,
            last_status = ?last.status,
            "proposal step diverged from history, renumbered"
        );
    }
    ActionProposal::NextAction {
        step: aligned,
        action,
    }
}

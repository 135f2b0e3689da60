use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
}

/// One attempted atomic action. `status` is `None` only while the step is
/// still in flight; entries stored in a `SessionHistory` are always resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u32,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
}

impl HistoryEntry {
    pub fn succeeded(&self) -> bool {
        self.status == Some(StepStatus::Success)
    }

    pub fn failed(&self) -> bool {
        self.status == Some(StepStatus::Failure)
    }
}

/// Append-only record of one session's attempts.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    pub session_id: String,
    entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, step: u32, action: String, status: StepStatus) {
        self.entries.push(HistoryEntry {
            step,
            action,
            status: Some(status),
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `action` already failed for `step` (whitespace and case ignored).
    pub fn already_failed(&self, step: u32, action: &str) -> bool {
        let wanted = normalize(action);
        self.entries
            .iter()
            .any(|e| e.step == step && e.failed() && normalize(&e.action) == wanted)
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(action: &str) -> String {
    action
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

use crate::errors::{BubbleError, BubbleResult};

/// One event from the Gradio call API stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GradioEvent {
    Generating(serde_json::Value),
    Complete(serde_json::Value),
    Error(Option<String>),
    Heartbeat,
}

/// Parses a full Gradio SSE body (`event: <name>` / `data: <json>` pairs separated by blank lines).
/// Unknown event names are skipped.
pub fn parse_events(body: &str) -> BubbleResult<Vec<GradioEvent>> {
    let mut events = Vec::new();
    let mut name: Option<String> = None;
    let mut data = String::new();

    for raw in body.lines().chain(std::iter::once("")) {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            if let Some(event) = name.take() {
                if let Some(parsed) = build_event(&event, data.trim())? {
                    events.push(parsed);
                }
            }
            data.clear();
            continue;
        }
        if line.starts_with(':') {
            continue;
        }
        if let Some(v) = line.strip_prefix("event:") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(v.trim());
        }
    }
    Ok(events)
}

fn build_event(name: &str, data: &str) -> BubbleResult<Option<GradioEvent>> {
    let parse = |d: &str| -> BubbleResult<serde_json::Value> {
        if d.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(d)
            .map_err(|e| BubbleError::PerceptionResponse(format!("SSE data for '{name}': {e}")))
    };
    let event = match name {
        "complete" => GradioEvent::Complete(parse(data)?),
        "generating" => GradioEvent::Generating(parse(data)?),
        "heartbeat" => GradioEvent::Heartbeat,
        "error" => {
            let message = match parse(data) {
                Ok(serde_json::Value::String(s)) => Some(s),
                Ok(serde_json::Value::Null) => None,
                Ok(other) => Some(other.to_string()),
                Err(_) => Some(data.to_string()),
            };
            GradioEvent::Error(message)
        }
        other => {
            tracing::debug!(event = other, "ignoring unknown SSE event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Returns the `complete` payload, or the backend's error.
pub fn completion(events: Vec<GradioEvent>) -> BubbleResult<serde_json::Value> {
    for event in events {
        match event {
            GradioEvent::Complete(value) => return Ok(value),
            GradioEvent::Error(message) => {
                return Err(BubbleError::PerceptionResponse(format!(
                    "backend reported error: {}",
                    message.unwrap_or_else(|| "unspecified".into())
                )))
            }
            GradioEvent::Generating(_) | GradioEvent::Heartbeat => {}
        }
    }
    Err(BubbleError::PerceptionResponse(
        "stream ended without a complete event".into(),
    ))
}

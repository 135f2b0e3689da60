use crate::errors::{BubbleError, BubbleResult};

/// Parse a backend reply as a JSON object. When the text is not valid JSON on
/// its own, each balanced `{...}` span embedded in it is tried in order.
pub fn parse_json_object(raw: &str) -> BubbleResult<serde_json::Map<String, serde_json::Value>> {
    let trimmed = raw.trim();
    let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value,
        Err(direct) => embedded_object(trimmed).ok_or_else(|| {
            BubbleError::InvalidResponse(format!("no valid JSON object found ({direct})"))
        })?,
    };
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(BubbleError::InvalidResponse(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// First balanced `{...}` span that parses as JSON. Braces inside string
/// literals do not count towards the nesting depth.
fn embedded_object(text: &str) -> Option<serde_json::Value> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            if let Ok(value) = serde_json::from_str(&text[start..start + end]) {
                return Some(value);
            }
        }
        from = start + 1;
    }
    None
}

fn balanced_end(candidate: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in candidate.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Shorten long model output for error messages and logs.
pub fn excerpt(raw: &str) -> String {
    const MAX: usize = 200;
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX).collect();
    format!("{cut}…")
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BubbleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Screen capture error: {0}")]
    Capture(String),

    #[error("Perception unavailable after {attempts} attempt(s): {last_error}")]
    PerceptionUnavailable { attempts: u32, last_error: String },

    #[error("Perception response error: {0}")]
    PerceptionResponse(String),

    #[error("Reasoning backend unavailable after {attempts} attempt(s): {last_error}")]
    ReasoningUnavailable { attempts: u32, last_error: String },

    #[error("{service} backend returned {status}: {body}")]
    BackendStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Proposal parse error: {0}")]
    ProposalParse(String),

    #[error("Grounding failed after {attempts} attempt(s): {last_error}")]
    GroundingFailed { attempts: u32, last_error: String },

    #[error("No UI elements to ground against")]
    EmptyElements,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl BubbleError {
    /// Stable, machine-readable kind used at process and actuator boundaries.
    pub fn kind(&self) -> &'static str {
        match self {
            BubbleError::Config(_) | BubbleError::TomlDe(_) | BubbleError::TomlSer(_) => {
                "configuration"
            }
            BubbleError::Capture(_) | BubbleError::Image(_) => "capture",
            BubbleError::PerceptionUnavailable { .. } => "perception_unavailable",
            BubbleError::PerceptionResponse(_) => "perception_response",
            BubbleError::ReasoningUnavailable { .. } | BubbleError::BackendStatus { .. } => {
                "reasoning_unavailable"
            }
            BubbleError::ProposalParse(_) => "proposal_parse",
            BubbleError::GroundingFailed { .. } => "grounding_failed",
            BubbleError::EmptyElements => "empty_elements",
            BubbleError::InvalidResponse(_) => "invalid_response",
            BubbleError::Protocol(_) => "protocol",
            BubbleError::Io(_) => "io",
            BubbleError::Json(_) => "json",
            BubbleError::Http(_) => "http",
        }
    }

    /// Timeouts, refused connections, rate limits and server-side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            BubbleError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BubbleError::BackendStatus { status, .. } => *status == 429 || *status >= 500,
            BubbleError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured error surfaced across boundaries instead of raw error chains.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
}

impl serde::Serialize for BubbleError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.report().serialize(serializer)
    }
}

pub type BubbleResult<T> = Result<T, BubbleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transience() {
        let rate_limited = BubbleError::BackendStatus {
            service: "gemini",
            status: 429,
            body: String::new(),
        };
        let bad_request = BubbleError::BackendStatus {
            service: "gemini",
            status: 400,
            body: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(!bad_request.is_transient());
        assert!(!BubbleError::ProposalParse("x".into()).is_transient());
    }

    #[test]
    fn test_report_is_structured() {
        let err = BubbleError::PerceptionUnavailable {
            attempts: 3,
            last_error: "timed out".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "perception_unavailable");
        assert!(json["message"].as_str().unwrap().contains("3 attempt"));
    }
}

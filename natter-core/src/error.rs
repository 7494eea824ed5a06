// ABOUTME: Typed failures reported by generation backends.
// ABOUTME: Every variant degrades a turn to silence rather than crashing the bot.

use thiserror::Error;

/// Generation backend failure
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Transport(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Backend returned no completion")]
    Empty,

    #[error("Operation not supported by the {0} backend")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Transport(_) => "transport",
            BackendError::Status { .. } => "status",
            BackendError::Malformed(_) => "malformed",
            BackendError::Empty => "empty",
            BackendError::Unsupported(_) => "unsupported",
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let err = BackendError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned status 502: bad gateway");
        assert_eq!(err.kind(), "status");
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BackendError = parse_err.into();
        assert_eq!(err.kind(), "malformed");
    }
}

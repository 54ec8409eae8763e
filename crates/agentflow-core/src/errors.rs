use std::time::Duration;

/// Errors from talking to the backend, either a plain request or an event stream.
/// Bodies are kept as opaque strings; they are shown to the user as-is.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),

    // Streams only
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ApiError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the failure happened on the connection rather than in the server's answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::StreamInterrupted(_) | Self::IdleTimeout(_)
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            _ => Self::Status { status, body },
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(ApiError::from_status(401, "x".into()), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(403, "x".into()), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(404, "x".into()), ApiError::NotFound(_)));
        assert!(matches!(
            ApiError::from_status(502, "bad gateway".into()),
            ApiError::Status { status: 502, .. }
        ));
    }

    #[test]
    fn transport_classification() {
        assert!(ApiError::Network("refused".into()).is_transport());
        assert!(ApiError::IdleTimeout(Duration::from_secs(5)).is_transport());
        assert!(!ApiError::from_status(500, "boom".into()).is_transport());
        assert!(!ApiError::Cancelled.is_transport());
    }

    #[test]
    fn display_includes_body() {
        let err = ApiError::from_status(500, "boom".into());
        assert_eq!(err.to_string(), "server returned 500: boom");
        assert_eq!(err.error_kind(), "status");
    }
}

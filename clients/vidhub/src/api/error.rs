//! Error taxonomy for calls against the VidHub backend.

use http::{Method, StatusCode};

/// Coarse classification of an [`ApiError`].
///
/// Callers mostly care about which of these buckets a failure falls into, not about the exact
/// HTTP status that produced it. Only [`ErrorKind::NotFound`] and [`ErrorKind::PurchaseFailed`]
/// are meant to be shown to a user as an error; the rest turn into UI state (locked, still
/// polling, logged out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backend refused access to a gated resource (HTTP 403).
    NotEntitled,
    /// The resource does not exist (HTTP 404).
    NotFound,
    /// Network failures, 5xx answers, timeouts, or bodies we could not decode.
    TransientFetchFailure,
    /// Creating, paying for, or verifying an order failed.
    PurchaseFailed,
    /// No valid session, even after trying to refresh it (HTTP 401).
    Unauthorized,
    /// Any other 4xx answer.
    Rejected,
    /// The request was refused before it was sent.
    InvalidInput,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not entitled: {message}")]
    NotEntitled { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("session is missing or expired")]
    Unauthorized,

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("backend unavailable with status {status}: {message}")]
    Unavailable { status: StatusCode, message: String },

    #[error("send {method} request to {url}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("parse {what} response")]
    Decode {
        what: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("purchase failed: {reason}")]
    PurchaseFailed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Builds the error matching a non-success HTTP answer.
    ///
    /// The backend reports failures as `{"statusCode": 403, "message": "..."}`; when the body
    /// has that shape only the message is kept, otherwise the raw body text is used.
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::NotEntitled { message },
            StatusCode::NOT_FOUND => Self::NotFound { message },
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                Self::Unavailable { status, message }
            }
            s if s.is_server_error() => Self::Unavailable { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    pub(crate) fn purchase_failed(reason: impl Into<String>) -> Self {
        Self::PurchaseFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEntitled { .. } => ErrorKind::NotEntitled,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::Unavailable { .. } | Self::Transport { .. } | Self::Decode { .. } => {
                ErrorKind::TransientFetchFailure
            }
            Self::PurchaseFailed { .. } => ErrorKind::PurchaseFailed,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// True if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientFetchFailure
    }

    /// True if this failure should be surfaced to the user as an error message rather than
    /// being folded into UI state.
    pub fn is_user_visible(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::PurchaseFailed)
    }
}

fn extract_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: serde_json::Value,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        // validation failures come back as a list of messages
        Ok(ErrorBody {
            message: serde_json::Value::Array(messages),
        }) => messages
            .iter()
            .map(|m| m.as_str().map_or_else(|| m.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join("; "),
        Ok(ErrorBody {
            message: serde_json::Value::String(message),
        }) => message,
        _ if body.trim().is_empty() => "no details".to_string(),
        _ => body.trim().to_string(),
    }
}

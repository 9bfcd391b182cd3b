/// Error types for authorization code flow operations
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Authorization window closed before the flow completed")]
    AuthWindowClosed,

    #[error("No authorization grant issued: {0}")]
    NoAuthorizationGrant(String),

    #[error("Access token denied: {error}, description: {description:?}")]
    AccessTokenDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Invalid {field} URL: {source}")]
    MalformedUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid {field} URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Timeout waiting for authorization callback")]
    CaptureTimeout,

    #[error("Capture method unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Unsupported redirect URL: {0}")]
    UnsupportedRedirect(String),

    #[error("Could not start token fetch worker: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Closed classification of refresh failures, one user-facing message each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthWindowClosed,
    NoAuthorizationGrant,
    AccessTokenDenied,
    MalformedUrl,
    Other,
}

impl ErrorKind {
    /// Message shown to the user, or `None` when the failure is reported elsewhere
    pub fn user_message(self) -> Option<&'static str> {
        match self {
            // Closing the window is already surfaced by the dashboard.
            ErrorKind::AuthWindowClosed => None,
            ErrorKind::NoAuthorizationGrant => Some("Grant denied by authorization endpoint."),
            ErrorKind::AccessTokenDenied => Some("Access token denied by token endpoint."),
            ErrorKind::MalformedUrl => Some("Invalid URL(s)."),
            ErrorKind::Other => Some("Could not refresh OAuth 2.0 Authorization Code tokens."),
        }
    }
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::AuthWindowClosed => ErrorKind::AuthWindowClosed,
            FlowError::NoAuthorizationGrant(_) => ErrorKind::NoAuthorizationGrant,
            FlowError::AccessTokenDenied { .. } => ErrorKind::AccessTokenDenied,
            FlowError::MalformedUrl { .. } | FlowError::InvalidUrl { .. } => {
                ErrorKind::MalformedUrl
            }
            _ => ErrorKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

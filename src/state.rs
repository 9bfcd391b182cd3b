/// Authorization code flow state and tokens
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// How the user completes the authorization step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    /// External system browser, redirected to a loopback listener
    #[default]
    Browser,
    /// In-app web view; must be created and driven on the UI thread
    EmbeddedView,
}

impl CaptureMethod {
    pub const ALL: [CaptureMethod; 2] = [CaptureMethod::Browser, CaptureMethod::EmbeddedView];

    /// Label for capture method selectors
    pub fn label(self) -> &'static str {
        match self {
            CaptureMethod::Browser => "System Browser",
            CaptureMethod::EmbeddedView => "Embedded View",
        }
    }
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Absolute expiry, UNIX seconds
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Token {
    /// Create a bearer token with no expiry
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
            scope: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => unix_now() >= expires_at,
            None => false,
        }
    }

    /// Seconds left before expiry as of `now`, `None` when the expiry is unknown
    pub fn expires_in(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|at| at.saturating_sub(now))
    }
}

fn header_prefix<'a>(configured: &'a str, token: Option<&'a Token>) -> &'a str {
    let prefix = configured.trim();
    if !prefix.is_empty() {
        return prefix;
    }
    token
        .map(|t| t.token_type.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or("Bearer")
}

/// Configuration and result of one authorization code setup
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowState {
    pub capture_method: CaptureMethod,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub state: String,
    pub header_prefix: String,
    pub enabled: bool,
    #[serde(default)]
    pub use_pkce: bool,
    pub token: Option<Token>,
}

impl FlowState {
    /// Access token if one has been fetched and is non-empty
    pub fn access_token(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Header prefix, defaulting to the token type
    pub fn effective_header_prefix(&self) -> &str {
        header_prefix(&self.header_prefix, self.token.as_ref())
    }

    /// `Authorization` header value for the held token
    pub fn auth_header(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        Some(format!("{} {}", self.effective_header_prefix(), token.access_token))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

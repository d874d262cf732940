//! Shared identifiers, mode constants and the proxy error taxonomy.

use serde::{Deserialize, Serialize};

pub type CredentialId = i64;
pub type UserId = i64;

/// Credential class. A credential's mode is fixed at creation; selection
/// never mixes modes because the two API families use different endpoints,
/// user agents and OAuth client identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Antigravity,
    GeminiCli,
}

/// Per-mode constants, resolved once at dispatch instead of branching at
/// every call site.
#[derive(Debug, Clone, Copy)]
pub struct ModeProfile {
    pub base_url: &'static str,
    pub user_agent: &'static str,
    pub oauth_client_id: &'static str,
    pub oauth_client_secret: &'static str,
    /// Whether a streaming request is served by synthesizing chunks from a
    /// single-shot call. The sandbox family's SSE has been unreliable, so it
    /// defaults to synthetic streaming.
    pub fake_stream_default: bool,
}

const ANTIGRAVITY_PROFILE: ModeProfile = ModeProfile {
    base_url: "https://daily-cloudcode-pa.sandbox.googleapis.com",
    user_agent: "antigravity/1.15.8 (Windows; AMD64)",
    oauth_client_id: "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com",
    oauth_client_secret: "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",
    fake_stream_default: true,
};

const GEMINICLI_PROFILE: ModeProfile = ModeProfile {
    base_url: "https://cloudcode-pa.googleapis.com",
    user_agent: "GeminiCLI/0.1.5 (Windows; AMD64)",
    oauth_client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
    oauth_client_secret: "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",
    fake_stream_default: false,
};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

impl Mode {
    pub fn profile(self) -> &'static ModeProfile {
        match self {
            Mode::Antigravity => &ANTIGRAVITY_PROFILE,
            Mode::GeminiCli => &GEMINICLI_PROFILE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Antigravity => "antigravity",
            Mode::GeminiCli => "geminicli",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    /// Pool exhausted for the requested mode. Recovered by the orchestrator
    /// while attempts remain; a normal outcome, not a defect.
    #[error("no eligible credential for mode {0}")]
    NoEligibleCredential(Mode),
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("translation error: {0}")]
    Translation(String),
    #[error("all credential attempts failed")]
    CredentialExhausted,
    #[error("client disconnected")]
    ClientDisconnected,
}

impl ProxyError {
    /// Whether the failure is attributable to the credential that served the
    /// attempt, so the orchestrator may retry with another one.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProxyError::TokenRefreshFailed(_) | ProxyError::Transport(_) => true,
            ProxyError::Upstream { status, .. } => {
                matches!(status, 401 | 403 | 429) || *status >= 500
            }
            ProxyError::NoEligibleCredential(_)
            | ProxyError::Translation(_)
            | ProxyError::CredentialExhausted
            | ProxyError::ClientDisconnected => false,
        }
    }

    /// Stable machine-readable code for the normalized error body.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::NoEligibleCredential(_) => "no_eligible_credential",
            ProxyError::TokenRefreshFailed(_) => "token_refresh_failed",
            ProxyError::Upstream { .. } => "upstream_error",
            ProxyError::Transport(_) => "transport_error",
            ProxyError::Translation(_) => "translation_error",
            ProxyError::CredentialExhausted => "credential_exhausted",
            ProxyError::ClientDisconnected => "client_disconnected",
        }
    }
}

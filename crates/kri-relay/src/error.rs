//! Error taxonomy for portal session emulation.

use std::fmt;

use serde::Serialize;

/// Which request of the login sequence or data phase was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    /// Entry page load that acquires the session-tracking cookie.
    Bootstrap,
    /// Credential submission to the certification endpoint.
    Certify,
    /// Login execution echoing the encoded identity.
    Exec,
    /// Navigation that finishes server-side session initialization.
    WarmUp,
    /// Cross-domain warm-up for the mobile sub-portal.
    MobileWarmUp,
    /// Sheet retrieval over an authenticated session.
    DataFetch,
}

impl fmt::Display for StepRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepRole::Bootstrap => "bootstrap",
            StepRole::Certify => "certify",
            StepRole::Exec => "exec",
            StepRole::WarmUp => "warm-up",
            StepRole::MobileWarmUp => "mobile warm-up",
            StepRole::DataFetch => "data fetch",
        };
        f.write_str(name)
    }
}

/// All errors raised by the relay core.
///
/// Cloneable so that a single login outcome can be handed to every caller
/// that was waiting on it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Transport error during {step}: {message}")]
    Transport {
        step: StepRole,
        message: String,
        timed_out: bool,
    },

    #[error("Redirect loop during {step}: gave up after {hops} hops (last target {last_target})")]
    RedirectLoop {
        step: StepRole,
        hops: usize,
        last_target: String,
    },

    #[error("Login failed during {step}: {reason}")]
    LoginFailed { step: StepRole, reason: String },

    #[error("Portal credentials are not configured")]
    MissingCredentials,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl RelayError {
    /// Stable machine-readable kind for outward error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Transport {
                timed_out: true, ..
            } => "timeout",
            RelayError::Transport { .. } => "transport_error",
            RelayError::RedirectLoop { .. } => "redirect_loop",
            RelayError::LoginFailed { .. } => "login_failed",
            RelayError::MissingCredentials => "missing_credentials",
            RelayError::InvalidUrl(_) => "invalid_url",
        }
    }

    /// The step that failed, when the error is tied to one.
    pub fn step(&self) -> Option<StepRole> {
        match self {
            RelayError::Transport { step, .. }
            | RelayError::RedirectLoop { step, .. }
            | RelayError::LoginFailed { step, .. } => Some(*step),
            RelayError::MissingCredentials | RelayError::InvalidUrl(_) => None,
        }
    }

    /// Transport failures (including timeouts) are worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Transport { .. })
    }
}

/// Convenience result type.
pub type RelayResult<T> = Result<T, RelayError>;

//! Error taxonomy for credential resolution

use thiserror::Error;

use super::StrategyKind;

/// One strategy that was attempted (or skipped) and did not produce a login.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{strategy}: {reason}")]
pub struct LoginFailure {
    pub strategy: StrategyKind,
    pub reason: String,
}

impl LoginFailure {
    pub fn new(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the resolver. Nothing below this boundary leaks out raw.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Structurally impossible input, detected before any network call.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A single strategy was attempted and failed.
    #[error("login failed with {0}")]
    LoginFailure(LoginFailure),

    /// AUTO mode exhausted every candidate.
    #[error("no authentication method succeeded:\n{}", format_failures(.0))]
    AggregatedLoginFailure(Vec<LoginFailure>),

    #[error("{0} authentication was cancelled")]
    AuthenticationCancelled(StrategyKind),

    #[error("device code executor has been shut down; this login cannot be repeated")]
    ExecutorUnavailable,
}

impl AuthError {
    /// Every failure carried by this error, in attempt order.
    pub fn failures(&self) -> Vec<&LoginFailure> {
        match self {
            AuthError::LoginFailure(failure) => vec![failure],
            AuthError::AggregatedLoginFailure(failures) => failures.iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn format_failures(failures: &[LoginFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure raised by a single credential while minting a token.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("authentication was cancelled")]
    Cancelled,

    #[error("device code executor has been shut down")]
    ExecutorUnavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CredentialError {
    /// Convert into the resolver taxonomy, attributing the failure to `strategy`.
    pub(crate) fn into_auth_error(self, strategy: StrategyKind) -> AuthError {
        match self {
            CredentialError::Cancelled => AuthError::AuthenticationCancelled(strategy),
            CredentialError::ExecutorUnavailable => AuthError::ExecutorUnavailable,
            CredentialError::Other(e) => {
                AuthError::LoginFailure(LoginFailure::new(strategy, format!("{:#}", e)))
            }
        }
    }
}

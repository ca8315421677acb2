//! Error types for the power dialer

use thiserror::Error;

use crate::session::AgentState;

/// Errors raised by agent session operations
///
/// Dialing backend failures never show up here: a dial task turns them into
/// [`CallOutcome::Failed`](crate::lead::CallOutcome::Failed) and the round
/// carries on.
///
/// # Examples
///
/// ```
/// use power_dialer_core::{AgentState, DialerError};
///
/// let error = DialerError::invalid_state("agent1", AgentState::Available, AgentState::LoggedOut);
/// assert_eq!(
///     error.to_string(),
///     r#"Agent "agent1" must be in AVAILABLE state. Current state is "LOGGED_OUT""#
/// );
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialerError {
    /// An operation was invoked outside the state it requires
    ///
    /// This is a contract violation by the caller, not a runtime condition.
    /// The session state is left untouched.
    #[error("Agent \"{agent_id}\" must be in {required} state. Current state is \"{actual}\"")]
    InvalidState {
        agent_id: String,
        required: AgentState,
        actual: AgentState,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl DialerError {
    /// Create an invalid state error
    pub fn invalid_state(
        agent_id: impl Into<String>,
        required: AgentState,
        actual: AgentState,
    ) -> Self {
        Self::InvalidState {
            agent_id: agent_id.into(),
            required,
            actual,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true for [`DialerError::InvalidState`]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Result type for power dialer operations
pub type Result<T> = std::result::Result<T, DialerError>;

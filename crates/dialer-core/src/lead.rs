//! Dialing candidates, call outcomes and the collaborator seams
//!
//! The core never talks to storage or to a telephony network directly. It
//! pulls numbers from a [`LeadSource`] and places calls through a
//! [`DialingService`]; both are injected by the embedding application.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A phone number eligible to be dialed
///
/// Opaque to the dialer: it is never parsed or normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialCandidate(pub String);

impl DialCandidate {
    pub fn new(number: impl Into<String>) -> Self {
        DialCandidate(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DialCandidate {
    fn from(s: String) -> Self {
        DialCandidate(s)
    }
}

impl From<&str> for DialCandidate {
    fn from(s: &str) -> Self {
        DialCandidate(s.to_string())
    }
}

impl fmt::Display for DialCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DialCandidate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of a single dial attempt, produced exactly once per attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CallOutcome {
    /// The lead answered
    Connected,

    /// The lead did not answer, hung up, or the line was busy
    Disconnected,

    /// Transport or technical failure
    Failed { reason: String },
}

impl CallOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        CallOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, CallOutcome::Connected)
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Connected => write!(f, "connected"),
            CallOutcome::Disconnected => write!(f, "disconnected"),
            CallOutcome::Failed { reason } => write!(f, "failed({})", reason),
        }
    }
}

/// Supplier of numbers to dial
///
/// `None` means the source is exhausted for now. A single
/// [`AgentSession::connect`](crate::AgentSession::connect) call never asks
/// again after seeing `None`, but a later call may.
#[async_trait]
pub trait LeadSource: Send + Sync {
    async fn next_candidate(&self) -> Option<DialCandidate>;
}

/// Places one outbound call and reports how it went
///
/// Returning `Err` (or panicking) is an abnormal failure; the dial task
/// records it and treats the attempt as [`CallOutcome::Failed`].
#[async_trait]
pub trait DialingService: Send + Sync {
    async fn dial(&self, agent_id: &str, candidate: &DialCandidate) -> anyhow::Result<CallOutcome>;
}

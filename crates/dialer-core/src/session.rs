//! # Agent Session
//!
//! One agent's lifecycle and the retry loop that keeps them busy.
//!
//! ```text
//!              login                connect (batch)           round won
//!  LoggedOut ─────────► Available ───────────────► Connecting ─────────► OnCall
//!      ▲                 ▲  │  ▲                        │                   │
//!      │     logout      │  │  └── round exhausted ─────┘                   │
//!      └─────────────────┘  │      (fresh batch)                            │
//!      ▲                    └───────────── call ended / failed ◄────────────┘
//!      └──────── call ended / failed with a pending logout ◄────────────────┘
//! ```
//!
//! A logout requested while Connecting or OnCall is recorded and applied when
//! the agent next becomes free. It never interrupts a round or a call.
//!
//! All transitions are short critical sections on one mutex. The only
//! suspension point is [`AgentSession::connect`] waiting on a round, and the
//! mutex is never held across it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DialerError, Result};
use crate::lead::{DialCandidate, DialingService, LeadSource};
use crate::logging::{LogSink, TracingSink};
use crate::round::{DialRound, RoundSummary};

/// Where an agent is in their session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Not taking work
    LoggedOut,
    /// Logged in and idle
    Available,
    /// A dialing round is racing on the agent's behalf
    Connecting,
    /// Talking to a lead
    OnCall,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::LoggedOut => write!(f, "LOGGED_OUT"),
            AgentState::Available => write!(f, "AVAILABLE"),
            AgentState::Connecting => write!(f, "CONNECTING"),
            AgentState::OnCall => write!(f, "ON_CALL"),
        }
    }
}

/// Point-in-time copy of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub agent_id: String,
    pub state: AgentState,
    pub current_lead: Option<DialCandidate>,
    pub pending_logout: bool,
}

/// Mutable part of a session, only touched under the session lock
///
/// `current_lead` is set only while OnCall; `pending_logout` only while
/// Connecting or OnCall.
#[derive(Debug)]
struct SessionInner {
    state: AgentState,
    current_lead: Option<DialCandidate>,
    pending_logout: bool,
}

impl SessionInner {
    /// The agent became free: apply a pending logout or go back to Available
    fn release(&mut self) -> AgentState {
        self.current_lead = None;
        self.state = if std::mem::take(&mut self.pending_logout) {
            AgentState::LoggedOut
        } else {
            AgentState::Available
        };
        self.state
    }
}

/// Summaries of settled rounds kept for [`AgentSession::wait_for_dial_tasks`]
///
/// Older summaries are dropped once a session has run more rounds than this
/// without anyone collecting them.
pub const RETAINED_ROUND_SUMMARIES: usize = 32;

/// Rounds a session started, split into those still settling and those done
#[derive(Default)]
struct RoundLedger {
    running: Vec<JoinHandle<RoundSummary>>,
    settled: VecDeque<RoundSummary>,
}

impl RoundLedger {
    fn track(&mut self, agent_id: &str, handle: JoinHandle<RoundSummary>) {
        let mut still_running = Vec::with_capacity(self.running.len() + 1);
        for mut running in self.running.drain(..) {
            if !running.is_finished() {
                still_running.push(running);
                continue;
            }
            match (&mut running).now_or_never() {
                Some(Ok(summary)) => self.settled.push_back(summary),
                Some(Err(e)) => warn!("Round coordinator for agent {} did not finish: {}", agent_id, e),
                None => still_running.push(running),
            }
        }
        still_running.push(handle);
        self.running = still_running;

        while self.settled.len() > RETAINED_ROUND_SUMMARIES {
            self.settled.pop_front();
        }
    }
}

/// Puts a Connecting agent back if `connect` is dropped mid-round
///
/// Disarmed once the round's result has been applied to the session.
struct ConnectingGuard<'a> {
    session: &'a AgentSession,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn new(session: &'a AgentSession) -> Self {
        Self { session, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.inner.lock();
        if inner.state == AgentState::Connecting {
            let next = inner.release();
            warn!(
                "Dialing for agent {} was cancelled mid-round, now {}",
                self.session.agent_id, next
            );
        }
    }
}

/// Lifecycle state machine of a single agent
///
/// Share it behind an `Arc` when a logout or a status query has to reach the
/// session while [`connect`](Self::connect) is in flight.
pub struct AgentSession {
    agent_id: String,
    inner: Mutex<SessionInner>,
    sink: Arc<dyn LogSink>,
    rounds: Mutex<RoundLedger>,
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("agent_id", &self.agent_id)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl AgentSession {
    /// New logged-out session reporting through [`TracingSink`]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self::with_sink(agent_id, Arc::new(TracingSink))
    }

    /// New logged-out session reporting through `sink`
    pub fn with_sink(agent_id: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            agent_id: agent_id.into(),
            inner: Mutex::new(SessionInner {
                state: AgentState::LoggedOut,
                current_lead: None,
                pending_logout: false,
            }),
            sink,
            rounds: Mutex::new(RoundLedger::default()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> AgentState {
        self.inner.lock().state
    }

    pub fn current_lead(&self) -> Option<DialCandidate> {
        self.inner.lock().current_lead.clone()
    }

    /// Whether a deferred logout is waiting for the agent to become free
    pub fn is_logging_out(&self) -> bool {
        self.inner.lock().pending_logout
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            agent_id: self.agent_id.clone(),
            state: inner.state,
            current_lead: inner.current_lead.clone(),
            pending_logout: inner.pending_logout,
        }
    }

    /// Fail with [`DialerError::InvalidState`] unless the agent is in `required`
    fn require(&self, inner: &SessionInner, required: AgentState) -> Result<()> {
        if inner.state == required {
            return Ok(());
        }
        let error = DialerError::invalid_state(self.agent_id.clone(), required, inner.state);
        self.sink.error(&error.to_string());
        Err(error)
    }

    /// LoggedOut → Available
    pub fn login(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.require(&inner, AgentState::LoggedOut)?;
        inner.state = AgentState::Available;
        info!("Agent {} logged in", self.agent_id);
        Ok(())
    }

    /// Log out now if idle, otherwise once the current round or call is over
    ///
    /// Never fails. Logging out a logged-out agent does nothing.
    pub fn logout(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            AgentState::LoggedOut => {}
            AgentState::Available => {
                inner.state = AgentState::LoggedOut;
                info!("Agent {} logged out", self.agent_id);
            }
            AgentState::Connecting | AgentState::OnCall => {
                inner.pending_logout = true;
                debug!("Agent {} will log out when free ({})", self.agent_id, inner.state);
            }
        }
    }

    /// Connecting → OnCall with `lead`
    pub fn start_call(&self, lead: DialCandidate) -> Result<()> {
        let mut inner = self.inner.lock();
        self.require(&inner, AgentState::Connecting)?;
        info!("Agent {} connected to {}", self.agent_id, lead);
        inner.state = AgentState::OnCall;
        inner.current_lead = Some(lead);
        Ok(())
    }

    /// OnCall → Available, or LoggedOut if a logout was requested
    pub fn call_ended(&self) -> Result<AgentState> {
        let mut inner = self.inner.lock();
        self.require(&inner, AgentState::OnCall)?;
        let next = inner.release();
        info!("Call ended for agent {}, now {}", self.agent_id, next);
        Ok(next)
    }

    /// Like [`call_ended`](Self::call_ended), after logging a warning naming the lead
    pub fn call_failed(&self) -> Result<AgentState> {
        let mut inner = self.inner.lock();
        self.require(&inner, AgentState::OnCall)?;
        let lead = inner
            .current_lead
            .as_ref()
            .map(|lead| lead.to_string())
            .unwrap_or_default();
        self.sink.warn(&format!(
            "Call failed for agent=\"{}\" lead=\"{}\"",
            self.agent_id, lead
        ));
        let next = inner.release();
        Ok(next)
    }

    /// Race batches of up to `batch_size` leads until one connects or the source runs dry
    ///
    /// Requires Available. Returns the lead the agent is now talking to, or
    /// `None` when the source was exhausted (or a logout requested during the
    /// race took effect) without a connection.
    ///
    /// Dropping the returned future mid-round puts the agent back to
    /// Available, or LoggedOut if a logout was requested meanwhile. Attempts
    /// already in flight keep running and their connections are discarded.
    pub async fn connect(
        &self,
        leads: &dyn LeadSource,
        dialer: Arc<dyn DialingService>,
        batch_size: usize,
    ) -> Result<Option<DialCandidate>> {
        {
            let inner = self.inner.lock();
            self.require(&inner, AgentState::Available)?;
        }
        self.dial_until_connected(leads, dialer, batch_size).await
    }

    /// Like [`connect`](Self::connect), but an agent that is not Available is
    /// left alone and yields `Ok(None)` instead of an error
    ///
    /// Meant for callers that dial on the agent's behalf whenever they become
    /// free, where someone else having claimed the agent first is expected.
    pub async fn connect_if_available(
        &self,
        leads: &dyn LeadSource,
        dialer: Arc<dyn DialingService>,
        batch_size: usize,
    ) -> Result<Option<DialCandidate>> {
        self.dial_until_connected(leads, dialer, batch_size).await
    }

    async fn dial_until_connected(
        &self,
        leads: &dyn LeadSource,
        dialer: Arc<dyn DialingService>,
        batch_size: usize,
    ) -> Result<Option<DialCandidate>> {
        if batch_size == 0 {
            return Err(DialerError::config("batch size must be at least 1"));
        }

        loop {
            // Claiming Connecting before fetching keeps two concurrent
            // connects from both passing the Available check.
            {
                let mut inner = self.inner.lock();
                if inner.state != AgentState::Available {
                    // Logged out between rounds, or claimed by another caller
                    return Ok(None);
                }
                inner.state = AgentState::Connecting;
            }
            let mut guard = ConnectingGuard::new(self);

            let batch = pull_batch(leads, batch_size).await;
            if batch.is_empty() {
                guard.disarm();
                let next = self.inner.lock().release();
                debug!("No leads left for agent {}, now {}", self.agent_id, next);
                return Ok(None);
            }

            let mut round =
                DialRound::new(self.agent_id.as_str(), batch, self.sink.clone()).start(dialer.clone());
            let winner = round.winner().await;
            self.rounds.lock().track(&self.agent_id, round.into_settled());

            guard.disarm();
            match winner {
                Some(lead) => {
                    self.start_call(lead.clone())?;
                    return Ok(Some(lead));
                }
                None => {
                    let next = self.inner.lock().release();
                    if next == AgentState::LoggedOut {
                        info!("Agent {} logged out after an unanswered round", self.agent_id);
                        return Ok(None);
                    }
                    debug!("Round for agent {} found nobody, fetching more leads", self.agent_id);
                }
            }
        }
    }

    /// Wait until every dial task started by this session has reported
    ///
    /// Returns the summaries of the rounds that settled since the last call,
    /// oldest first. At most [`RETAINED_ROUND_SUMMARIES`] rounds that had
    /// already settled before this call are included.
    pub async fn wait_for_dial_tasks(&self) -> Vec<RoundSummary> {
        let RoundLedger { running, settled } = std::mem::take(&mut *self.rounds.lock());
        let mut summaries: Vec<_> = settled.into();
        for handle in running {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!("Round coordinator for agent {} did not finish: {}", self.agent_id, e),
            }
        }
        summaries
    }
}

/// Fetch up to `batch_size` leads, stopping at the first `None`
async fn pull_batch(leads: &dyn LeadSource, batch_size: usize) -> Vec<DialCandidate> {
    let mut batch = Vec::with_capacity(batch_size);
    while batch.len() < batch_size {
        match leads.next_candidate().await {
            Some(candidate) => batch.push(candidate),
            None => break,
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;

    fn session() -> (AgentSession, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (AgentSession::with_sink("agent1", sink.clone()), sink)
    }

    #[test]
    fn test_new_session_is_logged_out() {
        let (session, _) = session();
        assert_eq!(session.agent_id(), "agent1");
        assert_eq!(session.state(), AgentState::LoggedOut);
        assert_eq!(session.current_lead(), None);
        assert!(!session.is_logging_out());
    }

    #[test]
    fn test_login_twice_fails_without_mutation() {
        let (session, sink) = session();
        session.login().unwrap();
        let err = session.login().unwrap_err();
        assert_eq!(
            err,
            DialerError::invalid_state("agent1", AgentState::LoggedOut, AgentState::Available)
        );
        assert_eq!(session.state(), AgentState::Available);
        assert_eq!(
            sink.messages(),
            vec![r#"Agent "agent1" must be in LOGGED_OUT state. Current state is "AVAILABLE""#]
        );
    }

    #[test]
    fn test_logout_is_idempotent_and_silent() {
        let (session, sink) = session();
        session.logout();
        session.logout();
        assert_eq!(session.state(), AgentState::LoggedOut);
        assert!(!session.is_logging_out());
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_start_call_requires_connecting() {
        let (session, sink) = session();
        session.login().unwrap();
        let err = session.start_call(DialCandidate::from("+12123334444")).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(session.state(), AgentState::Available);
        assert_eq!(session.current_lead(), None);
        assert_eq!(
            sink.messages(),
            vec![r#"Agent "agent1" must be in CONNECTING state. Current state is "AVAILABLE""#]
        );
    }

    #[test]
    fn test_call_end_requires_on_call() {
        let (session, sink) = session();
        session.login().unwrap();
        assert!(session.call_ended().is_err());
        assert!(session.call_failed().is_err());
        assert_eq!(sink.messages().len(), 2);
        assert!(sink
            .messages()
            .iter()
            .all(|m| m == r#"Agent "agent1" must be in ON_CALL state. Current state is "AVAILABLE""#));
    }

    #[test]
    fn test_release_applies_pending_logout() {
        let mut inner = SessionInner {
            state: AgentState::OnCall,
            current_lead: Some(DialCandidate::from("1")),
            pending_logout: true,
        };
        assert_eq!(inner.release(), AgentState::LoggedOut);
        assert!(!inner.pending_logout);
        assert_eq!(inner.current_lead, None);

        inner.state = AgentState::Connecting;
        assert_eq!(inner.release(), AgentState::Available);
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(AgentState::OnCall.to_string(), "ON_CALL");
        assert_eq!(
            serde_json::to_string(&AgentState::LoggedOut).unwrap(),
            "\"LOGGED_OUT\""
        );
    }
}

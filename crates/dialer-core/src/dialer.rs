//! Power dialer facade
//!
//! Binds an [`AgentSession`] to its lead source, dialing service and
//! configuration so event handlers only deal with agent events. With
//! [`DialerConfig::auto_dial`] set, logging in and finishing a call both
//! start dialing straight away.

use std::sync::Arc;

use tracing::debug;

use crate::config::DialerConfig;
use crate::error::Result;
use crate::lead::{DialCandidate, DialingService, LeadSource};
use crate::logging::{LogSink, TracingSink};
use crate::round::RoundSummary;
use crate::session::{AgentSession, AgentState, SessionSnapshot};

/// Keeps one agent busy by racing calls on their behalf
pub struct PowerDialer {
    session: Arc<AgentSession>,
    leads: Arc<dyn LeadSource>,
    dialing: Arc<dyn DialingService>,
    config: DialerConfig,
}

impl PowerDialer {
    pub fn new(
        agent_id: impl Into<String>,
        leads: Arc<dyn LeadSource>,
        dialing: Arc<dyn DialingService>,
        config: DialerConfig,
    ) -> Result<Self> {
        Self::with_sink(agent_id, leads, dialing, config, Arc::new(TracingSink))
    }

    pub fn with_sink(
        agent_id: impl Into<String>,
        leads: Arc<dyn LeadSource>,
        dialing: Arc<dyn DialingService>,
        config: DialerConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session: Arc::new(AgentSession::with_sink(agent_id, sink)),
            leads,
            dialing,
            config,
        })
    }

    /// Shared handle to the session, e.g. to log out while a round is racing
    pub fn session(&self) -> Arc<AgentSession> {
        self.session.clone()
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub async fn login(&self) -> Result<()> {
        self.session.login()?;
        self.dial_if_wanted().await
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    /// Race leads until one connects or the source runs dry
    pub async fn connect(&self) -> Result<Option<DialCandidate>> {
        self.session
            .connect(self.leads.as_ref(), self.dialing.clone(), self.config.dial_ratio)
            .await
    }

    pub async fn call_ended(&self) -> Result<AgentState> {
        self.session.call_ended()?;
        self.dial_if_wanted().await?;
        Ok(self.session.state())
    }

    pub async fn call_failed(&self) -> Result<AgentState> {
        self.session.call_failed()?;
        self.dial_if_wanted().await?;
        Ok(self.session.state())
    }

    pub async fn wait_for_dial_tasks(&self) -> Vec<RoundSummary> {
        self.session.wait_for_dial_tasks().await
    }

    /// Dial for a free agent when auto-dial is on
    ///
    /// The claim on the agent is taken atomically, so a `connect` racing in
    /// through [`session`](Self::session) simply wins and this does nothing.
    async fn dial_if_wanted(&self) -> Result<()> {
        if !self.config.auto_dial {
            return Ok(());
        }
        debug!("Auto-dialing for agent {}", self.session.agent_id());
        self.session
            .connect_if_available(self.leads.as_ref(), self.dialing.clone(), self.config.dial_ratio)
            .await?;
        Ok(())
    }
}

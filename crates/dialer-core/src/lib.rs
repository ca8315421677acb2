//! # Power Dialer Core
//!
//! An optimistic power dialer keeps a support agent continuously occupied by
//! calling several leads at once on their behalf and connecting the agent to
//! whichever answers first.
//!
//! - [`AgentSession`]: the agent's lifecycle (logged out, available,
//!   connecting, on call) with deferred logout.
//! - [`DialRound`]: one race over a batch of leads, resolving to at most one
//!   winner while every losing attempt is still accounted for.
//! - [`LeadSource`] / [`DialingService`]: the two seams to storage and to the
//!   telephony network.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use power_dialer_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let leads = Arc::new(QueueLeadSource::new(["+12123334444", "+12123334449"]));
//! let dialing = Arc::new(
//!     ScriptedDialingService::new()
//!         .with_script("+12123334444", DialScript::connected().after_ms(5))
//!         .with_script("+12123334449", DialScript::connected().after_ms(10)),
//! );
//!
//! let dialer = PowerDialer::new("agent1", leads, dialing, DialerConfig::default())?;
//! dialer.login().await?;
//! let lead = dialer.connect().await?;
//!
//! assert_eq!(lead, Some(DialCandidate::from("+12123334444")));
//! assert_eq!(dialer.snapshot().state, AgentState::OnCall);
//!
//! dialer.call_ended().await?;
//! dialer.logout();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialer;
pub mod error;
pub mod lead;
pub mod logging;
pub mod round;
pub mod scripted;
pub mod session;

pub use config::{DialerConfig, DEFAULT_DIAL_RATIO};
pub use dialer::PowerDialer;
pub use error::{DialerError, Result};
pub use lead::{CallOutcome, DialCandidate, DialingService, LeadSource};
pub use logging::{LogRecord, LogSink, LoggingConfig, MemorySink, TracingSink};
pub use round::{AttemptReport, DialRound, DialTask, RoundState, RoundSummary, RunningRound};
pub use session::{AgentSession, AgentState, SessionSnapshot, RETAINED_ROUND_SUMMARIES};

/// Commonly used items
pub mod prelude {
    pub use crate::config::DialerConfig;
    pub use crate::dialer::PowerDialer;
    pub use crate::error::{DialerError, Result};
    pub use crate::lead::{CallOutcome, DialCandidate, DialingService, LeadSource};
    pub use crate::logging::{LogSink, MemorySink, TracingSink};
    pub use crate::round::{DialRound, RoundState, RoundSummary};
    pub use crate::scripted::{DialScript, QueueLeadSource, ScriptedDialingService};
    pub use crate::session::{AgentSession, AgentState};
}

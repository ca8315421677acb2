//! # Dialing Rounds
//!
//! A round races one batch of candidates for a single agent. Every candidate
//! gets its own spawned [`DialTask`]; the tasks report onto a bounded channel
//! drained by one coordinator task, which is the only place round state is
//! mutated:
//!
//! ```text
//!  DialTask(c1) ──┐
//!  DialTask(c2) ──┼──► mpsc (bounded) ──► coordinator ──► oneshot: Some(winner) | None
//!  DialTask(cN) ──┘                          │
//!                                            └──► JoinHandle<RoundSummary> (all reports in)
//! ```
//!
//! The coordinator decrements the outstanding count and arbitrates the winner
//! in the same step, so the first `Connected` report wins, later ones are
//! discarded, and the decision fires exactly once: on the first connection, or
//! when the last report arrives without one. It keeps draining after a win so
//! that every attempt is accounted for; [`RunningRound::into_settled`] hands
//! back that bookkeeping without making the caller wait for it.
//!
//! Losing attempts are never cancelled. Their outcomes are simply ignored.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::lead::{CallOutcome, DialCandidate, DialingService};
use crate::logging::LogSink;

/// Lifecycle of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    /// Attempts still running, nobody connected yet
    Pending,
    /// The first attempt that connected
    Won(DialCandidate),
    /// Every attempt reported and none connected
    Exhausted,
}

impl RoundState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RoundState::Pending)
    }

    pub fn winner(&self) -> Option<&DialCandidate> {
        match self {
            RoundState::Won(candidate) => Some(candidate),
            _ => None,
        }
    }
}

/// What one attempt reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptReport {
    pub candidate: DialCandidate,
    pub outcome: CallOutcome,
}

/// Final bookkeeping of a round, available once every attempt has reported
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub agent_id: String,
    pub state: RoundState,
    /// Reports in arrival order
    pub attempts: Vec<AttemptReport>,
}

impl RoundSummary {
    pub fn winner(&self) -> Option<&DialCandidate> {
        self.state.winner()
    }
}

/// A single dial attempt
///
/// Turns every way the dialing service can go wrong into
/// [`CallOutcome::Failed`], logging it at error severity through the sink.
pub struct DialTask {
    agent_id: Arc<str>,
    candidate: DialCandidate,
    dialer: Arc<dyn DialingService>,
    sink: Arc<dyn LogSink>,
}

impl DialTask {
    pub fn new(
        agent_id: impl Into<Arc<str>>,
        candidate: DialCandidate,
        dialer: Arc<dyn DialingService>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            candidate,
            dialer,
            sink,
        }
    }

    pub fn candidate(&self) -> &DialCandidate {
        &self.candidate
    }

    /// Dial and produce exactly one outcome
    pub async fn attempt(&self) -> CallOutcome {
        let dialing = self.dialer.dial(&self.agent_id, &self.candidate);

        match AssertUnwindSafe(dialing).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => self.failed(e.to_string()),
            Err(payload) => self.failed(panic_message(payload.as_ref())),
        }
    }

    fn failed(&self, description: String) -> CallOutcome {
        self.sink.error(&format!(
            "Dialing \"{}\" for agent \"{}\" failed. Error: \"{}\"",
            self.candidate, self.agent_id, description
        ));
        CallOutcome::Failed {
            reason: description,
        }
    }

    /// Run the attempt in the background and report onto `reports`
    fn spawn(self, reports: mpsc::Sender<AttemptReport>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let outcome = self.attempt().await;
            debug!("Dial attempt {} for agent {} finished: {}", self.candidate, self.agent_id, outcome);

            // The coordinator stays alive until every sender has reported or dropped.
            let _ = reports
                .send(AttemptReport {
                    candidate: self.candidate,
                    outcome,
                })
                .await;
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "dialing task panicked".to_string()
    }
}

/// One race over a batch of candidates
pub struct DialRound {
    agent_id: Arc<str>,
    candidates: Vec<DialCandidate>,
    sink: Arc<dyn LogSink>,
}

impl DialRound {
    pub fn new(
        agent_id: impl Into<Arc<str>>,
        candidates: Vec<DialCandidate>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            candidates,
            sink,
        }
    }

    pub fn candidates(&self) -> &[DialCandidate] {
        &self.candidates
    }

    /// Spawn one dial task per candidate, in batch order, plus the coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, dialer: Arc<dyn DialingService>) -> RunningRound {
        let outstanding = self.candidates.len();
        let (report_tx, report_rx) = mpsc::channel(outstanding.max(1));
        let (decided_tx, decided_rx) = oneshot::channel();

        info!(
            "Starting dialing round for agent {} with {} candidate(s)",
            self.agent_id, outstanding
        );

        for candidate in self.candidates {
            DialTask::new(self.agent_id.clone(), candidate, dialer.clone(), self.sink.clone())
                .spawn(report_tx.clone());
        }
        drop(report_tx);

        let settled = tokio::spawn(coordinate(self.agent_id, outstanding, report_rx, decided_tx));

        RunningRound {
            decided: decided_rx,
            decision: None,
            settled,
        }
    }
}

/// Drain reports until the last attempt is in, deciding the round on the way
async fn coordinate(
    agent_id: Arc<str>,
    mut outstanding: usize,
    mut reports: mpsc::Receiver<AttemptReport>,
    decided: oneshot::Sender<Option<DialCandidate>>,
) -> RoundSummary {
    let mut state = RoundState::Pending;
    let mut decided = Some(decided);
    let mut attempts = Vec::with_capacity(outstanding);

    while outstanding > 0 {
        let Some(report) = reports.recv().await else {
            break;
        };
        outstanding -= 1;

        if report.outcome.is_connected() {
            if state == RoundState::Pending {
                info!("Agent {} won round with {}", agent_id, report.candidate);
                state = RoundState::Won(report.candidate.clone());
                if let Some(tx) = decided.take() {
                    let _ = tx.send(Some(report.candidate.clone()));
                }
            } else {
                debug!(
                    "Discarding late connection to {} for agent {}",
                    report.candidate, agent_id
                );
            }
        }

        attempts.push(report);
    }

    if state == RoundState::Pending {
        info!("Round for agent {} exhausted without a connection", agent_id);
        state = RoundState::Exhausted;
        if let Some(tx) = decided.take() {
            let _ = tx.send(None);
        }
    }

    debug!("Round for agent {} settled after {} report(s)", agent_id, attempts.len());

    RoundSummary {
        agent_id: agent_id.to_string(),
        state,
        attempts,
    }
}

/// Handle to a round in flight
pub struct RunningRound {
    decided: oneshot::Receiver<Option<DialCandidate>>,
    decision: Option<Option<DialCandidate>>,
    settled: JoinHandle<RoundSummary>,
}

impl RunningRound {
    /// Wait for the decision: the winner, or `None` once every attempt failed
    ///
    /// Returns as soon as the round is decided, without waiting for losers.
    pub async fn winner(&mut self) -> Option<DialCandidate> {
        if let Some(decision) = &self.decision {
            return decision.clone();
        }
        let winner = (&mut self.decided).await.unwrap_or(None);
        self.decision = Some(winner.clone());
        winner
    }

    /// Handle resolving once every attempt has reported
    pub fn into_settled(self) -> JoinHandle<RoundSummary> {
        self.settled
    }

    /// Wait for every attempt and return the full summary
    pub async fn run_to_completion(self) -> Result<RoundSummary, JoinError> {
        self.settled.await
    }
}

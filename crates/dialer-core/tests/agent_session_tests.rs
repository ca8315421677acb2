//! Agent lifecycle tests
//!
//! These drive an AgentSession through login, dialing, call completion and
//! logout against scripted collaborators, checking state and the exact
//! observations written to the sink.

use std::sync::Arc;

use power_dialer_core::prelude::*;
use power_dialer_core::DEFAULT_DIAL_RATIO;

const LEAD: &str = "+12123334444";

struct Harness {
    session: Arc<AgentSession>,
    leads: Arc<QueueLeadSource>,
    dialing: Arc<ScriptedDialingService>,
    sink: Arc<MemorySink>,
}

impl Harness {
    fn new(scripts: Vec<(&str, DialScript)>) -> Self {
        let sink = Arc::new(MemorySink::new());
        let numbers: Vec<&str> = scripts.iter().map(|(number, _)| *number).collect();
        let dialing = scripts
            .into_iter()
            .fold(ScriptedDialingService::new(), |service, (number, script)| {
                service.with_script(number, script)
            });

        Self {
            session: Arc::new(AgentSession::with_sink("agent1", sink.clone())),
            leads: Arc::new(QueueLeadSource::new(numbers)),
            dialing: Arc::new(dialing),
            sink,
        }
    }

    fn single_lead() -> Self {
        Self::new(vec![(LEAD, DialScript::connected())])
    }

    async fn connect(&self) -> Result<Option<DialCandidate>> {
        self.session
            .connect(self.leads.as_ref(), self.dialing.clone(), DEFAULT_DIAL_RATIO)
            .await
    }

    fn assert_state(&self, state: AgentState, lead: Option<&str>, logging_out: bool) {
        assert_eq!(self.session.state(), state);
        assert_eq!(self.session.current_lead(), lead.map(DialCandidate::from));
        assert_eq!(self.session.is_logging_out(), logging_out);
    }
}

#[tokio::test]
async fn test_login_makes_agent_available() {
    let h = Harness::single_lead();
    h.assert_state(AgentState::LoggedOut, None, false);

    h.session.login().unwrap();
    h.assert_state(AgentState::Available, None, false);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_cannot_login_twice() {
    let h = Harness::single_lead();
    h.session.login().unwrap();

    let err = h.session.login().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Agent \"agent1\" must be in LOGGED_OUT"));
    assert!(message.contains("\"AVAILABLE\""));
    assert_eq!(
        h.sink.messages(),
        vec!["Agent \"agent1\" must be in LOGGED_OUT state. Current state is \"AVAILABLE\""]
    );
    h.assert_state(AgentState::Available, None, false);
}

#[tokio::test]
async fn test_login_after_logout() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.session.logout();
    h.session.login().unwrap();
    h.assert_state(AgentState::Available, None, false);
}

#[tokio::test]
async fn test_logout_twice_is_harmless() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.session.logout();
    h.assert_state(AgentState::LoggedOut, None, false);
    h.session.logout();
    h.assert_state(AgentState::LoggedOut, None, false);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_logout_during_call_waits_for_call_end() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.connect().await.unwrap();

    h.session.logout();
    h.assert_state(AgentState::OnCall, Some(LEAD), true);

    assert_eq!(h.session.call_ended().unwrap(), AgentState::LoggedOut);
    h.assert_state(AgentState::LoggedOut, None, false);
}

#[tokio::test]
async fn test_logout_during_call_waits_for_call_failure() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.connect().await.unwrap();

    h.session.logout();
    h.assert_state(AgentState::OnCall, Some(LEAD), true);

    assert_eq!(h.session.call_failed().unwrap(), AgentState::LoggedOut);
    h.assert_state(AgentState::LoggedOut, None, false);
}

#[tokio::test]
async fn test_start_call_without_connect() {
    let h = Harness::single_lead();
    h.session.login().unwrap();

    let err = h.session.start_call(DialCandidate::from(LEAD)).unwrap_err();
    assert_eq!(
        err,
        DialerError::InvalidState {
            agent_id: "agent1".to_string(),
            required: AgentState::Connecting,
            actual: AgentState::Available,
        }
    );
    assert_eq!(
        h.sink.messages(),
        vec!["Agent \"agent1\" must be in CONNECTING state. Current state is \"AVAILABLE\""]
    );
}

#[tokio::test]
async fn test_call_failed_returns_agent_to_available() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.connect().await.unwrap();

    assert_eq!(h.session.call_failed().unwrap(), AgentState::Available);
    h.assert_state(AgentState::Available, None, false);
    assert_eq!(
        h.sink.messages_at(tracing::Level::WARN),
        vec!["Call failed for agent=\"agent1\" lead=\"+12123334444\""]
    );
    assert_eq!(h.sink.messages().len(), 1);
}

#[tokio::test]
async fn test_call_failed_without_call() {
    let h = Harness::single_lead();
    h.session.login().unwrap();

    assert!(h.session.call_failed().unwrap_err().is_invalid_state());
    assert_eq!(
        h.sink.messages(),
        vec!["Agent \"agent1\" must be in ON_CALL state. Current state is \"AVAILABLE\""]
    );
}

#[tokio::test]
async fn test_call_ended_returns_agent_to_available() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.connect().await.unwrap();

    assert_eq!(h.session.call_ended().unwrap(), AgentState::Available);
    h.assert_state(AgentState::Available, None, false);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_call_ended_without_call() {
    let h = Harness::single_lead();
    h.session.login().unwrap();

    assert!(h.session.call_ended().is_err());
    assert_eq!(
        h.sink.messages(),
        vec!["Agent \"agent1\" must be in ON_CALL state. Current state is \"AVAILABLE\""]
    );
    h.assert_state(AgentState::Available, None, false);
}

#[tokio::test]
async fn test_connect_requires_login() {
    let h = Harness::single_lead();

    let err = h.connect().await.unwrap_err();
    assert_eq!(
        err,
        DialerError::invalid_state("agent1", AgentState::Available, AgentState::LoggedOut)
    );
    assert_eq!(
        h.sink.messages(),
        vec!["Agent \"agent1\" must be in AVAILABLE state. Current state is \"LOGGED_OUT\""]
    );
    // Nothing was fetched or dialed
    assert_eq!(h.leads.remaining(), 1);
    assert!(h.dialing.dialed().is_empty());
}

#[tokio::test]
async fn test_connect_while_on_call_is_rejected() {
    let h = Harness::new(vec![
        (LEAD, DialScript::connected()),
        ("+2", DialScript::connected().after_ms(50)),
    ]);
    h.session.login().unwrap();
    h.connect().await.unwrap();

    assert!(h.connect().await.unwrap_err().is_invalid_state());
    h.assert_state(AgentState::OnCall, Some(LEAD), false);
}

#[tokio::test]
async fn test_connect_successful() {
    let h = Harness::single_lead();
    h.session.login().unwrap();

    let lead = h.connect().await.unwrap();
    assert_eq!(lead, Some(DialCandidate::from(LEAD)));
    h.assert_state(AgentState::OnCall, Some(LEAD), false);
}

#[tokio::test]
async fn test_connect_rejects_empty_batches() {
    let h = Harness::single_lead();
    h.session.login().unwrap();

    let err = h
        .session
        .connect(h.leads.as_ref(), h.dialing.clone(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, DialerError::Configuration { .. }));
    h.assert_state(AgentState::Available, None, false);
}

#[tokio::test]
async fn test_snapshot_serializes() {
    let h = Harness::single_lead();
    h.session.login().unwrap();
    h.connect().await.unwrap();

    let json = serde_json::to_value(h.session.snapshot()).unwrap();
    assert_eq!(json["agent_id"], "agent1");
    assert_eq!(json["state"], "ON_CALL");
    assert_eq!(json["current_lead"], LEAD);
    assert_eq!(json["pending_logout"], false);
}

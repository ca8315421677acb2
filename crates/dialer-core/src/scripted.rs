//! In-memory collaborators driven by a script
//!
//! [`QueueLeadSource`] hands out numbers in order and [`ScriptedDialingService`]
//! answers each number the way its [`DialScript`] says, after an optional
//! delay. A [`Scenario`] bundles both and loads from TOML:
//!
//! ```toml
//! agent_id = "agent1"
//!
//! [dialer]
//! dial_ratio = 2
//!
//! [[leads]]
//! number = "+12123334444"
//! wait_ms = 5
//! error = "Dialing service failed"
//!
//! [[leads]]
//! number = "+12123334449"
//! wait_ms = 10
//! outcome = "connected"
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::DialerConfig;
use crate::error::{DialerError, Result};
use crate::lead::{CallOutcome, DialCandidate, DialingService, LeadSource};

/// Lead source backed by a FIFO queue
#[derive(Debug, Default)]
pub struct QueueLeadSource {
    numbers: Mutex<VecDeque<DialCandidate>>,
}

impl QueueLeadSource {
    pub fn new<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DialCandidate>,
    {
        Self {
            numbers: Mutex::new(numbers.into_iter().map(Into::into).collect()),
        }
    }

    /// Add a number at the back; a drained source starts yielding again
    pub fn push(&self, number: impl Into<DialCandidate>) {
        self.numbers.lock().push_back(number.into());
    }

    pub fn remaining(&self) -> usize {
        self.numbers.lock().len()
    }
}

#[async_trait]
impl LeadSource for QueueLeadSource {
    async fn next_candidate(&self) -> Option<DialCandidate> {
        self.numbers.lock().pop_front()
    }
}

/// How a scripted number responds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptResult {
    /// Return this outcome
    Outcome(CallOutcome),
    /// Fail abnormally with this message
    Error(String),
}

/// Delay plus result for one number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialScript {
    pub wait: Duration,
    pub result: ScriptResult,
}

impl DialScript {
    pub fn outcome(outcome: CallOutcome) -> Self {
        Self {
            wait: Duration::ZERO,
            result: ScriptResult::Outcome(outcome),
        }
    }

    pub fn connected() -> Self {
        Self::outcome(CallOutcome::Connected)
    }

    pub fn disconnected() -> Self {
        Self::outcome(CallOutcome::Disconnected)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            wait: Duration::ZERO,
            result: ScriptResult::Error(message.into()),
        }
    }

    pub fn after_ms(mut self, wait_ms: u64) -> Self {
        self.wait = Duration::from_millis(wait_ms);
        self
    }
}

/// Dialing service that follows a per-number script
///
/// Numbers without a script fail abnormally.
#[derive(Debug, Default)]
pub struct ScriptedDialingService {
    scripts: HashMap<String, DialScript>,
    dialed: Mutex<Vec<DialCandidate>>,
}

impl ScriptedDialingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, number: impl Into<String>, script: DialScript) -> Self {
        self.scripts.insert(number.into(), script);
        self
    }

    /// Numbers dialed so far, in the order the attempts started
    pub fn dialed(&self) -> Vec<DialCandidate> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl DialingService for ScriptedDialingService {
    async fn dial(&self, _agent_id: &str, candidate: &DialCandidate) -> anyhow::Result<CallOutcome> {
        self.dialed.lock().push(candidate.clone());

        let script = self
            .scripts
            .get(candidate.as_str())
            .ok_or_else(|| anyhow::anyhow!("No script for number {}", candidate))?;

        if !script.wait.is_zero() {
            tokio::time::sleep(script.wait).await;
        }

        match &script.result {
            ScriptResult::Outcome(outcome) => Ok(outcome.clone()),
            ScriptResult::Error(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

/// Outcome names accepted in scenario files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedOutcome {
    Connected,
    Disconnected,
    Failed,
}

/// One `[[leads]]` entry of a scenario file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadScript {
    pub number: String,
    #[serde(default)]
    pub wait_ms: u64,
    #[serde(default)]
    pub outcome: Option<ScriptedOutcome>,
    #[serde(default)]
    pub error: Option<String>,
}

impl LeadScript {
    fn to_script(&self) -> Result<DialScript> {
        let script = match (&self.outcome, &self.error) {
            (Some(ScriptedOutcome::Connected), None) => DialScript::connected(),
            (Some(ScriptedOutcome::Disconnected), None) => DialScript::disconnected(),
            (Some(ScriptedOutcome::Failed), None) => {
                DialScript::outcome(CallOutcome::failed("scripted failure"))
            }
            (None, Some(message)) => DialScript::error(message.clone()),
            _ => {
                return Err(DialerError::config(format!(
                    "Lead {} must set exactly one of `outcome` or `error`",
                    self.number
                )))
            }
        };
        Ok(script.after_ms(self.wait_ms))
    }
}

/// A complete scripted run: agent, dialer settings and lead behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub agent_id: String,
    #[serde(default)]
    pub dialer: DialerConfig,
    #[serde(default)]
    pub leads: Vec<LeadScript>,
}

impl Scenario {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(source)
            .map_err(|e| DialerError::config(format!("Invalid scenario: {}", e)))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            DialerError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(DialerError::config("agent_id must not be empty"));
        }
        self.dialer.validate()?;
        for lead in &self.leads {
            lead.to_script()?;
        }
        Ok(())
    }

    /// Leads in file order
    pub fn lead_source(&self) -> QueueLeadSource {
        QueueLeadSource::new(self.leads.iter().map(|lead| lead.number.as_str()))
    }

    pub fn dialing_service(&self) -> Result<ScriptedDialingService> {
        self.leads
            .iter()
            .try_fold(ScriptedDialingService::new(), |service, lead| {
                Ok(service.with_script(lead.number.clone(), lead.to_script()?))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
agent_id = "agent1"

[dialer]
dial_ratio = 3

[[leads]]
number = "+12123334444"
wait_ms = 5
error = "Dialing service failed"

[[leads]]
number = "+12123334449"
wait_ms = 10
outcome = "failed"

[[leads]]
number = "+12123334447"
outcome = "connected"
"#;

    #[tokio::test]
    async fn test_queue_source_drains_in_order_and_refills() {
        let source = QueueLeadSource::new(["1", "2"]);
        assert_eq!(source.next_candidate().await, Some(DialCandidate::from("1")));
        assert_eq!(source.next_candidate().await, Some(DialCandidate::from("2")));
        assert_eq!(source.next_candidate().await, None);

        source.push("3");
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.next_candidate().await, Some(DialCandidate::from("3")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_service_follows_script() {
        let service = ScriptedDialingService::new()
            .with_script("ok", DialScript::connected().after_ms(20))
            .with_script("boom", DialScript::error("line down"));

        let start = tokio::time::Instant::now();
        let outcome = service.dial("agent1", &DialCandidate::from("ok")).await.unwrap();
        assert_eq!(outcome, CallOutcome::Connected);
        assert!(start.elapsed() >= Duration::from_millis(20));

        let err = service.dial("agent1", &DialCandidate::from("boom")).await.unwrap_err();
        assert_eq!(err.to_string(), "line down");

        let err = service.dial("agent1", &DialCandidate::from("nobody")).await.unwrap_err();
        assert_eq!(err.to_string(), "No script for number nobody");

        let dialed: Vec<_> = service.dialed().iter().map(|c| c.to_string()).collect();
        assert_eq!(dialed, vec!["ok", "boom", "nobody"]);
    }

    #[tokio::test]
    async fn test_scenario_builds_collaborators() {
        let scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        assert_eq!(scenario.agent_id, "agent1");
        assert_eq!(scenario.dialer.dial_ratio, 3);
        assert_eq!(scenario.leads.len(), 3);

        let source = scenario.lead_source();
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.next_candidate().await, Some(DialCandidate::from("+12123334444")));

        let service = scenario.dialing_service().unwrap();
        assert_eq!(
            service.dial("agent1", &DialCandidate::from("+12123334447")).await.unwrap(),
            CallOutcome::Connected
        );
    }

    #[test]
    fn test_scenario_rejects_ambiguous_lead() {
        let source = r#"
agent_id = "agent1"

[[leads]]
number = "1"
outcome = "connected"
error = "both"
"#;
        let err = Scenario::from_toml_str(source).unwrap_err();
        assert!(err.to_string().contains("exactly one of `outcome` or `error`"));
    }

    #[test]
    fn test_scenario_rejects_empty_agent() {
        assert!(Scenario::from_toml_str("agent_id = \"\"").is_err());
    }
}

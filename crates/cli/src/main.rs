//! `power-dialer`: run scripted dialing scenarios from the command line

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use power_dialer_core::logging::{parse_log_level, setup_logging, LoggingConfig};
use power_dialer_core::scripted::Scenario;
use power_dialer_core::{AgentState, PowerDialer, RoundSummary, SessionSnapshot};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "power-dialer", version, about = "Optimistic power dialer scenario runner")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "POWER_DIALER_LOG")]
    log_level: String,

    /// Emit logs and the final report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log the agent in, dial until connected, then wrap up and log out
    Run {
        /// Scenario file (TOML)
        scenario: PathBuf,

        /// Override the scenario's dial ratio
        #[arg(long)]
        dial_ratio: Option<usize>,

        /// How the connected call finishes
        #[arg(long, value_enum, default_value_t = CallEnd::Ended)]
        end_call: CallEnd,
    },
    /// Validate a scenario file without dialing
    Check {
        scenario: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CallEnd {
    Ended,
    Failed,
}

#[derive(Serialize)]
struct RunReport {
    connected: SessionSnapshot,
    finished: SessionSnapshot,
    rounds: Vec<RoundSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&cli.log_level)?);
    if cli.json {
        logging = logging.with_json();
    }
    setup_logging(logging)?;

    match cli.command {
        Command::Check { scenario } => {
            let scenario = load(&scenario)?;
            println!(
                "Scenario for agent {} is valid: {} lead(s), dial ratio {}",
                scenario.agent_id,
                scenario.leads.len(),
                scenario.dialer.dial_ratio
            );
        }
        Command::Run {
            scenario,
            dial_ratio,
            end_call,
        } => {
            let mut scenario = load(&scenario)?;
            if let Some(dial_ratio) = dial_ratio {
                scenario.dialer.dial_ratio = dial_ratio;
            }
            let report = run(&scenario, end_call).await?;
            print_report(&report, cli.json)?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Scenario> {
    Scenario::from_file(path).with_context(|| format!("Loading scenario {}", path.display()))
}

async fn run(scenario: &Scenario, end_call: CallEnd) -> Result<RunReport> {
    let dialer = PowerDialer::new(
        scenario.agent_id.clone(),
        Arc::new(scenario.lead_source()),
        Arc::new(scenario.dialing_service()?),
        scenario.dialer.clone(),
    )?;

    dialer.login().await?;
    if dialer.snapshot().state == AgentState::Available {
        dialer.connect().await?;
    }
    let connected = dialer.snapshot();

    // Auto-dial would keep the agent busy forever; wrap up after one call.
    dialer.logout();
    if connected.state == AgentState::OnCall {
        let next = match end_call {
            CallEnd::Ended => dialer.call_ended().await?,
            CallEnd::Failed => dialer.call_failed().await?,
        };
        info!("Agent {} finished the call and is now {}", scenario.agent_id, next);
    }

    let rounds = dialer.wait_for_dial_tasks().await;
    Ok(RunReport {
        connected,
        finished: dialer.snapshot(),
        rounds,
    })
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match &report.connected.current_lead {
        Some(lead) => println!("Agent {} connected to {}", report.connected.agent_id, lead),
        None => println!("Agent {} found nobody to talk to", report.connected.agent_id),
    }
    for (index, round) in report.rounds.iter().enumerate() {
        println!("Round {}: {:?}", index + 1, round.state);
        for attempt in &round.attempts {
            println!("  {} -> {}", attempt.candidate, attempt.outcome);
        }
    }
    println!("Final state: {}", report.finished.state);
    Ok(())
}

//! # jetstream
//!
//! Runs flights and journeys against the in-memory journal, bus and store,
//! printing every published transition as one JSON line on stdout.
//! Logs go to stderr and follow `RUST_LOG` (default `info`).

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use jetstream_core::OrchestratorConfig;
use jetstream_events::{Flight, TransitionBus, TransitionPublisher, TransitionSubscription};
use jetstream_orchestrator::{Orchestrator, Signal};
use jetstream_workflow::InstanceId;

use cli::{Cli, Commands, FlightArgs, JourneyArgs};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            let rendered = config
                .to_toml_string()
                .context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Flight(args) => run_flight(config, args).await,
        Commands::Journey(args) => run_journey(config, args).await,
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(OrchestratorConfig::default()),
    }
}

/// Orchestrator publishing to a bus the caller subscribes to.
fn orchestrator(config: OrchestratorConfig) -> Result<(Orchestrator, TransitionSubscription)> {
    let bus = Arc::new(TransitionBus::new());
    let events = bus.subscribe();
    let orchestrator = Orchestrator::builder(config)
        .publisher(bus as Arc<dyn TransitionPublisher>)
        .build()
        .context("Invalid configuration")?;
    Ok((orchestrator, events))
}

async fn run_flight(config: OrchestratorConfig, args: FlightArgs) -> Result<()> {
    let (orchestrator, mut events) = orchestrator(config)?;

    let signals: Vec<Signal> = [
        args.delay.map(|minutes| Signal::AnnounceDelay { minutes }),
        args.change_gate.map(|gate| Signal::ChangeGate { gate }),
        args.cancel.map(|reason| Signal::CancelFlight { reason }),
    ]
    .into_iter()
    .flatten()
    .collect();

    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let mut flight = Flight::new(args.number, date, args.origin, args.destination)
        .with_demo_mode(args.demo);
    if let Some(gate) = args.gate {
        flight = flight.with_gate(gate);
    }
    if let Some(aircraft) = args.aircraft {
        flight = flight.with_aircraft(aircraft);
    }

    let id = orchestrator
        .start_flight(flight)
        .await
        .context("Failed to start flight")?;
    send_later(&orchestrator, &id, signals, args.signal_after);

    let done = stream_until(&mut events, orchestrator.await_flight(&id))
        .await
        .context("Flight did not finish")?;
    info!(
        flight_number = %done.flight_number,
        phase = %done.phase,
        delay = done.delay_minutes,
        gate = ?done.gate,
        "Flight finished"
    );
    Ok(())
}

async fn run_journey(config: OrchestratorConfig, args: JourneyArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read legs from {}", args.file.display()))?;
    let legs: Vec<Flight> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse legs in {}", args.file.display()))?;

    let (orchestrator, mut events) = orchestrator(config)?;
    let id = orchestrator
        .start_journey(&args.id, legs)
        .await
        .context("Failed to start journey")?;

    let signals: Vec<Signal> = args
        .cancel
        .map(|reason| Signal::CancelJourney { reason })
        .into_iter()
        .collect();
    send_later(&orchestrator, &id, signals, args.signal_after);

    let status = stream_until(&mut events, orchestrator.await_journey(&id))
        .await
        .context("Journey did not finish")?;
    info!(
        journey_id = %status.journey_id,
        legs = status.legs.len(),
        cancelled = status.cancelled,
        reason = ?status.cancellation_reason,
        "Journey finished"
    );
    Ok(())
}

/// Deliver `signals` once `after_secs` have passed.
fn send_later(orchestrator: &Orchestrator, id: &InstanceId, signals: Vec<Signal>, after_secs: u64) {
    if signals.is_empty() {
        return;
    }
    let orchestrator = orchestrator.clone();
    let id = id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(after_secs)).await;
        for signal in signals {
            if let Err(e) = orchestrator.signal(&id, signal).await {
                warn!(instance_id = %id, error = %e, "Signal rejected");
            }
        }
    });
}

/// Print transitions as they are published until `done` resolves.
async fn stream_until<T, F>(events: &mut TransitionSubscription, done: F) -> Result<T>
where
    F: Future<Output = jetstream_orchestrator::Result<T>>,
{
    tokio::pin!(done);
    loop {
        tokio::select! {
            biased;
            record = events.recv() => match record {
                Ok(record) => println!("{}", record.payload),
                Err(e) => {
                    warn!(error = %e, "Event stream ended early");
                    break;
                }
            },
            outcome = &mut done => {
                while let Ok(record) = events.try_recv() {
                    println!("{}", record.payload);
                }
                return Ok(outcome?);
            }
        }
    }
    Ok(done.await?)
}

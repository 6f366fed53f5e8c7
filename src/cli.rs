//! CLI command definitions using clap.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// jetstream - durable flight lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(name = "jetstream")]
#[command(version)]
#[command(about = "Runs flights and multi-leg journeys and prints their transition events")]
#[command(
    long_about = "Each flight walks SCHEDULED, BOARDING, DEPARTED, IN_FLIGHT, LANDED, COMPLETED. \
                  Every transition is printed as one JSON line in the public event format."
)]
pub struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one flight to completion
    Flight(FlightArgs),

    /// Run a journey whose legs are read from a JSON file
    Journey(JourneyArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
pub struct FlightArgs {
    /// Flight number, e.g. AA1234
    #[arg(short, long)]
    pub number: String,

    /// Operating date (YYYY-MM-DD); today when omitted
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Origin station
    #[arg(long)]
    pub origin: String,

    /// Destination station
    #[arg(long)]
    pub destination: String,

    /// Departure gate
    #[arg(short, long)]
    pub gate: Option<String>,

    /// Aircraft tail number
    #[arg(short, long)]
    pub aircraft: Option<String>,

    /// Compress phase durations to demo timing
    #[arg(long, default_value_t = false)]
    pub demo: bool,

    /// Announce this delay (minutes)
    #[arg(long)]
    pub delay: Option<u32>,

    /// Move the flight to this gate
    #[arg(long)]
    pub change_gate: Option<String>,

    /// Cancel the flight with this reason
    #[arg(long)]
    pub cancel: Option<String>,

    /// Seconds after start at which the signals above are sent
    #[arg(long, default_value_t = 1)]
    pub signal_after: u64,
}

#[derive(Args, Debug)]
pub struct JourneyArgs {
    /// Journey identifier
    #[arg(short, long)]
    pub id: String,

    /// JSON file holding the legs as an array of flights
    #[arg(short, long)]
    pub file: PathBuf,

    /// Cancel the journey with this reason
    #[arg(long)]
    pub cancel: Option<String>,

    /// Seconds after start at which the cancellation is sent
    #[arg(long, default_value_t = 1)]
    pub signal_after: u64,
}

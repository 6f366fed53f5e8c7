//! # Orchestrator
//!
//! Durable flight lifecycles and multi-leg journeys for jetstream.
//!
//! - [`flight`]: the per-flight state machine, its phase timing and the
//!   driver that runs it on a durable context.
//! - [`journey`]: the composer that runs legs in order as child flights.
//! - [`query`]: signals and queries accepted by the admission API.
//! - [`service`]: [`Orchestrator`], which starts instances, routes signals
//!   and queries, and recovers unfinished runs from the journal.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod flight;
pub mod journey;
pub mod query;
pub mod service;

pub use error::{Error, Result};
pub use flight::{FlightSignal, FlightSnapshot, PhaseSchedule, TimingMode};
pub use journey::{JourneyOptions, JourneySignal, JourneyStatus, LegFailure};
pub use query::{Query, QueryResult, Signal};
pub use service::{Orchestrator, OrchestratorBuilder};

//! Core configuration and error types shared by the jetstream crates.
//!
//! The orchestrator is configured by a single [`OrchestratorConfig`] record
//! that is loaded once and threaded into every component at construction.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{
    DemoConfig, DemoTiming, DispatcherConfig, InFlightSource, JourneyConfig, OrchestratorConfig,
    PhaseDurations,
};
pub use error::Error;
pub use result::Result;

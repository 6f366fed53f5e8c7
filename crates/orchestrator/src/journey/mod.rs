//! Multi-leg journeys composed from child flights.

pub mod composer;
pub mod runtime;

pub use composer::{
    JourneyOptions, JourneyRuntime, JourneySignal, JourneyStatus, LegFailure, link_legs,
    run_journey,
};
pub use runtime::{CANCEL_LEG, DurableJourneyRuntime, LegLauncher, leg_id};

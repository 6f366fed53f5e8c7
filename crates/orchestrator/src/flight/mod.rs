//! Per-flight state machine.
//!
//! - [`machine`]: the pure lifecycle fold ([`FlightMachine::step`]).
//! - [`timing`]: phase durations for realtime and demo flights.
//! - [`runner`]: the driver loop plus its capability trait and durable
//!   implementation.

pub mod machine;
pub mod runner;
pub mod timing;

pub use machine::{
    FlightAction, FlightInput, FlightMachine, FlightSignal, FlightSnapshot, TransitionDraft,
};
pub use runner::{
    DurableFlightRuntime, FlightRuntime, PERSIST_TRANSITION, PUBLISH_TRANSITION, run_flight,
};
pub use timing::{PhaseSchedule, TimingMode, format_duration, is_demo};

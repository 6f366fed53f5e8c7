//! Flight data model and the two external collaborators a flight talks to.
//!
//! - **Types**: [`Flight`], [`FlightPhase`], the persisted [`Transition`]
//!   record and the public [`TransitionEvent`].
//! - **Bus**: [`TransitionPublisher`] seam plus the in-memory
//!   [`TransitionBus`] that fans events out to subscribers.
//! - **Store**: [`TransitionStore`] append seam plus
//!   [`InMemoryTransitionStore`].
//!
//! # Example
//!
//! ```ignore
//! use jetstream_events::{TransitionBus, TransitionPublisher};
//!
//! let bus = TransitionBus::new();
//! let mut sub = bus.subscribe();
//! bus.publish(key, &event).await?;
//! let record = sub.recv().await?;
//! println!("{}: {}", record.partition_key, record.payload);
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod store;
pub mod types;

pub use bus::{
    BusRecord, TRANSITION_TOPIC, TransitionBus, TransitionPattern, TransitionPublisher,
    TransitionSubscription,
};
pub use error::{Error, Result};
pub use store::{InMemoryTransitionStore, TracingTransitionStore, TransitionStore};
pub use types::{Flight, FlightPhase, Transition, TransitionEvent, TransitionKind};

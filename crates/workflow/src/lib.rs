//! Durable execution runtime with journal replay.
//!
//! Long-lived machines (flights and journeys) run as ordinary async bodies
//! on top of a [`DurableContext`]. Every interaction with the outside world
//! goes through the context and is journaled, so a restarted worker can
//! re-execute the body against the journal and resume exactly where it
//! stopped:
//!
//! - **Journal**: append-only [`JournalEntry`] log per instance, kept by a
//!   [`JournalStorage`].
//! - **Timers**: durable deadlines measured by a [`TimerService`].
//! - **Mailbox**: per-instance FIFO of signals, delivered at suspension
//!   boundaries.
//! - **Dispatcher**: timeout plus bounded retry for effect calls, keyed by
//!   deterministic idempotency keys.
//! - **Registry**: at most one live run per [`InstanceId`].
//! - **Projection**: queryable state published by the running body.
//!
//! # Example
//!
//! ```ignore
//! use jetstream_workflow::{ContextParts, DurableContext, Wake};
//!
//! let mut ctx = DurableContext::new(id, run_id, &journal, parts)?;
//! let timer = ctx.start_timer(Duration::from_secs(60)).await?;
//! match ctx.wait_timer(&timer).await? {
//!     Wake::Ready(()) => println!("fired"),
//!     Wake::Signals(signals) => println!("{} signals", signals.len()),
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod idempotent;
pub mod mailbox;
pub mod projection;
pub mod registry;
pub mod storage;
pub mod timer;
pub mod types;

pub use context::{ContextParts, DurableContext, Wake};
pub use dispatcher::{Dispatched, Dispatcher, EffectCall, EffectError, EffectFailure};
pub use error::{Error, Result};
pub use idempotent::{effect_key, hash_input, hash_serializable, namespace_for, rng_seed};
pub use mailbox::Mailbox;
pub use projection::{
    ExecutionStatus, ExecutionView, ProjectionReader, ProjectionWriter, projection_channel,
};
pub use registry::{Execution, InstanceRegistry};
pub use storage::{InMemoryStorage, JournalStorage, QueuedSignal};
pub use timer::{TimerHandle, TimerService, TokioTimerService, deadline_after};
pub use types::{
    InstanceId, InstanceKind, Journal, JournalEntry, Outcome, ParentRef, RunId, Seq, StartRecord,
};

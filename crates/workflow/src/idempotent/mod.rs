//! Deterministic keys derived from an execution's identity.
//!
//! - [`hash`]: SHA-256 of raw bytes or of any `Serialize` value.
//! - [`keys`]: UUID v5 idempotency keys for effect calls and the seed of
//!   an execution's random stream.

pub mod hash;
pub mod keys;

pub use hash::{hash_input, hash_serializable};
pub use keys::{effect_key, namespace_for, rng_seed};

//! Result alias for configuration operations.

use crate::error::Error;

/// The standard Result type for jetstream core operations.
pub type Result<T> = std::result::Result<T, Error>;

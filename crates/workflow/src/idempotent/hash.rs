//! SHA-256 hashing of key material.

use bincode::config;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Hash raw bytes.
#[inline]
pub fn hash_input(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash the bincode encoding of a value.
///
/// # Errors
///
/// Returns `Serialization` if the value cannot be encoded.
pub fn hash_serializable<T: Serialize>(value: &T) -> Result<[u8; 32]> {
    let bytes = bincode::serde::encode_to_vec(value, config::standard())
        .map_err(|e| Error::serialization(e.to_string()))?;
    Ok(hash_input(&bytes))
}

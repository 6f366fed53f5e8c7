//! UUID v5 idempotency keys and RNG seeds.
//!
//! ```text
//! namespace = UUID v5(OID_NAMESPACE, instance_id)
//! key       = UUID v5(namespace, SHA-256(bincode(run_id, seq, effect name)))
//! seed      = first 8 bytes of SHA-256("<instance_id>/<run_id>"), little endian
//! ```
//!
//! A retried or replayed call of the same operation derives the same key,
//! so receivers can drop duplicates.

use uuid::Uuid;

use crate::error::Result;
use crate::idempotent::hash::{hash_input, hash_serializable};
use crate::types::{InstanceId, RunId, Seq};

/// Namespace UUID scoping every key of one instance.
#[must_use]
pub fn namespace_for(instance_id: &InstanceId) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, instance_id.as_str().as_bytes())
}

/// Idempotency key of the effect call at `seq` in run `run_id`.
///
/// # Errors
///
/// Returns `Serialization` if the key material cannot be encoded.
pub fn effect_key(instance_id: &InstanceId, run_id: RunId, seq: Seq, name: &str) -> Result<Uuid> {
    let material = hash_serializable(&(run_id.to_string(), seq, name))?;
    Ok(Uuid::new_v5(&namespace_for(instance_id), &material))
}

/// Seed of the deterministic random stream of one run.
#[must_use]
pub fn rng_seed(instance_id: &InstanceId, run_id: RunId) -> u64 {
    let digest = hash_input(format!("{instance_id}/{run_id}").as_bytes());
    digest.first_chunk::<8>().map_or(0, |bytes| u64::from_le_bytes(*bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_key_is_deterministic() {
        let id = InstanceId::journey("J1");
        let run = RunId::new();
        let a = effect_key(&id, run, 3, "publish_transition");
        let b = effect_key(&id, run, 3, "publish_transition");
        assert!(a.is_ok());
        assert_eq!(a, b);
    }

    #[test]
    fn test_effect_key_varies_with_inputs() {
        let id = InstanceId::journey("J1");
        let run = RunId::new();
        let base = effect_key(&id, run, 3, "publish_transition").ok();
        assert_ne!(base, effect_key(&id, run, 4, "publish_transition").ok());
        assert_ne!(base, effect_key(&id, run, 3, "persist_transition").ok());
        assert_ne!(base, effect_key(&id, RunId::new(), 3, "publish_transition").ok());
        assert_ne!(
            base,
            effect_key(&InstanceId::journey("J2"), run, 3, "publish_transition").ok()
        );
    }

    #[test]
    fn test_key_is_version_5() {
        let key = effect_key(&InstanceId::journey("J1"), RunId::new(), 1, "x");
        assert_eq!(key.map(|k| k.get_version_num()).ok(), Some(5));
    }

    #[test]
    fn test_rng_seed_depends_on_run() {
        let id = InstanceId::journey("J1");
        let run = RunId::new();
        assert_eq!(rng_seed(&id, run), rng_seed(&id, run));
        assert_ne!(rng_seed(&id, run), rng_seed(&id, RunId::new()));
    }
}

//! Instance registry: identity to live execution, at most one live run each.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::error::{Error, Result};
use crate::projection::ExecutionStatus;
use crate::types::{InstanceId, RunId};

/// A handle the registry can hold.
pub trait Execution: Clone + Send + Sync {
    /// Run this handle belongs to.
    fn run_id(&self) -> RunId;

    /// Current status of the run.
    fn status(&self) -> ExecutionStatus;
}

/// Maps instance identities to their latest run.
///
/// Finished runs stay registered so they can still be queried, until a new
/// run of the same identity replaces them or [`evict_finished`] drops them.
///
/// [`evict_finished`]: InstanceRegistry::evict_finished
pub struct InstanceRegistry<H> {
    entries: RwLock<HashMap<InstanceId, H>>,
    generation: watch::Sender<u64>,
}

impl<H: Execution> InstanceRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            entries: RwLock::new(HashMap::new()),
            generation,
        }
    }

    /// Start a run under `id`.
    ///
    /// `launch` is invoked with the registry locked, so two concurrent starts
    /// of the same identity cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns `InstanceAlreadyRunning` if a live run exists, or whatever
    /// `launch` returns.
    pub async fn start<F, Fut>(&self, id: &InstanceId, launch: F) -> Result<H>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H>>,
    {
        let mut entries = self.entries.write().await;
        if entries.get(id).is_some_and(|h| h.status().is_running()) {
            return Err(Error::already_running(id));
        }
        let handle = launch().await?;
        debug!(instance_id = %id, run_id = %handle.run_id(), "Registered run");
        entries.insert(id.clone(), handle.clone());
        drop(entries);
        self.bump();
        Ok(handle)
    }

    /// Register a handle unconditionally (used when recovering runs).
    pub async fn install(&self, id: &InstanceId, handle: H) {
        self.entries.write().await.insert(id.clone(), handle);
        self.bump();
    }

    /// Look up the latest run of `id`.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` if nothing is registered.
    pub async fn get(&self, id: &InstanceId) -> Result<H> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    /// Every registered identity with its handle, sorted by identity.
    pub async fn entries(&self) -> Vec<(InstanceId, H)> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Identities whose latest run is live.
    pub async fn live(&self) -> Vec<InstanceId> {
        self.entries()
            .await
            .into_iter()
            .filter(|(_, h)| h.status().is_running())
            .map(|(id, _)| id)
            .collect()
    }

    /// Drop finished runs for which `evict` returns true. Live runs are
    /// never dropped. Returns the dropped identities, sorted.
    pub async fn evict_finished<F>(&self, evict: F) -> Vec<InstanceId>
    where
        F: Fn(&InstanceId, &H) -> bool,
    {
        let mut entries = self.entries.write().await;
        let mut dropped: Vec<InstanceId> = entries
            .iter()
            .filter(|(id, h)| !h.status().is_running() && evict(id, h))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dropped {
            entries.remove(id);
        }
        drop(entries);
        dropped.sort();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Evicted finished runs");
            self.bump();
        }
        dropped
    }

    /// Receiver that changes whenever a handle is registered or replaced.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }
}

impl<H: Execution> Default for InstanceRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

//! Read-side view of a running execution.
//!
//! The execution owns a [`ProjectionWriter`] and replaces the projection
//! after every step; queries clone the latest value from a
//! [`ProjectionReader`] without touching the journal.
//!
//! The view also carries the highest mailbox arrival number folded into the
//! projection, so a sender can wait until its signal is visible to queries.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::types::InstanceId;

/// Lifecycle status of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed { reason: String },
}

impl ExecutionStatus {
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Projection plus status, as published by the execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionView<P> {
    pub projection: P,
    pub status: ExecutionStatus,
    /// Highest signal arrival number reflected in `projection`.
    pub delivered_through: u64,
}

/// Create a connected writer/reader pair.
pub fn projection_channel<P>(initial: P) -> (ProjectionWriter<P>, ProjectionReader<P>) {
    let (tx, rx) = watch::channel(ExecutionView {
        projection: initial,
        status: ExecutionStatus::Running,
        delivered_through: 0,
    });
    (ProjectionWriter { tx }, ProjectionReader { rx })
}

/// Write side, owned by the execution task.
#[derive(Debug)]
pub struct ProjectionWriter<P> {
    tx: watch::Sender<ExecutionView<P>>,
}

impl<P> ProjectionWriter<P> {
    /// Replace the projection, which has folded in every signal up to
    /// arrival number `through`.
    pub fn publish(&self, projection: P, through: u64) {
        self.tx.send_modify(|view| {
            view.projection = projection;
            view.delivered_through = view.delivered_through.max(through);
        });
    }

    /// Mark the run finished.
    pub fn finish(&self, status: ExecutionStatus) {
        self.tx.send_modify(|view| view.status = status);
    }

    /// A new reader on this projection.
    pub fn reader(&self) -> ProjectionReader<P> {
        ProjectionReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side, held by the registry and by waiters.
#[derive(Debug, Clone)]
pub struct ProjectionReader<P> {
    rx: watch::Receiver<ExecutionView<P>>,
}

impl<P: Clone> ProjectionReader<P> {
    /// Latest view.
    pub fn snapshot(&self) -> ExecutionView<P> {
        self.rx.borrow().clone()
    }

    /// Latest projection.
    pub fn projection(&self) -> P {
        self.rx.borrow().projection.clone()
    }

    /// Latest status.
    pub fn status(&self) -> ExecutionStatus {
        self.rx.borrow().status.clone()
    }

    /// Wait until the run is no longer running.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionAborted` if the writer is dropped first.
    pub async fn finished(&self, instance_id: &InstanceId) -> Result<ExecutionView<P>> {
        let mut rx = self.rx.clone();
        let view = rx
            .wait_for(|view| !view.status.is_running())
            .await
            .map_err(|_| Error::aborted(instance_id))?;
        Ok(view.clone())
    }

    /// Wait until the signal with arrival number `arrival` is reflected in
    /// the projection, or the run stops running.
    ///
    /// Returns `None` if the writer is dropped first: the run was aborted and
    /// the signal stays queued for the next run.
    pub async fn applied(&self, arrival: u64) -> Option<ExecutionView<P>> {
        let mut rx = self.rx.clone();
        let view = rx
            .wait_for(|view| view.delivered_through >= arrival || !view.status.is_running())
            .await
            .ok()?;
        Some(view.clone())
    }
}

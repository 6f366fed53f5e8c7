//! Storage traits for the durable log and the signal mailboxes.

use std::collections::HashMap;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{InstanceId, Journal, JournalEntry};

/// A signal waiting in an instance's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedSignal {
    /// Arrival number, strictly increasing per instance.
    pub arrival: u64,
    pub payload: serde_json::Value,
}

/// Trait for durable log backends.
#[async_trait]
pub trait JournalStorage: Send + Sync {
    /// Begin a new run: replaces any previous journal and mailbox for `id`
    /// with a journal holding only `started`.
    async fn create(&self, id: &InstanceId, started: JournalEntry) -> Result<()>;

    /// Append an entry to the journal of `id`.
    async fn append(&self, id: &InstanceId, entry: JournalEntry) -> Result<()>;

    /// Load the journal of `id`.
    async fn load(&self, id: &InstanceId) -> Result<Journal>;

    /// All instances with a journal, sorted by identity.
    async fn instances(&self) -> Result<Vec<InstanceId>>;

    /// Append a signal to the mailbox of `id`; returns its arrival number.
    async fn enqueue_signal(&self, id: &InstanceId, payload: serde_json::Value) -> Result<u64>;

    /// Signals of `id` with arrival number greater than `after`, in order.
    async fn signals_after(&self, id: &InstanceId, after: u64) -> Result<Vec<QueuedSignal>>;

    /// Drop signals of `id` with arrival number up to and including
    /// `through`. Arrival numbering continues where it was.
    async fn discard_signals(&self, id: &InstanceId, through: u64) -> Result<()>;
}

#[derive(Default)]
struct InstanceRecord {
    journal: Journal,
    mailbox: Vec<QueuedSignal>,
    next_arrival: u64,
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct InMemoryStorage {
    instances: RwLock<HashMap<InstanceId, InstanceRecord>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JournalStorage for InMemoryStorage {
    async fn create(&self, id: &InstanceId, started: JournalEntry) -> Result<()> {
        if !matches!(started, JournalEntry::ExecutionStarted { .. }) {
            return Err(Error::storage_failed(
                "create",
                format!("first entry of '{id}' must be an execution start"),
            ));
        }
        let mut journal = Journal::new();
        journal.append(started);
        self.instances.write().await.insert(
            id.clone(),
            InstanceRecord {
                journal,
                ..InstanceRecord::default()
            },
        );
        Ok(())
    }

    async fn append(&self, id: &InstanceId, entry: JournalEntry) -> Result<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(id)
            .ok_or_else(|| Error::storage_failed("append", format!("no journal for '{id}'")))?;
        record.journal.append(entry);
        Ok(())
    }

    async fn load(&self, id: &InstanceId) -> Result<Journal> {
        self.instances
            .read()
            .await
            .get(id)
            .map(|r| r.journal.clone())
            .ok_or_else(|| Error::storage_failed("load", format!("no journal for '{id}'")))
    }

    async fn instances(&self) -> Result<Vec<InstanceId>> {
        Ok(self
            .instances
            .read()
            .await
            .keys()
            .cloned()
            .sorted()
            .collect_vec())
    }

    async fn enqueue_signal(&self, id: &InstanceId, payload: serde_json::Value) -> Result<u64> {
        let mut instances = self.instances.write().await;
        let record = instances.get_mut(id).ok_or_else(|| {
            Error::storage_failed("enqueue_signal", format!("no mailbox for '{id}'"))
        })?;
        record.next_arrival = record.next_arrival.saturating_add(1);
        let arrival = record.next_arrival;
        record.mailbox.push(QueuedSignal { arrival, payload });
        Ok(arrival)
    }

    async fn signals_after(&self, id: &InstanceId, after: u64) -> Result<Vec<QueuedSignal>> {
        let instances = self.instances.read().await;
        let record = instances.get(id).ok_or_else(|| {
            Error::storage_failed("signals_after", format!("no mailbox for '{id}'"))
        })?;
        Ok(record
            .mailbox
            .iter()
            .filter(|s| s.arrival > after)
            .cloned()
            .collect_vec())
    }

    async fn discard_signals(&self, id: &InstanceId, through: u64) -> Result<()> {
        let mut instances = self.instances.write().await;
        let record = instances.get_mut(id).ok_or_else(|| {
            Error::storage_failed("discard_signals", format!("no mailbox for '{id}'"))
        })?;
        record.mailbox.retain(|s| s.arrival > through);
        Ok(())
    }
}

//! Per-instance signal mailbox.
//!
//! Signals are stored durably in arrival order. The owning execution only
//! sees them when its durable context drains at a suspension boundary.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::Result;
use crate::storage::{JournalStorage, QueuedSignal};
use crate::types::InstanceId;

/// FIFO mailbox of typed signals for one instance.
pub struct Mailbox<S> {
    instance_id: InstanceId,
    storage: Arc<dyn JournalStorage>,
    notify: Arc<Notify>,
    _signal: PhantomData<fn() -> S>,
}

impl<S> Clone for Mailbox<S> {
    fn clone(&self) -> Self {
        Self {
            instance_id: self.instance_id.clone(),
            storage: Arc::clone(&self.storage),
            notify: Arc::clone(&self.notify),
            _signal: PhantomData,
        }
    }
}

impl<S> std::fmt::Debug for Mailbox<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl<S> Mailbox<S>
where
    S: Serialize + DeserializeOwned + Send,
{
    /// Create the mailbox of `instance_id`.
    pub fn new(instance_id: InstanceId, storage: Arc<dyn JournalStorage>) -> Self {
        Self {
            instance_id,
            storage,
            notify: Arc::new(Notify::new()),
            _signal: PhantomData,
        }
    }

    /// Instance this mailbox belongs to.
    pub const fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Append a signal and wake the owner if it is suspended.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` or `StorageFailed` if the signal cannot be stored.
    pub async fn send(&self, signal: &S) -> Result<u64> {
        let payload = serde_json::to_value(signal)?;
        let arrival = self
            .storage
            .enqueue_signal(&self.instance_id, payload)
            .await?;
        debug!(instance_id = %self.instance_id, arrival, "Signal accepted");
        self.notify.notify_one();
        Ok(arrival)
    }

    /// Raw signals with arrival number greater than `after`.
    pub(crate) async fn pending(&self, after: u64) -> Result<Vec<QueuedSignal>> {
        self.storage.signals_after(&self.instance_id, after).await
    }

    /// Forget signals already journaled as delivered.
    pub(crate) async fn discard(&self, through: u64) -> Result<()> {
        self.storage.discard_signals(&self.instance_id, through).await
    }

    /// Resolve on the next `send`, or immediately if one happened since the
    /// last wake-up.
    pub(crate) async fn changed(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::{InstanceKind, JournalEntry, RunId};
    use chrono::Utc;
    use std::time::Duration;

    async fn mailbox() -> Option<Mailbox<String>> {
        let storage: Arc<dyn JournalStorage> = Arc::new(InMemoryStorage::new());
        let id = InstanceId::journey("J1");
        let started = JournalEntry::ExecutionStarted {
            run_id: RunId::new(),
            kind: InstanceKind::Journey,
            input: serde_json::Value::Null,
            parent: None,
            timestamp: Utc::now(),
        };
        storage.create(&id, started).await.ok()?;
        Some(Mailbox::new(id, storage))
    }

    #[tokio::test]
    async fn test_send_then_pending_in_order() {
        let Some(mailbox) = mailbox().await else {
            panic!("mailbox setup failed");
        };
        assert_eq!(mailbox.send(&"a".to_string()).await.ok(), Some(1));
        assert_eq!(mailbox.send(&"b".to_string()).await.ok(), Some(2));

        let pending = mailbox.pending(0).await.unwrap_or_default();
        let payloads: Vec<_> = pending.into_iter().map(|s| s.payload).collect();
        assert_eq!(payloads, vec![serde_json::json!("a"), serde_json::json!("b")]);
    }

    #[tokio::test]
    async fn test_send_wakes_waiter() {
        let Some(mailbox) = mailbox().await else {
            panic!("mailbox setup failed");
        };
        let sender = mailbox.clone();

        let waiter = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_secs(5), mailbox.changed()).await
        });
        tokio::task::yield_now().await;
        assert!(sender.send(&"wake".to_string()).await.is_ok());

        let woke = waiter.await;
        assert!(matches!(woke, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_send_before_wait_is_not_lost() {
        let Some(mailbox) = mailbox().await else {
            panic!("mailbox setup failed");
        };
        assert!(mailbox.send(&"early".to_string()).await.is_ok());

        let woke = tokio::time::timeout(Duration::from_secs(5), mailbox.changed()).await;
        assert!(woke.is_ok());
    }
}

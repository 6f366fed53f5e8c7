//! Transition bus for pub/sub fan-out of public transition events.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::TransitionEvent;

/// Topic the flight transitions are published on.
pub const TRANSITION_TOPIC: &str = "flight-state-changes";

/// Hand-off of a transition event to an external event bus.
///
/// `key` identifies the logical call; a retried call repeats the key.
#[async_trait]
pub trait TransitionPublisher: Send + Sync {
    async fn publish(&self, key: Uuid, event: &TransitionEvent) -> Result<()>;
}

/// One record as it appears on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: &'static str,
    pub partition_key: String,
    /// JSON payload.
    pub payload: String,
    pub event: TransitionEvent,
}

/// Subscription handle for receiving records.
pub struct TransitionSubscription {
    receiver: broadcast::Receiver<BusRecord>,
}

impl TransitionSubscription {
    /// Receive the next record.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` when the bus is gone or this subscriber lagged.
    pub async fn recv(&mut self) -> Result<BusRecord> {
        self.receiver.recv().await.map_err(|_| Error::ChannelClosed)
    }

    /// Try to receive a record without waiting.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` when nothing is buffered.
    pub fn try_recv(&mut self) -> Result<BusRecord> {
        self.receiver.try_recv().map_err(|_| Error::ChannelClosed)
    }
}

/// Pattern for filtering records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPattern {
    /// Match all records.
    All,
    /// Match records for one flight number (the partition key).
    ByFlight(String),
}

impl TransitionPattern {
    /// Check if a record matches this pattern.
    pub fn matches(&self, record: &BusRecord) -> bool {
        match self {
            Self::All => true,
            Self::ByFlight(number) => record.partition_key == *number,
        }
    }
}

struct Subscriber {
    sender: broadcast::Sender<BusRecord>,
    pattern: TransitionPattern,
}

#[derive(Default)]
struct Ledger {
    seen: HashSet<Uuid>,
    records: Vec<BusRecord>,
}

/// In-memory bus that fans transition events out to subscribers.
///
/// Repeated keys are acknowledged without being re-broadcast, so a retried
/// publish after a lost acknowledgement is not seen twice by subscribers.
pub struct TransitionBus {
    broadcast: broadcast::Sender<BusRecord>,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: RwLock<u64>,
    ledger: RwLock<Ledger>,
}

impl TransitionBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a bus with the given broadcast channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            broadcast,
            subscribers: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
            ledger: RwLock::new(Ledger::default()),
        }
    }

    /// Subscribe to all records.
    pub fn subscribe(&self) -> TransitionSubscription {
        TransitionSubscription {
            receiver: self.broadcast.subscribe(),
        }
    }

    /// Subscribe to records matching a pattern.
    pub async fn subscribe_with_pattern(
        &self,
        pattern: TransitionPattern,
    ) -> (u64, TransitionSubscription) {
        let (sender, receiver) = broadcast::channel(100);

        let mut next_id = self.next_id.write().await;
        let id = *next_id;
        *next_id = next_id.saturating_add(1);

        self.subscribers
            .write()
            .await
            .insert(id, Subscriber { sender, pattern });

        (id, TransitionSubscription { receiver })
    }

    /// Unsubscribe a pattern-based subscriber.
    pub async fn unsubscribe(&self, subscriber_id: u64) {
        self.subscribers.write().await.remove(&subscriber_id);
    }

    /// Every distinct record published so far, in publish order.
    pub async fn records(&self) -> Vec<BusRecord> {
        self.ledger.read().await.records.clone()
    }

    /// Records for one flight number.
    pub async fn records_for(&self, flight_number: &str) -> Vec<BusRecord> {
        self.ledger
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.partition_key == flight_number)
            .cloned()
            .collect()
    }
}

impl Default for TransitionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransitionPublisher for TransitionBus {
    async fn publish(&self, key: Uuid, event: &TransitionEvent) -> Result<()> {
        let record = BusRecord {
            topic: TRANSITION_TOPIC,
            partition_key: event.partition_key().to_string(),
            payload: event.to_json()?,
            event: event.clone(),
        };

        {
            let mut ledger = self.ledger.write().await;
            if !ledger.seen.insert(key) {
                debug!(%key, flight_number = %record.partition_key, "Duplicate publish ignored");
                return Ok(());
            }
            ledger.records.push(record.clone());
        }

        debug!(
            flight_number = %record.partition_key,
            new_state = %event.new_state,
            "Publishing transition"
        );

        let _ = self.broadcast.send(record.clone());

        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values().filter(|s| s.pattern.matches(&record)) {
            let _ = sub.sender.send(record.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlightPhase;
    use chrono::NaiveDate;

    fn event(number: &str, state: FlightPhase) -> TransitionEvent {
        let timestamp = NaiveDate::from_ymd_opt(2026, 1, 27)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap_or_default();
        TransitionEvent {
            flight_number: number.to_string(),
            previous_state: None,
            new_state: state,
            timestamp,
            gate: None,
            delay: 0,
        }
    }

    #[tokio::test]
    async fn should_deliver_published_record_to_subscriber() {
        let bus = TransitionBus::new();
        let mut sub = bus.subscribe();

        let published = bus.publish(Uuid::from_u128(1), &event("AA1", FlightPhase::Scheduled)).await;
        assert!(published.is_ok());

        let record = sub.recv().await;
        assert!(record.is_ok());
        let record = record.map_err(|e| e.to_string());
        assert_eq!(record.as_ref().map(|r| r.topic), Ok(TRANSITION_TOPIC));
        assert_eq!(record.as_ref().map(|r| r.partition_key.as_str()), Ok("AA1"));
        assert!(
            record
                .map(|r| r.payload.contains("\"newState\":\"SCHEDULED\""))
                .unwrap_or(false)
        );
    }

    #[tokio::test]
    async fn should_drop_repeated_keys() {
        let bus = TransitionBus::new();
        let mut sub = bus.subscribe();
        let key = Uuid::from_u128(7);

        assert!(bus.publish(key, &event("AA1", FlightPhase::Boarding)).await.is_ok());
        assert!(bus.publish(key, &event("AA1", FlightPhase::Boarding)).await.is_ok());

        assert!(sub.try_recv().is_ok());
        assert!(sub.try_recv().is_err());
        assert_eq!(bus.records().await.len(), 1);
    }

    #[tokio::test]
    async fn should_filter_by_flight_pattern() {
        let bus = TransitionBus::new();
        let (id, mut sub) = bus
            .subscribe_with_pattern(TransitionPattern::ByFlight("DL9".to_string()))
            .await;

        assert!(bus.publish(Uuid::from_u128(1), &event("AA1", FlightPhase::Scheduled)).await.is_ok());
        assert!(bus.publish(Uuid::from_u128(2), &event("DL9", FlightPhase::Scheduled)).await.is_ok());

        let record = sub.try_recv().map(|r| r.partition_key);
        assert_eq!(record, Ok("DL9".to_string()));
        assert!(sub.try_recv().is_err());

        bus.unsubscribe(id).await;
        assert!(bus.publish(Uuid::from_u128(3), &event("DL9", FlightPhase::Boarding)).await.is_ok());
        assert!(sub.try_recv().is_err());
        assert_eq!(bus.records_for("DL9").await.len(), 2);
    }

    #[test]
    fn should_match_all_pattern() {
        let record = BusRecord {
            topic: TRANSITION_TOPIC,
            partition_key: "X1".to_string(),
            payload: String::new(),
            event: event("X1", FlightPhase::Landed),
        };
        assert!(TransitionPattern::All.matches(&record));
        assert!(!TransitionPattern::ByFlight("X2".to_string()).matches(&record));
    }
}

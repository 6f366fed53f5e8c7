//! Transition store trait and implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Transition;

/// Trait for transition-history backends.
///
/// Appends are upserts on [`Transition::id`], so a retried append of the
/// same logical transition leaves one row.
#[async_trait]
pub trait TransitionStore: Send + Sync {
    /// Append a transition record.
    async fn append(&self, record: &Transition) -> Result<()>;

    /// Records for one flight, ordered by timestamp.
    async fn for_flight(&self, flight_number: &str, flight_date: NaiveDate)
    -> Result<Vec<Transition>>;

    /// Total number of records.
    async fn count(&self) -> Result<usize>;
}

/// In-memory transition store.
#[derive(Default)]
pub struct InMemoryTransitionStore {
    records: RwLock<Vec<Transition>>,
    id_index: RwLock<HashMap<Uuid, usize>>,
}

impl InMemoryTransitionStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TransitionStore for InMemoryTransitionStore {
    async fn append(&self, record: &Transition) -> Result<()> {
        let mut records = self.records.write().await;
        let mut id_index = self.id_index.write().await;

        match id_index.get(&record.id).copied() {
            Some(position) => {
                if let Some(slot) = records.get_mut(position) {
                    *slot = record.clone();
                }
            }
            None => {
                id_index.insert(record.id, records.len());
                records.push(record.clone());
            }
        }
        Ok(())
    }

    async fn for_flight(
        &self,
        flight_number: &str,
        flight_date: NaiveDate,
    ) -> Result<Vec<Transition>> {
        let records = self.records.read().await;
        let mut matching: Vec<Transition> = records
            .iter()
            .filter(|r| r.flight_number == flight_number && r.flight_date == flight_date)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.timestamp);
        Ok(matching)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

/// A wrapper that adds tracing to a transition store.
pub struct TracingTransitionStore<S: TransitionStore> {
    inner: S,
}

impl<S: TransitionStore> TracingTransitionStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: TransitionStore> TransitionStore for TracingTransitionStore<S> {
    async fn append(&self, record: &Transition) -> Result<()> {
        tracing::debug!(
            flight_number = %record.flight_number,
            from = ?record.from,
            to = %record.to,
            "Appending transition"
        );
        let result = self.inner.append(record).await;
        if let Err(ref e) = result {
            tracing::debug!(error = %e, "Transition append failed");
        }
        result
    }

    async fn for_flight(
        &self,
        flight_number: &str,
        flight_date: NaiveDate,
    ) -> Result<Vec<Transition>> {
        tracing::debug!(%flight_number, %flight_date, "Reading transitions");
        self.inner.for_flight(flight_number, flight_date).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlightPhase, TransitionKind};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 27).unwrap_or_default()
    }

    fn record(id: u128, number: &str, to: FlightPhase, minute: u32) -> Transition {
        Transition {
            id: Uuid::from_u128(id),
            flight_number: number.to_string(),
            flight_date: day(),
            from: None,
            to,
            timestamp: day().and_hms_opt(10, minute, 0).unwrap_or_default(),
            gate: None,
            delay_minutes: 0,
            aircraft: None,
            kind: TransitionKind::StateTransition,
            note: String::new(),
        }
    }

    #[tokio::test]
    async fn test_append_is_idempotent_on_id() {
        let store = InMemoryTransitionStore::new();
        let row = record(1, "AA1", FlightPhase::Scheduled, 0);

        assert!(store.append(&row).await.is_ok());
        assert!(store.append(&row).await.is_ok());

        assert_eq!(store.count().await.ok(), Some(1));
    }

    #[tokio::test]
    async fn test_for_flight_orders_by_timestamp() {
        let store = InMemoryTransitionStore::new();
        assert!(store.append(&record(2, "AA1", FlightPhase::Boarding, 5)).await.is_ok());
        assert!(store.append(&record(1, "AA1", FlightPhase::Scheduled, 1)).await.is_ok());
        assert!(store.append(&record(3, "UA2", FlightPhase::Scheduled, 0)).await.is_ok());

        let rows = store.for_flight("AA1", day()).await.unwrap_or_default();
        let phases: Vec<_> = rows.iter().map(|r| r.to).collect();
        assert_eq!(phases, vec![FlightPhase::Scheduled, FlightPhase::Boarding]);
    }

    #[tokio::test]
    async fn test_tracing_wrapper_delegates() {
        let store = TracingTransitionStore::new(InMemoryTransitionStore::new());
        assert!(store.append(&record(1, "AA1", FlightPhase::Scheduled, 0)).await.is_ok());
        assert_eq!(store.count().await.ok(), Some(1));
        assert_eq!(store.inner().count().await.ok(), Some(1));
    }
}

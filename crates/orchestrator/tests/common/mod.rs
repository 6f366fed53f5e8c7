//! Shared fixtures for the orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use jetstream_core::OrchestratorConfig;
use jetstream_events::{
    BusRecord, Flight, FlightPhase, InMemoryTransitionStore, TransitionBus, TransitionStore,
};
use jetstream_orchestrator::Orchestrator;
use jetstream_workflow::{InMemoryStorage, JournalStorage};

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 27).unwrap_or_default()
}

/// A demo flight: 1s per phase and 6s in flight under the default config.
pub fn demo_flight(number: &str, origin: &str, destination: &str) -> Flight {
    Flight::new(number, date(), origin, destination)
        .with_gate("A1")
        .with_demo_mode(true)
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub storage: Arc<InMemoryStorage>,
    pub bus: Arc<TransitionBus>,
    pub store: Arc<InMemoryTransitionStore>,
}

impl Harness {
    pub fn new(config: OrchestratorConfig) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = Arc::new(TransitionBus::new());
        let store = InMemoryTransitionStore::new_arc();
        let orchestrator = build(config, &storage, &bus, &store);
        Self {
            orchestrator,
            storage,
            bus,
            store,
        }
    }

    /// A second orchestrator over the same storage, bus and store.
    pub fn sibling(&self, config: OrchestratorConfig) -> Orchestrator {
        build(config, &self.storage, &self.bus, &self.store)
    }

    pub async fn records(&self, flight_number: &str) -> Vec<BusRecord> {
        self.bus.records_for(flight_number).await
    }

    pub async fn states(&self, flight_number: &str) -> Vec<FlightPhase> {
        self.records(flight_number)
            .await
            .into_iter()
            .map(|r| r.event.new_state)
            .collect()
    }

    pub async fn stored(&self, flight_number: &str) -> usize {
        self.store
            .for_flight(flight_number, date())
            .await
            .map(|rows| rows.len())
            .unwrap_or_default()
    }
}

fn build(
    config: OrchestratorConfig,
    storage: &Arc<InMemoryStorage>,
    bus: &Arc<TransitionBus>,
    store: &Arc<InMemoryTransitionStore>,
) -> Orchestrator {
    let storage: Arc<dyn JournalStorage> = Arc::clone(storage) as Arc<dyn JournalStorage>;
    let built = Orchestrator::builder(config)
        .storage(storage)
        .publisher(Arc::clone(bus) as Arc<dyn jetstream_events::TransitionPublisher>)
        .store(Arc::clone(store) as Arc<dyn TransitionStore>)
        .build();
    match built {
        Ok(orchestrator) => orchestrator,
        Err(e) => panic!("orchestrator should build: {e}"),
    }
}

pub fn full_lifecycle() -> Vec<FlightPhase> {
    FlightPhase::LIFECYCLE.to_vec()
}

//! Flight instances driven end to end through the admission API.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, date, demo_flight, full_lifecycle};
use jetstream_core::OrchestratorConfig;
use jetstream_events::{
    Flight, FlightPhase, InMemoryTransitionStore, TransitionBus, TransitionEvent,
    TransitionPublisher, TransitionStore,
};
use jetstream_orchestrator::{Error, Orchestrator, Query, QueryResult, Signal};
use jetstream_workflow::{InstanceId, JournalStorage};
use uuid::Uuid;

async fn sleep_ms(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

#[tokio::test(start_paused = true)]
async fn test_demo_flight_runs_full_lifecycle() {
    // GIVEN: A demo flight with no signals
    let h = Harness::new(OrchestratorConfig::default());
    let started = tokio::time::Instant::now();

    let flight = demo_flight("AA1234", "JFK", "LAX").with_gate("B12");
    let Ok(id) = h.orchestrator.start_flight(flight).await else {
        panic!("flight should start");
    };
    let Ok(done) = h.orchestrator.await_flight(&id).await else {
        panic!("flight should finish");
    };

    // THEN: Six transitions in lifecycle order, each naming its predecessor
    assert_eq!(done.phase, FlightPhase::Completed);
    assert_eq!(done.delay_minutes, 0);
    assert_eq!(done.gate.as_deref(), Some("B12"));
    assert_eq!(h.states("AA1234").await, full_lifecycle());
    let records = h.records("AA1234").await;
    assert_eq!(records.first().map(|r| r.event.previous_state), Some(None));
    for pair in records.windows(2) {
        if let [before, after] = pair {
            assert_eq!(after.event.previous_state, Some(before.event.new_state));
            assert!(after.event.timestamp >= before.event.timestamp);
        }
    }
    assert!(records
        .iter()
        .all(|r| r.event.gate.as_deref() == Some("B12") && r.event.delay == 0));
    assert_eq!(h.stored("AA1234").await, 6);

    // AND: Demo timing compresses the lifecycle to ten seconds
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_announced_delay_is_carried_on_later_events() {
    let h = Harness::new(OrchestratorConfig::default());
    let Ok(id) = h
        .orchestrator
        .start_flight(demo_flight("DL9999", "ATL", "SEA"))
        .await
    else {
        panic!("flight should start");
    };

    // WHEN: A delay is announced while SCHEDULED
    sleep_ms(500).await;
    let signalled = h
        .orchestrator
        .signal(&id, Signal::AnnounceDelay { minutes: 45 })
        .await;
    assert!(signalled.is_ok());

    // THEN: The delay shows in queries and on every later event
    let delay = h.orchestrator.query(&id, Query::DelayMinutes).await;
    let Ok(done) = h.orchestrator.await_flight(&id).await else {
        panic!("flight should finish");
    };
    assert_eq!(done.delay_minutes, 45);
    assert!(matches!(delay, Ok(QueryResult::DelayMinutes(45))));

    let delays: Vec<u32> = h
        .records("DL9999")
        .await
        .into_iter()
        .map(|r| r.event.delay)
        .collect();
    assert_eq!(delays, vec![0, 45, 45, 45, 45, 45]);
}

#[tokio::test(start_paused = true)]
async fn test_query_right_after_signal_reflects_it() {
    let h = Harness::new(OrchestratorConfig::default());
    let flight = demo_flight("DL2000", "ATL", "SEA").with_gate("D5");
    let Ok(id) = h.orchestrator.start_flight(flight).await else {
        panic!("flight should start");
    };
    sleep_ms(500).await;

    // WHEN: Each signal is followed directly by a query
    assert!(h
        .orchestrator
        .signal(&id, Signal::AnnounceDelay { minutes: 45 })
        .await
        .is_ok());
    let delay = h.orchestrator.query(&id, Query::DelayMinutes).await;
    assert!(matches!(delay, Ok(QueryResult::DelayMinutes(45))));

    assert!(h
        .orchestrator
        .signal(
            &id,
            Signal::ChangeGate {
                gate: "D15".to_string()
            }
        )
        .await
        .is_ok());
    let details = h.orchestrator.query(&id, Query::FlightDetails).await;
    let Ok(QueryResult::Flight(flight)) = details else {
        panic!("expected flight details");
    };

    // THEN: Both are visible while the flight is still SCHEDULED
    assert_eq!(flight.gate.as_deref(), Some("D15"));
    assert_eq!(flight.delay_minutes, 45);
    assert_eq!(flight.phase, FlightPhase::Scheduled);
}

#[tokio::test(start_paused = true)]
async fn test_latest_delay_wins() {
    let h = Harness::new(OrchestratorConfig::default());
    let Ok(id) = h
        .orchestrator
        .start_flight(demo_flight("DL1000", "ATL", "SEA"))
        .await
    else {
        panic!("flight should start");
    };

    sleep_ms(500).await;
    assert!(h
        .orchestrator
        .signal(&id, Signal::AnnounceDelay { minutes: 30 })
        .await
        .is_ok());
    assert!(h
        .orchestrator
        .signal(&id, Signal::AnnounceDelay { minutes: 10 })
        .await
        .is_ok());

    let done = h.orchestrator.await_flight(&id).await.map(|f| f.delay_minutes);
    assert_eq!(done.ok(), Some(10));
}

#[tokio::test(start_paused = true)]
async fn test_gate_change_applies_from_next_transition() {
    let h = Harness::new(OrchestratorConfig::default());
    let flight = demo_flight("SW1111", "DAL", "HOU").with_gate("D5");
    let Ok(id) = h.orchestrator.start_flight(flight).await else {
        panic!("flight should start");
    };

    // WHEN: The gate changes while DEPARTED
    sleep_ms(2_500).await;
    let phase = h.orchestrator.query(&id, Query::CurrentPhase).await;
    assert!(matches!(phase, Ok(QueryResult::Phase(FlightPhase::Departed))));
    assert!(h
        .orchestrator
        .signal(
            &id,
            Signal::ChangeGate {
                gate: "D15".to_string()
            }
        )
        .await
        .is_ok());

    let Ok(done) = h.orchestrator.await_flight(&id).await else {
        panic!("flight should finish");
    };

    // THEN: Events up to DEPARTED keep D5; later ones carry D15
    assert_eq!(done.gate.as_deref(), Some("D15"));
    let gates: Vec<Option<String>> = h
        .records("SW1111")
        .await
        .into_iter()
        .map(|r| r.event.gate)
        .collect();
    let d5 = Some("D5".to_string());
    let d15 = Some("D15".to_string());
    assert_eq!(
        gates,
        vec![d5.clone(), d5.clone(), d5, d15.clone(), d15.clone(), d15]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_boarding() {
    let h = Harness::new(OrchestratorConfig::default());
    let Ok(id) = h
        .orchestrator
        .start_flight(demo_flight("BA7777", "LHR", "JFK"))
        .await
    else {
        panic!("flight should start");
    };

    sleep_ms(1_500).await;
    assert!(h
        .orchestrator
        .signal(
            &id,
            Signal::CancelFlight {
                reason: "Weather".to_string()
            }
        )
        .await
        .is_ok());

    let Ok(done) = h.orchestrator.await_flight(&id).await else {
        panic!("flight should finish");
    };
    assert_eq!(done.phase, FlightPhase::Cancelled);
    assert_eq!(
        h.states("BA7777").await,
        vec![
            FlightPhase::Scheduled,
            FlightPhase::Boarding,
            FlightPhase::Cancelled
        ]
    );

    let snapshot = h.orchestrator.flight_snapshot(&id).await;
    assert_eq!(
        snapshot.ok().and_then(|s| s.cancellation_reason),
        Some("Weather".to_string())
    );
    let rows = h.store.for_flight("BA7777", date()).await.unwrap_or_default();
    assert_eq!(
        rows.last().map(|r| r.note.as_str()),
        Some("Flight cancelled: Weather")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_timer_fires() {
    let h = Harness::new(OrchestratorConfig::default());
    let Ok(id) = h
        .orchestrator
        .start_flight(demo_flight("BA8888", "LHR", "JFK"))
        .await
    else {
        panic!("flight should start");
    };

    // WHEN: The cancellation arrives before SCHEDULED has elapsed
    assert!(h
        .orchestrator
        .signal(
            &id,
            Signal::CancelFlight {
                reason: "Weather".to_string()
            }
        )
        .await
        .is_ok());
    let Ok(latched) = h.orchestrator.flight_snapshot(&id).await else {
        panic!("flight should be queryable");
    };
    assert!(latched.cancelled);
    assert_eq!(latched.flight.phase, FlightPhase::Scheduled);

    let Ok(done) = h.orchestrator.await_flight(&id).await else {
        panic!("flight should finish");
    };

    // THEN: The only edges are the initial entry and SCHEDULED to CANCELLED
    assert_eq!(done.phase, FlightPhase::Cancelled);
    let edges: Vec<(Option<FlightPhase>, FlightPhase)> = h
        .records("BA8888")
        .await
        .into_iter()
        .map(|r| (r.event.previous_state, r.event.new_state))
        .collect();
    assert_eq!(
        edges,
        vec![
            (None, FlightPhase::Scheduled),
            (Some(FlightPhase::Scheduled), FlightPhase::Cancelled),
        ]
    );
    assert_eq!(h.stored("BA8888").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_signal_after_completion_is_terminal() {
    let h = Harness::new(OrchestratorConfig::default());
    let Ok(id) = h
        .orchestrator
        .start_flight(demo_flight("AA1", "JFK", "BOS"))
        .await
    else {
        panic!("flight should start");
    };
    assert!(h.orchestrator.await_flight(&id).await.is_ok());

    let result = h
        .orchestrator
        .signal(
            &id,
            Signal::ChangeGate {
                gate: "B2".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Terminal(_))));

    // AND: The finished instance stays queryable
    let phase = h.orchestrator.query(&id, Query::CurrentPhase).await;
    assert!(matches!(phase, Ok(QueryResult::Phase(FlightPhase::Completed))));
}

#[tokio::test(start_paused = true)]
async fn test_prune_forgets_only_finished_flights() {
    let h = Harness::new(OrchestratorConfig::default());
    let Ok(done) = h
        .orchestrator
        .start_flight(demo_flight("AA20", "JFK", "BOS"))
        .await
    else {
        panic!("flight should start");
    };
    assert!(h.orchestrator.await_flight(&done).await.is_ok());
    let Ok(running) = h
        .orchestrator
        .start_flight(demo_flight("AA21", "JFK", "BOS"))
        .await
    else {
        panic!("flight should start");
    };

    assert_eq!(h.orchestrator.prune_finished().await, 1);

    let gone = h.orchestrator.query(&done, Query::CurrentPhase).await;
    assert!(matches!(gone, Err(Error::InstanceNotFound(_))));
    let live = h.orchestrator.query(&running, Query::CurrentPhase).await;
    assert!(matches!(live, Ok(QueryResult::Phase(FlightPhase::Scheduled))));

    // AND: Recovery registers the pruned flight again from its journal
    assert_eq!(h.orchestrator.recover().await.ok(), Some(0));
    let back = h.orchestrator.query(&done, Query::CurrentPhase).await;
    assert!(matches!(back, Ok(QueryResult::Phase(FlightPhase::Completed))));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_start_rejected_until_finished() {
    let h = Harness::new(OrchestratorConfig::default());
    let flight = demo_flight("AA2", "JFK", "BOS");

    let Ok(id) = h.orchestrator.start_flight(flight.clone()).await else {
        panic!("flight should start");
    };
    let second = h.orchestrator.start_flight(flight.clone()).await;
    assert!(matches!(second, Err(Error::InstanceAlreadyRunning(_))));

    assert!(h.orchestrator.await_flight(&id).await.is_ok());
    let rerun = h.orchestrator.start_flight(flight).await;
    assert_eq!(rerun.ok(), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_instance_and_bad_arguments() {
    let h = Harness::new(OrchestratorConfig::default());
    let missing = InstanceId::flight("ZZ9", date());

    let signal = h
        .orchestrator
        .signal(&missing, Signal::AnnounceDelay { minutes: 5 })
        .await;
    assert!(matches!(signal, Err(Error::InstanceNotFound(_))));
    let query = h.orchestrator.query(&missing, Query::CurrentPhase).await;
    assert!(matches!(query, Err(Error::InstanceNotFound(_))));

    let Ok(id) = h
        .orchestrator
        .start_flight(demo_flight("AA3", "JFK", "BOS"))
        .await
    else {
        panic!("flight should start");
    };
    let zero = h
        .orchestrator
        .signal(&id, Signal::AnnounceDelay { minutes: 0 })
        .await;
    assert!(matches!(zero, Err(Error::InvalidArgument(_))));
    let wrong_kind = h
        .orchestrator
        .signal(
            &id,
            Signal::CancelJourney {
                reason: "Wx".to_string(),
            },
        )
        .await;
    assert!(matches!(wrong_kind, Err(Error::InvalidArgument(_))));
    let wrong_query = h.orchestrator.query(&id, Query::CurrentLegIndex).await;
    assert!(matches!(wrong_query, Err(Error::InvalidArgument(_))));

    let incomplete = Flight::new("", date(), "JFK", "BOS");
    let invalid = h.orchestrator.start_flight(incomplete).await;
    assert!(matches!(invalid, Err(Error::InvalidFlight(_))));
}

#[tokio::test(start_paused = true)]
async fn test_active_flights_lists_running_instances() {
    let h = Harness::new(OrchestratorConfig::default());
    assert!(h
        .orchestrator
        .start_flight(demo_flight("AA10", "JFK", "BOS"))
        .await
        .is_ok());
    assert!(h
        .orchestrator
        .start_flight(demo_flight("AA11", "JFK", "BOS"))
        .await
        .is_ok());

    sleep_ms(500).await;
    let active: Vec<String> = h
        .orchestrator
        .active_flights()
        .await
        .into_iter()
        .map(|(_, snapshot)| snapshot.flight.flight_number)
        .collect();
    assert_eq!(active, vec!["AA10".to_string(), "AA11".to_string()]);

    sleep_ms(15_000).await;
    assert!(h.orchestrator.active_flights().await.is_empty());
}

/// Publisher that fails its first `failures` calls.
struct FlakyPublisher {
    bus: TransitionBus,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyPublisher {
    fn new(failures: u32) -> Self {
        Self {
            bus: TransitionBus::new(),
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TransitionPublisher for FlakyPublisher {
    async fn publish(&self, key: Uuid, event: &TransitionEvent) -> jetstream_events::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(jetstream_events::Error::PublishFailed {
                reason: "broker unavailable".to_string(),
            });
        }
        self.bus.publish(key, event).await
    }
}

fn with_publisher(publisher: Arc<FlakyPublisher>, store: Arc<InMemoryTransitionStore>) -> Orchestrator {
    let built = Orchestrator::builder(OrchestratorConfig::default())
        .publisher(publisher as Arc<dyn TransitionPublisher>)
        .store(store as Arc<dyn TransitionStore>)
        .build();
    match built {
        Ok(orchestrator) => orchestrator,
        Err(e) => panic!("orchestrator should build: {e}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_publish_failures_are_retried() {
    let publisher = Arc::new(FlakyPublisher::new(2));
    let store = InMemoryTransitionStore::new_arc();
    let orchestrator = with_publisher(Arc::clone(&publisher), Arc::clone(&store));

    let Ok(id) = orchestrator
        .start_flight(demo_flight("UA5", "SFO", "ORD"))
        .await
    else {
        panic!("flight should start");
    };
    let done = orchestrator.await_flight(&id).await.map(|f| f.phase);

    assert_eq!(done.ok(), Some(FlightPhase::Completed));
    assert_eq!(publisher.bus.records().await.len(), 6);
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 8);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_publish_does_not_stall_flight() {
    let publisher = Arc::new(FlakyPublisher::new(u32::MAX));
    let store = InMemoryTransitionStore::new_arc();
    let orchestrator = with_publisher(Arc::clone(&publisher), Arc::clone(&store));

    let Ok(id) = orchestrator
        .start_flight(demo_flight("UA6", "SFO", "ORD"))
        .await
    else {
        panic!("flight should start");
    };
    let done = orchestrator.await_flight(&id).await.map(|f| f.phase);

    // THEN: Every publish gave up, yet the history was still persisted
    assert_eq!(done.ok(), Some(FlightPhase::Completed));
    assert!(publisher.bus.records().await.is_empty());
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 30);
    assert_eq!(store.count().await.ok(), Some(6));
}

/// Journal storage whose appends can be switched off.
struct BrokenAppends {
    inner: jetstream_workflow::InMemoryStorage,
}

#[async_trait]
impl JournalStorage for BrokenAppends {
    async fn create(
        &self,
        id: &InstanceId,
        started: jetstream_workflow::JournalEntry,
    ) -> jetstream_workflow::Result<()> {
        self.inner.create(id, started).await
    }

    async fn append(
        &self,
        _id: &InstanceId,
        _entry: jetstream_workflow::JournalEntry,
    ) -> jetstream_workflow::Result<()> {
        Err(jetstream_workflow::Error::storage_failed("append", "disk full"))
    }

    async fn load(&self, id: &InstanceId) -> jetstream_workflow::Result<jetstream_workflow::Journal> {
        self.inner.load(id).await
    }

    async fn instances(&self) -> jetstream_workflow::Result<Vec<InstanceId>> {
        self.inner.instances().await
    }

    async fn enqueue_signal(
        &self,
        id: &InstanceId,
        payload: serde_json::Value,
    ) -> jetstream_workflow::Result<u64> {
        self.inner.enqueue_signal(id, payload).await
    }

    async fn signals_after(
        &self,
        id: &InstanceId,
        after: u64,
    ) -> jetstream_workflow::Result<Vec<jetstream_workflow::QueuedSignal>> {
        self.inner.signals_after(id, after).await
    }

    async fn discard_signals(&self, id: &InstanceId, through: u64) -> jetstream_workflow::Result<()> {
        self.inner.discard_signals(id, through).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_journal_failure_halts_instance() {
    let storage = Arc::new(BrokenAppends {
        inner: jetstream_workflow::InMemoryStorage::new(),
    });
    let built = Orchestrator::builder(OrchestratorConfig::default())
        .storage(storage as Arc<dyn JournalStorage>)
        .build();
    let Ok(orchestrator) = built else {
        panic!("orchestrator should build");
    };

    let Ok(id) = orchestrator
        .start_flight(demo_flight("AA404", "JFK", "BOS"))
        .await
    else {
        panic!("flight should start");
    };
    let result = orchestrator.await_flight(&id).await;
    assert!(matches!(result, Err(Error::ExecutionFailed { .. })));

    // AND: A halted instance accepts no more signals
    let signal = orchestrator
        .signal(&id, Signal::AnnounceDelay { minutes: 5 })
        .await;
    assert!(matches!(signal, Err(Error::Terminal(_))));
}

//! Flight driver: runs a [`FlightMachine`] over a [`FlightRuntime`].
//!
//! The driver owns the loop between suspension points. It feeds timer
//! fires and signals into the machine, stamps emitted transitions with
//! logical time and a deterministic id, and hands them to the runtime's
//! publish and persist effects.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use jetstream_events::{Flight, Transition, TransitionPublisher, TransitionStore};
use jetstream_workflow::{
    DurableContext, EffectError, EffectFailure, ProjectionWriter, TimerHandle, Wake,
};

use super::machine::{FlightAction, FlightInput, FlightMachine, FlightSignal, FlightSnapshot, TransitionDraft};
use super::timing::format_duration;
use crate::error::Result;

/// Effect name of the bus publication.
pub const PUBLISH_TRANSITION: &str = "publish_transition";
/// Effect name of the store append.
pub const PERSIST_TRANSITION: &str = "persist_transition";

/// Capabilities a flight body may use.
///
/// Every source of time, randomness or I/O goes through this trait, so a
/// body driven by the durable implementation replays deterministically and
/// one driven by a test recorder needs no clock at all.
#[async_trait]
pub trait FlightRuntime: Send {
    /// Armed timer.
    type Timer: Send + Sync;

    /// True while re-executing already journaled steps.
    fn is_replaying(&self) -> bool;

    /// Highest signal arrival number handed to the body so far.
    fn delivered_through(&self) -> u64;

    /// Logical clock.
    async fn now(&mut self) -> Result<DateTime<Utc>>;

    /// Deterministic random UUID.
    fn new_uuid(&mut self) -> Uuid;

    /// Take every signal accepted since the last delivery.
    async fn drain_signals(&mut self) -> Result<Vec<FlightSignal>>;

    /// Arm a timer.
    async fn start_timer(&mut self, duration: Duration) -> Result<Self::Timer>;

    /// Wait for `timer`, waking early when signals arrive.
    async fn wait_timer(&mut self, timer: &Self::Timer) -> Result<Wake<FlightSignal, ()>>;

    /// Publish a transition to the event bus.
    async fn publish_transition(
        &mut self,
        transition: &Transition,
    ) -> Result<std::result::Result<(), EffectFailure>>;

    /// Append a transition to the history store.
    async fn persist_transition(
        &mut self,
        transition: &Transition,
    ) -> Result<std::result::Result<(), EffectFailure>>;
}

/// Run `machine` to a terminal phase.
///
/// The projection is refreshed after every step so queries see signals as
/// soon as they are delivered. Each refresh carries the runtime's delivery
/// mark, which is what a signal sender waits on.
///
/// # Errors
///
/// Returns runtime failures (journal unavailable, nondeterministic replay).
/// Effect failures are logged and ignored.
pub async fn run_flight<R: FlightRuntime>(
    runtime: &mut R,
    mut machine: FlightMachine,
    projection: &ProjectionWriter<FlightSnapshot>,
) -> Result<Flight> {
    let early = runtime.drain_signals().await?;
    machine.step(FlightInput::Signals(early));
    refresh(runtime, &machine, projection);

    if !runtime.is_replaying() {
        info!(flight_number = %machine.flight().flight_number, "Starting flight");
    }

    let mut pending: VecDeque<FlightAction> = machine.step(FlightInput::Start).into();
    while let Some(action) = pending.pop_front() {
        match action {
            FlightAction::Emit(draft) => {
                emit(runtime, machine.flight(), draft).await?;
                refresh(runtime, &machine, projection);
            }
            FlightAction::Sleep(duration) => {
                if !runtime.is_replaying() {
                    info!(
                        flight_number = %machine.flight().flight_number,
                        phase = %machine.phase(),
                        sleep = %format_duration(duration),
                        "Flight sleeping"
                    );
                }
                sleep(runtime, &mut machine, projection, duration).await?;
                pending.extend(machine.step(FlightInput::TimerFired));
            }
            FlightAction::Finish(flight) => {
                refresh(runtime, &machine, projection);
                if !runtime.is_replaying() {
                    info!(
                        flight_number = %flight.flight_number,
                        phase = %flight.phase,
                        delay = flight.delay_minutes,
                        "Flight finished"
                    );
                }
                return Ok(flight);
            }
        }
    }

    Ok(machine.flight().clone())
}

async fn sleep<R: FlightRuntime>(
    runtime: &mut R,
    machine: &mut FlightMachine,
    projection: &ProjectionWriter<FlightSnapshot>,
    duration: Duration,
) -> Result<()> {
    let timer = runtime.start_timer(duration).await?;
    while let Wake::Signals(signals) = runtime.wait_timer(&timer).await? {
        if !runtime.is_replaying() {
            debug!(
                flight_number = %machine.flight().flight_number,
                count = signals.len(),
                "Signals delivered"
            );
        }
        machine.step(FlightInput::Signals(signals));
        refresh(runtime, machine, projection);
    }
    let late = runtime.drain_signals().await?;
    machine.step(FlightInput::Signals(late));
    refresh(runtime, machine, projection);
    Ok(())
}

fn refresh<R: FlightRuntime>(
    runtime: &R,
    machine: &FlightMachine,
    projection: &ProjectionWriter<FlightSnapshot>,
) {
    projection.publish(machine.snapshot(), runtime.delivered_through());
}

async fn emit<R: FlightRuntime>(runtime: &mut R, flight: &Flight, draft: TransitionDraft) -> Result<()> {
    let now = runtime.now().await?;
    let transition = Transition {
        id: runtime.new_uuid(),
        flight_number: flight.flight_number.clone(),
        flight_date: flight.flight_date,
        from: draft.from,
        to: draft.to,
        timestamp: now.naive_utc(),
        gate: draft.gate,
        delay_minutes: draft.delay_minutes,
        aircraft: draft.aircraft,
        kind: draft.kind,
        note: draft.note,
    };

    if !runtime.is_replaying() {
        info!(
            flight_number = %transition.flight_number,
            from = ?transition.from,
            to = %transition.to,
            gate = ?transition.gate,
            delay = transition.delay_minutes,
            "Flight transition"
        );
    }

    if let Err(failure) = runtime.publish_transition(&transition).await? {
        warn!(
            flight_number = %transition.flight_number,
            to = %transition.to,
            error = %failure,
            "Could not publish transition; continuing"
        );
    }
    if let Err(failure) = runtime.persist_transition(&transition).await? {
        warn!(
            flight_number = %transition.flight_number,
            to = %transition.to,
            error = %failure,
            "Could not persist transition; continuing"
        );
    }
    Ok(())
}

/// [`FlightRuntime`] over a durable context.
pub struct DurableFlightRuntime {
    ctx: DurableContext<FlightSignal>,
    publisher: Arc<dyn TransitionPublisher>,
    store: Arc<dyn TransitionStore>,
}

impl DurableFlightRuntime {
    pub fn new(
        ctx: DurableContext<FlightSignal>,
        publisher: Arc<dyn TransitionPublisher>,
        store: Arc<dyn TransitionStore>,
    ) -> Self {
        Self {
            ctx,
            publisher,
            store,
        }
    }

    /// Record the final snapshot in the journal.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal cannot be written.
    pub async fn complete(&mut self, snapshot: &FlightSnapshot) -> Result<()> {
        Ok(self.ctx.complete(snapshot).await?)
    }
}

#[async_trait]
impl FlightRuntime for DurableFlightRuntime {
    type Timer = TimerHandle;

    fn is_replaying(&self) -> bool {
        self.ctx.is_replaying()
    }

    fn delivered_through(&self) -> u64 {
        self.ctx.delivered_through()
    }

    async fn now(&mut self) -> Result<DateTime<Utc>> {
        Ok(self.ctx.now().await?)
    }

    fn new_uuid(&mut self) -> Uuid {
        self.ctx.new_uuid()
    }

    async fn drain_signals(&mut self) -> Result<Vec<FlightSignal>> {
        Ok(self.ctx.drain_signals().await?)
    }

    async fn start_timer(&mut self, duration: Duration) -> Result<TimerHandle> {
        Ok(self.ctx.start_timer(duration).await?)
    }

    async fn wait_timer(&mut self, timer: &TimerHandle) -> Result<Wake<FlightSignal, ()>> {
        Ok(self.ctx.wait_timer(timer).await?)
    }

    async fn publish_transition(
        &mut self,
        transition: &Transition,
    ) -> Result<std::result::Result<(), EffectFailure>> {
        let publisher = Arc::clone(&self.publisher);
        let event = transition.to_event();
        let outcome = self
            .ctx
            .call_effect(PUBLISH_TRANSITION, move |call| {
                let publisher = Arc::clone(&publisher);
                let event = event.clone();
                async move {
                    publisher
                        .publish(call.key, &event)
                        .await
                        .map_err(|e| EffectError::transient(e.to_string()))
                }
            })
            .await?;
        Ok(outcome)
    }

    async fn persist_transition(
        &mut self,
        transition: &Transition,
    ) -> Result<std::result::Result<(), EffectFailure>> {
        let store = Arc::clone(&self.store);
        let record = transition.clone();
        let outcome = self
            .ctx
            .call_effect(PERSIST_TRANSITION, move |_| {
                let store = Arc::clone(&store);
                let record = record.clone();
                async move {
                    store
                        .append(&record)
                        .await
                        .map_err(|e| EffectError::transient(e.to_string()))
                }
            })
            .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::timing::PhaseSchedule;
    use chrono::{NaiveDate, TimeDelta};
    use jetstream_events::FlightPhase;
    use jetstream_workflow::projection_channel;

    /// In-memory runtime: timers fire instantly, signals are scripted per
    /// timer, effects are recorded.
    struct RecordingRuntime {
        clock: DateTime<Utc>,
        ids: u128,
        scripted: VecDeque<Vec<FlightSignal>>,
        delivered: u64,
        published: Vec<Transition>,
        persisted: Vec<Transition>,
        fail_publish: bool,
    }

    impl RecordingRuntime {
        fn new(scripted: Vec<Vec<FlightSignal>>) -> Self {
            Self {
                clock: DateTime::<Utc>::UNIX_EPOCH,
                ids: 0,
                scripted: scripted.into(),
                delivered: 0,
                published: Vec::new(),
                persisted: Vec::new(),
                fail_publish: false,
            }
        }
    }

    #[async_trait]
    impl FlightRuntime for RecordingRuntime {
        type Timer = Duration;

        fn is_replaying(&self) -> bool {
            false
        }

        fn delivered_through(&self) -> u64 {
            self.delivered
        }

        async fn now(&mut self) -> Result<DateTime<Utc>> {
            Ok(self.clock)
        }

        fn new_uuid(&mut self) -> Uuid {
            self.ids = self.ids.saturating_add(1);
            Uuid::from_u128(self.ids)
        }

        async fn drain_signals(&mut self) -> Result<Vec<FlightSignal>> {
            Ok(Vec::new())
        }

        async fn start_timer(&mut self, duration: Duration) -> Result<Duration> {
            Ok(duration)
        }

        async fn wait_timer(&mut self, timer: &Duration) -> Result<Wake<FlightSignal, ()>> {
            if let Some(batch) = self.scripted.pop_front() {
                if !batch.is_empty() {
                    self.delivered = self.delivered.saturating_add(batch.len() as u64);
                    return Ok(Wake::Signals(batch));
                }
            }
            let delta = TimeDelta::from_std(*timer).unwrap_or_default();
            self.clock = self.clock.checked_add_signed(delta).unwrap_or(self.clock);
            Ok(Wake::Ready(()))
        }

        async fn publish_transition(
            &mut self,
            transition: &Transition,
        ) -> Result<std::result::Result<(), EffectFailure>> {
            if self.fail_publish {
                return Ok(Err(EffectFailure {
                    attempts: 5,
                    reason: "broker unavailable".to_string(),
                }));
            }
            self.published.push(transition.clone());
            Ok(Ok(()))
        }

        async fn persist_transition(
            &mut self,
            transition: &Transition,
        ) -> Result<std::result::Result<(), EffectFailure>> {
            self.persisted.push(transition.clone());
            Ok(Ok(()))
        }
    }

    fn machine() -> FlightMachine {
        let date = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap_or_default();
        let flight = Flight::new("SW1111", date, "DAL", "HOU").with_gate("D5");
        FlightMachine::new(flight, PhaseSchedule::uniform(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_gate_change_during_departed() {
        // Wakes: scheduled, boarding, departed (gate change), ...
        let mut runtime = RecordingRuntime::new(vec![
            Vec::new(),
            Vec::new(),
            vec![FlightSignal::ChangeGate {
                gate: "D15".to_string(),
            }],
        ]);
        let (writer, reader) = projection_channel(FlightSnapshot::new(machine().flight().clone()));

        let result = run_flight(&mut runtime, machine(), &writer).await;

        let Ok(flight) = result else {
            panic!("flight did not finish");
        };
        assert_eq!(flight.phase, FlightPhase::Completed);
        assert_eq!(flight.gate.as_deref(), Some("D15"));
        let gates: Vec<_> = runtime
            .published
            .iter()
            .map(|t| (t.to, t.gate.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            gates,
            vec![
                (FlightPhase::Scheduled, "D5".to_string()),
                (FlightPhase::Boarding, "D5".to_string()),
                (FlightPhase::Departed, "D5".to_string()),
                (FlightPhase::InFlight, "D15".to_string()),
                (FlightPhase::Landed, "D15".to_string()),
                (FlightPhase::Completed, "D15".to_string()),
            ]
        );
        assert_eq!(reader.projection().flight.gate.as_deref(), Some("D15"));
        assert_eq!(reader.snapshot().delivered_through, 1);
    }

    #[tokio::test]
    async fn test_transitions_stamped_with_logical_time() {
        let mut runtime = RecordingRuntime::new(Vec::new());
        let (writer, _reader) = projection_channel(FlightSnapshot::new(machine().flight().clone()));

        assert!(run_flight(&mut runtime, machine(), &writer).await.is_ok());

        let offsets: Vec<i64> = runtime
            .persisted
            .iter()
            .map(|t| {
                t.timestamp
                    .signed_duration_since(DateTime::<Utc>::UNIX_EPOCH.naive_utc())
                    .num_seconds()
            })
            .collect();
        assert_eq!(offsets, vec![0, 60, 120, 180, 240, 300]);
        let ids: Vec<Uuid> = runtime.persisted.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 6);
        assert!(ids.windows(2).all(|w| w.first() != w.get(1)));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stall_flight() {
        let mut runtime = RecordingRuntime::new(Vec::new());
        runtime.fail_publish = true;
        let (writer, _reader) = projection_channel(FlightSnapshot::new(machine().flight().clone()));

        let result = run_flight(&mut runtime, machine(), &writer).await;

        assert_eq!(result.ok().map(|f| f.phase), Some(FlightPhase::Completed));
        assert!(runtime.published.is_empty());
        assert_eq!(runtime.persisted.len(), 6);
    }

    #[tokio::test]
    async fn test_cancel_acted_on_at_timer() {
        let mut runtime = RecordingRuntime::new(vec![
            Vec::new(),
            vec![FlightSignal::Cancel {
                reason: "Mechanical".to_string(),
            }],
        ]);
        let (writer, reader) = projection_channel(FlightSnapshot::new(machine().flight().clone()));

        let result = run_flight(&mut runtime, machine(), &writer).await;

        assert_eq!(result.ok().map(|f| f.phase), Some(FlightPhase::Cancelled));
        let last = runtime.published.last().map(|t| (t.from, t.to));
        assert_eq!(last, Some((Some(FlightPhase::Boarding), FlightPhase::Cancelled)));
        let snapshot = reader.projection();
        assert!(snapshot.cancelled);
        assert_eq!(snapshot.cancellation_reason.as_deref(), Some("Mechanical"));
    }
}

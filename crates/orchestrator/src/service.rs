//! Admission API.
//!
//! [`Orchestrator`] starts flights and journeys, routes signals and queries
//! to live instances, and recovers unfinished instances from the journal
//! after a worker restart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use itertools::Itertools;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jetstream_core::OrchestratorConfig;
use jetstream_events::{
    Flight, InMemoryTransitionStore, TransitionBus, TransitionPublisher, TransitionStore,
};
use jetstream_workflow::{
    ContextParts, Dispatcher, DurableContext, EffectError, Execution, ExecutionStatus,
    InMemoryStorage, InstanceId, InstanceKind, InstanceRegistry, Journal, JournalEntry,
    JournalStorage, Mailbox, ParentRef, ProjectionReader, RunId, TimerService,
    TokioTimerService, projection_channel,
};

use crate::error::{Error, Result};
use crate::flight::{
    DurableFlightRuntime, FlightMachine, FlightSignal, FlightSnapshot, PhaseSchedule, run_flight,
};
use crate::journey::{
    DurableJourneyRuntime, JourneyOptions, JourneySignal, JourneyStatus, LegLauncher, leg_id,
    run_journey,
};
use crate::query::{Query, QueryResult, Routed, Signal};

/// Handle of one run held by the registry.
pub(crate) struct InstanceHandle<S, P> {
    run_id: RunId,
    parent: Option<ParentRef>,
    mailbox: Mailbox<S>,
    reader: ProjectionReader<P>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<S, P: Clone> Clone for InstanceHandle<S, P> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id,
            parent: self.parent.clone(),
            mailbox: self.mailbox.clone(),
            reader: self.reader.clone(),
            task: Arc::clone(&self.task),
        }
    }
}

impl<S, P> Execution for InstanceHandle<S, P>
where
    S: Send + Sync,
    P: Clone + Send + Sync,
{
    fn run_id(&self) -> RunId {
        self.run_id
    }

    fn status(&self) -> ExecutionStatus {
        self.reader.status()
    }
}

impl<S, P> InstanceHandle<S, P> {
    /// Stop the run's task and wait until it is gone.
    async fn abort(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

type FlightHandle = InstanceHandle<FlightSignal, FlightSnapshot>;
type JourneyHandle = InstanceHandle<JourneySignal, JourneyStatus>;

struct Inner {
    config: OrchestratorConfig,
    storage: Arc<dyn JournalStorage>,
    timers: Arc<dyn TimerService>,
    publisher: Arc<dyn TransitionPublisher>,
    store: Arc<dyn TransitionStore>,
    flights: Arc<InstanceRegistry<FlightHandle>>,
    journeys: InstanceRegistry<JourneyHandle>,
}

/// Builder for [`Orchestrator`]; every collaborator defaults to its
/// in-memory implementation.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    storage: Option<Arc<dyn JournalStorage>>,
    timers: Option<Arc<dyn TimerService>>,
    publisher: Option<Arc<dyn TransitionPublisher>>,
    store: Option<Arc<dyn TransitionStore>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn JournalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn timers(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn TransitionPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn TransitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and build.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        let inner = Inner {
            config: self.config,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(InMemoryStorage::new())),
            timers: self
                .timers
                .unwrap_or_else(|| Arc::new(TokioTimerService::new())),
            publisher: self
                .publisher
                .unwrap_or_else(|| Arc::new(TransitionBus::new())),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryTransitionStore::new())),
            flights: Arc::new(InstanceRegistry::new()),
            journeys: InstanceRegistry::new(),
        };
        Ok(Orchestrator {
            inner: Arc::new(inner),
        })
    }
}

/// Entry point for starting, signalling and querying instances.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            storage: None,
            timers: None,
            publisher: None,
            store: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Start a flight instance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFlight` for an incomplete payload and
    /// `InstanceAlreadyRunning` if the flight is live.
    pub async fn start_flight(&self, flight: Flight) -> Result<InstanceId> {
        flight.validate()?;
        let id = InstanceId::flight(&flight.flight_number, flight.flight_date);
        self.inner.start_flight(&id, flight, None).await?;
        info!(instance_id = %id, "Flight started");
        Ok(id)
    }

    /// Start a journey over `legs`, executed in order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or malformed journey,
    /// `InvalidFlight` for a bad leg, and `InstanceAlreadyRunning` if the
    /// journey is live.
    pub async fn start_journey(&self, journey_id: &str, legs: Vec<Flight>) -> Result<InstanceId> {
        if journey_id.trim().is_empty() || journey_id.chars().any(char::is_whitespace) {
            return Err(Error::invalid_argument(
                "journey id must be non-empty without whitespace",
            ));
        }
        if legs.is_empty() {
            return Err(Error::invalid_argument("journey needs at least one leg"));
        }
        for leg in &legs {
            leg.validate()?;
        }
        if let Some(dup) = legs.iter().map(leg_id).duplicates().next() {
            return Err(Error::invalid_argument(format!(
                "leg {dup} appears more than once"
            )));
        }

        let id = InstanceId::journey(journey_id);
        let status = JourneyStatus::new(journey_id, legs);
        let run_id = RunId::new();
        let inner = &self.inner;
        inner
            .journeys
            .start(&id, || async {
                let journal = inner
                    .begin(&id, run_id, InstanceKind::Journey, &status, None)
                    .await?;
                inner.spawn_journey(&id, run_id, &journal, status.clone())
            })
            .await?;
        info!(instance_id = %id, legs = status.legs.len(), "Journey started");
        Ok(id)
    }

    /// Deliver a signal to an instance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for bad arguments or a signal of the wrong
    /// kind, `InstanceNotFound`, or `Terminal` if the instance has finished.
    ///
    /// Resolves once the instance has folded the signal into its projection,
    /// so a query issued afterwards reflects it.
    pub async fn signal(&self, id: &InstanceId, signal: Signal) -> Result<()> {
        if signal.target() != id.kind() {
            return Err(Error::invalid_argument(format!(
                "signal {signal:?} does not apply to {id}"
            )));
        }
        match signal.route()? {
            Routed::Flight(signal) => {
                let handle = self.inner.flights.get(id).await?;
                deliver(id, &handle, &signal).await
            }
            Routed::Journey(signal) => {
                let handle = self.inner.journeys.get(id).await?;
                deliver(id, &handle, &signal).await
            }
        }
    }

    /// Read an instance's projection.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound`, or `InvalidArgument` if the query does not
    /// apply to the instance kind.
    pub async fn query(&self, id: &InstanceId, query: Query) -> Result<QueryResult> {
        if query.target() != id.kind() {
            return Err(Error::invalid_argument(format!(
                "query {query:?} does not apply to {id}"
            )));
        }
        match id.kind() {
            InstanceKind::Flight => {
                let handle = self.inner.flights.get(id).await?;
                query.answer_flight(handle.reader.projection())
            }
            InstanceKind::Journey => {
                let handle = self.inner.journeys.get(id).await?;
                query.answer_journey(handle.reader.projection())
            }
        }
    }

    /// Current projection of a flight, including the cancel latch.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` if no such flight is registered.
    pub async fn flight_snapshot(&self, id: &InstanceId) -> Result<FlightSnapshot> {
        Ok(self.inner.flights.get(id).await?.reader.projection())
    }

    /// Current projection of a journey.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` if no such journey is registered.
    pub async fn journey_status(&self, id: &InstanceId) -> Result<JourneyStatus> {
        Ok(self.inner.journeys.get(id).await?.reader.projection())
    }

    /// Wait for a flight to reach a terminal phase.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound`, or `ExecutionFailed` if the run halted.
    pub async fn await_flight(&self, id: &InstanceId) -> Result<Flight> {
        self.inner.await_flight(id).await.map(|s| s.flight)
    }

    /// Wait for a journey to finish.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound`, or `ExecutionFailed` if the run halted.
    pub async fn await_journey(&self, id: &InstanceId) -> Result<JourneyStatus> {
        let mut generation = self.inner.journeys.generation();
        loop {
            let _ = generation.borrow_and_update();
            let handle = self.inner.journeys.get(id).await?;
            if let Some(status) = finished(id, &handle).await? {
                return Ok(status);
            }
            if generation.changed().await.is_err() {
                return Err(Error::not_found(id));
            }
        }
    }

    /// Running flights with their projections, sorted by identity.
    pub async fn active_flights(&self) -> Vec<(InstanceId, FlightSnapshot)> {
        self.inner
            .flights
            .entries()
            .await
            .into_iter()
            .filter(|(_, h)| h.status().is_running())
            .map(|(id, h)| (id, h.reader.projection()))
            .collect()
    }

    /// Forget finished instances so they are no longer queryable here.
    /// Legs of a journey that is still running are kept for their parent.
    /// Journals stay in storage, so [`recover`](Self::recover) registers
    /// them again.
    ///
    /// Returns the number of instances forgotten.
    pub async fn prune_finished(&self) -> usize {
        let live_journeys = self.inner.journeys.live().await;
        let flights = self
            .inner
            .flights
            .evict_finished(|_, handle| {
                handle
                    .parent
                    .as_ref()
                    .is_none_or(|p| !live_journeys.contains(&p.instance_id))
            })
            .await;
        let journeys = self.inner.journeys.evict_finished(|_, _| true).await;
        let pruned = flights.len().saturating_add(journeys.len());
        info!(flights = flights.len(), journeys = journeys.len(), "Pruned finished instances");
        pruned
    }

    /// Abort every live task. Journals are left as they are, so a later
    /// [`recover`](Self::recover) resumes each run where it stopped.
    pub async fn shutdown(&self) {
        let journeys = self.inner.journeys.entries().await;
        let flights = self.inner.flights.entries().await;
        warn!(
            journeys = journeys.len(),
            flights = flights.len(),
            "Stopping all executions"
        );
        for (_, handle) in &journeys {
            handle.abort().await;
        }
        for (_, handle) in &flights {
            handle.abort().await;
        }
    }

    /// Simulate a worker crash: abort every live task, then replay all
    /// unfinished instances from the journal.
    ///
    /// # Errors
    ///
    /// Returns a runtime error if the journal cannot be read.
    pub async fn restart_worker(&self) -> Result<usize> {
        self.shutdown().await;
        self.recover().await
    }

    /// Register every instance found in storage: finished ones as queryable
    /// results, unfinished ones replayed and resumed. Flights are recovered
    /// before journeys so resumed journeys find their legs.
    ///
    /// Returns the number of resumed instances.
    ///
    /// # Errors
    ///
    /// Returns a runtime error if the journal cannot be read.
    pub async fn recover(&self) -> Result<usize> {
        let ids = self.inner.storage.instances().await?;
        let (flights, journeys): (Vec<_>, Vec<_>) = ids
            .into_iter()
            .partition(|id| id.kind() == InstanceKind::Flight);

        let mut resumed = 0usize;
        for id in &flights {
            if self.inner.recover_flight(id).await? {
                resumed = resumed.saturating_add(1);
            }
        }
        for id in &journeys {
            if self.inner.recover_journey(id).await? {
                resumed = resumed.saturating_add(1);
            }
        }
        info!(resumed, "Recovery complete");
        Ok(resumed)
    }
}

async fn deliver<S, P>(id: &InstanceId, handle: &InstanceHandle<S, P>, signal: &S) -> Result<()>
where
    S: Serialize + DeserializeOwned + Send + Sync + std::fmt::Debug,
    P: Clone + Send + Sync,
{
    if !handle.status().is_running() {
        return Err(Error::terminal(id));
    }
    let arrival = handle.mailbox.send(signal).await?;
    info!(instance_id = %id, arrival, signal = ?signal, "Signal accepted");

    // Return only once queries can see the signal. An aborted run leaves it
    // queued for the run that recovery starts.
    match handle.reader.applied(arrival).await {
        Some(view) if view.delivered_through < arrival => {
            debug!(instance_id = %id, arrival, "Run finished before the signal was delivered");
            Err(Error::terminal(id))
        }
        Some(_) => Ok(()),
        None => {
            debug!(instance_id = %id, arrival, "Run stopped; signal left queued");
            Ok(())
        }
    }
}

/// `Some` with the final projection once the handle's run finished;
/// `None` if the run was aborted and a replacement should be awaited.
async fn finished<S, P: Clone>(id: &InstanceId, handle: &InstanceHandle<S, P>) -> Result<Option<P>> {
    match handle.reader.finished(id).await {
        Ok(view) => match view.status {
            ExecutionStatus::Failed { reason } => Err(Error::execution_failed(id, reason)),
            ExecutionStatus::Completed | ExecutionStatus::Running => Ok(Some(view.projection)),
        },
        Err(jetstream_workflow::Error::ExecutionAborted { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Inner {
    fn parts<S>(&self, id: &InstanceId) -> ContextParts<S>
    where
        S: Serialize + DeserializeOwned + Send,
    {
        ContextParts {
            storage: Arc::clone(&self.storage),
            timers: Arc::clone(&self.timers),
            dispatcher: Dispatcher::new(self.config.dispatcher.clone()),
            mailbox: Mailbox::new(id.clone(), Arc::clone(&self.storage)),
        }
    }

    /// Create a fresh journal for a new run.
    async fn begin<I: Serialize>(
        &self,
        id: &InstanceId,
        run_id: RunId,
        kind: InstanceKind,
        input: &I,
        parent: Option<ParentRef>,
    ) -> jetstream_workflow::Result<Journal> {
        let started = JournalEntry::ExecutionStarted {
            run_id,
            kind,
            input: serde_json::to_value(input)?,
            parent,
            timestamp: Utc::now(),
        };
        self.storage.create(id, started.clone()).await?;
        let mut journal = Journal::new();
        journal.append(started);
        Ok(journal)
    }

    async fn start_flight(
        &self,
        id: &InstanceId,
        flight: Flight,
        parent: Option<ParentRef>,
    ) -> Result<FlightHandle> {
        let run_id = RunId::new();
        let handle = self
            .flights
            .start(id, || async {
                let journal = self
                    .begin(id, run_id, InstanceKind::Flight, &flight, parent.clone())
                    .await?;
                self.spawn_flight(id, run_id, parent.clone(), &journal, flight.clone())
            })
            .await?;
        Ok(handle)
    }

    fn spawn_flight(
        &self,
        id: &InstanceId,
        run_id: RunId,
        parent: Option<ParentRef>,
        journal: &Journal,
        flight: Flight,
    ) -> jetstream_workflow::Result<FlightHandle> {
        let parts = self.parts::<FlightSignal>(id);
        let mailbox = parts.mailbox.clone();
        let ctx = DurableContext::new(id.clone(), run_id, journal, parts)?;
        let schedule = PhaseSchedule::for_flight(&self.config, &flight);
        let machine = FlightMachine::new(flight, schedule);
        let (writer, reader) = projection_channel(machine.snapshot());
        let mut runtime =
            DurableFlightRuntime::new(ctx, Arc::clone(&self.publisher), Arc::clone(&self.store));
        debug!(instance_id = %id, %run_id, mode = %schedule.mode(), "Spawning flight");

        let instance_id = id.clone();
        let task = tokio::spawn(async move {
            let result = match run_flight(&mut runtime, machine, &writer).await {
                Ok(_) => {
                    let snapshot = writer.reader().projection();
                    runtime.complete(&snapshot).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => writer.finish(ExecutionStatus::Completed),
                Err(e) => {
                    error!(instance_id = %instance_id, error = %e, "Flight execution halted");
                    writer.finish(ExecutionStatus::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        });

        Ok(InstanceHandle {
            run_id,
            parent,
            mailbox,
            reader,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    fn spawn_journey(
        self: &Arc<Self>,
        id: &InstanceId,
        run_id: RunId,
        journal: &Journal,
        status: JourneyStatus,
    ) -> jetstream_workflow::Result<JourneyHandle> {
        let parts = self.parts::<JourneySignal>(id);
        let mailbox = parts.mailbox.clone();
        let ctx = DurableContext::new(id.clone(), run_id, journal, parts)?;
        let (writer, reader) = projection_channel(status.clone());
        let launcher: Arc<dyn LegLauncher> = Arc::clone(self) as Arc<dyn LegLauncher>;
        let mut runtime = DurableJourneyRuntime::new(ctx, launcher);
        let options = JourneyOptions::from(&self.config.journey);
        debug!(instance_id = %id, %run_id, "Spawning journey");

        let instance_id = id.clone();
        let task = tokio::spawn(async move {
            let result = match run_journey(&mut runtime, status, options, &writer).await {
                Ok(done) => runtime.complete(&done).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => writer.finish(ExecutionStatus::Completed),
                Err(e) => {
                    error!(instance_id = %instance_id, error = %e, "Journey execution halted");
                    writer.finish(ExecutionStatus::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        });

        Ok(InstanceHandle {
            run_id,
            parent: None,
            mailbox,
            reader,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    async fn await_flight(&self, id: &InstanceId) -> Result<FlightSnapshot> {
        let mut generation = self.flights.generation();
        loop {
            let _ = generation.borrow_and_update();
            let handle = self.flights.get(id).await?;
            if let Some(snapshot) = finished(id, &handle).await? {
                return Ok(snapshot);
            }
            if generation.changed().await.is_err() {
                return Err(Error::not_found(id));
            }
        }
    }

    /// Returns true if the flight was resumed.
    async fn recover_flight(&self, id: &InstanceId) -> Result<bool> {
        let journal = self.storage.load(id).await?;
        let Some(start) = journal.start() else {
            warn!(instance_id = %id, "Skipping journal without start record");
            return Ok(false);
        };
        let run_id = start.run_id;
        let parent = start.parent.cloned();
        let flight: Flight =
            serde_json::from_value(start.input.clone()).map_err(jetstream_workflow::Error::from)?;

        if self.is_current(&self.flights, id, run_id).await {
            return Ok(false);
        }
        if let Some(output) = journal.output() {
            let snapshot: FlightSnapshot =
                serde_json::from_value(output.clone()).map_err(jetstream_workflow::Error::from)?;
            self.flights
                .install(id, finished_handle(run_id, parent, id, &self.storage, snapshot))
                .await;
            return Ok(false);
        }

        let handle = self.spawn_flight(id, run_id, parent, &journal, flight)?;
        self.flights.install(id, handle).await;
        info!(instance_id = %id, %run_id, entries = journal.len(), "Flight resumed from journal");
        Ok(true)
    }

    async fn recover_journey(self: &Arc<Self>, id: &InstanceId) -> Result<bool> {
        let journal = self.storage.load(id).await?;
        let Some(start) = journal.start() else {
            warn!(instance_id = %id, "Skipping journal without start record");
            return Ok(false);
        };
        let run_id = start.run_id;
        let status: JourneyStatus =
            serde_json::from_value(start.input.clone()).map_err(jetstream_workflow::Error::from)?;

        if self.is_current(&self.journeys, id, run_id).await {
            return Ok(false);
        }
        if let Some(output) = journal.output() {
            let done: JourneyStatus =
                serde_json::from_value(output.clone()).map_err(jetstream_workflow::Error::from)?;
            self.journeys
                .install(id, finished_handle(run_id, None, id, &self.storage, done))
                .await;
            return Ok(false);
        }

        let handle = self.spawn_journey(id, run_id, &journal, status)?;
        self.journeys.install(id, handle).await;
        info!(instance_id = %id, %run_id, entries = journal.len(), "Journey resumed from journal");
        Ok(true)
    }

    /// True if `id` is registered for `run_id` and that run is either
    /// finished or still has a live task.
    async fn is_current<S, P>(
        &self,
        registry: &InstanceRegistry<InstanceHandle<S, P>>,
        id: &InstanceId,
        run_id: RunId,
    ) -> bool
    where
        S: Send + Sync,
        P: Clone + Send + Sync,
    {
        let Ok(handle) = registry.get(id).await else {
            return false;
        };
        if handle.run_id != run_id {
            return false;
        }
        if !handle.status().is_running() {
            return true;
        }
        handle
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

/// Handle of a run that finished before this process started.
fn finished_handle<S, P>(
    run_id: RunId,
    parent: Option<ParentRef>,
    id: &InstanceId,
    storage: &Arc<dyn JournalStorage>,
    projection: P,
) -> InstanceHandle<S, P>
where
    S: Serialize + DeserializeOwned + Send,
{
    let (writer, reader) = projection_channel(projection);
    writer.finish(ExecutionStatus::Completed);
    InstanceHandle {
        run_id,
        parent,
        mailbox: Mailbox::new(id.clone(), Arc::clone(storage)),
        reader,
        task: Arc::new(Mutex::new(None)),
    }
}

#[async_trait]
impl LegLauncher for Inner {
    async fn launch_leg(&self, parent: &ParentRef, leg: &Flight) -> std::result::Result<(), String> {
        let child = leg_id(leg);
        if let Ok(existing) = self.flights.get(&child).await {
            if existing.parent.as_ref() == Some(parent) {
                debug!(instance_id = %child, "Leg already launched by this run");
                return Ok(());
            }
        }
        self.start_flight(&child, leg.clone(), Some(parent.clone()))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn leg_outcome(&self, child: &InstanceId) -> BoxFuture<'static, std::result::Result<Flight, String>> {
        let flights = Arc::clone(&self.flights);
        let child = child.clone();
        Box::pin(async move {
            let mut generation = flights.generation();
            loop {
                let _ = generation.borrow_and_update();
                let handle = flights.get(&child).await.map_err(|e| e.to_string())?;
                match finished(&child, &handle).await {
                    Ok(Some(snapshot)) => return Ok(snapshot.flight),
                    Ok(None) => {}
                    Err(e) => return Err(e.to_string()),
                }
                if generation.changed().await.is_err() {
                    return Err(format!("flight {child} is no longer registered"));
                }
            }
        })
    }

    async fn cancel_leg(&self, child: &InstanceId, reason: &str) -> std::result::Result<(), EffectError> {
        let handle = self
            .flights
            .get(child)
            .await
            .map_err(|e| EffectError::permanent(e.to_string()))?;
        match deliver(
            child,
            &handle,
            &FlightSignal::Cancel {
                reason: reason.to_string(),
            },
        )
        .await
        {
            Ok(()) | Err(Error::Terminal(_)) => Ok(()),
            Err(e) => Err(EffectError::transient(e.to_string())),
        }
    }
}

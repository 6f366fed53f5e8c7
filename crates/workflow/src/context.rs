//! Replay-aware durable context.
//!
//! A machine body talks to the outside world only through a
//! [`DurableContext`]. Every operation takes the next sequence number. If
//! the journal already holds a result for that number the recorded result
//! is returned and nothing external happens; otherwise the operation runs
//! and its result is appended before the body continues.
//!
//! | operation        | journal entries                              |
//! |------------------|----------------------------------------------|
//! | `now`            | `ClockRead`                                  |
//! | `drain_signals`  | `SignalsDelivered`                           |
//! | `start_timer`    | `TimerScheduled`                             |
//! | `wait_timer`     | `TimerFired` or `SignalsDelivered`           |
//! | `call_effect`    | `EffectScheduled`, `EffectCompleted`         |
//! | `start_child`    | `ChildStarted` or `ChildStartFailed`         |
//! | `wait_child`     | `ChildCompleted` or `SignalsDelivered`       |
//!
//! Random draws come from a generator seeded by instance and run, so they
//! need no journal entries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, EffectCall, EffectError, EffectFailure};
use crate::error::{Error, Result};
use crate::idempotent::{effect_key, rng_seed};
use crate::mailbox::Mailbox;
use crate::storage::{JournalStorage, QueuedSignal};
use crate::timer::{TimerHandle, TimerService, deadline_after};
use crate::types::{InstanceId, Journal, JournalEntry, Outcome, RunId, Seq};

/// Why a wait returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake<S, T> {
    /// Signals arrived; the awaited event has not happened yet.
    Signals(Vec<S>),
    /// The awaited event happened.
    Ready(T),
}

/// Collaborators a context needs besides its journal.
#[derive(Clone)]
pub struct ContextParts<S> {
    pub storage: Arc<dyn JournalStorage>,
    pub timers: Arc<dyn TimerService>,
    pub dispatcher: Dispatcher,
    pub mailbox: Mailbox<S>,
}

/// Journal entries indexed by operation sequence number.
#[derive(Debug, Default)]
struct ReplayHistory {
    ops: HashMap<Seq, Vec<JournalEntry>>,
    last_seq: Option<Seq>,
    completed: bool,
}

impl ReplayHistory {
    fn from_journal(journal: &Journal) -> Self {
        let mut ops: HashMap<Seq, Vec<JournalEntry>> = HashMap::new();
        for entry in journal.entries() {
            if let Some(seq) = entry.seq() {
                ops.entry(seq).or_default().push(entry.clone());
            }
        }
        Self {
            ops,
            last_seq: journal.last_seq(),
            completed: journal.is_completed(),
        }
    }

    fn get(&self, seq: Seq) -> Option<&[JournalEntry]> {
        self.ops.get(&seq).map(Vec::as_slice)
    }
}

enum Wakeup<T> {
    Deadline,
    Mailbox,
    Child(T),
}

/// Durable execution context of one run.
pub struct DurableContext<S> {
    instance_id: InstanceId,
    run_id: RunId,
    storage: Arc<dyn JournalStorage>,
    timers: Arc<dyn TimerService>,
    dispatcher: Dispatcher,
    mailbox: Mailbox<S>,
    history: ReplayHistory,
    next_seq: Seq,
    delivered_through: u64,
    rng: StdRng,
}

impl<S> DurableContext<S>
where
    S: Serialize + DeserializeOwned + Send,
{
    /// Build a context that replays `journal` and then continues live.
    ///
    /// # Errors
    ///
    /// Returns `CorruptJournal` if the journal does not start with a start
    /// record for `run_id`.
    pub fn new(
        instance_id: InstanceId,
        run_id: RunId,
        journal: &Journal,
        parts: ContextParts<S>,
    ) -> Result<Self> {
        match journal.start() {
            Some(start) if start.run_id == run_id => {}
            Some(start) => {
                return Err(Error::corrupt_journal(
                    &instance_id,
                    format!("journal belongs to run {}, not {run_id}", start.run_id),
                ));
            }
            None => {
                return Err(Error::corrupt_journal(&instance_id, "missing start record"));
            }
        }

        let history = ReplayHistory::from_journal(journal);
        let delivered_through = journal
            .entries()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::SignalsDelivered { through, .. } => Some(*through),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        if let Some(last) = history.last_seq {
            debug!(instance_id = %instance_id, %run_id, last_seq = last, "Replaying journal");
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(rng_seed(&instance_id, run_id)),
            instance_id,
            run_id,
            storage: parts.storage,
            timers: parts.timers,
            dispatcher: parts.dispatcher,
            mailbox: parts.mailbox,
            history,
            next_seq: 1,
            delivered_through,
        })
    }

    pub const fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Highest mailbox arrival number handed to the body so far.
    pub const fn delivered_through(&self) -> u64 {
        self.delivered_through
    }

    /// True while the body is re-executing operations already in the journal.
    pub fn is_replaying(&self) -> bool {
        self.history.last_seq.is_some_and(|last| self.next_seq <= last)
    }

    /// Logical clock.
    ///
    /// # Errors
    ///
    /// Returns a storage or replay error.
    pub async fn now(&mut self) -> Result<DateTime<Utc>> {
        let seq = self.next_op();
        if let Some(entries) = self.history.get(seq) {
            return match entries.first() {
                Some(JournalEntry::ClockRead { at, .. }) => Ok(*at),
                other => Err(mismatch(seq, "clock read", other)),
            };
        }
        let at = self.timers.now();
        self.append(JournalEntry::ClockRead { seq, at }).await?;
        Ok(at)
    }

    /// Next value of the deterministic random stream.
    pub fn next_random(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// A random (version 4 layout) UUID from the deterministic stream.
    pub fn new_uuid(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    /// Take every signal that arrived since the last delivery.
    ///
    /// # Errors
    ///
    /// Returns a storage, serialization or replay error.
    pub async fn drain_signals(&mut self) -> Result<Vec<S>> {
        let seq = self.next_op();
        if let Some(entries) = self.history.get(seq) {
            return match entries.first() {
                Some(JournalEntry::SignalsDelivered { signals, .. }) => decode_signals(signals),
                other => Err(mismatch(seq, "signal delivery", other)),
            };
        }
        let pending = self.mailbox.pending(self.delivered_through).await?;
        self.deliver(seq, pending).await
    }

    /// Arm a timer `duration` from now.
    ///
    /// # Errors
    ///
    /// Returns a storage, range or replay error.
    pub async fn start_timer(&mut self, duration: Duration) -> Result<TimerHandle> {
        let seq = self.next_op();
        if let Some(entries) = self.history.get(seq) {
            return match entries.first() {
                Some(JournalEntry::TimerScheduled { fire_at, .. }) => Ok(TimerHandle {
                    seq,
                    fire_at: *fire_at,
                }),
                other => Err(mismatch(seq, "timer", other)),
            };
        }
        let now = self.timers.now();
        let fire_at = deadline_after(now, duration)?;
        self.append(JournalEntry::TimerScheduled {
            seq,
            fire_at,
            timestamp: now,
        })
        .await?;
        Ok(TimerHandle { seq, fire_at })
    }

    /// Suspend until `timer` fires or signals arrive, whichever is first.
    ///
    /// # Errors
    ///
    /// Returns a storage, serialization or replay error.
    pub async fn wait_timer(&mut self, timer: &TimerHandle) -> Result<Wake<S, ()>> {
        let seq = self.next_op();
        if let Some(entries) = self.history.get(seq) {
            return match entries.first() {
                Some(JournalEntry::TimerFired { timer: fired, .. }) if *fired == timer.seq => {
                    Ok(Wake::Ready(()))
                }
                Some(JournalEntry::SignalsDelivered { signals, .. }) => {
                    decode_signals(signals).map(Wake::Signals)
                }
                other => Err(mismatch(seq, "timer fire", other)),
            };
        }

        loop {
            let pending = self.mailbox.pending(self.delivered_through).await?;
            if !pending.is_empty() {
                return self.deliver(seq, pending).await.map(Wake::Signals);
            }
            if self.timers.now() >= timer.fire_at {
                break;
            }
            let woke = tokio::select! {
                () = self.timers.sleep_until(timer.fire_at) => Wakeup::<()>::Deadline,
                () = self.mailbox.changed() => Wakeup::Mailbox,
            };
            if matches!(woke, Wakeup::Deadline) {
                break;
            }
        }

        let timestamp = self.timers.now();
        self.append(JournalEntry::TimerFired {
            seq,
            timer: timer.seq,
            timestamp,
        })
        .await?;
        Ok(Wake::Ready(()))
    }

    /// Run an external call under the dispatcher, or return its recorded
    /// outcome when replaying.
    ///
    /// The outer `Result` carries runtime failures; the inner one the
    /// effect's own outcome after retries.
    ///
    /// # Errors
    ///
    /// Returns a storage, serialization or replay error.
    pub async fn call_effect<O, F, Fut>(
        &mut self,
        name: &str,
        op: F,
    ) -> Result<std::result::Result<O, EffectFailure>>
    where
        O: Serialize + DeserializeOwned,
        F: FnMut(EffectCall) -> Fut,
        Fut: Future<Output = std::result::Result<O, EffectError>>,
    {
        let seq = self.next_op();
        let key = effect_key(&self.instance_id, self.run_id, seq, name)?;

        let mut scheduled = false;
        if let Some(entries) = self.history.get(seq) {
            for entry in entries {
                match entry {
                    JournalEntry::EffectScheduled {
                        name: recorded, ..
                    } if recorded == name => scheduled = true,
                    JournalEntry::EffectCompleted {
                        outcome, attempts, ..
                    } => {
                        return decode_effect(outcome, *attempts);
                    }
                    other => return Err(mismatch(seq, &format!("effect '{name}'"), Some(other))),
                }
            }
        }

        if !scheduled {
            let timestamp = self.timers.now();
            self.append(JournalEntry::EffectScheduled {
                seq,
                name: name.to_string(),
                key,
                timestamp,
            })
            .await?;
        } else {
            debug!(instance_id = %self.instance_id, effect = name, seq, "Re-dispatching effect with no recorded outcome");
        }

        let (outcome, attempts, result) = match self.dispatcher.dispatch(name, key, op).await {
            Ok(done) => {
                let value = serde_json::to_value(&done.value)?;
                (Outcome::Succeeded(value), done.attempts, Ok(done.value))
            }
            Err(failure) => (
                Outcome::Failed(failure.reason.clone()),
                failure.attempts,
                Err(failure),
            ),
        };

        let timestamp = self.timers.now();
        self.append(JournalEntry::EffectCompleted {
            seq,
            outcome,
            attempts,
            timestamp,
        })
        .await?;
        Ok(result)
    }

    /// Launch a child instance, or return the recorded launch result.
    ///
    /// `launch` must be safe to call again for a child it already started
    /// from this run; it is re-invoked if the run stopped before the launch
    /// was recorded.
    ///
    /// # Errors
    ///
    /// Returns a storage or replay error.
    pub async fn start_child<F, Fut>(
        &mut self,
        child: &InstanceId,
        launch: F,
    ) -> Result<std::result::Result<(), String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(), String>>,
    {
        let seq = self.next_op();
        if let Some(entries) = self.history.get(seq) {
            return match entries.first() {
                Some(JournalEntry::ChildStarted { child: recorded, .. }) if recorded == child => {
                    Ok(Ok(()))
                }
                Some(JournalEntry::ChildStartFailed {
                    child: recorded,
                    reason,
                    ..
                }) if recorded == child => Ok(Err(reason.clone())),
                other => Err(mismatch(seq, &format!("child start '{child}'"), other)),
            };
        }

        let launched = launch().await;
        let timestamp = self.timers.now();
        let entry = match &launched {
            Ok(()) => JournalEntry::ChildStarted {
                seq,
                child: child.clone(),
                timestamp,
            },
            Err(reason) => JournalEntry::ChildStartFailed {
                seq,
                child: child.clone(),
                reason: reason.clone(),
                timestamp,
            },
        };
        self.append(entry).await?;
        Ok(launched)
    }

    /// Suspend until `completion` resolves or signals arrive.
    ///
    /// `completion` is polled in place, so the caller can keep passing the
    /// same future across signal wake-ups.
    ///
    /// # Errors
    ///
    /// Returns a storage, serialization or replay error.
    pub async fn wait_child<T>(
        &mut self,
        child: &InstanceId,
        completion: &mut BoxFuture<'static, std::result::Result<T, String>>,
    ) -> Result<Wake<S, std::result::Result<T, String>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let seq = self.next_op();
        if let Some(entries) = self.history.get(seq) {
            return match entries.first() {
                Some(JournalEntry::ChildCompleted {
                    child: recorded,
                    outcome,
                    ..
                }) if recorded == child => decode_child(outcome).map(Wake::Ready),
                Some(JournalEntry::SignalsDelivered { signals, .. }) => {
                    decode_signals(signals).map(Wake::Signals)
                }
                other => Err(mismatch(seq, &format!("child completion '{child}'"), other)),
            };
        }

        let result = loop {
            let pending = self.mailbox.pending(self.delivered_through).await?;
            if !pending.is_empty() {
                return self.deliver(seq, pending).await.map(Wake::Signals);
            }
            let woke = tokio::select! {
                result = &mut *completion => Wakeup::Child(result),
                () = self.mailbox.changed() => Wakeup::Mailbox,
            };
            if let Wakeup::Child(result) = woke {
                break result;
            }
        };

        let outcome = match &result {
            Ok(value) => Outcome::Succeeded(serde_json::to_value(value)?),
            Err(reason) => Outcome::Failed(reason.clone()),
        };
        let timestamp = self.timers.now();
        self.append(JournalEntry::ChildCompleted {
            seq,
            child: child.clone(),
            outcome,
            timestamp,
        })
        .await?;
        Ok(Wake::Ready(result))
    }

    /// Record the run's output.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub async fn complete<O: Serialize>(&mut self, output: &O) -> Result<()> {
        if self.history.completed {
            return Ok(());
        }
        let output = serde_json::to_value(output)?;
        let timestamp = self.timers.now();
        self.append(JournalEntry::ExecutionCompleted { output, timestamp })
            .await?;
        self.history.completed = true;
        Ok(())
    }

    fn next_op(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }

    async fn append(&self, entry: JournalEntry) -> Result<()> {
        self.storage.append(&self.instance_id, entry).await
    }

    async fn deliver(&mut self, seq: Seq, pending: Vec<QueuedSignal>) -> Result<Vec<S>> {
        let through = pending
            .last()
            .map_or(self.delivered_through, |s| s.arrival);
        let payloads: Vec<serde_json::Value> = pending.into_iter().map(|s| s.payload).collect();
        let signals = decode_signals(&payloads)?;
        let timestamp = self.timers.now();
        self.append(JournalEntry::SignalsDelivered {
            seq,
            through,
            signals: payloads,
            timestamp,
        })
        .await?;
        if through > self.delivered_through {
            self.delivered_through = through;
            if let Err(e) = self.mailbox.discard(through).await {
                warn!(instance_id = %self.instance_id, through, error = %e, "Could not trim mailbox");
            }
        }
        Ok(signals)
    }
}

fn mismatch(seq: Seq, expected: &str, found: Option<&JournalEntry>) -> Error {
    let found = found.map_or_else(|| "nothing".to_string(), JournalEntry::describe);
    warn!(seq, expected, %found, "Journal does not match replayed body");
    Error::nondeterministic(seq, expected, found)
}

fn decode_signals<S: DeserializeOwned>(payloads: &[serde_json::Value]) -> Result<Vec<S>> {
    payloads
        .iter()
        .map(|p| serde_json::from_value(p.clone()).map_err(Error::from))
        .collect()
}

fn decode_effect<O: DeserializeOwned>(
    outcome: &Outcome,
    attempts: u32,
) -> Result<std::result::Result<O, EffectFailure>> {
    match outcome {
        Outcome::Succeeded(value) => Ok(Ok(serde_json::from_value(value.clone())?)),
        Outcome::Failed(reason) => Ok(Err(EffectFailure {
            attempts,
            reason: reason.clone(),
        })),
    }
}

fn decode_child<T: DeserializeOwned>(outcome: &Outcome) -> Result<std::result::Result<T, String>> {
    match outcome {
        Outcome::Succeeded(value) => Ok(Ok(serde_json::from_value(value.clone())?)),
        Outcome::Failed(reason) => Ok(Err(reason.clone())),
    }
}

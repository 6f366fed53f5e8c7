//! Pure flight state machine.
//!
//! [`FlightMachine::step`] folds one input into the machine and returns the
//! actions the driver must carry out. It never touches time, randomness or
//! I/O, so the driver can replay it against a journal and land in the same
//! state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use jetstream_events::{Flight, FlightPhase, TransitionKind};

use super::timing::PhaseSchedule;

/// Command delivered to a running flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlightSignal {
    /// Overwrite the accumulated delay.
    AnnounceDelay { minutes: u32 },
    /// Overwrite the gate.
    ChangeGate { gate: String },
    /// Latch cancellation; acted on at the next timer boundary.
    Cancel { reason: String },
}

/// Event fed into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightInput {
    Start,
    Signals(Vec<FlightSignal>),
    TimerFired,
}

/// A transition the driver stamps with time and id, then emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDraft {
    pub from: Option<FlightPhase>,
    pub to: FlightPhase,
    pub gate: Option<String>,
    pub delay_minutes: u32,
    pub aircraft: Option<String>,
    pub kind: TransitionKind,
    pub note: String,
}

/// Work requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightAction {
    Emit(TransitionDraft),
    Sleep(Duration),
    Finish(Flight),
}

/// Queryable state of a flight instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightSnapshot {
    pub flight: Flight,
    pub cancelled: bool,
    pub cancellation_reason: Option<String>,
}

impl FlightSnapshot {
    pub const fn new(flight: Flight) -> Self {
        Self {
            flight,
            cancelled: false,
            cancellation_reason: None,
        }
    }
}

/// The flight lifecycle as a deterministic fold over inputs.
#[derive(Debug, Clone)]
pub struct FlightMachine {
    flight: Flight,
    schedule: PhaseSchedule,
    cancel_reason: Option<String>,
    started: bool,
    finished: bool,
}

impl FlightMachine {
    pub fn new(mut flight: Flight, schedule: PhaseSchedule) -> Self {
        flight.phase = FlightPhase::Scheduled;
        Self {
            flight,
            schedule,
            cancel_reason: None,
            started: false,
            finished: false,
        }
    }

    pub const fn flight(&self) -> &Flight {
        &self.flight
    }

    pub const fn phase(&self) -> FlightPhase {
        self.flight.phase
    }

    pub const fn is_cancel_latched(&self) -> bool {
        self.cancel_reason.is_some()
    }

    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn snapshot(&self) -> FlightSnapshot {
        FlightSnapshot {
            flight: self.flight.clone(),
            cancelled: self.cancel_reason.is_some(),
            cancellation_reason: self.cancel_reason.clone(),
        }
    }

    /// Fold one input into the machine.
    pub fn step(&mut self, input: FlightInput) -> Vec<FlightAction> {
        if self.finished {
            return Vec::new();
        }
        match input {
            FlightInput::Signals(signals) => {
                signals.into_iter().for_each(|s| self.apply(s));
                Vec::new()
            }
            FlightInput::Start => self.start(),
            FlightInput::TimerFired => self.advance(),
        }
    }

    fn apply(&mut self, signal: FlightSignal) {
        match signal {
            FlightSignal::AnnounceDelay { minutes } => self.flight.delay_minutes = minutes,
            FlightSignal::ChangeGate { gate } => self.flight.gate = Some(gate),
            // Stays latched; a repeated cancel only replaces the reason.
            FlightSignal::Cancel { reason } => self.cancel_reason = Some(reason),
        }
    }

    fn start(&mut self) -> Vec<FlightAction> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let mut actions = vec![FlightAction::Emit(self.draft(None, FlightPhase::Scheduled))];
        actions.extend(self.sleep_or_finish());
        actions
    }

    fn advance(&mut self) -> Vec<FlightAction> {
        if !self.started {
            return Vec::new();
        }
        let from = self.flight.phase;
        let to = if self.cancel_reason.is_some() {
            FlightPhase::Cancelled
        } else {
            match from.successor() {
                Some(next) => next,
                None => return Vec::new(),
            }
        };
        self.flight.phase = to;
        let mut actions = vec![FlightAction::Emit(self.draft(Some(from), to))];
        actions.extend(self.sleep_or_finish());
        actions
    }

    fn sleep_or_finish(&mut self) -> Option<FlightAction> {
        match self.schedule.duration(self.flight.phase) {
            Some(duration) => Some(FlightAction::Sleep(duration)),
            None => {
                self.finished = true;
                Some(FlightAction::Finish(self.flight.clone()))
            }
        }
    }

    fn draft(&self, from: Option<FlightPhase>, to: FlightPhase) -> TransitionDraft {
        let note = match (from, to) {
            (None, _) => "Flight scheduled".to_string(),
            (Some(_), FlightPhase::Cancelled) => format!(
                "Flight cancelled: {}",
                self.cancel_reason.as_deref().unwrap_or("no reason given")
            ),
            (Some(prev), next) => format!("Flight transitioned from {prev} to {next}"),
        };
        TransitionDraft {
            from,
            to,
            gate: self.flight.gate.clone(),
            delay_minutes: self.flight.delay_minutes,
            aircraft: self.flight.aircraft.clone(),
            kind: TransitionKind::for_edge(from, to),
            note,
        }
    }
}

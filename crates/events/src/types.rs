//! Core types for the flight domain.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle phase of a flight.
///
/// Non-terminal phases are totally ordered; `Cancelled` is reachable from
/// any of them. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightPhase {
    Scheduled,
    Boarding,
    Departed,
    InFlight,
    Landed,
    Completed,
    Cancelled,
}

impl FlightPhase {
    /// The happy-path order, first to last.
    pub const LIFECYCLE: [Self; 6] = [
        Self::Scheduled,
        Self::Boarding,
        Self::Departed,
        Self::InFlight,
        Self::Landed,
        Self::Completed,
    ];

    /// Check if this is a terminal phase.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The next phase on the happy path, if any.
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Scheduled => Some(Self::Boarding),
            Self::Boarding => Some(Self::Departed),
            Self::Departed => Some(Self::InFlight),
            Self::InFlight => Some(Self::Landed),
            Self::Landed => Some(Self::Completed),
            Self::Completed | Self::Cancelled => None,
        }
    }

    /// Position on the happy path. `Cancelled` has no rank.
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Scheduled => Some(0),
            Self::Boarding => Some(1),
            Self::Departed => Some(2),
            Self::InFlight => Some(3),
            Self::Landed => Some(4),
            Self::Completed => Some(5),
            Self::Cancelled => None,
        }
    }

    /// Check if an edge from this phase to `target` is legal.
    pub fn can_transition_to(self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == Self::Cancelled || self.successor() == Some(target)
    }
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "SCHEDULED",
            Self::Boarding => "BOARDING",
            Self::Departed => "DEPARTED",
            Self::InFlight => "IN_FLIGHT",
            Self::Landed => "LANDED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// A flight, the payload of one orchestrator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    pub flight_number: String,
    pub flight_date: NaiveDate,
    #[serde(alias = "departureStation")]
    pub origin: String,
    #[serde(alias = "arrivalStation")]
    pub destination: String,
    #[serde(default)]
    pub scheduled_departure: Option<NaiveDateTime>,
    #[serde(default)]
    pub scheduled_arrival: Option<NaiveDateTime>,
    #[serde(default)]
    pub gate: Option<String>,
    #[serde(default)]
    pub aircraft: Option<String>,
    #[serde(default = "default_phase", alias = "currentState")]
    pub phase: FlightPhase,
    #[serde(default, alias = "delay")]
    pub delay_minutes: u32,
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default, alias = "previousFlightNumber")]
    pub previous_flight: Option<String>,
    #[serde(default, alias = "nextFlightNumber")]
    pub next_flight: Option<String>,
}

const fn default_phase() -> FlightPhase {
    FlightPhase::Scheduled
}

impl Flight {
    /// Create a flight with the required attributes.
    pub fn new(
        flight_number: impl Into<String>,
        flight_date: NaiveDate,
        origin: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            flight_number: flight_number.into(),
            flight_date,
            origin: origin.into(),
            destination: destination.into(),
            scheduled_departure: None,
            scheduled_arrival: None,
            gate: None,
            aircraft: None,
            phase: FlightPhase::Scheduled,
            delay_minutes: 0,
            demo_mode: false,
            previous_flight: None,
            next_flight: None,
        }
    }

    /// Set scheduled departure and arrival.
    #[must_use]
    pub const fn with_schedule(mut self, departure: NaiveDateTime, arrival: NaiveDateTime) -> Self {
        self.scheduled_departure = Some(departure);
        self.scheduled_arrival = Some(arrival);
        self
    }

    /// Set the gate.
    #[must_use]
    pub fn with_gate(mut self, gate: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    /// Set the aircraft tail.
    #[must_use]
    pub fn with_aircraft(mut self, aircraft: impl Into<String>) -> Self {
        self.aircraft = Some(aircraft.into());
        self
    }

    /// Set the demo timing flag.
    #[must_use]
    pub const fn with_demo_mode(mut self, demo_mode: bool) -> Self {
        self.demo_mode = demo_mode;
        self
    }

    /// Scheduled block time in whole minutes when both schedule times are
    /// present and arrival is after departure.
    pub fn scheduled_block_minutes(&self) -> Option<u64> {
        let departure = self.scheduled_departure?;
        let arrival = self.scheduled_arrival?;
        let minutes = arrival.signed_duration_since(departure).num_minutes();
        u64::try_from(minutes).ok().filter(|m| *m > 0)
    }

    /// Check the attributes an instance needs before it can start.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFlight` naming the first missing or inconsistent attribute.
    pub fn validate(&self) -> Result<()> {
        if self.flight_number.trim().is_empty() {
            return Err(Error::invalid_flight("flight number is empty"));
        }
        if self.flight_number.chars().any(char::is_whitespace) {
            return Err(Error::invalid_flight("flight number contains whitespace"));
        }
        if self.origin.trim().is_empty() {
            return Err(Error::invalid_flight("origin station is empty"));
        }
        if self.destination.trim().is_empty() {
            return Err(Error::invalid_flight("destination station is empty"));
        }
        if let (Some(departure), Some(arrival)) = (self.scheduled_departure, self.scheduled_arrival)
        {
            if arrival <= departure {
                return Err(Error::invalid_flight(
                    "scheduled arrival is not after scheduled departure",
                ));
            }
        }
        if self.gate.as_deref().is_some_and(|g| g.trim().is_empty()) {
            return Err(Error::invalid_flight("gate is present but empty"));
        }
        if self.phase != FlightPhase::Scheduled {
            return Err(Error::invalid_flight(format!(
                "flight must start in SCHEDULED, got {}",
                self.phase
            )));
        }
        Ok(())
    }
}

/// Event-type tag carried by a persisted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    FlightScheduled,
    BoardingStarted,
    Departure,
    StateTransition,
    Arrival,
    FlightCancelled,
}

impl TransitionKind {
    /// Tag for the edge `from -> to`.
    pub const fn for_edge(from: Option<FlightPhase>, to: FlightPhase) -> Self {
        match (from, to) {
            (None, _) => Self::FlightScheduled,
            (_, FlightPhase::Boarding) => Self::BoardingStarted,
            (_, FlightPhase::Departed) => Self::Departure,
            (_, FlightPhase::Landed) => Self::Arrival,
            (_, FlightPhase::Cancelled) => Self::FlightCancelled,
            _ => Self::StateTransition,
        }
    }
}

/// One phase change, as appended to the transition store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// Deterministic per-instance id; the store upserts on it.
    pub id: Uuid,
    pub flight_number: String,
    pub flight_date: NaiveDate,
    pub from: Option<FlightPhase>,
    pub to: FlightPhase,
    pub timestamp: NaiveDateTime,
    pub gate: Option<String>,
    pub delay_minutes: u32,
    pub aircraft: Option<String>,
    pub kind: TransitionKind,
    pub note: String,
}

impl Transition {
    /// The public event for this transition.
    pub fn to_event(&self) -> TransitionEvent {
        TransitionEvent {
            flight_number: self.flight_number.clone(),
            previous_state: self.from,
            new_state: self.to,
            timestamp: self.timestamp,
            gate: self.gate.clone(),
            delay: self.delay_minutes,
        }
    }
}

/// The public JSON record published per transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub flight_number: String,
    pub previous_state: Option<FlightPhase>,
    pub new_state: FlightPhase,
    pub timestamp: NaiveDateTime,
    pub gate: Option<String>,
    pub delay: u32,
}

impl TransitionEvent {
    /// Partition key on the bus.
    pub fn partition_key(&self) -> &str {
        &self.flight_number
    }

    /// Key consumers dedupe on.
    pub fn dedupe_key(&self) -> (&str, FlightPhase, NaiveDateTime) {
        (&self.flight_number, self.new_state, self.timestamp)
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

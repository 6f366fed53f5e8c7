//! Admission-level signals and queries.

use serde::{Deserialize, Serialize};

use jetstream_events::{Flight, FlightPhase};
use jetstream_workflow::InstanceKind;

use crate::error::{Error, Result};
use crate::flight::{FlightSignal, FlightSnapshot};
use crate::journey::{JourneySignal, JourneyStatus};

/// A command addressed to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    AnnounceDelay { minutes: u32 },
    ChangeGate { gate: String },
    CancelFlight { reason: String },
    CancelJourney { reason: String },
}

/// A signal after validation, routed to its instance kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routed {
    Flight(FlightSignal),
    Journey(JourneySignal),
}

impl Signal {
    /// The kind of instance this signal addresses.
    pub const fn target(&self) -> InstanceKind {
        match self {
            Self::CancelJourney { .. } => InstanceKind::Journey,
            _ => InstanceKind::Flight,
        }
    }

    /// Validate arguments and convert to the machine-level signal.
    pub(crate) fn route(self) -> Result<Routed> {
        match self {
            Self::AnnounceDelay { minutes } => {
                if minutes < 1 {
                    return Err(Error::invalid_argument("delay minutes must be at least 1"));
                }
                Ok(Routed::Flight(FlightSignal::AnnounceDelay { minutes }))
            }
            Self::ChangeGate { gate } => {
                let gate = non_blank(gate, "gate")?;
                Ok(Routed::Flight(FlightSignal::ChangeGate { gate }))
            }
            Self::CancelFlight { reason } => {
                let reason = non_blank(reason, "cancellation reason")?;
                Ok(Routed::Flight(FlightSignal::Cancel { reason }))
            }
            Self::CancelJourney { reason } => {
                let reason = non_blank(reason, "cancellation reason")?;
                Ok(Routed::Journey(JourneySignal::Cancel { reason }))
            }
        }
    }
}

fn non_blank(value: String, what: &str) -> Result<String> {
    if value.trim().is_empty() {
        Err(Error::invalid_argument(format!("{what} must not be empty")))
    } else {
        Ok(value)
    }
}

/// A read of an instance's projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    CurrentPhase,
    FlightDetails,
    DelayMinutes,
    JourneyStatus,
    CurrentLegIndex,
}

impl Query {
    pub const fn target(self) -> InstanceKind {
        match self {
            Self::CurrentPhase | Self::FlightDetails | Self::DelayMinutes => InstanceKind::Flight,
            Self::JourneyStatus | Self::CurrentLegIndex => InstanceKind::Journey,
        }
    }

    pub(crate) fn answer_flight(self, snapshot: FlightSnapshot) -> Result<QueryResult> {
        match self {
            Self::CurrentPhase => Ok(QueryResult::Phase(snapshot.flight.phase)),
            Self::FlightDetails => Ok(QueryResult::Flight(snapshot.flight)),
            Self::DelayMinutes => Ok(QueryResult::DelayMinutes(snapshot.flight.delay_minutes)),
            other => Err(mismatch(other, InstanceKind::Flight)),
        }
    }

    pub(crate) fn answer_journey(self, status: JourneyStatus) -> Result<QueryResult> {
        match self {
            Self::JourneyStatus => Ok(QueryResult::Journey(status.legs)),
            Self::CurrentLegIndex => Ok(QueryResult::LegIndex(status.current_leg_index)),
            other => Err(mismatch(other, InstanceKind::Journey)),
        }
    }
}

fn mismatch(query: Query, kind: InstanceKind) -> Error {
    Error::invalid_argument(format!("query {query:?} does not apply to a {kind} instance"))
}

/// Answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    Phase(FlightPhase),
    Flight(Flight),
    DelayMinutes(u32),
    Journey(Vec<Flight>),
    LegIndex(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_rejected() {
        let result = Signal::AnnounceDelay { minutes: 0 }.route();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_blank_gate_and_reason_rejected() {
        assert!(Signal::ChangeGate {
            gate: "  ".to_string()
        }
        .route()
        .is_err());
        assert!(Signal::CancelFlight {
            reason: String::new()
        }
        .route()
        .is_err());
        assert!(Signal::CancelJourney {
            reason: String::new()
        }
        .route()
        .is_err());
    }

    #[test]
    fn test_routing() {
        assert_eq!(
            Signal::AnnounceDelay { minutes: 45 }.route().ok(),
            Some(Routed::Flight(FlightSignal::AnnounceDelay { minutes: 45 }))
        );
        assert_eq!(
            Signal::CancelJourney {
                reason: "Wx".to_string()
            }
            .route()
            .ok(),
            Some(Routed::Journey(JourneySignal::Cancel {
                reason: "Wx".to_string()
            }))
        );
        assert_eq!(
            Signal::CancelJourney {
                reason: "Wx".to_string()
            }
            .target(),
            InstanceKind::Journey
        );
    }

    #[test]
    fn test_flight_query_on_journey_rejected() {
        let status = JourneyStatus::new("J", Vec::new());
        assert!(matches!(
            Query::DelayMinutes.answer_journey(status),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_value(Signal::ChangeGate {
            gate: "D15".to_string(),
        })
        .unwrap_or_default();
        assert_eq!(json, serde_json::json!({"type": "change_gate", "gate": "D15"}));
    }
}

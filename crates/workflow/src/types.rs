//! Core types for durable executions: identities and the journal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Sequence number of a durable operation within one run.
pub type Seq = u64;

const FLIGHT_PREFIX: &str = "flight-";
const JOURNEY_PREFIX: &str = "journey-";
const DATE_LEN: usize = 10;

/// What kind of machine an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Flight,
    Journey,
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flight => write!(f, "flight"),
            Self::Journey => write!(f, "journey"),
        }
    }
}

/// Stable instance identity: `flight-<number>-<ISO date>` or `journey-<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Identity of a flight instance.
    pub fn flight(flight_number: &str, flight_date: NaiveDate) -> Self {
        Self(format!("{FLIGHT_PREFIX}{flight_number}-{flight_date}"))
    }

    /// Identity of a journey instance.
    pub fn journey(journey_id: &str) -> Self {
        Self(format!("{JOURNEY_PREFIX}{journey_id}"))
    }

    /// Parse and validate an identifier.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInstanceId` when the value matches neither grammar.
    pub fn parse(value: &str) -> Result<Self> {
        if let Some(rest) = value.strip_prefix(FLIGHT_PREFIX) {
            split_flight(rest)
                .map(|_| Self(value.to_string()))
                .ok_or_else(|| {
                    Error::invalid_instance_id(value, "expected flight-<number>-<YYYY-MM-DD>")
                })
        } else if let Some(rest) = value.strip_prefix(JOURNEY_PREFIX) {
            if rest.is_empty() {
                Err(Error::invalid_instance_id(value, "journey id is empty"))
            } else {
                Ok(Self(value.to_string()))
            }
        } else {
            Err(Error::invalid_instance_id(
                value,
                "must start with 'flight-' or 'journey-'",
            ))
        }
    }

    /// The kind of instance this identity names.
    pub fn kind(&self) -> InstanceKind {
        if self.0.starts_with(JOURNEY_PREFIX) {
            InstanceKind::Journey
        } else {
            InstanceKind::Flight
        }
    }

    /// Flight number and date for flight identities.
    pub fn flight_parts(&self) -> Option<(&str, NaiveDate)> {
        self.0.strip_prefix(FLIGHT_PREFIX).and_then(split_flight)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn split_flight(rest: &str) -> Option<(&str, NaiveDate)> {
    let split = rest.len().checked_sub(DATE_LEN)?;
    let (head, date) = (rest.get(..split)?, rest.get(split..)?);
    let number = head.strip_suffix('-')?;
    if number.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((number, date))
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

/// Unique identifier of one run of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Create a new random run ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The run that launched a child instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub instance_id: InstanceId,
    pub run_id: RunId,
}

/// Recorded result of an external call or child execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded(serde_json::Value),
    Failed(String),
}

/// Journal entry for replay.
///
/// Every durable operation consumes one sequence number; all entries an
/// operation writes carry that number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A run started with this input.
    ExecutionStarted {
        run_id: RunId,
        kind: InstanceKind,
        input: serde_json::Value,
        parent: Option<ParentRef>,
        timestamp: DateTime<Utc>,
    },
    /// Logical clock read.
    ClockRead { seq: Seq, at: DateTime<Utc> },
    /// Timer armed.
    TimerScheduled {
        seq: Seq,
        fire_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// The timer armed at `timer` fired.
    TimerFired {
        seq: Seq,
        timer: Seq,
        timestamp: DateTime<Utc>,
    },
    /// Mailbox signals handed to the body, up to arrival number `through`.
    SignalsDelivered {
        seq: Seq,
        through: u64,
        signals: Vec<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
    /// External call about to be dispatched.
    EffectScheduled {
        seq: Seq,
        name: String,
        key: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// External call finished (after retries).
    EffectCompleted {
        seq: Seq,
        outcome: Outcome,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// Child instance launched.
    ChildStarted {
        seq: Seq,
        child: InstanceId,
        timestamp: DateTime<Utc>,
    },
    /// Child instance could not be launched.
    ChildStartFailed {
        seq: Seq,
        child: InstanceId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Child instance reached a terminal state.
    ChildCompleted {
        seq: Seq,
        child: InstanceId,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    },
    /// The run finished with this output.
    ExecutionCompleted {
        output: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl JournalEntry {
    /// Sequence number of the operation that wrote this entry.
    pub const fn seq(&self) -> Option<Seq> {
        match self {
            Self::ClockRead { seq, .. }
            | Self::TimerScheduled { seq, .. }
            | Self::TimerFired { seq, .. }
            | Self::SignalsDelivered { seq, .. }
            | Self::EffectScheduled { seq, .. }
            | Self::EffectCompleted { seq, .. }
            | Self::ChildStarted { seq, .. }
            | Self::ChildStartFailed { seq, .. }
            | Self::ChildCompleted { seq, .. } => Some(*seq),
            Self::ExecutionStarted { .. } | Self::ExecutionCompleted { .. } => None,
        }
    }

    /// Short description used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::ExecutionStarted { .. } => "execution start".to_string(),
            Self::ClockRead { .. } => "clock read".to_string(),
            Self::TimerScheduled { .. } => "timer".to_string(),
            Self::TimerFired { .. } => "timer fire".to_string(),
            Self::SignalsDelivered { .. } => "signal delivery".to_string(),
            Self::EffectScheduled { name, .. } => format!("effect '{name}'"),
            Self::EffectCompleted { .. } => "effect completion".to_string(),
            Self::ChildStarted { child, .. } | Self::ChildStartFailed { child, .. } => {
                format!("child start '{child}'")
            }
            Self::ChildCompleted { child, .. } => format!("child completion '{child}'"),
            Self::ExecutionCompleted { .. } => "execution completion".to_string(),
        }
    }
}

/// Start record of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRecord<'a> {
    pub run_id: RunId,
    pub kind: InstanceKind,
    pub input: &'a serde_json::Value,
    pub parent: Option<&'a ParentRef>,
}

/// Append-only journal of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    /// Journal entries in chronological order.
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Create a new empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn append(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// All entries.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The start record, if the first entry is one.
    pub fn start(&self) -> Option<StartRecord<'_>> {
        match self.entries.first() {
            Some(JournalEntry::ExecutionStarted {
                run_id,
                kind,
                input,
                parent,
                ..
            }) => Some(StartRecord {
                run_id: *run_id,
                kind: *kind,
                input,
                parent: parent.as_ref(),
            }),
            _ => None,
        }
    }

    /// Output of the run once it has completed.
    pub fn output(&self) -> Option<&serde_json::Value> {
        self.entries.iter().rev().find_map(|e| match e {
            JournalEntry::ExecutionCompleted { output, .. } => Some(output),
            _ => None,
        })
    }

    /// Check if the run has completed.
    pub fn is_completed(&self) -> bool {
        self.output().is_some()
    }

    /// Highest operation sequence number recorded.
    pub fn last_seq(&self) -> Option<Seq> {
        self.entries.iter().filter_map(JournalEntry::seq).max()
    }

    /// Number of effects whose completion is recorded.
    pub fn completed_effects(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, JournalEntry::EffectCompleted { .. }))
            .count()
    }
}

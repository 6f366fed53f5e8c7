//! Phase duration policy.

use std::time::Duration;

use jetstream_core::{DemoTiming, InFlightSource, OrchestratorConfig};
use jetstream_events::{Flight, FlightPhase};

const SECONDS_PER_MINUTE: u64 = 60;

/// How phase durations are derived for one flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// Base durations in minutes.
    Realtime,
    /// Base minutes divided by the speed factor, at least one second.
    DemoScaled { speed_factor: u64 },
    /// The same number of seconds for every phase.
    DemoFixed { seconds: u64 },
}

impl TimingMode {
    /// Select the mode from the flight's demo flag or identifier prefix.
    pub fn for_flight(config: &OrchestratorConfig, flight: &Flight) -> Self {
        if !is_demo(config, flight) {
            return Self::Realtime;
        }
        match config.demo.timing {
            DemoTiming::Scaled => Self::DemoScaled {
                speed_factor: config.demo.speed_factor.max(1),
            },
            DemoTiming::Fixed => Self::DemoFixed {
                seconds: config.demo.fixed_phase_seconds.max(1),
            },
        }
    }

    /// Real duration of a phase whose base length is `minutes`.
    pub fn scale(self, minutes: u64) -> Duration {
        match self {
            Self::Realtime => Duration::from_secs(minutes.saturating_mul(SECONDS_PER_MINUTE)),
            Self::DemoScaled { speed_factor } => {
                let seconds = minutes.saturating_mul(SECONDS_PER_MINUTE) / speed_factor.max(1);
                Duration::from_secs(seconds.max(1))
            }
            Self::DemoFixed { seconds } => Duration::from_secs(seconds),
        }
    }

    pub const fn is_demo(self) -> bool {
        !matches!(self, Self::Realtime)
    }
}

impl std::fmt::Display for TimingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Realtime => write!(f, "realtime"),
            Self::DemoScaled { speed_factor } => write!(f, "demo x{speed_factor}"),
            Self::DemoFixed { seconds } => write!(f, "demo {seconds}s/phase"),
        }
    }
}

/// Demo timing applies when the flag is set or the number carries the
/// configured prefix.
pub fn is_demo(config: &OrchestratorConfig, flight: &Flight) -> bool {
    let prefix = config.demo.identifier_prefix.as_str();
    flight.demo_mode || (!prefix.is_empty() && flight.flight_number.starts_with(prefix))
}

/// Sleep length of every non-terminal phase of one flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSchedule {
    mode: TimingMode,
    scheduled: Duration,
    boarding: Duration,
    departed: Duration,
    in_flight: Duration,
    landed: Duration,
}

impl PhaseSchedule {
    /// Compute the schedule for `flight`.
    pub fn for_flight(config: &OrchestratorConfig, flight: &Flight) -> Self {
        let mode = TimingMode::for_flight(config, flight);
        let phases = &config.phases;
        let in_flight_minutes = match phases.in_flight_source {
            InFlightSource::Schedule => flight
                .scheduled_block_minutes()
                .unwrap_or(phases.in_flight_minutes),
            InFlightSource::Fixed => phases.in_flight_minutes,
        };
        Self {
            mode,
            scheduled: mode.scale(phases.scheduled_minutes),
            boarding: mode.scale(phases.boarding_minutes),
            departed: mode.scale(phases.departed_minutes),
            in_flight: mode.scale(in_flight_minutes),
            landed: mode.scale(phases.landed_minutes),
        }
    }

    /// A schedule with the same duration for every phase.
    pub const fn uniform(duration: Duration) -> Self {
        Self {
            mode: TimingMode::Realtime,
            scheduled: duration,
            boarding: duration,
            departed: duration,
            in_flight: duration,
            landed: duration,
        }
    }

    pub const fn mode(&self) -> TimingMode {
        self.mode
    }

    /// Time spent in `phase` before advancing; `None` for terminal phases.
    pub const fn duration(&self, phase: FlightPhase) -> Option<Duration> {
        match phase {
            FlightPhase::Scheduled => Some(self.scheduled),
            FlightPhase::Boarding => Some(self.boarding),
            FlightPhase::Departed => Some(self.departed),
            FlightPhase::InFlight => Some(self.in_flight),
            FlightPhase::Landed => Some(self.landed),
            FlightPhase::Completed | FlightPhase::Cancelled => None,
        }
    }

    /// Sum of all phase durations.
    pub fn total(&self) -> Duration {
        FlightPhase::LIFECYCLE
            .iter()
            .filter_map(|p| self.duration(*p))
            .sum()
    }
}

/// Render a duration the way the lifecycle log lines show it.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < SECONDS_PER_MINUTE {
        format!("{seconds} seconds")
    } else if seconds < 3600 {
        format!("{} minutes", seconds / SECONDS_PER_MINUTE)
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / SECONDS_PER_MINUTE;
        if minutes > 0 {
            format!("{hours} hours {minutes} minutes")
        } else {
            format!("{hours} hours")
        }
    }
}

//! Multi-leg composer.
//!
//! Runs the legs of a journey one after another as child flight instances.
//! The aircraft of a finished leg carries over to the next one; a cancelled
//! or failed leg cancels every leg after it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use jetstream_core::JourneyConfig;
use jetstream_events::{Flight, FlightPhase};
use jetstream_workflow::{EffectFailure, ProjectionWriter, Wake};

use crate::error::Result;

/// Command delivered to a running journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JourneySignal {
    Cancel { reason: String },
}

/// Why a leg ended without flying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFailure {
    pub index: usize,
    pub flight_number: String,
    pub reason: String,
}

/// Queryable state of a journey instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyStatus {
    pub journey_id: String,
    pub legs: Vec<Flight>,
    pub current_leg_index: usize,
    pub cancelled: bool,
    pub cancellation_reason: Option<String>,
    pub leg_failure: Option<LegFailure>,
}

impl JourneyStatus {
    /// Initial status with each leg linked to its neighbours.
    pub fn new(journey_id: impl Into<String>, mut legs: Vec<Flight>) -> Self {
        link_legs(&mut legs);
        Self {
            journey_id: journey_id.into(),
            legs,
            current_leg_index: 0,
            cancelled: false,
            cancellation_reason: None,
            leg_failure: None,
        }
    }

    /// Latch cancellation. Returns true if this call set the latch.
    /// Latch cancellation with `reason`; true only the first time.
    fn latch_cancel(&mut self, reason: String) -> bool {
        let first = !self.cancelled;
        self.cancelled = true;
        self.cancellation_reason = Some(reason);
        first
    }

    fn cancel_from(&mut self, index: usize) {
        self.legs
            .iter_mut()
            .skip(index)
            .for_each(|leg| leg.phase = FlightPhase::Cancelled);
    }

    fn fail_leg(&mut self, index: usize, reason: String) {
        let flight_number = self
            .legs
            .get(index)
            .map(|l| l.flight_number.clone())
            .unwrap_or_default();
        warn!(
            journey_id = %self.journey_id,
            leg = index,
            flight_number = %flight_number,
            reason = %reason,
            "Leg failed; cancelling remaining legs"
        );
        self.leg_failure = Some(LegFailure {
            index,
            flight_number,
            reason,
        });
        self.cancel_from(index);
    }
}

/// Fill `previous_flight` and `next_flight` from adjacent legs.
pub fn link_legs(legs: &mut [Flight]) {
    let numbers: Vec<String> = legs.iter().map(|l| l.flight_number.clone()).collect();
    for (index, leg) in legs.iter_mut().enumerate() {
        leg.previous_flight = index
            .checked_sub(1)
            .and_then(|prev| numbers.get(prev))
            .cloned();
        leg.next_flight = numbers.get(index.saturating_add(1)).cloned();
    }
}

/// Journey behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JourneyOptions {
    pub turnaround: Duration,
    pub cancel_active_leg: bool,
}

impl From<&JourneyConfig> for JourneyOptions {
    fn from(config: &JourneyConfig) -> Self {
        Self {
            turnaround: config.turnaround(),
            cancel_active_leg: config.cancel_active_leg,
        }
    }
}

/// Capabilities a journey body may use.
#[async_trait]
pub trait JourneyRuntime: Send {
    type Timer: Send + Sync;

    fn is_replaying(&self) -> bool;

    /// Highest signal arrival number handed to the body so far.
    fn delivered_through(&self) -> u64;

    async fn drain_signals(&mut self) -> Result<Vec<JourneySignal>>;

    /// Launch `leg` as a child flight. The inner error is the launch
    /// failure reason.
    async fn start_leg(&mut self, leg: &Flight) -> Result<std::result::Result<(), String>>;

    /// Wait for the started leg to finish, waking early on signals.
    async fn wait_leg(
        &mut self,
        leg: &Flight,
    ) -> Result<Wake<JourneySignal, std::result::Result<Flight, String>>>;

    /// Forward a cancellation to the executing leg.
    async fn cancel_leg(
        &mut self,
        leg: &Flight,
        reason: &str,
    ) -> Result<std::result::Result<(), EffectFailure>>;

    async fn start_timer(&mut self, duration: Duration) -> Result<Self::Timer>;

    async fn wait_timer(&mut self, timer: &Self::Timer) -> Result<Wake<JourneySignal, ()>>;
}

/// Execute every leg of `status` in order.
///
/// # Errors
///
/// Returns runtime failures only; leg failures end up in the status.
pub async fn run_journey<R: JourneyRuntime>(
    runtime: &mut R,
    mut status: JourneyStatus,
    options: JourneyOptions,
    projection: &ProjectionWriter<JourneyStatus>,
) -> Result<JourneyStatus> {
    let total = status.legs.len();
    if !runtime.is_replaying() {
        info!(journey_id = %status.journey_id, legs = total, "Starting journey");
    }

    for index in 0..total {
        let early = runtime.drain_signals().await?;
        apply(&mut status, early);
        status.current_leg_index = index;

        if status.cancelled {
            if !runtime.is_replaying() {
                info!(
                    journey_id = %status.journey_id,
                    leg = index,
                    reason = status.cancellation_reason.as_deref().unwrap_or_default(),
                    "Journey cancelled before leg"
                );
            }
            status.cancel_from(index);
            break;
        }
        refresh(runtime, &status, projection);

        let Some(leg) = status.legs.get(index).cloned() else {
            break;
        };
        if !runtime.is_replaying() {
            info!(
                journey_id = %status.journey_id,
                leg = index,
                flight_number = %leg.flight_number,
                origin = %leg.origin,
                destination = %leg.destination,
                "Starting leg"
            );
        }

        if let Err(reason) = runtime.start_leg(&leg).await? {
            status.fail_leg(index, reason);
            break;
        }

        match wait_leg(runtime, &mut status, &leg, options, projection).await? {
            Ok(done) => {
                let cancelled = done.phase == FlightPhase::Cancelled;
                let aircraft = done.aircraft.clone();
                if let Some(slot) = status.legs.get_mut(index) {
                    *slot = done;
                }
                if cancelled {
                    if !runtime.is_replaying() {
                        warn!(
                            journey_id = %status.journey_id,
                            leg = index,
                            "Leg was cancelled; cancelling remaining legs"
                        );
                    }
                    status.cancel_from(index.saturating_add(1));
                    break;
                }
                if let (Some(aircraft), Some(next)) =
                    (aircraft, status.legs.get_mut(index.saturating_add(1)))
                {
                    next.aircraft = Some(aircraft);
                }
            }
            Err(reason) => {
                status.fail_leg(index, reason);
                break;
            }
        }
        refresh(runtime, &status, projection);

        if index.saturating_add(1) < total {
            turnaround(runtime, &mut status, options.turnaround, projection).await?;
        }
    }

    refresh(runtime, &status, projection);
    if !runtime.is_replaying() {
        info!(
            journey_id = %status.journey_id,
            current_leg_index = status.current_leg_index,
            cancelled = status.cancelled,
            "Journey finished"
        );
    }
    Ok(status)
}

fn refresh<R: JourneyRuntime>(
    runtime: &R,
    status: &JourneyStatus,
    projection: &ProjectionWriter<JourneyStatus>,
) {
    projection.publish(status.clone(), runtime.delivered_through());
}

/// Apply signals; returns the reason if cancellation was latched just now.
fn apply(status: &mut JourneyStatus, signals: Vec<JourneySignal>) -> Option<String> {
    let mut latched = None;
    for signal in signals {
        match signal {
            JourneySignal::Cancel { reason } => {
                if status.latch_cancel(reason.clone()) {
                    latched = Some(reason);
                }
            }
        }
    }
    latched
}

async fn wait_leg<R: JourneyRuntime>(
    runtime: &mut R,
    status: &mut JourneyStatus,
    leg: &Flight,
    options: JourneyOptions,
    projection: &ProjectionWriter<JourneyStatus>,
) -> Result<std::result::Result<Flight, String>> {
    loop {
        match runtime.wait_leg(leg).await? {
            Wake::Ready(outcome) => return Ok(outcome),
            Wake::Signals(signals) => {
                let latched = apply(status, signals);
                refresh(runtime, status, projection);
                let Some(reason) = latched else {
                    continue;
                };
                if !options.cancel_active_leg {
                    continue;
                }
                if let Err(failure) = runtime.cancel_leg(leg, &reason).await? {
                    warn!(
                        journey_id = %status.journey_id,
                        flight_number = %leg.flight_number,
                        error = %failure,
                        "Could not cancel active leg"
                    );
                }
            }
        }
    }
}

async fn turnaround<R: JourneyRuntime>(
    runtime: &mut R,
    status: &mut JourneyStatus,
    duration: Duration,
    projection: &ProjectionWriter<JourneyStatus>,
) -> Result<()> {
    let timer = runtime.start_timer(duration).await?;
    while let Wake::Signals(signals) = runtime.wait_timer(&timer).await? {
        apply(status, signals);
        refresh(runtime, status, projection);
    }
    Ok(())
}

//! Durable journey runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use jetstream_events::Flight;
use jetstream_workflow::{
    DurableContext, EffectError, EffectFailure, InstanceId, ParentRef, TimerHandle, Wake,
};

use super::composer::{JourneyRuntime, JourneySignal, JourneyStatus};
use crate::error::Result;

/// Effect name of a cancellation forwarded to the active leg.
pub const CANCEL_LEG: &str = "cancel_leg";

/// How a journey reaches its child flights.
#[async_trait]
pub trait LegLauncher: Send + Sync {
    /// Start `leg` as a child of `parent`.
    ///
    /// Must succeed without starting anything if this parent run already
    /// launched the leg.
    async fn launch_leg(&self, parent: &ParentRef, leg: &Flight) -> std::result::Result<(), String>;

    /// Resolves with the leg's final flight once it terminates.
    fn leg_outcome(&self, child: &InstanceId) -> BoxFuture<'static, std::result::Result<Flight, String>>;

    /// Send a cancellation to a running leg.
    async fn cancel_leg(&self, child: &InstanceId, reason: &str) -> std::result::Result<(), EffectError>;
}

/// Instance identity of a leg.
pub fn leg_id(leg: &Flight) -> InstanceId {
    InstanceId::flight(&leg.flight_number, leg.flight_date)
}

/// [`JourneyRuntime`] over a durable context.
pub struct DurableJourneyRuntime {
    ctx: DurableContext<JourneySignal>,
    parent: ParentRef,
    launcher: Arc<dyn LegLauncher>,
    active: Option<(InstanceId, BoxFuture<'static, std::result::Result<Flight, String>>)>,
}

impl DurableJourneyRuntime {
    pub fn new(ctx: DurableContext<JourneySignal>, launcher: Arc<dyn LegLauncher>) -> Self {
        let parent = ParentRef {
            instance_id: ctx.instance_id().clone(),
            run_id: ctx.run_id(),
        };
        Self {
            ctx,
            parent,
            launcher,
            active: None,
        }
    }

    /// Record the final status in the journal.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal cannot be written.
    pub async fn complete(&mut self, status: &JourneyStatus) -> Result<()> {
        Ok(self.ctx.complete(status).await?)
    }
}

#[async_trait]
impl JourneyRuntime for DurableJourneyRuntime {
    type Timer = TimerHandle;

    fn is_replaying(&self) -> bool {
        self.ctx.is_replaying()
    }

    fn delivered_through(&self) -> u64 {
        self.ctx.delivered_through()
    }

    async fn drain_signals(&mut self) -> Result<Vec<JourneySignal>> {
        Ok(self.ctx.drain_signals().await?)
    }

    async fn start_leg(&mut self, leg: &Flight) -> Result<std::result::Result<(), String>> {
        let child = leg_id(leg);
        let launcher = Arc::clone(&self.launcher);
        let parent = self.parent.clone();
        let leg = leg.clone();
        let started = self
            .ctx
            .start_child(&child, move || async move {
                launcher.launch_leg(&parent, &leg).await
            })
            .await?;
        Ok(started)
    }

    async fn wait_leg(
        &mut self,
        leg: &Flight,
    ) -> Result<Wake<JourneySignal, std::result::Result<Flight, String>>> {
        let child = leg_id(leg);
        let mut completion = match self.active.take() {
            Some((id, pending)) if id == child => pending,
            _ => self.launcher.leg_outcome(&child),
        };
        let woke = self.ctx.wait_child(&child, &mut completion).await?;
        if matches!(woke, Wake::Signals(_)) {
            self.active = Some((child, completion));
        }
        Ok(woke)
    }

    async fn cancel_leg(
        &mut self,
        leg: &Flight,
        reason: &str,
    ) -> Result<std::result::Result<(), EffectFailure>> {
        let child = leg_id(leg);
        let launcher = Arc::clone(&self.launcher);
        let reason = reason.to_string();
        let outcome = self
            .ctx
            .call_effect(CANCEL_LEG, move |_| {
                let launcher = Arc::clone(&launcher);
                let child = child.clone();
                let reason = reason.clone();
                async move { launcher.cancel_leg(&child, &reason).await }
            })
            .await?;
        Ok(outcome)
    }

    async fn start_timer(&mut self, duration: Duration) -> Result<TimerHandle> {
        Ok(self.ctx.start_timer(duration).await?)
    }

    async fn wait_timer(&mut self, timer: &TimerHandle) -> Result<Wake<JourneySignal, ()>> {
        Ok(self.ctx.wait_timer(timer).await?)
    }
}

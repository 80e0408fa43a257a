//! Telemetry Publisher: stage position stream.
//!
//! Polls the stage every `poll_interval`, stores the reading in the shared
//! position and emits a `position` message when the value changed or
//! `max_emit_interval` passed since the last emission.  Without an attached
//! or ready stage the shared position (kept current by the executor) is
//! published instead.  Every successful reading is also fed to the executor
//! so a pending move ends once the stage has settled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stagelink_hal::{SharedStage, lock};
use stagelink_types::{LinkError, OutboundMessage};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::state::{SessionState, Station};

/// Change-or-heartbeat emission rule.
#[derive(Debug)]
pub(crate) struct EmitGate {
    last_value: Option<f64>,
    last_emit: Option<Instant>,
    max_interval: Duration,
}

impl EmitGate {
    pub(crate) fn new(max_interval: Duration) -> Self {
        Self {
            last_value: None,
            last_emit: None,
            max_interval,
        }
    }

    pub(crate) fn should_emit(&self, value: f64, now: Instant) -> bool {
        match (self.last_value, self.last_emit) {
            (Some(last), Some(at)) => {
                last != value || now.saturating_duration_since(at) >= self.max_interval
            }
            _ => true,
        }
    }

    pub(crate) fn emitted(&mut self, value: f64, now: Instant) {
        self.last_value = Some(value);
        self.last_emit = Some(now);
    }
}

/// `Ok(None)` when the stage is not ready.
fn read_stage(stage: &SharedStage) -> Result<Option<f64>, LinkError> {
    let mut stage = lock(stage);
    if !stage.is_ready() {
        return Ok(None);
    }
    stage.position().map(Some)
}

/// Run until the session is cancelled or the channel fails.
///
/// # Errors
///
/// The transport error that ended the session.
pub async fn run(station: Arc<Station>, session: Arc<SessionState>) -> Result<(), LinkError> {
    let cancel = session.link.cancel_token().clone();
    let telemetry = &station.config.telemetry;
    let mut gate = EmitGate::new(telemetry.max_emit_interval());
    let mut interval = tokio::time::interval(telemetry.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Some(stage) = station.rig.stage().cloned() {
            match station.pool.run(move || read_stage(&stage)).await.and_then(|r| r) {
                Ok(Some(value)) => {
                    if failures > 0 {
                        debug!(failures, "position reads recovered");
                    }
                    failures = 0;
                    station.position.set(value);
                    station.executor.observe(value);
                }
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        warn!(error = %e, "position read failed");
                    } else {
                        debug!(failures, error = %e, "position read still failing");
                    }
                    continue;
                }
            }
        }

        let value = station.position.value();
        let now = Instant::now();
        if !gate.should_emit(value, now) {
            continue;
        }
        let message = OutboundMessage::Position {
            station_id: station.station_id().to_string(),
            value,
            timestamp: Utc::now(),
        };
        match session.link.send(&message).await {
            Ok(()) => gate.emitted(value, now),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!(error = %e, "position update dropped"),
        }
    }

    debug!("telemetry publisher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_reading_always_emits() {
        let gate = EmitGate::new(Duration::from_secs(1));
        assert!(gate.should_emit(0.0, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_value_waits_for_max_interval() {
        let mut gate = EmitGate::new(Duration::from_secs(1));
        let t0 = Instant::now();
        gate.emitted(2.5, t0);
        assert!(!gate.should_emit(2.5, t0 + Duration::from_millis(50)));
        assert!(!gate.should_emit(2.5, t0 + Duration::from_millis(999)));
        assert!(gate.should_emit(2.5, t0 + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn changed_value_emits_immediately() {
        let mut gate = EmitGate::new(Duration::from_secs(1));
        let t0 = Instant::now();
        gate.emitted(2.5, t0);
        assert!(gate.should_emit(2.505, t0 + Duration::from_millis(50)));
    }

    #[test]
    fn unready_stage_reads_none() {
        use stagelink_hal::MotionController;
        use stagelink_hal::sim::SimStage;
        let stage: SharedStage = Arc::new(std::sync::Mutex::new(
            Box::new(SimStage::new("x_stage")) as Box<dyn MotionController>
        ));
        assert_eq!(read_stage(&stage).unwrap(), None);
        lock(&stage).initialize().unwrap();
        assert_eq!(read_stage(&stage).unwrap(), Some(0.0));
    }
}
